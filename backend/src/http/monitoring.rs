use actix_web::{get, web, HttpResponse};

use crate::error::AppError;
use crate::BackendService;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

#[get("/metrics")]
pub async fn metrics(service: web::Data<BackendService>) -> actix_web::Result<HttpResponse> {
    let body = service
        .metrics
        .render()
        .ok_or_else(|| AppError::NotImplemented("metrics are disabled".to_string()))?;
    Ok(HttpResponse::Ok()
        .content_type(PROMETHEUS_CONTENT_TYPE)
        .body(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    use actix_web::http::StatusCode;
    use actix_web::test::{self, TestRequest};
    use actix_web::App;

    use crate::http;
    use crate::testing::default_backend_service;

    #[actix_rt::test]
    async fn test_second_session_in_a_month_is_not_counted() {
        let data = web::Data::new(default_backend_service().await);
        let mut app =
            test::init_service(App::new().app_data(data.clone()).configure(http::configure))
                .await;
        let policy = data.auth.get_client("web").await.unwrap().unwrap();
        data.auth.new_session("u_1", &policy).await.unwrap();
        data.auth.new_session("u_1", &policy).await.unwrap();

        let request = TestRequest::get().uri("/metrics").to_request();
        let response = test::call_service(&mut app, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = test::read_body(response).await;
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("mau_unique_users_seen_total 1\n"), "{}", body);

        data.auth.new_session("u_2", &policy).await.unwrap();
        let request = TestRequest::get().uri("/metrics").to_request();
        let body = test::read_body(test::call_service(&mut app, request).await).await;
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("mau_unique_users_seen_total 2\n"), "{}", body);
    }
}
