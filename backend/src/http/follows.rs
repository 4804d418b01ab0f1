use actix_web::{delete, get, post, web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::http;
use crate::BackendService;

#[post("/users/me/following/{handle}")]
pub async fn follow(
    request: HttpRequest,
    path: web::Path<(String,)>,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let user = http::get_session_user(&request, &service)?;
    service.follows.follow(&user.user_id, &path.0.0).await?;
    Ok(http::no_content())
}

#[delete("/users/me/following/{handle}")]
pub async fn unfollow(
    request: HttpRequest,
    path: web::Path<(String,)>,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let user = http::get_session_user(&request, &service)?;
    service.follows.unfollow(&user.user_id, &path.0.0).await?;
    Ok(http::no_content())
}

#[get("/users/me/following")]
pub async fn list_following(
    request: HttpRequest,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let user = http::get_session_user(&request, &service)?;
    let handles = service.follows.list_following(&user.user_id).await?;
    Ok(HttpResponse::Ok().json(json!({ "handles": handles })))
}

#[get("/users/me/following/{handle}")]
pub async fn is_following(
    request: HttpRequest,
    path: web::Path<(String,)>,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let user = http::get_session_user(&request, &service)?;
    let following = service.follows.is_following(&user.user_id, &path.0.0).await?;
    Ok(HttpResponse::Ok().json(json!({ "following": following })))
}

#[derive(Debug, Deserialize)]
pub struct FollowersParams {
    pub limit: Option<String>,
}

/// Public. Most recent followers first.
#[get("/artists/{handle}/followers")]
pub async fn list_followers(
    path: web::Path<(String,)>,
    params: web::Query<FollowersParams>,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let limit = params
        .limit
        .as_deref()
        .and_then(|s| s.trim().parse::<usize>().ok());
    let followers = service.follows.list_followers(&path.0.0, limit).await?;
    Ok(HttpResponse::Ok().json(json!({ "followers": followers })))
}

#[cfg(test)]
mod tests {
    use super::*;

    use actix_web::http::StatusCode;
    use actix_web::test::TestRequest;
    use actix_web::{test, App};
    use serde_json::Value;

    use crate::testing::{bearer, default_backend_service};

    #[actix_rt::test]
    async fn test_follow_flow() {
        let data = web::Data::new(default_backend_service().await);
        data.artists
            .create("u_owner", "band", "The Band", "")
            .await
            .unwrap();
        let token = bearer(&data, "u_fan").await;
        let mut app =
            test::init_service(App::new().app_data(data.clone()).configure(http::configure))
                .await;

        // Twice, to check it is idempotent.
        for _ in 0..2 {
            let request = TestRequest::post()
                .uri("/v1/users/me/following/Band")
                .header("Authorization", token.clone())
                .to_request();
            let response = test::call_service(&mut app, request).await;
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }

        let request = TestRequest::get()
            .uri("/v1/users/me/following")
            .header("Authorization", token.clone())
            .to_request();
        let body: Value = test::read_response_json(&mut app, request).await;
        assert_eq!(body, json!({ "handles": ["band"] }));

        let request = TestRequest::get()
            .uri("/v1/users/me/following/band")
            .header("Authorization", token.clone())
            .to_request();
        let body: Value = test::read_response_json(&mut app, request).await;
        assert_eq!(body, json!({ "following": true }));

        let request = TestRequest::get()
            .uri("/v1/artists/band/followers?limit=abc")
            .to_request();
        let body: Value = test::read_response_json(&mut app, request).await;
        assert_eq!(body["followers"].as_array().unwrap().len(), 1);
        assert_eq!(body["followers"][0]["user_id"], "u_fan");
        assert_eq!(data.artists.get("band").await.unwrap().follower_count, 1);

        let request = TestRequest::delete()
            .uri("/v1/users/me/following/band")
            .header("Authorization", token.clone())
            .to_request();
        let response = test::call_service(&mut app, request).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(data.artists.get("band").await.unwrap().follower_count, 0);

        let request = TestRequest::get()
            .uri("/v1/users/me/following/band")
            .header("Authorization", token)
            .to_request();
        let body: Value = test::read_response_json(&mut app, request).await;
        assert_eq!(body, json!({ "following": false }));
    }

    #[actix_rt::test]
    async fn test_follow_errors() {
        let data = web::Data::new(default_backend_service().await);
        let token = bearer(&data, "u_fan").await;
        let mut app =
            test::init_service(App::new().app_data(data.clone()).configure(http::configure))
                .await;

        let request = TestRequest::post()
            .uri("/v1/users/me/following/nobody")
            .header("Authorization", token)
            .to_request();
        let response = test::call_service(&mut app, request).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let request = TestRequest::post()
            .uri("/v1/users/me/following/nobody")
            .to_request();
        let response = test::call_service(&mut app, request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let request = TestRequest::get()
            .uri("/v1/artists/nobody/followers")
            .to_request();
        let response = test::call_service(&mut app, request).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
