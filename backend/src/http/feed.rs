use actix_web::{delete, get, patch, post, web, HttpRequest, HttpResponse};

use crate::feed::{NewPost, PostUpdate};
use crate::http::{self, PageParams};
use crate::BackendService;

#[post("/artists/{handle}/posts")]
pub async fn create_post(
    request: HttpRequest,
    path: web::Path<(String,)>,
    body: web::Json<NewPost>,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let user = http::get_session_user(&request, &service)?;
    let post = service
        .feed
        .create_post(&path.0.0, body.into_inner(), &user.user_id)
        .await?;
    Ok(HttpResponse::Created().json(&post))
}

/// Public. Newest first, paged with an opaque `cursor`.
#[get("/artists/{handle}/posts")]
pub async fn list_posts(
    path: web::Path<(String,)>,
    params: web::Query<PageParams>,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let page = service
        .feed
        .list_posts(&path.0.0, params.limit(), params.cursor())
        .await?;
    Ok(HttpResponse::Ok().json(&page))
}

#[get("/artists/{handle}/posts/{post_id}")]
pub async fn get_post(
    path: web::Path<(String, String)>,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let post = service.feed.get_post(&path.0.0, &path.0.1).await?;
    Ok(HttpResponse::Ok().json(&post))
}

#[patch("/artists/{handle}/posts/{post_id}")]
pub async fn update_post(
    request: HttpRequest,
    path: web::Path<(String, String)>,
    body: web::Json<PostUpdate>,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let user = http::get_session_user(&request, &service)?;
    let post = service
        .feed
        .update_post(&path.0.0, &path.0.1, body.into_inner(), &user.user_id)
        .await?;
    Ok(HttpResponse::Ok().json(&post))
}

#[delete("/artists/{handle}/posts/{post_id}")]
pub async fn delete_post(
    request: HttpRequest,
    path: web::Path<(String, String)>,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let user = http::get_session_user(&request, &service)?;
    service
        .feed
        .delete_post(&path.0.0, &path.0.1, &user.user_id)
        .await?;
    Ok(http::no_content())
}

/// Posts from every artist the caller follows, newest first.
#[get("/feed")]
pub async fn my_feed(
    request: HttpRequest,
    params: web::Query<PageParams>,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let user = http::get_session_user(&request, &service)?;
    let page = service
        .feed
        .my_feed(&user.user_id, params.limit(), params.cursor())
        .await?;
    Ok(HttpResponse::Ok().json(&page))
}
