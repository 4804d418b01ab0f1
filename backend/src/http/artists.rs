use actix_web::{delete, get, patch, post, web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::http;
use crate::BackendService;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateArtistRequest {
    pub handle: String,
    pub display_name: String,
    pub bio: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateArtistRequest {
    pub display_name: Option<String>,
    pub bio: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AddMemberRequest {
    pub user_id: String,
    pub roles: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UpdateMemberRequest {
    pub roles: Vec<String>,
}

#[post("/artists")]
pub async fn create(
    request: HttpRequest,
    body: web::Json<CreateArtistRequest>,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let user = http::get_session_user(&request, &service)?;
    let artist = service
        .artists
        .create(&user.user_id, &body.handle, &body.display_name, &body.bio)
        .await?;
    Ok(HttpResponse::Created().json(&artist))
}

/// Pages the caller owns or is a member of.
#[get("/artists/me")]
pub async fn list_mine(
    request: HttpRequest,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let user = http::get_session_user(&request, &service)?;
    let artists = service.artists.list_for_user(&user.user_id).await?;
    Ok(HttpResponse::Ok().json(json!({ "artists": artists })))
}

#[get("/artists/{handle}")]
pub async fn get(
    path: web::Path<(String,)>,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let artist = service.artists.get(&path.0.0).await?;
    Ok(HttpResponse::Ok().json(&artist))
}

#[patch("/artists/{handle}")]
pub async fn update(
    request: HttpRequest,
    path: web::Path<(String,)>,
    body: web::Json<UpdateArtistRequest>,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let user = http::get_session_user(&request, &service)?;
    let artist = service
        .artists
        .update(
            &path.0.0,
            body.display_name.as_deref(),
            body.bio.as_deref(),
            &user.user_id,
        )
        .await?;
    Ok(HttpResponse::Ok().json(&artist))
}

#[delete("/artists/{handle}")]
pub async fn delete(
    request: HttpRequest,
    path: web::Path<(String,)>,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let user = http::get_session_user(&request, &service)?;
    service.feed.delete_artist(&path.0.0, &user.user_id).await?;
    Ok(http::no_content())
}

#[get("/artists/{handle}/members")]
pub async fn list_members(
    request: HttpRequest,
    path: web::Path<(String,)>,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let user = http::get_session_user(&request, &service)?;
    let members = service.artists.list_members(&path.0.0, &user.user_id).await?;
    Ok(HttpResponse::Ok().json(json!({ "members": members })))
}

#[post("/artists/{handle}/members")]
pub async fn add_member(
    request: HttpRequest,
    path: web::Path<(String,)>,
    body: web::Json<AddMemberRequest>,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let user = http::get_session_user(&request, &service)?;
    let member = service
        .artists
        .add_member(&path.0.0, &body.user_id, &body.roles, &user.user_id)
        .await?;
    Ok(HttpResponse::Created().json(&member))
}

#[patch("/artists/{handle}/members/{user_id}")]
pub async fn update_member(
    request: HttpRequest,
    path: web::Path<(String, String)>,
    body: web::Json<UpdateMemberRequest>,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let user = http::get_session_user(&request, &service)?;
    let member = service
        .artists
        .update_member_roles(&path.0.0, &path.0.1, &body.roles, &user.user_id)
        .await?;
    Ok(HttpResponse::Ok().json(&member))
}

#[delete("/artists/{handle}/members/{user_id}")]
pub async fn remove_member(
    request: HttpRequest,
    path: web::Path<(String, String)>,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let user = http::get_session_user(&request, &service)?;
    service
        .artists
        .remove_member(&path.0.0, &path.0.1, &user.user_id)
        .await?;
    Ok(http::no_content())
}
