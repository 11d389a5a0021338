use actix_web::{http::header, web, HttpRequest, HttpResponse};
use serde_json::json;

use crate::{
    auth::{clear_logout_cookie, credentials_from_request, logout_cookie, AuthUser},
    error::ClinicError,
    state::AppState,
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/auth/login").route(web::post().to(login)))
        .service(web::resource("/auth/logout").route(web::post().to(logout)));
}

/// Session routes that need an authenticated caller.
pub fn configure_session(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/auth/me").route(web::get().to(me)));
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

/// Checks the Basic credentials and lifts a previous logout.
async fn login(state: web::Data<AppState>, req: HttpRequest) -> Result<HttpResponse, ClinicError> {
    let user = credentials_from_request(&state, &req)
        .await?
        .ok_or(ClinicError::Unauthorized)?;
    log::info!("User {} logged in", user.username);

    Ok(HttpResponse::Ok()
        .cookie(clear_logout_cookie(&req))
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .json(user))
}

async fn logout(req: HttpRequest) -> HttpResponse {
    HttpResponse::Ok()
        .cookie(logout_cookie(&req))
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .json(json!({ "message": "Logged out" }))
}

async fn me(auth: web::ReqData<AuthUser>) -> HttpResponse {
    HttpResponse::Ok().json(auth.into_inner())
}
