use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::Deserialize;
use validator::Validate;

use crate::{
    auth::{hash_password, AuthUser},
    error::ClinicError,
    models::{NewProcedure, NewUser, Role},
    state::AppState,
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/procedures")
            .route(web::get().to(list_procedures))
            .route(web::post().to(create_procedure)),
    )
    .service(
        web::resource("/users")
            .route(web::get().to(list_users))
            .route(web::post().to(create_user)),
    );
}

async fn list_procedures(state: web::Data<AppState>) -> Result<HttpResponse, ClinicError> {
    Ok(HttpResponse::Ok().json(state.store.list_procedures().await?))
}

async fn create_procedure(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    body: web::Json<NewProcedure>,
) -> Result<HttpResponse, ClinicError> {
    auth.require_admin()?;
    let new = body.into_inner();
    new.validate()?;
    let procedure = state.store.insert_procedure(new, Utc::now()).await?;
    log::info!("{} added procedure {}", auth.username, procedure.name);
    Ok(HttpResponse::Created().json(procedure))
}

async fn list_users(state: web::Data<AppState>) -> Result<HttpResponse, ClinicError> {
    Ok(HttpResponse::Ok().json(state.store.list_users().await?))
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct UserForm {
    #[validate(length(min = 3, max = 60))]
    username: String,
    #[validate(length(min = 1, max = 120))]
    name: String,
    role: Role,
    #[validate(length(min = 8))]
    password: String,
}

async fn create_user(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    body: web::Json<UserForm>,
) -> Result<HttpResponse, ClinicError> {
    auth.require_admin()?;
    let form = body.into_inner();
    form.validate()?;

    let password_hash = hash_password(&form.password).map_err(|err| {
        log::error!("Password hash failed: {err}");
        ClinicError::validation("Password could not be processed")
    })?;
    let user = state
        .store
        .insert_user(
            NewUser {
                username: form.username.trim().to_string(),
                name: form.name,
                role: form.role,
                password_hash,
            },
            Utc::now(),
        )
        .await?;
    log::info!("{} created user {} as {}", auth.username, user.username, user.role.as_str());
    Ok(HttpResponse::Created().json(user))
}
