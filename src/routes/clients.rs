use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::Deserialize;
use validator::Validate;

use crate::{
    error::ClinicError,
    models::{ClientUpdate, FunnelStage, NewClient},
    state::{AppState, ServerEvent},
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/clients")
            .route(web::get().to(list_clients))
            .route(web::post().to(create_client)),
    )
    .service(
        web::resource("/clients/{id}")
            .route(web::get().to(get_client))
            .route(web::patch().to(update_client)),
    )
    .service(web::resource("/clients/{id}/funnel-stage").route(web::patch().to(set_funnel_stage)));
}

async fn list_clients(state: web::Data<AppState>) -> Result<HttpResponse, ClinicError> {
    Ok(HttpResponse::Ok().json(state.store.list_clients().await?))
}

async fn create_client(
    state: web::Data<AppState>,
    body: web::Json<NewClient>,
) -> Result<HttpResponse, ClinicError> {
    let new = body.into_inner();
    new.validate()?;
    let client = state.store.insert_client(new, Utc::now()).await?;
    log::info!("Created client {} at {}", client.id, client.funnel_stage);
    Ok(HttpResponse::Created().json(client))
}

async fn get_client(state: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ClinicError> {
    let client = state
        .store
        .get_client(&path)
        .await?
        .ok_or(ClinicError::NotFound("Client"))?;
    Ok(HttpResponse::Ok().json(client))
}

async fn update_client(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<ClientUpdate>,
) -> Result<HttpResponse, ClinicError> {
    let update = body.into_inner();
    update.validate()?;

    let before = state
        .store
        .get_client(&path)
        .await?
        .ok_or(ClinicError::NotFound("Client"))?;
    let client = state
        .store
        .update_client(&path, update, Utc::now())
        .await?
        .ok_or(ClinicError::NotFound("Client"))?;

    if client.funnel_stage != before.funnel_stage {
        log::info!(
            "Client {} moved from {} to {}",
            client.id,
            before.funnel_stage,
            client.funnel_stage
        );
        state.publish(ServerEvent::client_stage(&client));
    }
    Ok(HttpResponse::Ok().json(client))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct StageBody {
    funnel_stage: FunnelStage,
}

async fn set_funnel_stage(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<StageBody>,
) -> Result<HttpResponse, ClinicError> {
    let change = state.funnel.set_stage(&path, body.funnel_stage).await?;
    state.publish_stage_change(Some(&change));
    Ok(HttpResponse::Ok().json(change.client))
}
