use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::{
    error::ClinicError,
    models::{AppointmentStatus, NewAppointment, Slot},
    state::{AppState, ServerEvent},
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/appointments")
            .route(web::get().to(list_appointments))
            .route(web::post().to(create_appointment)),
    )
    // Must precede `/appointments/{id}`.
    .service(web::resource("/appointments/availability").route(web::get().to(availability)))
    .service(web::resource("/appointments/{id}").route(web::get().to(get_appointment)))
    .service(web::resource("/appointments/{id}/status").route(web::patch().to(update_status)));
}

async fn list_appointments(state: web::Data<AppState>) -> Result<HttpResponse, ClinicError> {
    Ok(HttpResponse::Ok().json(state.scheduler.list_views().await?))
}

async fn create_appointment(
    state: web::Data<AppState>,
    body: web::Json<NewAppointment>,
) -> Result<HttpResponse, ClinicError> {
    let booking = state.scheduler.create_appointment(body.into_inner()).await?;

    state.publish(ServerEvent::appointment(
        ServerEvent::APPOINTMENT_CREATED,
        &booking.appointment,
    ));
    state.publish_stage_change(booking.stage_change.as_ref());

    Ok(HttpResponse::Created().json(booking.appointment))
}

async fn availability(
    state: web::Data<AppState>,
    query: web::Query<Slot>,
) -> Result<HttpResponse, ClinicError> {
    let available = state.scheduler.is_slot_available(&query).await?;
    Ok(HttpResponse::Ok().json(json!({ "available": available })))
}

async fn get_appointment(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ClinicError> {
    let appointment = state.scheduler.get_appointment(&path).await?;
    Ok(HttpResponse::Ok().json(appointment))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct StatusBody {
    status: AppointmentStatus,
}

async fn update_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<StatusBody>,
) -> Result<HttpResponse, ClinicError> {
    let change = state.scheduler.update_status(&path, body.status).await?;

    state.publish(ServerEvent::appointment(
        ServerEvent::APPOINTMENT_UPDATED,
        &change.appointment,
    ));
    state.publish_stage_change(change.stage_change.as_ref());

    Ok(HttpResponse::Ok().json(change.appointment))
}
