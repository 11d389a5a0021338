use actix_web::{web, HttpResponse};
use chrono::Local;

use crate::{dashboard::summarize, error::ClinicError, state::AppState};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/dashboard").route(web::get().to(dashboard)));
}

async fn dashboard(state: web::Data<AppState>) -> Result<HttpResponse, ClinicError> {
    let today = Local::now().date_naive();
    Ok(HttpResponse::Ok().json(summarize(&state, today).await?))
}
