use actix_web::{web, HttpResponse};
use chrono::Utc;
use validator::Validate;

use crate::{auth::AuthUser, error::ClinicError, models::NewNotification, state::AppState};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/notifications")
            .route(web::get().to(my_notifications))
            .route(web::post().to(create_notification)),
    )
    .service(web::resource("/notifications/{id}/read").route(web::patch().to(mark_read)));
}

async fn my_notifications(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse, ClinicError> {
    Ok(HttpResponse::Ok().json(state.store.notifications_for_user(&auth.id).await?))
}

async fn create_notification(
    state: web::Data<AppState>,
    body: web::Json<NewNotification>,
) -> Result<HttpResponse, ClinicError> {
    let new = body.into_inner();
    new.validate()?;
    state
        .store
        .get_user(&new.user_id)
        .await?
        .ok_or(ClinicError::NotFound("User"))?;
    let notification = state.store.insert_notification(new, Utc::now()).await?;
    Ok(HttpResponse::Created().json(notification))
}

async fn mark_read(state: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ClinicError> {
    let notification = state
        .store
        .mark_notification_read(&path)
        .await?
        .ok_or(ClinicError::NotFound("Notification"))?;
    Ok(HttpResponse::Ok().json(notification))
}

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, test};
    use serde_json::{json, Value};

    use crate::routes::test_support::{basic, clinic, test_app, ADMIN, DESK};

    #[actix_web::test]
    async fn inbox_is_per_user() {
        let clinic = clinic().await;
        let app = test_app!(clinic.state);

        let req = test::TestRequest::post()
            .uri("/notifications")
            .insert_header(basic(ADMIN))
            .set_json(json!({
                "userId": clinic.desk.id,
                "title": "Supplies",
                "description": "Gloves are running low",
                "type": "WARNING"
            }))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let created: Value = test::read_body_json(res).await;
        assert_eq!(created["type"], "WARNING");
        assert_eq!(created["read"], false);

        let req = test::TestRequest::get()
            .uri("/notifications")
            .insert_header(basic(ADMIN))
            .to_request();
        let admin_inbox: Value = test::call_and_read_body_json(&app, req).await;
        assert!(admin_inbox.as_array().unwrap().is_empty());

        let req = test::TestRequest::patch()
            .uri(&format!("/notifications/{}/read", created["id"].as_str().unwrap()))
            .insert_header(basic(DESK))
            .to_request();
        let read: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(read["read"], true);

        let req = test::TestRequest::get()
            .uri("/notifications")
            .insert_header(basic(DESK))
            .to_request();
        let desk_inbox: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(desk_inbox[0]["title"], "Supplies");
        assert_eq!(desk_inbox[0]["read"], true);
    }

    #[actix_web::test]
    async fn unknown_targets_are_not_found() {
        let clinic = clinic().await;
        let app = test_app!(clinic.state);

        let req = test::TestRequest::post()
            .uri("/notifications")
            .insert_header(basic(ADMIN))
            .set_json(json!({ "userId": "ghost", "title": "Hi", "description": "there" }))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::patch()
            .uri("/notifications/ghost/read")
            .insert_header(basic(ADMIN))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
