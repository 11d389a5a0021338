pub mod appointments;
pub mod catalog;
pub mod clients;
pub mod dashboard;
pub mod events;
pub mod notifications;
pub mod public;

use actix_web::{middleware::from_fn, web};

use crate::{auth::session_gate, error::ClinicError};

/// Public routes first, then everything else behind the session gate.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .app_data(query_config())
        .app_data(path_config())
        .configure(public::configure)
        .service(
            web::scope("")
                .wrap(from_fn(session_gate))
                .configure(public::configure_session)
                .configure(appointments::configure)
                .configure(clients::configure)
                .configure(catalog::configure)
                .configure(notifications::configure)
                .configure(dashboard::configure)
                .configure(events::configure),
        );
}

fn rejected(message: &str, detail: String) -> actix_web::Error {
    ClinicError::Validation {
        message: message.to_string(),
        errors: vec![detail],
    }
    .into()
}

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| rejected("Invalid request body", err.to_string()))
}

fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err, _req| rejected("Invalid query string", err.to_string()))
}

fn path_config() -> web::PathConfig {
    web::PathConfig::default().error_handler(|err, _req| rejected("Invalid path", err.to_string()))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use actix_web_httpauth::headers::authorization::{Authorization, Basic};
    use chrono::Utc;

    use crate::{
        auth::hash_password,
        models::{NewUser, Role, User},
        state::AppState,
        store::{memory::MemoryStore, Store},
    };

    /// Builds the full application over `state`, as `main` does.
    macro_rules! test_app {
        ($state:expr) => {
            actix_web::test::init_service(
                actix_web::App::new()
                    .app_data(actix_web::web::Data::new($state.clone()))
                    .configure($crate::routes::configure),
            )
            .await
        };
    }
    pub(crate) use test_app;

    pub const ADMIN: (&str, &str) = ("admin", "admin-pass");
    pub const DESK: (&str, &str) = ("desk", "desk-pass");

    pub struct TestClinic {
        pub state: AppState,
        pub admin: User,
        pub desk: User,
    }

    pub async fn clinic() -> TestClinic {
        let store = Arc::new(MemoryStore::new());
        let admin = add_user(store.as_ref(), ADMIN, "Administrator", Role::Admin).await;
        let desk = add_user(store.as_ref(), DESK, "Front Desk", Role::Receptionist).await;
        TestClinic {
            state: AppState::new(store, 16),
            admin,
            desk,
        }
    }

    async fn add_user(store: &dyn Store, (username, password): (&str, &str), name: &str, role: Role) -> User {
        store
            .insert_user(
                NewUser {
                    username: username.into(),
                    name: name.into(),
                    role,
                    password_hash: hash_password(password).unwrap(),
                },
                Utc::now(),
            )
            .await
            .unwrap()
    }

    pub fn basic((username, password): (&'static str, &'static str)) -> Authorization<Basic> {
        Authorization::from(Basic::new(username, Some(password)))
    }
}
