use actix_web::{
    body::{BoxBody, MessageBody},
    cookie::{time::Duration, Cookie, SameSite},
    dev::{ServiceRequest, ServiceResponse},
    http::header::Header,
    middleware::Next,
    web, Error, HttpMessage, HttpRequest, ResponseError,
};
use actix_web_httpauth::headers::authorization::{Authorization, Basic};
use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand_core::OsRng;
use serde::Serialize;

use crate::{
    error::ClinicError,
    models::{Role, User},
    state::AppState,
    store::Store,
};

pub const AUTH_REALM: &str = "ClinicFlow";
const LOGOUT_COOKIE: &str = "clinicflow_logged_out";

/// The caller, as resolved by [`session_gate`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: String,
    pub username: String,
    pub name: String,
    pub role: Role,
}

impl AuthUser {
    pub fn require_admin(&self) -> Result<(), ClinicError> {
        if self.role == Role::Admin {
            Ok(())
        } else {
            Err(ClinicError::Forbidden("Admin access required"))
        }
    }
}

impl From<User> for AuthUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            name: user.name,
            role: user.role,
        }
    }
}

pub fn hash_password(password: &str) -> Result<String, password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, password_hash: &str) -> bool {
    match PasswordHash::new(password_hash) {
        Ok(hash) => Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok(),
        Err(_) => false,
    }
}

/// `None` for an unknown user or a wrong password.
pub async fn authenticate_credentials(
    store: &dyn Store,
    username: &str,
    password: &str,
) -> Result<Option<AuthUser>, ClinicError> {
    let Some(user) = store.find_user_by_username(username).await? else {
        return Ok(None);
    };
    if !verify_password(password, &user.password_hash) {
        return Ok(None);
    }
    Ok(Some(user.into()))
}

/// Resolves Basic credentials from the request headers.
pub async fn credentials_from_request(
    state: &AppState,
    req: &HttpRequest,
) -> Result<Option<AuthUser>, ClinicError> {
    let Ok(auth) = Authorization::<Basic>::parse(req) else {
        return Ok(None);
    };
    let credentials = auth.into_scheme();
    let username = credentials.user_id();
    let password = credentials.password().unwrap_or_default();
    authenticate_credentials(state.store.as_ref(), username, password).await
}

pub fn logout_cookie(req: &HttpRequest) -> Cookie<'static> {
    let mut builder = Cookie::build(LOGOUT_COOKIE, "1")
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(Duration::days(365));
    if req.connection_info().scheme() == "https" {
        builder = builder.secure(true);
    }
    builder.finish()
}

pub fn clear_logout_cookie(req: &HttpRequest) -> Cookie<'static> {
    let mut builder = Cookie::build(LOGOUT_COOKIE, "")
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(Duration::seconds(0));
    if req.connection_info().scheme() == "https" {
        builder = builder.secure(true);
    }
    builder.finish()
}

pub fn is_logged_out(req: &HttpRequest) -> bool {
    req.cookie(LOGOUT_COOKIE).is_some()
}

/// Authentication gate for every non-public route. Stores the resolved
/// [`AuthUser`] in the request extensions for `web::ReqData`.
pub async fn session_gate<B>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<BoxBody>, Error>
where
    B: MessageBody + 'static,
{
    if is_logged_out(req.request()) {
        return Ok(req.into_response(ClinicError::Unauthorized.error_response()));
    }

    let user = match req.app_data::<web::Data<AppState>>() {
        Some(state) => credentials_from_request(state, req.request()).await?,
        None => None,
    };
    let Some(user) = user else {
        return Ok(req.into_response(ClinicError::Unauthorized.error_response()));
    };

    req.extensions_mut().insert(user);
    let res = next.call(req).await?;
    Ok(res.map_into_boxed_body())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_verify_only_their_password() {
        let hash = hash_password("s3cret").unwrap();
        assert!(verify_password("s3cret", &hash));
        assert!(!verify_password("secret", &hash));
        assert!(!verify_password("s3cret", "not-a-phc-string"));
    }

    #[test]
    fn only_admins_pass_the_admin_check() {
        let mut user = AuthUser {
            id: "u1".into(),
            username: "reception".into(),
            name: "Front Desk".into(),
            role: Role::Receptionist,
        };
        assert!(matches!(user.require_admin(), Err(ClinicError::Forbidden(_))));
        user.role = Role::Admin;
        assert!(user.require_admin().is_ok());
    }
}
