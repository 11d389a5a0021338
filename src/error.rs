use actix_web::{
    http::{header, StatusCode},
    HttpResponse, ResponseError,
};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{auth::AUTH_REALM, store::StoreError};

#[derive(Debug, Error)]
pub enum ClinicError {
    #[error("{message}")]
    Validation { message: String, errors: Vec<String> },

    #[error("Not authenticated")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("This time slot is already taken")]
    SlotConflict,

    #[error("{0} already exists")]
    Duplicate(&'static str),

    #[error("storage failure: {0}")]
    Storage(StoreError),
}

impl ClinicError {
    pub fn validation(message: impl Into<String>) -> Self {
        ClinicError::Validation {
            message: message.into(),
            errors: Vec::new(),
        }
    }
}

impl From<StoreError> for ClinicError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SlotTaken => ClinicError::SlotConflict,
            StoreError::Duplicate(what) => ClinicError::Duplicate(what),
            other => ClinicError::Storage(other),
        }
    }
}

impl From<ValidationErrors> for ClinicError {
    fn from(errors: ValidationErrors) -> Self {
        let mut fields: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, problems)| {
                problems
                    .iter()
                    .map(move |problem| format!("{field}: {}", problem.code))
            })
            .collect();
        fields.sort();
        ClinicError::Validation {
            message: "Invalid request data".to_string(),
            errors: fields,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<String>,
}

impl ResponseError for ClinicError {
    fn status_code(&self) -> StatusCode {
        match self {
            ClinicError::Validation { .. } => StatusCode::BAD_REQUEST,
            ClinicError::Unauthorized => StatusCode::UNAUTHORIZED,
            ClinicError::Forbidden(_) => StatusCode::FORBIDDEN,
            ClinicError::NotFound(_) => StatusCode::NOT_FOUND,
            ClinicError::SlotConflict | ClinicError::Duplicate(_) => StatusCode::CONFLICT,
            ClinicError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (message, errors) = match self {
            ClinicError::Validation { message, errors } => (message.clone(), errors.clone()),
            ClinicError::Storage(err) => {
                log::error!("Storage error: {err}");
                ("Internal storage error".to_string(), Vec::new())
            }
            other => (other.to_string(), Vec::new()),
        };

        let mut builder = HttpResponse::build(self.status_code());
        builder.insert_header((header::CACHE_CONTROL, "no-store"));
        if matches!(self, ClinicError::Unauthorized) {
            builder.insert_header((
                header::WWW_AUTHENTICATE,
                format!("Basic realm=\"{AUTH_REALM}\""),
            ));
        }
        builder.json(ErrorBody { message, errors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;
    use validator::Validate;

    #[actix_web::test]
    async fn storage_details_stay_out_of_the_body() {
        let err = ClinicError::from(StoreError::Corrupt("bad row".to_string()));
        let response = err.error_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["message"], "Internal storage error");
        assert!(json.get("errors").is_none());
    }

    #[test]
    fn store_errors_map_onto_http_statuses() {
        assert_eq!(
            ClinicError::from(StoreError::SlotTaken).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ClinicError::from(StoreError::Duplicate("procedure")).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ClinicError::NotFound("client").status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn validation_errors_list_fields() {
        let input = crate::models::NewProcedure {
            name: String::new(),
            description: "desc".to_string(),
            duration: 0,
            price: 100,
        };
        let err = ClinicError::from(input.validate().unwrap_err());
        match err {
            ClinicError::Validation { errors, .. } => {
                assert_eq!(errors, vec!["duration: range", "name: length"]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn unauthorized_carries_a_challenge() {
        let response = ClinicError::Unauthorized.error_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
    }
}
