//! Response envelope and error → status mapping.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::{error, warn};

use aggsched_cron::SchedulerError;
use aggsched_storage::StorageError;
use aggsched_types::ValidationError;

/// Envelope shared by every API response.
#[derive(Debug, Serialize)]
pub struct CommonResponse<T: Serialize> {
    pub response_code: u16,
    pub response_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ErrorItem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> CommonResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            response_code: StatusCode::OK.as_u16(),
            response_message: "OK".to_string(),
            errors: None,
            data: Some(data),
        })
    }
}

impl CommonResponse<()> {
    pub fn ok_empty() -> Json<Self> {
        Json(Self {
            response_code: StatusCode::OK.as_u16(),
            response_message: "OK".to_string(),
            errors: None,
            data: None,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorItem {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

/// Anything a handler can fail with.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed body or path.
    BadRequest(String),
    Validation(ValidationError),
    /// The new job could not be stored.
    CreateFailed(StorageError),
    Scheduler(SchedulerError),
}

impl ApiError {
    /// Map an `add_job` failure. Persistence errors report `CreateFailed`.
    pub fn from_create(e: SchedulerError) -> Self {
        match e {
            SchedulerError::PersistenceFailure(e) => ApiError::CreateFailed(e),
            other => ApiError::Scheduler(other),
        }
    }

    pub fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BadRequest"),
            ApiError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "ValidationError"),
            ApiError::CreateFailed(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CreateFailed"),
            ApiError::Scheduler(e) => match e {
                SchedulerError::InvalidCronExpression { .. } => {
                    (StatusCode::BAD_REQUEST, "BadRequest")
                }
                SchedulerError::UnknownDurationStrategy(_)
                | SchedulerError::UnsupportedDurationFilter { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "ValidationError")
                }
                SchedulerError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
                SchedulerError::NotScheduled(_) => (StatusCode::UNPROCESSABLE_ENTITY, "NotFound"),
                SchedulerError::PersistenceFailure(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "UpdateFailed")
                }
                SchedulerError::ForwardingFailure(_) => (StatusCode::BAD_GATEWAY, "ForwardingFailed"),
                SchedulerError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "Timeout"),
                SchedulerError::ShutDown => (StatusCode::SERVICE_UNAVAILABLE, "Unavailable"),
                SchedulerError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ConfigError"),
            },
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::BadRequest(message) => message.clone(),
            ApiError::Validation(e) => e.to_string(),
            ApiError::CreateFailed(e) => format!("failed to add job: {e}"),
            ApiError::Scheduler(e) => e.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(format!("invalid request body: {}", rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(format!("invalid path: {}", rejection.body_text()))
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::Validation(e)
    }
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        ApiError::Scheduler(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_type();
        let message = self.message();
        if status.is_server_error() {
            error!(status = status.as_u16(), "Request failed: {message}");
        } else {
            warn!(status = status.as_u16(), "Request rejected: {message}");
        }

        let body = CommonResponse::<()> {
            response_code: status.as_u16(),
            response_message: message.clone(),
            errors: Some(vec![ErrorItem { message, kind }]),
            data: None,
        };
        (status, Json(body)).into_response()
    }
}
