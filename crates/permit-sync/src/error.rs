use crate::config::{ConfigError, ProfileError};
use crate::permit::{PipelineError, PublishError, StoreError};
use crate::telemetry::TelemetryError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Server(axum::Error),
    Pipeline(PipelineError),
    Store(StoreError),
    Publish(PublishError),
    Profiles(ProfileError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Server(err) => write!(f, "server error: {}", err),
            AppError::Pipeline(err) => write!(f, "{}", err),
            AppError::Store(err) => write!(f, "record store error: {}", err),
            AppError::Publish(err) => write!(f, "publish error: {}", err),
            AppError::Profiles(err) => write!(f, "profile error: {}", err),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Server(err) => Some(err),
            AppError::Pipeline(err) => Some(err),
            AppError::Store(err) => Some(err),
            AppError::Publish(err) => Some(err),
            AppError::Profiles(err) => Some(err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Pipeline(_) | AppError::Profiles(_) => StatusCode::BAD_REQUEST,
            AppError::Config(_)
            | AppError::Telemetry(_)
            | AppError::Io(_)
            | AppError::Server(_)
            | AppError::Store(_)
            | AppError::Publish(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<axum::Error> for AppError {
    fn from(value: axum::Error) -> Self {
        Self::Server(value)
    }
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<PublishError> for AppError {
    fn from(value: PublishError) -> Self {
        Self::Publish(value)
    }
}

impl From<ProfileError> for AppError {
    fn from(value: ProfileError) -> Self {
        Self::Profiles(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permit::{ExtractionError, PermitField, PipelineFailure, RunStage};

    #[test]
    fn extraction_failures_are_client_errors() {
        let error = AppError::from(PipelineError {
            stage: RunStage::Extracting,
            permit_number: None,
            source: PipelineFailure::Extraction(ExtractionError::MissingField {
                field: PermitField::PlateNumber,
            }),
        });
        assert_eq!(
            error.to_string(),
            "permit sync failed while extracting: required field plateNumber not found in permit document"
        );
        assert_eq!(error.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn store_failures_are_server_errors() {
        let error = AppError::from(StoreError::WriteFailure {
            path: "data/permit.json".into(),
            reason: "disk full".to_string(),
        });
        assert_eq!(
            error.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
