use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::application::error::{AppError, ErrorReport};

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const CLASSIFICATION_FAILED: &str = "classification_failed";
    pub const NOT_FOUND: &str = "not_found";
    pub const INTERNAL: &str = "internal_error";
}

#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// JSON error response carrying an [`ErrorReport`] for the logging middleware.
#[derive(Debug)]
pub struct ApiError {
    source: &'static str,
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
}

impl ApiError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        Self {
            source,
            status,
            code,
            message,
            hint,
        }
    }

    pub fn bad_request(source: &'static str, message: &'static str, hint: Option<String>) -> Self {
        Self::new(
            source,
            StatusCode::BAD_REQUEST,
            codes::BAD_REQUEST,
            message,
            hint,
        )
    }

    pub fn not_found(source: &'static str, message: &'static str) -> Self {
        Self::new(
            source,
            StatusCode::NOT_FOUND,
            codes::NOT_FOUND,
            message,
            None,
        )
    }

    pub fn internal(source: &'static str, hint: impl Into<String>) -> Self {
        Self::new(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::INTERNAL,
            "Internal server error",
            Some(hint.into()),
        )
    }

    pub fn from_app_error(source: &'static str, error: &AppError) -> Self {
        match error {
            AppError::Validation(message) => {
                Self::bad_request(source, "Invalid request", Some(message.clone()))
            }
            AppError::Classification(inner) => Self::new(
                source,
                StatusCode::BAD_GATEWAY,
                codes::CLASSIFICATION_FAILED,
                "Content classification failed",
                Some(inner.to_string()),
            ),
            other => Self::internal(source, other.to_string()),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let detail = format!(
            "{}: {}",
            self.code,
            self.hint.as_deref().unwrap_or(self.message)
        );
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint: self.hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        ErrorReport::from_message(self.source, self.status, detail).attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::classifier::ClassificationError;

    #[test]
    fn classification_failures_are_bad_gateway() {
        let error = AppError::Classification(ClassificationError::Malformed("x".into()));
        let api = ApiError::from_app_error("test", &error);
        assert_eq!(api.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn validation_failures_are_bad_request_with_report() {
        let response =
            ApiError::from_app_error("test", &AppError::validation("content must not be empty"))
                .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let report = response
            .extensions()
            .get::<ErrorReport>()
            .expect("report attached");
        assert_eq!(
            report.messages,
            vec!["bad_request: content must not be empty".to_string()]
        );
    }
}
