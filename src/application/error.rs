use std::error::Error as StdError;

use axum::{http::StatusCode, response::Response};
use thiserror::Error;

use crate::{
    application::{classifier::ClassificationError, generation::GenerationError},
    domain::error::DomainError,
    infra::error::InfraError,
};

/// Diagnostic attached to error responses for the response-logging middleware.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Classification(#[from] ClassificationError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

impl From<GenerationError> for AppError {
    fn from(error: GenerationError) -> Self {
        match error {
            GenerationError::EmptyContent => Self::validation(error.to_string()),
            GenerationError::Classification(inner) => Self::Classification(inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::reasoning::ReasoningError;

    #[test]
    fn report_walks_the_source_chain() {
        let error = ClassificationError::Service(ReasoningError::RateLimited);
        let report = ErrorReport::from_error("test", StatusCode::BAD_GATEWAY, &error);
        assert_eq!(
            report.messages,
            vec![
                "content classification failed: reasoning service is rate limited".to_string(),
                "reasoning service is rate limited".to_string(),
            ]
        );
    }

    #[test]
    fn generation_errors_map_to_app_errors() {
        assert!(matches!(
            AppError::from(GenerationError::EmptyContent),
            AppError::Validation(_)
        ));
        assert!(matches!(
            AppError::from(GenerationError::Classification(
                ClassificationError::Malformed("x".into())
            )),
            AppError::Classification(_)
        ));
    }
}
