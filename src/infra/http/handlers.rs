use std::io::ErrorKind;

use axum::{
    Json,
    body::Body,
    extract::{Path, State, rejection::JsonRejection},
    http::{
        HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::Deserialize;
use tracing::error;

use crate::{application::error::AppError, infra::storage::StorageError};

use super::{AppState, error::ApiError};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GenerateRequest {
    content: Option<String>,
}

pub async fn generate(
    State(state): State<AppState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Response {
    const SOURCE: &str = "infra::http::handlers::generate";

    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return ApiError::bad_request(
                SOURCE,
                "Request body must be JSON",
                Some(rejection.body_text()),
            )
            .into_response();
        }
    };

    let Some(content) = request.content.filter(|content| !content.trim().is_empty()) else {
        return ApiError::bad_request(
            SOURCE,
            "Missing content",
            Some("`content` must be a non-empty string".to_string()),
        )
        .into_response();
    };

    match state.generation.generate(&content).await {
        Ok(report) => {
            let metadata = report.metadata.clone();
            let mut response = (StatusCode::OK, Json(report)).into_response();
            response.extensions_mut().insert(metadata);
            response
        }
        Err(err) => ApiError::from_app_error(SOURCE, &AppError::from(err)).into_response(),
    }
}

pub async fn serve_artifact(State(state): State<AppState>, Path(path): Path<String>) -> Response {
    const SOURCE: &str = "infra::http::handlers::serve_artifact";

    match state.storage.read(&path).await {
        Ok(bytes) => build_artifact_response(&path, bytes),
        Err(StorageError::InvalidPath) => {
            ApiError::not_found(SOURCE, "Artifact not found").into_response()
        }
        Err(StorageError::Io(err)) if err.kind() == ErrorKind::NotFound => {
            ApiError::not_found(SOURCE, "Artifact not found").into_response()
        }
        Err(err) => {
            error!(
                target = "courseviz::http",
                path = %path,
                error = %err,
                "failed to read stored artifact"
            );
            ApiError::internal(SOURCE, err.to_string()).into_response()
        }
    }
}

pub async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

fn build_artifact_response(path: &str, bytes: Bytes) -> Response {
    let length = bytes.len();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&length.to_string()) {
        headers.insert(CONTENT_LENGTH, value);
    }
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000, immutable"),
    );

    response
}
