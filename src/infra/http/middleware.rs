//! Per-request span, request id propagation and outcome logging.

use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::{application::error::ErrorReport, domain::generation::ReportMetadata};

static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

const MAX_REQUEST_ID_LEN: usize = 64;

/// Reuse a caller-supplied `x-request-id` when it is short and printable.
fn request_id(request: &Request<Body>) -> String {
    request
        .headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty() && id.len() <= MAX_REQUEST_ID_LEN)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Run the request inside an `http_request` span and log how it ended: report counts
/// for generation requests, the attached [`ErrorReport`] for failures.
pub async fn trace_requests(request: Request<Body>, next: Next) -> Response {
    let request_id = request_id(&request);
    let span = info_span!(
        target: "courseviz::http",
        "http_request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path()
    );
    let started = Instant::now();

    let mut response = next.run(request).instrument(span).await;
    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis() as u64;

    if let Some(metadata) = response.extensions_mut().remove::<ReportMetadata>() {
        info!(
            target = "courseviz::http::response",
            request_id = %request_id,
            status = status.as_u16(),
            elapsed_ms,
            total = metadata.total,
            succeeded = metadata.succeeded,
            failed = metadata.total - metadata.succeeded,
            "generation request completed"
        );
    } else if status.is_client_error() || status.is_server_error() {
        let (source, messages) = match response.extensions_mut().remove::<ErrorReport>() {
            Some(report) => (report.source, report.messages),
            None => ("unknown", Vec::new()),
        };
        let detail = messages
            .first()
            .map(String::as_str)
            .unwrap_or("no diagnostic available");

        if status.is_server_error() {
            error!(
                target = "courseviz::http::response",
                request_id = %request_id,
                status = status.as_u16(),
                elapsed_ms,
                source,
                detail,
                chain = ?messages,
                "request failed"
            );
        } else {
            warn!(
                target = "courseviz::http::response",
                request_id = %request_id,
                status = status.as_u16(),
                elapsed_ms,
                source,
                detail,
                "request rejected"
            );
        }
    }

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER.clone(), value);
    }
    response
}
