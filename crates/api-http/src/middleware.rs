//! Envelope Middleware
//!
//! Finishes every response on its way out: bare timeout and routing errors
//! become error envelopes, and each JSON envelope gets the request's call id,
//! status and arrival time.

use axum::body::{to_bytes, Body};
use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tracing::warn;

use crate::error::{code, ApiError};
use crate::types::CallInfo;

/// Header carrying the call id in both directions
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Responses larger than this are passed through unstamped
const MAX_ENVELOPE_BYTES: usize = 16 * 1024 * 1024;

pub async fn finish_envelope(request: Request, next: Next) -> Response {
    let call_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let time = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

    let response = replace_bare_error(next.run(request).await);
    if !is_json(&response) {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, MAX_ENVELOPE_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(call_id = %call_id, error = %e, "Failed to buffer response body");
            return ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                code::INTERNAL_ERROR,
                "Failed to write response",
            )
            .into_response();
        }
    };

    let Ok(Value::Object(mut envelope)) = serde_json::from_slice::<Value>(&bytes) else {
        return Response::from_parts(parts, Body::from(bytes));
    };
    let info = CallInfo {
        call_id,
        status: parts.status.as_u16(),
        time,
    };
    if let Ok(Value::Object(fields)) = serde_json::to_value(&info) {
        envelope.extend(fields);
    }

    match serde_json::to_vec(&envelope) {
        Ok(stamped) => {
            parts.headers.remove(header::CONTENT_LENGTH);
            Response::from_parts(parts, Body::from(stamped))
        }
        Err(_) => Response::from_parts(parts, Body::from(bytes)),
    }
}

/// Responses produced below the handlers (timeouts, unmatched methods) carry
/// no body of their own
fn replace_bare_error(response: Response) -> Response {
    if response.headers().contains_key(header::CONTENT_TYPE) {
        return response;
    }
    match response.status() {
        StatusCode::REQUEST_TIMEOUT => ApiError::request_timeout().into_response(),
        StatusCode::METHOD_NOT_ALLOWED => ApiError::method_not_allowed().into_response(),
        StatusCode::NOT_FOUND => ApiError::endpoint_not_found().into_response(),
        _ => response,
    }
}

fn is_json(response: &Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"))
}
