//! Interception fallback
//!
//! Turns an incoming HTTP request into a `FetchRequest`, hands it to the
//! interception layer and renders the answer.

use crate::api::server::AppContext;
use crate::intercept::infer_destination;
use crate::net::FetchRequest;
use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::debug;

/// Largest request body forwarded upstream
const MAX_FORWARD_BODY: usize = 8 * 1024 * 1024;

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Fallback handler: everything without a control route
pub async fn intercept(State(ctx): State<AppContext>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let url = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let body = match to_bytes(body, MAX_FORWARD_BODY).await {
        Ok(body) => body,
        Err(e) => {
            return (StatusCode::PAYLOAD_TOO_LARGE, format!("Request body rejected: {}", e))
                .into_response()
        }
    };

    let destination = infer_destination(
        header_str(&parts.headers, "sec-fetch-dest"),
        header_str(&parts.headers, header::ACCEPT.as_str()),
        parts.uri.path(),
    );
    let fetch = FetchRequest {
        method: parts.method,
        url,
        destination,
        content_type: header_str(&parts.headers, header::CONTENT_TYPE.as_str()).map(str::to_string),
        body,
    };

    let url = fetch.url.clone();
    match ctx.companion.handle_request(fetch).await {
        Ok(response) => {
            let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
            let mut builder = Response::builder().status(status);
            if let Some(content_type) = &response.content_type {
                builder = builder.header(header::CONTENT_TYPE, content_type.as_str());
            }
            builder
                .body(Body::from(response.body))
                .unwrap_or_else(|e| {
                    (StatusCode::BAD_GATEWAY, format!("Invalid upstream response: {}", e)).into_response()
                })
        }
        Err(e) => {
            debug!(url = %url, error = %e, "No response available");
            (StatusCode::SERVICE_UNAVAILABLE, "Offline and not cached").into_response()
        }
    }
}
