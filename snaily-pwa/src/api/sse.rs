//! Server-Sent Events endpoints

use crate::api::server::AppContext;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use snaily_common::sse::{event_bus_sse_stream, KEEP_ALIVE_INTERVAL};
use std::convert::Infallible;
use tracing::{debug, warn};

/// GET /events - every process event
pub async fn event_stream(
    State(ctx): State<AppContext>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    event_bus_sse_stream(ctx.companion.events(), "snaily-pwa")
}

/// GET /pwa/status/stream - current status, then every change
///
/// The subscription ends (and unsubscribes) when the client disconnects.
pub async fn status_stream(
    State(ctx): State<AppContext>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut subscription = ctx.companion.subscribe_status();
    debug!(token = ?subscription.token(), "Status stream client connected");

    let stream = async_stream::stream! {
        while let Some(status) = subscription.next().await {
            match Event::default().event("PwaStatus").json_data(&status) {
                Ok(frame) => yield Ok(frame),
                Err(e) => warn!("Failed to serialize status: {}", e),
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}
