use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures::Stream;
use tokio::sync::mpsc;

use crate::api::auth;
use crate::api::error::ApiError;
use crate::api::AppState;
use crate::broadcast::{Event, Subscription};

/// Server-Sent Events stream of change notifications.
///
/// Emits a `connected` event on attach, then one frame per broadcaster event
/// (`id:` / `event:` / `data:`), with a `: keepalive` comment every 30 s.
/// Dropping the connection drops the subscription, which detaches the
/// subscriber from the broadcaster.
pub async fn stream(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    auth::require_client(&state, &headers).await?;

    let (rx, subscription) = state.broadcaster.subscribe();

    let sse = Sse::new(event_stream(rx, subscription)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keepalive"),
    );

    Ok((
        [
            ("Cache-Control", "no-cache"),
            ("Connection", "keep-alive"),
            ("X-Accel-Buffering", "no"),
        ],
        sse,
    ))
}

fn event_stream(
    mut rx: mpsc::Receiver<Event>,
    subscription: Subscription,
) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    async_stream::stream! {
        // Held for the lifetime of the stream; unsubscribes on drop.
        let _subscription = subscription;

        yield Ok(SseEvent::default()
            .event("connected")
            .data(r#"{"status":"ok"}"#));

        // Ends when the broadcaster closes or the client disconnects.
        while let Some(event) = rx.recv().await {
            yield Ok(SseEvent::default()
                .id(event.id)
                .event(event.kind.as_str())
                .data(event.data.to_string()));
        }
    }
}
