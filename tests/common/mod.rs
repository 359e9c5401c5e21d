//! Local mock backend for integration tests.

#![allow(dead_code)]

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::StreamExt;
use sara_stream::transport::{ApiClient, RunRequest, TransportEvent, TransportSettings};
use tokio::sync::mpsc;

/// Serve `app` on an ephemeral local port and return its base URL.
pub async fn spawn_backend(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve test backend");
    });
    format!("http://{addr}")
}

/// API client pointing both endpoints at `base_url`.
pub fn api(base_url: &str) -> ApiClient {
    ApiClient::new(base_url, base_url).expect("valid test url")
}

/// Short timers so failure paths finish quickly.
pub fn fast_settings() -> TransportSettings {
    TransportSettings {
        warmup_after: Duration::from_millis(50),
        request_timeout: Duration::from_millis(300),
        max_retries: 2,
        retry_delay: Duration::from_millis(20),
    }
}

pub fn run_request() -> RunRequest {
    RunRequest {
        task_id: "task1".to_string(),
        prompt: "What's the MRN of Peter Stafford?".to_string(),
        context: String::new(),
    }
}

/// One `event:`/`data:` frame in wire format.
pub fn sse(event: &str, data: &str) -> String {
    format!("event: {event}\ndata: {data}\n\n")
}

/// An event-stream response whose body is delivered in the given chunks.
pub fn stream_response(chunks: Vec<String>) -> Response {
    let stream = futures::stream::iter(
        chunks
            .into_iter()
            .map(|chunk| Ok::<_, Infallible>(Bytes::from(chunk))),
    );
    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(stream),
    )
        .into_response()
}

/// An event-stream response whose parts are sent after their delay.
/// An `Err` part aborts the body mid-stream.
pub fn timed_response(parts: Vec<(Duration, Result<String, String>)>) -> Response {
    let stream = futures::stream::iter(parts).then(|(delay, part)| async move {
        tokio::time::sleep(delay).await;
        part.map(Bytes::from).map_err(std::io::Error::other)
    });
    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(stream),
    )
        .into_response()
}

/// A handler that never answers within the test timeouts.
pub async fn hang() -> Response {
    tokio::time::sleep(Duration::from_secs(30)).await;
    StatusCode::OK.into_response()
}

/// Shared request counter.
#[derive(Clone, Default)]
pub struct Hits(Arc<AtomicUsize>);

impl Hits {
    pub fn bump(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Receive events until one matches `done`, with an overall guard.
pub async fn collect_until(
    events: &mut mpsc::UnboundedReceiver<TransportEvent>,
    done: impl Fn(&TransportEvent) -> bool,
) -> Vec<TransportEvent> {
    let mut seen = Vec::new();
    let result = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(event) = events.recv().await {
            let finished = done(&event);
            seen.push(event);
            if finished {
                break;
            }
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for transport events: {seen:?}");
    seen
}
