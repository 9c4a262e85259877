//! HTTP surface
//!
//! - `GET /health`
//! - `GET /api/threads/{thread_id}/stream` text-event stream of one thread

pub mod error;
pub mod health;
pub mod stream;

pub use error::{AppError, AppResult};

use axum::{extract::Request, routing::get, Router};
use livetail_broker::SubscriberFactory;
use livetail_core::auth::JwtService;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Span;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::relay::SessionConfig;

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Source of dedicated subscriber connections, one per stream request
    pub subscribers: Arc<dyn SubscriberFactory>,
    pub jwt_service: JwtService,
    pub relay: SessionConfig,
    /// Cancelled on server shutdown; ends every open stream
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(subscribers: Arc<dyn SubscriberFactory>, jwt_service: JwtService, relay: SessionConfig) -> Self {
        Self {
            subscribers,
            jwt_service,
            relay,
            shutdown: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::create_health_router())
        .route("/api/threads/{thread_id}/stream", get(stream::stream_thread))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .with_state(state)
}

/// Request span with the path only; the query string may carry a credential
fn request_span(request: &Request) -> Span {
    tracing::info_span!(
        "http_request",
        method = %request.method(),
        path = %request.uri().path()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_request_span_omits_query_string() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let request = axum::http::Request::builder()
            .uri("/api/threads/t1/stream?token=secret-credential&run_id=r1")
            .body(axum::body::Body::empty())
            .unwrap();

        tracing::subscriber::with_default(subscriber, || {
            let span = request_span(&request);
            let _entered = span.enter();
            tracing::info!("request received");
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("path=/api/threads/t1/stream"), "{output}");
        assert!(!output.contains("secret-credential"), "{output}");
        assert!(!output.contains("token="), "{output}");
    }
}
