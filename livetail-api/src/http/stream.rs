//! Text-event stream endpoint
//!
//! Every rejection (bad thread id, missing or invalid credential, broker
//! unavailable) is returned before any broker subscription exists.

use std::convert::Infallible;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use livetail_core::{RunId, ThreadId};
use serde::Deserialize;
use tracing::{debug, info};

use super::{AppError, AppResult, AppState};
use crate::relay::RelaySession;

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    /// Credential for clients that cannot set headers (e.g. `EventSource`)
    pub token: Option<String>,
    /// Also relay the legacy per-run channel
    pub run_id: Option<String>,
}

/// Query parameter first, then `Authorization`
fn extract_credential(query: &StreamQuery, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = query.token.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        return Some(token.to_string());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

pub async fn stream_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let thread_id = ThreadId::from_string(thread_id.trim().to_string());
    if thread_id.is_empty() {
        return Err(AppError::bad_request("thread_id is required"));
    }

    let credential = extract_credential(&query, &headers)
        .ok_or_else(|| AppError::unauthorized("Missing credential"))?;
    let claims = state.jwt_service.verify_bearer(&credential)?;

    let run_id = query
        .run_id
        .map(RunId::from_string)
        .filter(|run_id| !run_id.is_empty());

    let (session, frames) =
        RelaySession::open(state.subscribers.as_ref(), thread_id.clone(), run_id, state.relay.clone()).await?;

    info!(
        thread_id = %thread_id,
        subject = %claims.sub,
        channels = ?session.channels().names(),
        "Stream opened"
    );
    let handle = session.handle();
    let mut task = session.spawn();
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        let finished = tokio::select! {
            finished = &mut task => finished,
            () = shutdown.cancelled() => {
                handle.cancel();
                task.await
            }
        };
        if let Ok(final_state) = finished {
            debug!(thread_id = %thread_id, state = ?final_state, "Stream finished");
        }
    });

    let body = Body::from_stream(frames.map(|frame| Ok::<_, Infallible>(frame.encode())));

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream")),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache, no-transform")),
            (header::CONNECTION, HeaderValue::from_static("keep-alive")),
            (X_ACCEL_BUFFERING, HeaderValue::from_static("no")),
            (header::CONTENT_ENCODING, HeaderValue::from_static("identity")),
        ],
        body,
    )
        .into_response())
}
