//! Auto-reconnecting stream subscription
//!
//! One driver task per logical subscription owns the transport, the decoder
//! and the reconnect timer. `disconnect` cancels a token that every await
//! point of the driver selects on, so nothing can revive the connection
//! afterwards.

use std::sync::Arc;

use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::StreamExt;
use livetail_core::{Envelope, ThreadId};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::transport::{Transport, TransportError};
use crate::{ConnectorError, ReconnectPolicy, StreamHandler, TokenProvider};

/// `Idle -> Connecting -> Open -> {Reconnecting -> Connecting}* -> Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

struct ActiveSubscription {
    thread_id: ThreadId,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

pub struct StreamingConnector {
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenProvider>,
    handler: Arc<dyn StreamHandler>,
    policy: ReconnectPolicy,
    state: Arc<watch::Sender<ConnectorState>>,
    active: Mutex<Option<ActiveSubscription>>,
}

impl StreamingConnector {
    pub fn new(
        transport: Arc<dyn Transport>,
        tokens: Arc<dyn TokenProvider>,
        handler: Arc<dyn StreamHandler>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectorState::Idle);
        Self {
            transport,
            tokens,
            handler,
            policy: ReconnectPolicy::default(),
            state: Arc::new(state),
            active: Mutex::new(None),
        }
    }

    #[must_use]
    pub const fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn state(&self) -> ConnectorState {
        *self.state.borrow()
    }

    /// Watch state transitions
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectorState> {
        self.state.subscribe()
    }

    /// Thread of the current subscription, if any
    #[must_use]
    pub fn thread_id(&self) -> Option<ThreadId> {
        self.active.lock().as_ref().map(|active| active.thread_id.clone())
    }

    /// Start streaming `thread_id`, replacing any previous subscription.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(&self, thread_id: ThreadId) {
        let cancel = CancellationToken::new();
        let driver = Driver {
            thread_id: thread_id.clone(),
            transport: self.transport.clone(),
            tokens: self.tokens.clone(),
            handler: self.handler.clone(),
            policy: self.policy,
            state: self.state.clone(),
            cancel: cancel.clone(),
        };

        let mut active = self.active.lock();
        if let Some(previous) = active.take() {
            debug!(thread_id = %previous.thread_id, "Replacing stream subscription");
            previous.cancel.cancel();
        }

        self.state.send_replace(ConnectorState::Connecting);
        let task = tokio::spawn(driver.run());
        *active = Some(ActiveSubscription {
            thread_id,
            cancel,
            task: Some(task),
        });
    }

    /// Tear the subscription down for good; no reconnect fires afterwards
    pub fn disconnect(&self) {
        if let Some(active) = self.active.lock().take() {
            active.cancel.cancel();
            info!(thread_id = %active.thread_id, "Stream disconnected");
        }
        self.state.send_replace(ConnectorState::Closed);
    }

    /// Wait for the current driver task to finish
    pub async fn join(&self) {
        let task = self.active.lock().as_mut().and_then(|active| active.task.take());
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for StreamingConnector {
    fn drop(&mut self) {
        if let Some(active) = self.active.get_mut().take() {
            active.cancel.cancel();
        }
    }
}

/// How one connection attempt ended
enum Attempt {
    /// Server sent `close`
    Closed,
    /// `disconnect` or a replacing `connect` won; nothing more is reported
    Cancelled,
    /// No reconnect, report once
    Fatal(ConnectorError),
    /// Reconnectable; `opened` when the server had confirmed the subscription
    Dropped { opened: bool, reason: TransportError },
}

struct Driver {
    thread_id: ThreadId,
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenProvider>,
    handler: Arc<dyn StreamHandler>,
    policy: ReconnectPolicy,
    state: Arc<watch::Sender<ConnectorState>>,
    cancel: CancellationToken,
}

impl Driver {
    /// Only the live driver may move the state
    fn set_state(&self, state: ConnectorState) {
        if !self.cancel.is_cancelled() {
            self.state.send_replace(state);
        }
    }

    async fn run(self) {
        let mut attempts: u32 = 0;

        loop {
            self.set_state(ConnectorState::Connecting);

            let outcome = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return,
                outcome = self.attempt() => outcome,
            };
            if self.cancel.is_cancelled() {
                return;
            }

            match outcome {
                Attempt::Cancelled => return,
                Attempt::Closed => {
                    self.set_state(ConnectorState::Closed);
                    return;
                }
                Attempt::Fatal(error) => {
                    warn!(thread_id = %self.thread_id, error = %error, "Stream failed permanently");
                    self.set_state(ConnectorState::Closed);
                    self.handler.on_error(error);
                    return;
                }
                Attempt::Dropped { opened, reason } => {
                    if opened {
                        attempts = 0;
                    }
                    attempts = attempts.saturating_add(1);

                    if !self.policy.should_retry(attempts) {
                        warn!(
                            thread_id = %self.thread_id,
                            attempt = attempts,
                            error = %reason,
                            "Max reconnect attempts reached"
                        );
                        self.set_state(ConnectorState::Closed);
                        self.handler.on_error(ConnectorError::GaveUp {
                            attempts: self.policy.max_attempts,
                        });
                        return;
                    }

                    let delay = self.policy.delay_for_attempt(attempts);
                    warn!(
                        thread_id = %self.thread_id,
                        attempt = attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %reason,
                        "Reconnecting"
                    );
                    self.set_state(ConnectorState::Reconnecting);
                    self.handler.on_reconnecting(attempts, delay);

                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => return,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn attempt(&self) -> Attempt {
        let token = match self.tokens.token().await {
            Ok(token) => token,
            Err(e) => return Attempt::Fatal(e),
        };

        let stream = match self.transport.open(&self.thread_id, &token).await {
            Ok(stream) => stream,
            Err(reason) if reason.is_fatal() => return Attempt::Fatal(refusal(reason)),
            Err(reason) => return Attempt::Dropped { opened: false, reason },
        };

        let mut events = stream.eventsource();
        let mut opened = false;

        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(EventStreamError::Transport(reason)) => {
                    return Attempt::Dropped { opened, reason };
                }
                Err(e) => {
                    return Attempt::Dropped {
                        opened,
                        reason: TransportError::Stream(e.to_string()),
                    };
                }
            };

            // Several events can come out of one chunk without yielding
            if self.cancel.is_cancelled() {
                return Attempt::Cancelled;
            }

            match event.event.as_str() {
                "open" => {
                    opened = true;
                    self.set_state(ConnectorState::Open);
                    info!(thread_id = %self.thread_id, "Stream open");
                    self.handler.on_open();
                }
                "close" => {
                    debug!(thread_id = %self.thread_id, "Stream closed by server");
                    self.set_state(ConnectorState::Closed);
                    self.handler.on_close();
                    return Attempt::Closed;
                }
                _ => self.deliver(&event),
            }
        }

        Attempt::Dropped {
            opened,
            reason: TransportError::Stream("stream ended without close".to_string()),
        }
    }

    fn deliver(&self, event: &Event) {
        match Envelope::decode(&event.data) {
            Ok(envelope) => self.handler.on_event(envelope),
            Err(e) => {
                warn!(thread_id = %self.thread_id, error = %e, "Malformed frame");
                self.handler
                    .on_error(ConnectorError::MalformedFrame(e.to_string()));
            }
        }
    }
}

/// Map a refusal that reconnecting cannot fix to the error reported once
fn refusal(reason: TransportError) -> ConnectorError {
    match reason {
        TransportError::Unauthorized(message) => ConnectorError::Authentication(message),
        TransportError::Rejected(message) | TransportError::InvalidUrl(message) => {
            ConnectorError::Rejected(message)
        }
        other => ConnectorError::Rejected(other.to_string()),
    }
}
