use std::ops::ControlFlow;
use std::time::Duration;

use livetail_broker::{BrokerMessage, BrokerSubscriber, SubscriberFactory};
use livetail_core::config::RelayConfig;
use livetail_core::models::{generate_id, RunId};
use livetail_core::{ChannelSet, Envelope, ThreadId};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::frame::Frame;

/// Receiving half of a session's outbound frames
pub type FrameStream = ReceiverStream<Frame>;

/// `Subscribed -> Streaming -> {Completed | Errored | ClientClosed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Subscribed,
    Streaming,
    /// A terminal envelope was relayed and the close frame written
    Completed,
    /// Broker connection lost or heartbeat write failed
    Errored,
    /// Cancelled, or the frame receiver went away
    ClientClosed,
}

impl SessionState {
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::ClientClosed)
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub heartbeat_interval: Duration,
    /// Frames buffered before writes wait on the client
    pub frame_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&RelayConfig::default())
    }
}

impl From<&RelayConfig> for SessionConfig {
    fn from(config: &RelayConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval(),
            frame_buffer: config.frame_buffer.max(1),
        }
    }
}

/// Cancels a running session and observes its state
#[derive(Debug, Clone)]
pub struct SessionHandle {
    cancel: CancellationToken,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Wait until the session reaches a final state
    pub async fn finished(&mut self) -> SessionState {
        if let Ok(state) = self.state.wait_for(SessionState::is_finished).await {
            return *state;
        }
        *self.state.borrow()
    }
}

/// Relays one thread's broker channels to one outbound frame stream
pub struct RelaySession {
    session_id: String,
    thread_id: ThreadId,
    channels: ChannelSet,
    config: SessionConfig,
    subscriber: Option<Box<dyn BrokerSubscriber>>,
    frames: Option<mpsc::Sender<Frame>>,
    cancel: CancellationToken,
    state: watch::Sender<SessionState>,
    torn_down: bool,
}

impl std::fmt::Debug for RelaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySession")
            .field("session_id", &self.session_id)
            .field("thread_id", &self.thread_id)
            .field("channels", &self.channels)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl RelaySession {
    /// Open a dedicated subscriber connection and subscribe to the thread's
    /// channels. Nothing has been written yet when this returns.
    ///
    /// On a subscribe failure the connection is closed before the error is
    /// returned.
    pub async fn open(
        factory: &dyn SubscriberFactory,
        thread_id: ThreadId,
        run_id: Option<RunId>,
        config: SessionConfig,
    ) -> livetail_broker::Result<(Self, FrameStream)> {
        let channels = ChannelSet::for_thread(&thread_id, run_id.as_ref());
        let mut subscriber = factory.connect().await?;

        if let Err(e) = subscriber.subscribe(&channels.names()).await {
            warn!(thread_id = %thread_id, error = %e, "Failed to subscribe relay session");
            subscriber.close().await;
            return Err(e);
        }

        let session_id = generate_id();
        debug!(
            session_id = %session_id,
            thread_id = %thread_id,
            channels = ?channels.names(),
            "Relay session subscribed"
        );

        let (tx, rx) = mpsc::channel(config.frame_buffer.max(1));
        let (state, _) = watch::channel(SessionState::Subscribed);

        Ok((
            Self {
                session_id,
                thread_id,
                channels,
                config,
                subscriber: Some(subscriber),
                frames: Some(tx),
                cancel: CancellationToken::new(),
                state,
                torn_down: false,
            },
            ReceiverStream::new(rx),
        ))
    }

    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            cancel: self.cancel.clone(),
            state: self.state.subscribe(),
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    #[must_use]
    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }

    /// Run the session on its own task
    pub fn spawn(mut self) -> JoinHandle<SessionState> {
        tokio::spawn(async move { self.run().await })
    }

    /// Stream until a terminal envelope, cancellation, client disconnect or
    /// broker loss, then tear down. Returns the final state.
    pub async fn run(&mut self) -> SessionState {
        let (Some(mut subscriber), Some(frames)) = (self.subscriber.take(), self.frames.clone())
        else {
            return self.state();
        };

        let pump = Pump {
            session_id: &self.session_id,
            thread_id: &self.thread_id,
            channels: &self.channels,
            cancel: &self.cancel,
            state: &self.state,
            heartbeat_interval: self.config.heartbeat_interval,
        };
        let outcome = pump.stream(subscriber.as_mut(), &frames).await;
        drop(frames);

        self.subscriber = Some(subscriber);
        self.teardown(outcome).await;
        self.state()
    }

    /// Stop streaming, unsubscribe every channel, close the subscriber
    /// connection and end the frame stream.
    ///
    /// Runs once; later calls return without touching anything, so the
    /// recorded final state is the first one.
    pub async fn teardown(&mut self, outcome: SessionState) {
        if std::mem::replace(&mut self.torn_down, true) {
            debug!(session_id = %self.session_id, "Relay session already torn down");
            return;
        }

        self.cancel.cancel();

        if let Some(mut subscriber) = self.subscriber.take() {
            if let Err(e) = subscriber.unsubscribe(&self.channels.names()).await {
                warn!(
                    session_id = %self.session_id,
                    thread_id = %self.thread_id,
                    error = %e,
                    "Failed to unsubscribe relay session"
                );
            }
            subscriber.close().await;
        }

        self.frames = None;
        self.state.send_replace(outcome);

        info!(
            session_id = %self.session_id,
            thread_id = %self.thread_id,
            state = ?outcome,
            "Relay session closed"
        );
    }
}

/// The streaming loop. Holds only shared borrows of the session so the
/// subscriber can be driven mutably alongside it.
struct Pump<'a> {
    session_id: &'a str,
    thread_id: &'a ThreadId,
    channels: &'a ChannelSet,
    cancel: &'a CancellationToken,
    state: &'a watch::Sender<SessionState>,
    heartbeat_interval: Duration,
}

impl Pump<'_> {
    async fn stream(
        &self,
        subscriber: &mut dyn BrokerSubscriber,
        frames: &mpsc::Sender<Frame>,
    ) -> SessionState {
        if let Err(outcome) = self.write(frames, Frame::Open).await {
            return outcome;
        }
        self.state.send_replace(SessionState::Streaming);
        info!(session_id = %self.session_id, thread_id = %self.thread_id, "Relay session streaming");

        let period = self.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Only this loop writes frames, so heartbeats never interleave with
        // a data frame.
        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => return SessionState::ClientClosed,

                () = frames.closed() => {
                    debug!(session_id = %self.session_id, "Frame receiver dropped");
                    return SessionState::ClientClosed;
                }

                _ = heartbeat.tick() => {
                    if self.write(frames, Frame::Heartbeat).await.is_err() {
                        if self.cancel.is_cancelled() {
                            return SessionState::ClientClosed;
                        }
                        warn!(session_id = %self.session_id, thread_id = %self.thread_id, "Heartbeat write failed");
                        return SessionState::Errored;
                    }
                }

                message = subscriber.next_message() => {
                    let Some(message) = message else {
                        warn!(
                            session_id = %self.session_id,
                            thread_id = %self.thread_id,
                            "Broker connection lost"
                        );
                        return SessionState::Errored;
                    };
                    if let ControlFlow::Break(outcome) = self.forward(frames, message).await {
                        return outcome;
                    }
                }
            }
        }
    }

    async fn forward(&self, frames: &mpsc::Sender<Frame>, message: BrokerMessage) -> ControlFlow<SessionState> {
        if !self.channels.contains(&message.channel) {
            debug!(channel = %message.channel, "Ignoring message from foreign channel");
            return ControlFlow::Continue(());
        }

        let envelope = match Envelope::decode(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    session_id = %self.session_id,
                    thread_id = %self.thread_id,
                    channel = %message.channel,
                    error = %e,
                    "Dropping malformed broker message"
                );
                return ControlFlow::Continue(());
            }
        };

        if envelope.thread_id != *self.thread_id {
            warn!(
                session_id = %self.session_id,
                thread_id = %self.thread_id,
                channel = %message.channel,
                envelope_thread_id = %envelope.thread_id,
                "Dropping envelope for another thread"
            );
            return ControlFlow::Continue(());
        }

        if let Err(outcome) = self.write(frames, Frame::Data(message.payload)).await {
            return ControlFlow::Break(outcome);
        }

        if envelope.is_terminal() {
            if let Err(outcome) = self.write(frames, Frame::Close).await {
                return ControlFlow::Break(outcome);
            }
            debug!(
                session_id = %self.session_id,
                event_type = %envelope.event_type,
                "Terminal envelope relayed"
            );
            return ControlFlow::Break(SessionState::Completed);
        }

        ControlFlow::Continue(())
    }

    async fn write(&self, frames: &mpsc::Sender<Frame>, frame: Frame) -> Result<(), SessionState> {
        let name = frame.name();
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(SessionState::ClientClosed),
            sent = frames.send(frame) => sent.map_err(|_| {
                debug!(session_id = %self.session_id, frame = name, "Frame receiver gone");
                SessionState::ClientClosed
            }),
        }
    }
}
