use std::time::Duration;

use livetail_core::Envelope;

use crate::ConnectorError;

/// Callbacks of a [`crate::StreamingConnector`].
///
/// Called from the connector's driver task; implementations should return
/// quickly and hand heavy work off elsewhere. Every error path produces
/// exactly one callback.
pub trait StreamHandler: Send + Sync + 'static {
    /// The server confirmed the subscription
    fn on_open(&self) {}

    fn on_event(&self, envelope: Envelope);

    /// The server ended the stream after a terminal event
    fn on_close(&self) {}

    fn on_error(&self, error: ConnectorError);

    /// A reconnect is scheduled after `delay`
    fn on_reconnecting(&self, _attempt: u32, _delay: Duration) {}
}
