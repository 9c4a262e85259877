use livetail_core::channel::thread_channel;
use livetail_core::Envelope;
use tracing::debug;

use super::EventPublisher;
use crate::Result;

/// Serialize an envelope and publish it to its thread's direct channel
pub async fn publish_envelope(publisher: &dyn EventPublisher, envelope: &Envelope) -> Result<usize> {
    let channel = thread_channel(&envelope.thread_id);
    let payload = envelope.to_json()?;

    let subscribers = publisher.publish(&channel, &payload).await?;
    debug!(
        channel = %channel,
        event_type = %envelope.event_type,
        subscribers = subscribers,
        "Envelope published"
    );
    Ok(subscribers)
}
