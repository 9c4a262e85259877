pub mod envelope;
pub mod id;

pub use envelope::{Content, Envelope, EventType};
pub use id::{generate_id, RunId, ThreadId};
