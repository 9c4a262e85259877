//! Per-request relay sessions
//!
//! A session owns one dedicated broker subscriber and the only sender of its
//! outbound frame channel. The HTTP layer turns the receiving half into the
//! response body.

pub mod frame;
pub mod session;

pub use frame::Frame;
pub use session::{FrameStream, RelaySession, SessionConfig, SessionHandle, SessionState};
