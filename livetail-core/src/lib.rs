pub mod auth;
pub mod channel;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;

pub use channel::ChannelSet;
pub use config::Config;
pub use error::{Error, Result};
pub use models::{Content, Envelope, EventType, RunId, ThreadId};
