//! Relay server: broker channels in, one event stream per HTTP request out

pub mod http;
pub mod relay;

pub use http::{create_router, AppState};
pub use relay::{Frame, RelaySession, SessionConfig, SessionHandle, SessionState};
