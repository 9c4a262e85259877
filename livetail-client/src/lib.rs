//! Client side of a livetail stream
//!
//! [`StreamingConnector`] keeps one logical subscription to a thread open
//! across transport failures, reconnecting with exponential backoff and
//! reporting everything through a [`StreamHandler`].

pub mod backoff;
pub mod connector;
pub mod error;
pub mod handler;
pub mod token;
pub mod transport;

pub use backoff::ReconnectPolicy;
pub use connector::{ConnectorState, StreamingConnector};
pub use error::ConnectorError;
pub use handler::StreamHandler;
pub use token::{JwtTokenProvider, StaticToken, TokenProvider};
pub use transport::{ByteStream, HttpTransport, Transport, TransportError};
