use thiserror::Error;

/// Errors reported to [`crate::StreamHandler::on_error`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    /// A data frame did not decode as an envelope. The connection stays up.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// The server refused the credential (401/403). No reconnect follows.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The server rejected the request itself (400). No reconnect follows.
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Gave up after {attempts} reconnect attempts")]
    GaveUp { attempts: u32 },

    /// The token provider could not produce a credential
    #[error("Credential unavailable: {0}")]
    Credential(String),
}
