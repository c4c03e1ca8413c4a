//! Error types for the registry's collaborators.
//!
//! None of these are fatal: the registry logs them and retries on its own
//! schedule.

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("link {0} is already closed")]
    AlreadyClosed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        source: std::io::Error,
    },
    #[error("dial to {0} timed out")]
    Timeout(String),
    #[error("link handshake with {address} failed: {reason}")]
    Handshake { address: String, reason: String },
    #[error("unsupported link protocol '{0}'")]
    UnsupportedProtocol(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("pool {0} is saturated")]
    Saturated(String),
    #[error("pool {0} is shut down")]
    Closed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CtrlError {
    #[error("controller {0} is not connected")]
    NotConnected(String),
    #[error("send to controller {0} timed out")]
    Timeout(String),
    #[error("send to controller {ctrl_id} failed: {reason}")]
    SendFailed { ctrl_id: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("timed out waiting for result")]
    Timeout,
    #[error("link registry is shut down")]
    Closed,
    #[error("invalid registry config: {0}")]
    Config(String),
}
