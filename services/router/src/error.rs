//! Error types for the router process.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Errors locating or reading the routes file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// None of the candidate paths could be read.
    #[error("config file absent: searched {searched}")]
    NotFound { searched: String },

    /// An explicitly configured file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file was read but yielded no valid route.
    #[error("config file {} contains no valid routes", path.display())]
    Empty { path: PathBuf },
}

/// Process-level errors, each mapped to an exit code.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Startup configuration missing or empty.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Reload failed under the `exit` policy.
    #[error("reload failed: {0}")]
    Reload(#[source] ConfigError),

    /// The public socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Signal handlers could not be installed.
    #[error("signal setup failed: {0}")]
    Signal(#[source] io::Error),

    /// The accept loop stopped.
    #[error("listener failed: {0}")]
    Listener(#[source] io::Error),
}

impl RouterError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            RouterError::Config(_) | RouterError::Reload(_) => 3,
            RouterError::Bind { .. } => 4,
            RouterError::Signal(_) | RouterError::Listener(_) => 1,
        }
    }

    /// Short machine-readable reason, used as a log field.
    pub fn reason_code(&self) -> &'static str {
        match self {
            RouterError::Config(_) => "config_invalid",
            RouterError::Reload(_) => "reload_failed",
            RouterError::Bind { .. } => "bind_failed",
            RouterError::Signal(_) => "signal_setup_failed",
            RouterError::Listener(_) => "listener_failed",
        }
    }
}
