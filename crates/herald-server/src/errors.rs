//! Server errors.

/// Errors raised while starting or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Resolving or binding the listen address failed.
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// `host:port` we tried to bind.
        address: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Other I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The global metrics recorder could not be installed.
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ServerError>;
