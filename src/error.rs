//! Munin error types

/// Munin error types
#[derive(Debug, thiserror::Error)]
pub enum MuninError {
    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The verifier's lifetime has ended; its histories are frozen and the
    /// registry will reap it via the completion channel.
    #[error("verifier {0} finished, cannot be updated anymore")]
    VerifierFinished(String),

    // Telemetry errors
    #[error("telemetry I/O error: {0}")]
    Telemetry(#[from] std::io::Error),
}

/// Result type alias for munin operations
pub type Result<T> = std::result::Result<T, MuninError>;
