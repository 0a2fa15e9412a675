//! Error types for the call stack

/// Result type alias using the call stack [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while setting up or running a consultation call
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Join attempted before the scheduled time or before approval
    #[error("Not eligible to join: {0}")]
    NotEligible(String),

    /// Appointment id did not resolve
    #[error("Appointment not found: {0}")]
    AppointmentNotFound(String),

    /// A call attempt is already active on this controller
    #[error("Call already in progress for appointment {0}")]
    CallInProgress(String),

    /// Capture permission refused or no capture device available
    #[error("Media acquisition failed: {0}")]
    MediaAcquisition(String),

    /// Malformed or undeliverable signaling traffic
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// The negotiation primitive rejected a description or candidate
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error leaves the controller ready for a fresh `join`
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::NotEligible(_)
                | Error::AppointmentNotFound(_)
                | Error::CallInProgress(_)
                | Error::MediaAcquisition(_)
                | Error::Signaling(_)
        )
    }

    /// Check if this error comes from the eligibility gate
    pub fn is_eligibility(&self) -> bool {
        matches!(self, Error::NotEligible(_) | Error::AppointmentNotFound(_))
    }
}
