//! Error types for the BLE security profiler

use thiserror::Error;

use super::att;
use crate::smp::constants::{
    SMP_REASON_CONFIRM_VALUE_FAILED, SMP_REASON_PASSKEY_ENTRY_FAILED, reason_text,
};
use crate::smp::{SmpError, UnsupportedMode};

/// Result type for link backend operations
pub type LinkResult<T> = Result<T, LinkError>;

/// Result type for profiler operations
pub type ProfilerResult<T> = Result<T, ProfilerError>;

/// Errors reported by a link backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Link disconnected")]
    Disconnected,

    #[error("Attribute not found: {0}")]
    NotFound(String),

    #[error("ATT error 0x{0:02x}")]
    Att(u8),

    #[error("Operation not supported by backend: {0}")]
    Unsupported(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Outcome of a failed characteristic access
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("Timeout")]
    Timeout,

    #[error("{}", att::error_text(*.0))]
    Protocol(u8),

    #[error("Link disconnected")]
    Disconnected,

    #[error("{0}")]
    Backend(String),
}

impl AccessError {
    /// ATT errors that more security could resolve
    pub fn is_security_related(&self) -> bool {
        matches!(self, AccessError::Protocol(code) if att::is_security_error(*code))
    }
}

impl From<LinkError> for AccessError {
    fn from(error: LinkError) -> Self {
        match error {
            LinkError::Att(code) => AccessError::Protocol(code),
            LinkError::Disconnected => AccessError::Disconnected,
            other => AccessError::Backend(other.to_string()),
        }
    }
}

/// Outcome of a failed pairing attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PairingFailure {
    #[error("Pairing timed out")]
    Timeout,

    #[error("Link disconnected during pairing")]
    LinkDisconnected,

    #[error("{0}")]
    Protocol(String),

    #[error("Unsupported pairing mode: {0}")]
    Unsupported(UnsupportedMode),

    #[error("Pairing unavailable on this link: {0}")]
    Link(String),
}

impl PairingFailure {
    /// Failures a different passkey might fix
    pub fn is_passkey_related(&self) -> bool {
        match self {
            PairingFailure::Protocol(text) => {
                text == reason_text(SMP_REASON_PASSKEY_ENTRY_FAILED)
                    || text == reason_text(SMP_REASON_CONFIRM_VALUE_FAILED)
            }
            _ => false,
        }
    }
}

impl From<SmpError> for PairingFailure {
    fn from(error: SmpError) -> Self {
        match error {
            SmpError::Remote(reason) => PairingFailure::Protocol(reason_text(reason).to_string()),
            SmpError::Unsupported(mode) => PairingFailure::Unsupported(mode),
            SmpError::ConfirmValueFailed => {
                PairingFailure::Protocol(reason_text(SMP_REASON_CONFIRM_VALUE_FAILED).to_string())
            }
            SmpError::InvalidPasskey(_) => {
                PairingFailure::Protocol(reason_text(SMP_REASON_PASSKEY_ENTRY_FAILED).to_string())
            }
            other => PairingFailure::Protocol(other.to_string()),
        }
    }
}

impl From<LinkError> for PairingFailure {
    fn from(error: LinkError) -> Self {
        match error {
            LinkError::Disconnected => PairingFailure::LinkDisconnected,
            other => PairingFailure::Link(other.to_string()),
        }
    }
}

/// Errors that abort a profiling run
#[derive(Error, Debug)]
pub enum ProfilerError {
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Passkey input failed: {0}")]
    Passkey(String),
}
