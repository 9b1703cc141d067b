//! Error types for the rustyprofiles library
//!
//! Every profile operation reports failures through [`ProfileError`]. Errors the
//! external stack hands back are carried as [`AttErrorCode`] inside
//! [`ProfileError::Stack`].

use crate::att::AttErrorCode;
use thiserror::Error;

/// Errors returned by profile operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProfileError {
    #[error("Invalid parameter: {0}")]
    InvalidParam(&'static str),

    /// The target attribute is not part of the table or was not discovered
    #[error("Invalid or undiscovered attribute handle")]
    InvalidHandle,

    #[error("Invalid connection index: {0}")]
    InvalidConnection(u8),

    #[error("Notifications are not enabled by the peer")]
    NtfDisabled,

    #[error("Indications are not enabled by the peer")]
    IndDisabled,

    #[error("No resources available")]
    NoResources,

    #[error("A transfer is already in progress")]
    Busy,

    #[error("Profile is not registered with a profile manager")]
    NotRegistered,

    #[error("Stack error: {0:?}")]
    Stack(AttErrorCode),
}

impl From<AttErrorCode> for ProfileError {
    fn from(code: AttErrorCode) -> Self {
        ProfileError::Stack(code)
    }
}

/// Result type for profile operations
pub type ProfileResult<T> = Result<T, ProfileError>;
