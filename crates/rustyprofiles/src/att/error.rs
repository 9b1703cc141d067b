//! ATT status codes exchanged with the stack
use super::constants::*;
use thiserror::Error;

/// ATT error codes carried in confirms, write responses and completion events
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttErrorCode {
    #[error("invalid handle")]
    InvalidHandle,
    #[error("read not permitted")]
    ReadNotPermitted,
    #[error("write not permitted")]
    WriteNotPermitted,
    #[error("invalid PDU")]
    InvalidPdu,
    #[error("insufficient authentication")]
    InsufficientAuthentication,
    #[error("request not supported")]
    RequestNotSupported,
    #[error("invalid offset")]
    InvalidOffset,
    #[error("insufficient authorization")]
    InsufficientAuthorization,
    #[error("prepare queue full")]
    PrepareQueueFull,
    #[error("attribute not found")]
    AttributeNotFound,
    #[error("attribute not long")]
    AttributeNotLong,
    #[error("insufficient encryption key size")]
    InsufficientEncryptionKeySize,
    #[error("invalid attribute value length")]
    InvalidAttributeValueLength,
    #[error("unlikely error")]
    Unlikely,
    #[error("insufficient encryption")]
    InsufficientEncryption,
    #[error("unsupported group type")]
    UnsupportedGroupType,
    #[error("insufficient resources")]
    InsufficientResources,
    /// Profile defined error in 0x80..=0x9F
    #[error("application error 0x{0:02X}")]
    ApplicationError(u8),
    /// Common profile error in 0xE0..=0xFF, e.g. CCCD improperly configured
    #[error("common profile error 0x{0:02X}")]
    CommonProfileError(u8),
    #[error("unknown error 0x{0:02X}")]
    Unknown(u8),
}

impl AttErrorCode {
    /// CCCD written with a value outside 0x0000..=0x0002
    pub const CCCD_IMPROPERLY_CONFIGURED: AttErrorCode =
        AttErrorCode::CommonProfileError(ATT_ERROR_CCCD_IMPROPERLY_CONFIGURED);
}

impl From<u8> for AttErrorCode {
    fn from(code: u8) -> Self {
        match code {
            ATT_ERROR_INVALID_HANDLE => AttErrorCode::InvalidHandle,
            ATT_ERROR_READ_NOT_PERMITTED => AttErrorCode::ReadNotPermitted,
            ATT_ERROR_WRITE_NOT_PERMITTED => AttErrorCode::WriteNotPermitted,
            ATT_ERROR_INVALID_PDU => AttErrorCode::InvalidPdu,
            ATT_ERROR_INSUFFICIENT_AUTHENTICATION => AttErrorCode::InsufficientAuthentication,
            ATT_ERROR_REQUEST_NOT_SUPPORTED => AttErrorCode::RequestNotSupported,
            ATT_ERROR_INVALID_OFFSET => AttErrorCode::InvalidOffset,
            ATT_ERROR_INSUFFICIENT_AUTHORIZATION => AttErrorCode::InsufficientAuthorization,
            ATT_ERROR_PREPARE_QUEUE_FULL => AttErrorCode::PrepareQueueFull,
            ATT_ERROR_ATTRIBUTE_NOT_FOUND => AttErrorCode::AttributeNotFound,
            ATT_ERROR_ATTRIBUTE_NOT_LONG => AttErrorCode::AttributeNotLong,
            ATT_ERROR_INSUFFICIENT_ENCRYPTION_KEY_SIZE => AttErrorCode::InsufficientEncryptionKeySize,
            ATT_ERROR_INVALID_ATTRIBUTE_VALUE_LENGTH => AttErrorCode::InvalidAttributeValueLength,
            ATT_ERROR_UNLIKELY => AttErrorCode::Unlikely,
            ATT_ERROR_INSUFFICIENT_ENCRYPTION => AttErrorCode::InsufficientEncryption,
            ATT_ERROR_UNSUPPORTED_GROUP_TYPE => AttErrorCode::UnsupportedGroupType,
            ATT_ERROR_INSUFFICIENT_RESOURCES => AttErrorCode::InsufficientResources,
            ATT_ERROR_APPLICATION_ERROR_START..=ATT_ERROR_APPLICATION_ERROR_END => {
                AttErrorCode::ApplicationError(code)
            }
            ATT_ERROR_COMMON_PROFILE_ERROR_START..=ATT_ERROR_COMMON_PROFILE_ERROR_END => {
                AttErrorCode::CommonProfileError(code)
            }
            _ => AttErrorCode::Unknown(code),
        }
    }
}

impl From<AttErrorCode> for u8 {
    fn from(code: AttErrorCode) -> u8 {
        match code {
            AttErrorCode::InvalidHandle => ATT_ERROR_INVALID_HANDLE,
            AttErrorCode::ReadNotPermitted => ATT_ERROR_READ_NOT_PERMITTED,
            AttErrorCode::WriteNotPermitted => ATT_ERROR_WRITE_NOT_PERMITTED,
            AttErrorCode::InvalidPdu => ATT_ERROR_INVALID_PDU,
            AttErrorCode::InsufficientAuthentication => ATT_ERROR_INSUFFICIENT_AUTHENTICATION,
            AttErrorCode::RequestNotSupported => ATT_ERROR_REQUEST_NOT_SUPPORTED,
            AttErrorCode::InvalidOffset => ATT_ERROR_INVALID_OFFSET,
            AttErrorCode::InsufficientAuthorization => ATT_ERROR_INSUFFICIENT_AUTHORIZATION,
            AttErrorCode::PrepareQueueFull => ATT_ERROR_PREPARE_QUEUE_FULL,
            AttErrorCode::AttributeNotFound => ATT_ERROR_ATTRIBUTE_NOT_FOUND,
            AttErrorCode::AttributeNotLong => ATT_ERROR_ATTRIBUTE_NOT_LONG,
            AttErrorCode::InsufficientEncryptionKeySize => ATT_ERROR_INSUFFICIENT_ENCRYPTION_KEY_SIZE,
            AttErrorCode::InvalidAttributeValueLength => ATT_ERROR_INVALID_ATTRIBUTE_VALUE_LENGTH,
            AttErrorCode::Unlikely => ATT_ERROR_UNLIKELY,
            AttErrorCode::InsufficientEncryption => ATT_ERROR_INSUFFICIENT_ENCRYPTION,
            AttErrorCode::UnsupportedGroupType => ATT_ERROR_UNSUPPORTED_GROUP_TYPE,
            AttErrorCode::InsufficientResources => ATT_ERROR_INSUFFICIENT_RESOURCES,
            AttErrorCode::ApplicationError(code)
            | AttErrorCode::CommonProfileError(code)
            | AttErrorCode::Unknown(code) => code,
        }
    }
}

/// Maps a raw stack status byte (0 = success) to a result.
pub fn status_to_result(status: u8) -> Result<(), AttErrorCode> {
    match status {
        0 => Ok(()),
        code => Err(AttErrorCode::from(code)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_ranges() {
        assert_eq!(AttErrorCode::from(0x80), AttErrorCode::ApplicationError(0x80));
        assert_eq!(AttErrorCode::from(0xFD), AttErrorCode::CCCD_IMPROPERLY_CONFIGURED);
        assert_eq!(AttErrorCode::from(0x42), AttErrorCode::Unknown(0x42));
        assert_eq!(u8::from(AttErrorCode::InvalidOffset), 0x07);
    }

    #[test]
    fn test_status_to_result() {
        assert_eq!(status_to_result(0), Ok(()));
        assert_eq!(status_to_result(0x01), Err(AttErrorCode::InvalidHandle));
    }
}
