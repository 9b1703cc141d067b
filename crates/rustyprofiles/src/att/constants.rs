//! ATT constants used by the profile layer

// ATT error codes
pub const ATT_ERROR_INVALID_HANDLE: u8 = 0x01;
pub const ATT_ERROR_READ_NOT_PERMITTED: u8 = 0x02;
pub const ATT_ERROR_WRITE_NOT_PERMITTED: u8 = 0x03;
pub const ATT_ERROR_INVALID_PDU: u8 = 0x04;
pub const ATT_ERROR_INSUFFICIENT_AUTHENTICATION: u8 = 0x05;
pub const ATT_ERROR_REQUEST_NOT_SUPPORTED: u8 = 0x06;
pub const ATT_ERROR_INVALID_OFFSET: u8 = 0x07;
pub const ATT_ERROR_INSUFFICIENT_AUTHORIZATION: u8 = 0x08;
pub const ATT_ERROR_PREPARE_QUEUE_FULL: u8 = 0x09;
pub const ATT_ERROR_ATTRIBUTE_NOT_FOUND: u8 = 0x0A;
pub const ATT_ERROR_ATTRIBUTE_NOT_LONG: u8 = 0x0B;
pub const ATT_ERROR_INSUFFICIENT_ENCRYPTION_KEY_SIZE: u8 = 0x0C;
pub const ATT_ERROR_INVALID_ATTRIBUTE_VALUE_LENGTH: u8 = 0x0D;
pub const ATT_ERROR_UNLIKELY: u8 = 0x0E;
pub const ATT_ERROR_INSUFFICIENT_ENCRYPTION: u8 = 0x0F;
pub const ATT_ERROR_UNSUPPORTED_GROUP_TYPE: u8 = 0x10;
pub const ATT_ERROR_INSUFFICIENT_RESOURCES: u8 = 0x11;
pub const ATT_ERROR_APPLICATION_ERROR_START: u8 = 0x80;
pub const ATT_ERROR_APPLICATION_ERROR_END: u8 = 0x9F;
pub const ATT_ERROR_COMMON_PROFILE_ERROR_START: u8 = 0xE0;
pub const ATT_ERROR_COMMON_PROFILE_ERROR_END: u8 = 0xFF;
pub const ATT_ERROR_CCCD_IMPROPERLY_CONFIGURED: u8 = 0xFD;

// MTU
pub const ATT_DEFAULT_MTU: u16 = 23;
pub const ATT_MAX_MTU: u16 = 517;
/// Opcode (1) + handle (2) in front of every notification/indication value.
pub const ATT_NTF_IND_HEADER_LEN: u16 = 3;

// Declarations
pub const PRIMARY_SERVICE_UUID: u16 = 0x2800;
pub const SECONDARY_SERVICE_UUID: u16 = 0x2801;
pub const CHARACTERISTIC_UUID: u16 = 0x2803;

// Descriptors
pub const CLIENT_CHAR_CONFIG_UUID: u16 = 0x2902;
pub const CHAR_FORMAT_UUID: u16 = 0x2904;
pub const REPORT_REFERENCE_UUID: u16 = 0x2908;
