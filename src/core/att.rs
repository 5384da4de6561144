//! ATT error codes (Vol 3, Part F, section 3.4.1.1)

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
pub const ATT_ERROR_DATABASE_OUT_OF_SYNC: u8 = 0x12;
pub const ATT_ERROR_VALUE_NOT_ALLOWED: u8 = 0x13;
pub const ATT_ERROR_APPLICATION_ERROR_START: u8 = 0x80;
pub const ATT_ERROR_APPLICATION_ERROR_END: u8 = 0x9F;
pub const ATT_ERROR_COMMON_PROFILE_ERROR_START: u8 = 0xE0;
pub const ATT_ERROR_COMMON_PROFILE_ERROR_END: u8 = 0xFF;

/// Report text for an ATT error code
pub fn error_text(code: u8) -> &'static str {
    match code {
        ATT_ERROR_INVALID_HANDLE => "Invalid Handle",
        ATT_ERROR_READ_NOT_PERMITTED => "Read Not Permitted",
        ATT_ERROR_WRITE_NOT_PERMITTED => "Write Not Permitted",
        ATT_ERROR_INVALID_PDU => "Invalid PDU",
        ATT_ERROR_INSUFFICIENT_AUTHENTICATION => "Insufficient Authentication",
        ATT_ERROR_REQUEST_NOT_SUPPORTED => "Request Not Supported",
        ATT_ERROR_INVALID_OFFSET => "Invalid Offset",
        ATT_ERROR_INSUFFICIENT_AUTHORIZATION => "Insufficient Authorization",
        ATT_ERROR_PREPARE_QUEUE_FULL => "Prepare Queue Full",
        ATT_ERROR_ATTRIBUTE_NOT_FOUND => "Attribute Not Found",
        ATT_ERROR_ATTRIBUTE_NOT_LONG => "Attribute Not Long",
        ATT_ERROR_INSUFFICIENT_ENCRYPTION_KEY_SIZE => "Insufficient Encryption Key Size",
        ATT_ERROR_INVALID_ATTRIBUTE_VALUE_LENGTH => "Invalid Attribute Value Length",
        ATT_ERROR_UNLIKELY => "Unlikely Error",
        ATT_ERROR_INSUFFICIENT_ENCRYPTION => "Insufficient Encryption",
        ATT_ERROR_UNSUPPORTED_GROUP_TYPE => "Unsupported Group Type",
        ATT_ERROR_INSUFFICIENT_RESOURCES => "Insufficient Resources",
        ATT_ERROR_DATABASE_OUT_OF_SYNC => "Database Out Of Sync",
        ATT_ERROR_VALUE_NOT_ALLOWED => "Value Not Allowed",
        ATT_ERROR_APPLICATION_ERROR_START..=ATT_ERROR_APPLICATION_ERROR_END => "Application Error",
        0xFC => "Write Request Rejected",
        0xFD => "Client Characteristic Configuration Descriptor Improperly Configured",
        0xFE => "Procedure Already in Progress",
        0xFF => "Out of Range",
        ATT_ERROR_COMMON_PROFILE_ERROR_START..=ATT_ERROR_COMMON_PROFILE_ERROR_END => {
            "Common Profile and Service Error"
        }
        _ => "Undefined",
    }
}

/// Whether raising the link security level could resolve this error
pub fn is_security_error(code: u8) -> bool {
    matches!(
        code,
        ATT_ERROR_INSUFFICIENT_AUTHENTICATION
            | ATT_ERROR_INSUFFICIENT_AUTHORIZATION
            | ATT_ERROR_INSUFFICIENT_ENCRYPTION_KEY_SIZE
            | ATT_ERROR_INSUFFICIENT_ENCRYPTION
    )
}
