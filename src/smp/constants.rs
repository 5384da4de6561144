//! Constants for the Security Manager Protocol

// SMP command codes
pub const SMP_PAIRING_REQUEST: u8 = 0x01;
pub const SMP_PAIRING_RESPONSE: u8 = 0x02;
pub const SMP_PAIRING_CONFIRM: u8 = 0x03;
pub const SMP_PAIRING_RANDOM: u8 = 0x04;
pub const SMP_PAIRING_FAILED: u8 = 0x05;
pub const SMP_ENCRYPTION_INFORMATION: u8 = 0x06;
pub const SMP_MASTER_IDENTIFICATION: u8 = 0x07;

// IO Capability values
pub const SMP_IO_CAPABILITY_DISPLAY_ONLY: u8 = 0x00;
pub const SMP_IO_CAPABILITY_DISPLAY_YES_NO: u8 = 0x01;
pub const SMP_IO_CAPABILITY_KEYBOARD_ONLY: u8 = 0x02;
pub const SMP_IO_CAPABILITY_NO_INPUT_NO_OUTPUT: u8 = 0x03;
pub const SMP_IO_CAPABILITY_KEYBOARD_DISPLAY: u8 = 0x04;

// OOB data flag
pub const SMP_OOB_NOT_PRESENT: u8 = 0x00;
pub const SMP_OOB_PRESENT: u8 = 0x01;

// Authentication Requirements bit masks
pub const SMP_AUTH_REQ_BONDING: u8 = 0x01;
pub const SMP_AUTH_REQ_MITM: u8 = 0x04;
pub const SMP_AUTH_REQ_SC: u8 = 0x08;

// Pairing Failed reason codes
pub const SMP_REASON_PASSKEY_ENTRY_FAILED: u8 = 0x01;
pub const SMP_REASON_OOB_NOT_AVAILABLE: u8 = 0x02;
pub const SMP_REASON_AUTHENTICATION_REQUIREMENTS: u8 = 0x03;
pub const SMP_REASON_CONFIRM_VALUE_FAILED: u8 = 0x04;
pub const SMP_REASON_PAIRING_NOT_SUPPORTED: u8 = 0x05;
pub const SMP_REASON_ENCRYPTION_KEY_SIZE: u8 = 0x06;
pub const SMP_REASON_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const SMP_REASON_UNSPECIFIED_REASON: u8 = 0x08;
pub const SMP_REASON_REPEATED_ATTEMPTS: u8 = 0x09;
pub const SMP_REASON_INVALID_PARAMETERS: u8 = 0x0A;
pub const SMP_REASON_DHKEY_CHECK_FAILED: u8 = 0x0B;
pub const SMP_REASON_NUMERIC_COMPARISON_FAILED: u8 = 0x0C;
pub const SMP_REASON_BR_EDR_PAIRING_IN_PROGRESS: u8 = 0x0D;
pub const SMP_REASON_CROSS_TRANSPORT_KEY_NOT_ALLOWED: u8 = 0x0E;

// SMP key distribution bit masks
pub const SMP_KEY_DIST_ENC_KEY: u8 = 0x01;
pub const SMP_KEY_DIST_ID_KEY: u8 = 0x02;
pub const SMP_KEY_DIST_SIGN_KEY: u8 = 0x04;

// SMP encryption key size limits
pub const SMP_MIN_ENCRYPTION_KEY_SIZE: u8 = 7;
pub const SMP_MAX_ENCRYPTION_KEY_SIZE: u8 = 16;

// Pairing request/response frame length (opcode included)
pub const SMP_PAIRING_FEATURES_LEN: usize = 7;

/// Human readable text for a Pairing Failed reason code
pub fn reason_text(reason: u8) -> &'static str {
    match reason {
        SMP_REASON_PASSKEY_ENTRY_FAILED => "Passkey Entry Failed",
        SMP_REASON_OOB_NOT_AVAILABLE => "OOB Not Available",
        SMP_REASON_AUTHENTICATION_REQUIREMENTS => "Authentication Requirements",
        SMP_REASON_CONFIRM_VALUE_FAILED => "Confirm Value Failed",
        SMP_REASON_PAIRING_NOT_SUPPORTED => "Pairing Not Supported",
        SMP_REASON_ENCRYPTION_KEY_SIZE => "Encryption Key Size",
        SMP_REASON_COMMAND_NOT_SUPPORTED => "Command Not Supported",
        SMP_REASON_UNSPECIFIED_REASON => "Unspecified Reason",
        SMP_REASON_REPEATED_ATTEMPTS => "Repeated Attempts",
        SMP_REASON_INVALID_PARAMETERS => "Invalid Parameters",
        SMP_REASON_DHKEY_CHECK_FAILED => "DHKey Check Failed",
        SMP_REASON_NUMERIC_COMPARISON_FAILED => "Numeric Comparison Failed",
        SMP_REASON_BR_EDR_PAIRING_IN_PROGRESS => "BR/EDR pairing in progress",
        SMP_REASON_CROSS_TRANSPORT_KEY_NOT_ALLOWED => "Cross-transport Key Derivation/Generation not allowed",
        _ => "Unmapped error",
    }
}
