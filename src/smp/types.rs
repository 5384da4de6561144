//! Type definitions for the Security Manager Protocol

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::constants::*;

/// SMP error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SmpError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Unexpected SMP command 0x{opcode:02x} in state {state}")]
    UnexpectedCommand { opcode: u8, state: &'static str },

    #[error("Pairing mode not supported: {0}")]
    Unsupported(UnsupportedMode),

    #[error("Confirm Value Failed")]
    ConfirmValueFailed,

    #[error("Pairing failed by peer: {}", reason_text(*.0))]
    Remote(u8),

    #[error("Link encryption could not be started")]
    EncryptionFailed,

    #[error("Invalid passkey: {0}")]
    InvalidPasskey(String),

    #[error("Invalid state for operation")]
    InvalidState,
}

/// Result type for SMP operations
pub type SmpResult<T> = Result<T, SmpError>;

/// Pairing modes that are recognised but deliberately not implemented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnsupportedMode {
    Lesc,
    Oob,
}

impl fmt::Display for UnsupportedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnsupportedMode::Lesc => write!(f, "LE Secure Connections"),
            UnsupportedMode::Oob => write!(f, "Out of Band"),
        }
    }
}

/// IO Capability types for pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IoCapability {
    DisplayOnly = SMP_IO_CAPABILITY_DISPLAY_ONLY,
    DisplayYesNo = SMP_IO_CAPABILITY_DISPLAY_YES_NO,
    KeyboardOnly = SMP_IO_CAPABILITY_KEYBOARD_ONLY,
    NoInputNoOutput = SMP_IO_CAPABILITY_NO_INPUT_NO_OUTPUT,
    KeyboardDisplay = SMP_IO_CAPABILITY_KEYBOARD_DISPLAY,
}

impl TryFrom<u8> for IoCapability {
    type Error = SmpError;

    fn try_from(value: u8) -> SmpResult<Self> {
        match value {
            SMP_IO_CAPABILITY_DISPLAY_ONLY => Ok(IoCapability::DisplayOnly),
            SMP_IO_CAPABILITY_DISPLAY_YES_NO => Ok(IoCapability::DisplayYesNo),
            SMP_IO_CAPABILITY_KEYBOARD_ONLY => Ok(IoCapability::KeyboardOnly),
            SMP_IO_CAPABILITY_NO_INPUT_NO_OUTPUT => Ok(IoCapability::NoInputNoOutput),
            SMP_IO_CAPABILITY_KEYBOARD_DISPLAY => Ok(IoCapability::KeyboardDisplay),
            other => Err(SmpError::InvalidParameters(format!(
                "reserved IO capability 0x{other:02x}"
            ))),
        }
    }
}

impl From<IoCapability> for u8 {
    fn from(io: IoCapability) -> Self {
        io as u8
    }
}

impl fmt::Display for IoCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoCapability::DisplayOnly => write!(f, "Display Only"),
            IoCapability::DisplayYesNo => write!(f, "Display Yes/No"),
            IoCapability::KeyboardOnly => write!(f, "Keyboard Only"),
            IoCapability::NoInputNoOutput => write!(f, "No Input No Output"),
            IoCapability::KeyboardDisplay => write!(f, "Keyboard Display"),
        }
    }
}

/// Authentication requirements bitfield
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuthRequirements {
    pub bonding: bool,
    pub mitm: bool,
    pub secure_connections: bool,
}

impl From<u8> for AuthRequirements {
    fn from(value: u8) -> Self {
        Self {
            bonding: value & SMP_AUTH_REQ_BONDING != 0,
            mitm: value & SMP_AUTH_REQ_MITM != 0,
            secure_connections: value & SMP_AUTH_REQ_SC != 0,
        }
    }
}

impl From<AuthRequirements> for u8 {
    fn from(auth: AuthRequirements) -> Self {
        let mut value = 0;
        if auth.bonding {
            value |= SMP_AUTH_REQ_BONDING;
        }
        if auth.mitm {
            value |= SMP_AUTH_REQ_MITM;
        }
        if auth.secure_connections {
            value |= SMP_AUTH_REQ_SC;
        }
        value
    }
}

/// Key distribution flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyDistribution {
    pub encryption_key: bool,
    pub identity_key: bool,
    pub signing_key: bool,
}

impl KeyDistribution {
    /// Distribute the encryption key (LTK, EDIV, Rand) only
    pub const fn encryption_only() -> Self {
        Self {
            encryption_key: true,
            identity_key: false,
            signing_key: false,
        }
    }

    pub const fn none() -> Self {
        Self {
            encryption_key: false,
            identity_key: false,
            signing_key: false,
        }
    }
}

impl From<u8> for KeyDistribution {
    fn from(value: u8) -> Self {
        Self {
            encryption_key: value & SMP_KEY_DIST_ENC_KEY != 0,
            identity_key: value & SMP_KEY_DIST_ID_KEY != 0,
            signing_key: value & SMP_KEY_DIST_SIGN_KEY != 0,
        }
    }
}

impl From<KeyDistribution> for u8 {
    fn from(dist: KeyDistribution) -> Self {
        let mut value = 0;
        if dist.encryption_key {
            value |= SMP_KEY_DIST_ENC_KEY;
        }
        if dist.identity_key {
            value |= SMP_KEY_DIST_ID_KEY;
        }
        if dist.signing_key {
            value |= SMP_KEY_DIST_SIGN_KEY;
        }
        value
    }
}

/// Pairing features carried by a Pairing Request or Pairing Response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingFeatures {
    pub io_capability: IoCapability,
    pub oob_data_present: bool,
    pub auth_req: AuthRequirements,
    pub max_key_size: u8,
    pub initiator_key_dist: KeyDistribution,
    pub responder_key_dist: KeyDistribution,
}

/// Authentication type negotiated for a pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthType {
    #[serde(rename = "LE Legacy")]
    Legacy,
    #[serde(rename = "LESC")]
    Lesc,
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthType::Legacy => write!(f, "LE Legacy"),
            AuthType::Lesc => write!(f, "LESC"),
        }
    }
}

/// Association model negotiated for a legacy pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssociationModel {
    #[serde(rename = "Just Works")]
    JustWorks,
    #[serde(rename = "Passkey")]
    PasskeyEntry,
    #[serde(rename = "OOB")]
    OutOfBand,
}

impl fmt::Display for AssociationModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssociationModel::JustWorks => write!(f, "Just Works"),
            AssociationModel::PasskeyEntry => write!(f, "Passkey"),
            AssociationModel::OutOfBand => write!(f, "OOB"),
        }
    }
}

/// LESC is used only when both sides advertise Secure Connections support
pub fn authentication_type(request: &PairingFeatures, response: &PairingFeatures) -> AuthType {
    if request.auth_req.secure_connections && response.auth_req.secure_connections {
        AuthType::Lesc
    } else {
        AuthType::Legacy
    }
}

/// Select the legacy association model (Vol 3, Part H, section 2.3.5.1)
///
/// Priority: both OOB flags, then neither side requiring MITM, then the IO capabilities of the
/// two sides.
pub fn association_model(request: &PairingFeatures, response: &PairingFeatures) -> AssociationModel {
    if request.oob_data_present && response.oob_data_present {
        AssociationModel::OutOfBand
    } else if !request.auth_req.mitm && !response.auth_req.mitm {
        AssociationModel::JustWorks
    } else {
        io_capability_model(request.io_capability, response.io_capability)
    }
}

fn io_capability_model(request: IoCapability, response: IoCapability) -> AssociationModel {
    use IoCapability::*;

    match (request, response) {
        (NoInputNoOutput, _) | (_, NoInputNoOutput) => AssociationModel::JustWorks,
        (DisplayOnly, DisplayOnly) => AssociationModel::JustWorks,
        (DisplayYesNo, _) | (_, DisplayYesNo) => AssociationModel::JustWorks,
        _ => AssociationModel::PasskeyEntry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_IO: [IoCapability; 5] = [
        IoCapability::DisplayOnly,
        IoCapability::DisplayYesNo,
        IoCapability::KeyboardOnly,
        IoCapability::NoInputNoOutput,
        IoCapability::KeyboardDisplay,
    ];

    fn features(io: IoCapability, mitm: bool, oob: bool) -> PairingFeatures {
        PairingFeatures {
            io_capability: io,
            oob_data_present: oob,
            auth_req: AuthRequirements {
                bonding: true,
                mitm,
                secure_connections: false,
            },
            max_key_size: 16,
            initiator_key_dist: KeyDistribution::none(),
            responder_key_dist: KeyDistribution::encryption_only(),
        }
    }

    #[test]
    fn test_auth_requirements_bits() {
        let auth = AuthRequirements::from(0x05);
        assert!(auth.bonding);
        assert!(auth.mitm);
        assert!(!auth.secure_connections);
        assert_eq!(u8::from(auth), 0x05);

        let sc = AuthRequirements::from(0x0D);
        assert!(sc.secure_connections);
    }

    #[test]
    fn test_reserved_io_capability_rejected() {
        assert!(IoCapability::try_from(0x05).is_err());
        assert_eq!(
            IoCapability::try_from(0x04).unwrap(),
            IoCapability::KeyboardDisplay
        );
    }

    #[test]
    fn test_lesc_requires_both_sides() {
        let mut request = features(IoCapability::KeyboardDisplay, true, false);
        let mut response = features(IoCapability::KeyboardDisplay, true, false);
        request.auth_req.secure_connections = true;
        assert_eq!(authentication_type(&request, &response), AuthType::Legacy);

        response.auth_req.secure_connections = true;
        assert_eq!(authentication_type(&request, &response), AuthType::Lesc);
    }

    #[test]
    fn test_oob_takes_priority() {
        let request = features(IoCapability::KeyboardDisplay, true, true);
        let response = features(IoCapability::KeyboardOnly, true, true);
        assert_eq!(
            association_model(&request, &response),
            AssociationModel::OutOfBand
        );
    }

    #[test]
    fn test_no_mitm_is_just_works() {
        for req_io in ALL_IO {
            for res_io in ALL_IO {
                let request = features(req_io, false, false);
                let response = features(res_io, false, false);
                assert_eq!(
                    association_model(&request, &response),
                    AssociationModel::JustWorks
                );
            }
        }
    }

    #[test]
    fn test_io_capability_mapping() {
        use IoCapability::*;

        let cases = [
            (NoInputNoOutput, KeyboardDisplay, AssociationModel::JustWorks),
            (KeyboardDisplay, NoInputNoOutput, AssociationModel::JustWorks),
            (DisplayOnly, DisplayOnly, AssociationModel::JustWorks),
            (DisplayYesNo, KeyboardOnly, AssociationModel::JustWorks),
            (KeyboardOnly, DisplayYesNo, AssociationModel::JustWorks),
            (KeyboardDisplay, KeyboardDisplay, AssociationModel::PasskeyEntry),
            (KeyboardDisplay, DisplayOnly, AssociationModel::PasskeyEntry),
            (KeyboardOnly, KeyboardOnly, AssociationModel::PasskeyEntry),
            (DisplayOnly, KeyboardOnly, AssociationModel::PasskeyEntry),
        ];

        for (req_io, res_io, expected) in cases {
            let request = features(req_io, true, false);
            let response = features(res_io, false, false);
            assert_eq!(
                association_model(&request, &response),
                expected,
                "{req_io} / {res_io}"
            );
        }
    }

    #[test]
    fn test_association_model_is_symmetric() {
        for req_io in ALL_IO {
            for res_io in ALL_IO {
                for (req_mitm, res_mitm) in [(false, false), (true, false), (false, true), (true, true)] {
                    for oob in [false, true] {
                        let a = features(req_io, req_mitm, oob);
                        let b = features(res_io, res_mitm, oob);
                        assert_eq!(association_model(&a, &b), association_model(&b, &a));
                    }
                }
            }
        }
    }
}
