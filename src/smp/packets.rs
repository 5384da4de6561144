//! SMP packet encoding and decoding

use super::constants::*;
use super::crypto::frame_value;
use super::types::{
    AuthRequirements, IoCapability, KeyDistribution, PairingFeatures, SmpError, SmpResult,
};

/// A decoded SMP packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmpPdu {
    PairingRequest(PairingFeatures),
    PairingResponse(PairingFeatures),
    PairingConfirm(u128),
    PairingRandom(u128),
    PairingFailed(u8),
    EncryptionInformation(u128),
    MasterIdentification { ediv: u16, rand: u64 },
    /// Any other command (identity, signing, security request, LESC)
    Other(u8),
}

impl SmpPdu {
    /// Decode a raw SMP frame (opcode included)
    pub fn parse(data: &[u8]) -> SmpResult<Self> {
        let (&opcode, payload) = data
            .split_first()
            .ok_or_else(|| SmpError::InvalidParameters("empty SMP frame".into()))?;

        match opcode {
            SMP_PAIRING_REQUEST => Ok(SmpPdu::PairingRequest(PairingFeatures::parse(payload)?)),
            SMP_PAIRING_RESPONSE => Ok(SmpPdu::PairingResponse(PairingFeatures::parse(payload)?)),
            SMP_PAIRING_CONFIRM => Ok(SmpPdu::PairingConfirm(value_128(opcode, payload)?)),
            SMP_PAIRING_RANDOM => Ok(SmpPdu::PairingRandom(value_128(opcode, payload)?)),
            SMP_PAIRING_FAILED => payload
                .first()
                .map(|reason| SmpPdu::PairingFailed(*reason))
                .ok_or_else(|| short_frame(opcode, 1, payload.len())),
            SMP_ENCRYPTION_INFORMATION => {
                Ok(SmpPdu::EncryptionInformation(value_128(opcode, payload)?))
            }
            SMP_MASTER_IDENTIFICATION => {
                if payload.len() < 10 {
                    return Err(short_frame(opcode, 10, payload.len()));
                }
                let ediv = u16::from_le_bytes([payload[0], payload[1]]);
                let mut rand = [0u8; 8];
                rand.copy_from_slice(&payload[2..10]);
                Ok(SmpPdu::MasterIdentification {
                    ediv,
                    rand: u64::from_le_bytes(rand),
                })
            }
            other => Ok(SmpPdu::Other(other)),
        }
    }

    pub fn opcode(&self) -> u8 {
        match self {
            SmpPdu::PairingRequest(_) => SMP_PAIRING_REQUEST,
            SmpPdu::PairingResponse(_) => SMP_PAIRING_RESPONSE,
            SmpPdu::PairingConfirm(_) => SMP_PAIRING_CONFIRM,
            SmpPdu::PairingRandom(_) => SMP_PAIRING_RANDOM,
            SmpPdu::PairingFailed(_) => SMP_PAIRING_FAILED,
            SmpPdu::EncryptionInformation(_) => SMP_ENCRYPTION_INFORMATION,
            SmpPdu::MasterIdentification { .. } => SMP_MASTER_IDENTIFICATION,
            SmpPdu::Other(opcode) => *opcode,
        }
    }

    /// Encode the packet into a raw SMP frame
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut frame = vec![self.opcode()];
        match self {
            SmpPdu::PairingRequest(features) | SmpPdu::PairingResponse(features) => {
                frame.extend_from_slice(&features.payload());
            }
            SmpPdu::PairingConfirm(value)
            | SmpPdu::PairingRandom(value)
            | SmpPdu::EncryptionInformation(value) => {
                frame.extend_from_slice(&value.to_le_bytes());
            }
            SmpPdu::PairingFailed(reason) => frame.push(*reason),
            SmpPdu::MasterIdentification { ediv, rand } => {
                frame.extend_from_slice(&ediv.to_le_bytes());
                frame.extend_from_slice(&rand.to_le_bytes());
            }
            SmpPdu::Other(_) => {}
        }
        frame
    }
}

impl PairingFeatures {
    /// Decode the six payload octets of a Pairing Request/Response
    pub fn parse(payload: &[u8]) -> SmpResult<Self> {
        if payload.len() < SMP_PAIRING_FEATURES_LEN - 1 {
            return Err(SmpError::InvalidParameters(format!(
                "pairing features need {} octets, got {}",
                SMP_PAIRING_FEATURES_LEN - 1,
                payload.len()
            )));
        }

        let max_key_size = payload[3];
        if !(SMP_MIN_ENCRYPTION_KEY_SIZE..=SMP_MAX_ENCRYPTION_KEY_SIZE).contains(&max_key_size) {
            return Err(SmpError::InvalidParameters(format!(
                "max key size {max_key_size} out of range"
            )));
        }

        Ok(Self {
            io_capability: IoCapability::try_from(payload[0])?,
            oob_data_present: payload[1] == SMP_OOB_PRESENT,
            auth_req: AuthRequirements::from(payload[2]),
            max_key_size,
            initiator_key_dist: KeyDistribution::from(payload[4]),
            responder_key_dist: KeyDistribution::from(payload[5]),
        })
    }

    /// The six payload octets of a Pairing Request/Response
    pub fn payload(&self) -> [u8; SMP_PAIRING_FEATURES_LEN - 1] {
        [
            self.io_capability.into(),
            if self.oob_data_present {
                SMP_OOB_PRESENT
            } else {
                SMP_OOB_NOT_PRESENT
            },
            self.auth_req.into(),
            self.max_key_size,
            self.initiator_key_dist.into(),
            self.responder_key_dist.into(),
        ]
    }

    /// Full 7-octet frame with the given opcode, as fed into `c1`
    pub fn frame(&self, opcode: u8) -> [u8; SMP_PAIRING_FEATURES_LEN] {
        let mut frame = [0u8; SMP_PAIRING_FEATURES_LEN];
        frame[0] = opcode;
        frame[1..].copy_from_slice(&self.payload());
        frame
    }
}

fn value_128(opcode: u8, payload: &[u8]) -> SmpResult<u128> {
    if payload.len() < 16 {
        return Err(short_frame(opcode, 16, payload.len()));
    }
    Ok(frame_value(&payload[..16]))
}

fn short_frame(opcode: u8, expected: usize, actual: usize) -> SmpError {
    SmpError::InvalidParameters(format!(
        "SMP command 0x{opcode:02x} needs {expected} payload octets, got {actual}"
    ))
}
