//! Security Manager Protocol, LE legacy pairing (initiator role)

pub mod constants;
pub mod crypto;
pub mod engine;
pub mod packets;
pub mod types;

pub use engine::{Action, DistributedKeys, PairingSession, PairingState};
pub use packets::SmpPdu;
pub use types::{
    AssociationModel, AuthType, PairingFeatures, SmpError, SmpResult, UnsupportedMode,
};
