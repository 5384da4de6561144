//! LE legacy pairing engine, initiator side
//!
//! The engine is sans-IO: it consumes raw SMP frames and link events and answers with a list of
//! [`Action`]s for the caller to carry out. One [`PairingSession`] covers exactly one pairing
//! attempt and is discarded afterwards.

use rand::{CryptoRng, RngCore};
use tracing::{debug, trace, warn};

use super::constants::*;
use super::crypto::{c1, frame_value, mask_key, s1};
use super::packets::SmpPdu;
use super::types::{
    AssociationModel, AuthType, PairingFeatures, SmpError, SmpResult, UnsupportedMode,
    association_model, authentication_type,
};
use crate::core::types::DeviceAddress;

const MAX_PASSKEY: u32 = 999_999;

/// Pairing session states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    Idle,
    RequestSent,
    ResponseReceived,
    AwaitingPasskey,
    ConfirmSent,
    ConfirmReceived,
    RandomExchanged,
    KeyReady,
    EncryptionPending,
    Complete,
    Failed,
}

impl PairingState {
    pub fn name(&self) -> &'static str {
        match self {
            PairingState::Idle => "Idle",
            PairingState::RequestSent => "RequestSent",
            PairingState::ResponseReceived => "ResponseReceived",
            PairingState::AwaitingPasskey => "AwaitingPasskey",
            PairingState::ConfirmSent => "ConfirmSent",
            PairingState::ConfirmReceived => "ConfirmReceived",
            PairingState::RandomExchanged => "RandomExchanged",
            PairingState::KeyReady => "KeyReady",
            PairingState::EncryptionPending => "EncryptionPending",
            PairingState::Complete => "Complete",
            PairingState::Failed => "Failed",
        }
    }
}

/// Long term key material distributed by the responder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistributedKeys {
    pub ltk: u128,
    pub ediv: u16,
    pub rand: u64,
}

/// Work the caller has to carry out on behalf of the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Transmit this frame on the SMP channel
    Send(Vec<u8>),
    /// Ask the user (or a passkey source) for the 6-digit passkey
    RequestPasskey,
    /// Start link encryption with the short term key
    StartEncryption(u128),
    Complete {
        auth_type: AuthType,
        assoc_model: AssociationModel,
    },
    KeysDistributed(DistributedKeys),
}

/// One legacy pairing attempt
#[derive(Debug)]
pub struct PairingSession {
    state: PairingState,
    local: DeviceAddress,
    peer: DeviceAddress,
    request: PairingFeatures,
    response: Option<PairingFeatures>,
    preq: u128,
    pres: u128,
    auth_type: Option<AuthType>,
    assoc_model: Option<AssociationModel>,
    passkey: Option<u32>,
    tk: u128,
    local_random: u128,
    peer_confirm: Option<u128>,
    key_size: u8,
    stk: Option<u128>,
    ltk: Option<u128>,
    keys: Option<DistributedKeys>,
    failure_frame: Option<Vec<u8>>,
}

impl PairingSession {
    /// Create a session for the given request
    ///
    /// `passkey` is used if Passkey Entry is negotiated; without it the engine emits
    /// [`Action::RequestPasskey`] and waits for [`PairingSession::provide_passkey`].
    pub fn new<R: RngCore + CryptoRng>(
        local: DeviceAddress,
        peer: DeviceAddress,
        request: PairingFeatures,
        passkey: Option<u32>,
        rng: &mut R,
    ) -> Self {
        let mut random = [0u8; 16];
        rng.fill_bytes(&mut random);

        Self {
            state: PairingState::Idle,
            local,
            peer,
            request,
            response: None,
            preq: frame_value(&request.frame(SMP_PAIRING_REQUEST)),
            pres: 0,
            auth_type: None,
            assoc_model: None,
            passkey,
            tk: 0,
            local_random: u128::from_le_bytes(random),
            peer_confirm: None,
            key_size: request.max_key_size,
            stk: None,
            ltk: None,
            keys: None,
            failure_frame: None,
        }
    }

    pub fn state(&self) -> PairingState {
        self.state
    }

    pub fn auth_type(&self) -> Option<AuthType> {
        self.auth_type
    }

    pub fn assoc_model(&self) -> Option<AssociationModel> {
        self.assoc_model
    }

    /// Features announced by the responder, once received
    pub fn response(&self) -> Option<&PairingFeatures> {
        self.response.as_ref()
    }

    /// Negotiated encryption key size in octets
    pub fn key_size(&self) -> u8 {
        self.key_size
    }

    pub fn stk(&self) -> Option<u128> {
        self.stk
    }

    pub fn keys(&self) -> Option<DistributedKeys> {
        self.keys
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, PairingState::Complete | PairingState::Failed)
    }

    /// Pairing Failed frame to send after the session failed locally, if any
    pub fn failure_frame(&self) -> Option<&[u8]> {
        self.failure_frame.as_deref()
    }

    /// Send the Pairing Request
    pub fn start(&mut self) -> SmpResult<Vec<Action>> {
        if self.state != PairingState::Idle {
            return Err(SmpError::InvalidState);
        }

        debug!(peer = %self.peer, "Sending pairing request");
        self.transition(PairingState::RequestSent);
        Ok(vec![Action::Send(
            SmpPdu::PairingRequest(self.request).to_bytes(),
        )])
    }

    /// Handle a frame received on the SMP channel
    pub fn handle_frame(&mut self, data: &[u8]) -> SmpResult<Vec<Action>> {
        if self.state == PairingState::Failed {
            return Err(SmpError::InvalidState);
        }

        let pdu = match SmpPdu::parse(data) {
            Ok(pdu) => pdu,
            Err(e) => return Err(self.fail(e, Some(SMP_REASON_INVALID_PARAMETERS))),
        };
        trace!(opcode = pdu.opcode(), state = self.state.name(), "SMP frame received");

        match (self.state, pdu) {
            (_, SmpPdu::PairingFailed(reason)) => {
                warn!(reason = reason_text(reason), "Peer rejected pairing");
                Err(self.fail(SmpError::Remote(reason), None))
            }
            (PairingState::RequestSent, SmpPdu::PairingResponse(features)) => {
                self.handle_pairing_response(&data[..SMP_PAIRING_FEATURES_LEN], features)
            }
            (PairingState::AwaitingPasskey, SmpPdu::PairingConfirm(confirm)) => {
                // Held until the passkey arrives
                self.peer_confirm = Some(confirm);
                Ok(Vec::new())
            }
            (PairingState::ConfirmSent, SmpPdu::PairingConfirm(confirm)) => {
                self.peer_confirm = Some(confirm);
                self.transition(PairingState::ConfirmReceived);
                Ok(vec![self.random_frame()])
            }
            (PairingState::ConfirmReceived, SmpPdu::PairingRandom(peer_random)) => {
                self.handle_pairing_random(peer_random)
            }
            (
                PairingState::EncryptionPending | PairingState::Complete,
                SmpPdu::EncryptionInformation(ltk),
            ) => {
                self.ltk = Some(ltk);
                Ok(Vec::new())
            }
            (
                PairingState::EncryptionPending | PairingState::Complete,
                SmpPdu::MasterIdentification { ediv, rand },
            ) => match self.ltk.take() {
                Some(ltk) => {
                    let keys = DistributedKeys { ltk, ediv, rand };
                    debug!(ediv, "Long term key distributed");
                    self.keys = Some(keys);
                    Ok(vec![Action::KeysDistributed(keys)])
                }
                None => Err(self.fail(
                    SmpError::UnexpectedCommand {
                        opcode: SMP_MASTER_IDENTIFICATION,
                        state: self.state.name(),
                    },
                    Some(SMP_REASON_UNSPECIFIED_REASON),
                )),
            },
            (_, SmpPdu::Other(opcode)) => {
                trace!(opcode, "Ignoring SMP command");
                Ok(Vec::new())
            }
            (state, pdu) => Err(self.fail(
                SmpError::UnexpectedCommand {
                    opcode: pdu.opcode(),
                    state: state.name(),
                },
                Some(SMP_REASON_UNSPECIFIED_REASON),
            )),
        }
    }

    /// Supply the passkey requested through [`Action::RequestPasskey`]
    pub fn provide_passkey(&mut self, passkey: u32) -> SmpResult<Vec<Action>> {
        if self.state != PairingState::AwaitingPasskey {
            return Err(SmpError::InvalidState);
        }
        if passkey > MAX_PASSKEY {
            return Err(self.fail(
                SmpError::InvalidPasskey(format!("{passkey} has more than 6 digits")),
                Some(SMP_REASON_PASSKEY_ENTRY_FAILED),
            ));
        }

        self.tk = u128::from(passkey);
        let mut actions = vec![self.confirm_frame()];
        self.transition(PairingState::ConfirmSent);

        if self.peer_confirm.is_some() {
            self.transition(PairingState::ConfirmReceived);
            actions.push(self.random_frame());
        }
        Ok(actions)
    }

    /// Handle the result of the encryption started with [`Action::StartEncryption`]
    pub fn handle_encryption_changed(&mut self, encrypted: bool) -> SmpResult<Vec<Action>> {
        if self.state != PairingState::EncryptionPending {
            return Err(SmpError::InvalidState);
        }
        if !encrypted {
            return Err(self.fail(SmpError::EncryptionFailed, None));
        }

        self.transition(PairingState::Complete);
        let (Some(auth_type), Some(assoc_model)) = (self.auth_type, self.assoc_model) else {
            return Err(self.fail(SmpError::InvalidState, None));
        };
        debug!(%auth_type, %assoc_model, "Pairing complete");
        Ok(vec![Action::Complete {
            auth_type,
            assoc_model,
        }])
    }

    fn handle_pairing_response(
        &mut self,
        raw: &[u8],
        response: PairingFeatures,
    ) -> SmpResult<Vec<Action>> {
        self.transition(PairingState::ResponseReceived);
        self.pres = frame_value(raw);
        self.response = Some(response);
        self.key_size = self.request.max_key_size.min(response.max_key_size);

        let auth_type = authentication_type(&self.request, &response);
        self.auth_type = Some(auth_type);
        if auth_type == AuthType::Lesc {
            return Err(self.fail(
                SmpError::Unsupported(UnsupportedMode::Lesc),
                Some(SMP_REASON_PAIRING_NOT_SUPPORTED),
            ));
        }

        let model = association_model(&self.request, &response);
        self.assoc_model = Some(model);
        debug!(
            io = %response.io_capability,
            mitm = response.auth_req.mitm,
            %model,
            key_size = self.key_size,
            "Pairing response received"
        );

        match model {
            AssociationModel::OutOfBand => Err(self.fail(
                SmpError::Unsupported(UnsupportedMode::Oob),
                Some(SMP_REASON_OOB_NOT_AVAILABLE),
            )),
            AssociationModel::JustWorks => {
                self.tk = 0;
                let actions = vec![self.confirm_frame()];
                self.transition(PairingState::ConfirmSent);
                Ok(actions)
            }
            AssociationModel::PasskeyEntry => match self.passkey {
                Some(passkey) if passkey > MAX_PASSKEY => Err(self.fail(
                    SmpError::InvalidPasskey(format!("{passkey} has more than 6 digits")),
                    Some(SMP_REASON_PASSKEY_ENTRY_FAILED),
                )),
                Some(passkey) => {
                    self.tk = u128::from(passkey);
                    let actions = vec![self.confirm_frame()];
                    self.transition(PairingState::ConfirmSent);
                    Ok(actions)
                }
                None => {
                    self.transition(PairingState::AwaitingPasskey);
                    Ok(vec![Action::RequestPasskey])
                }
            },
        }
    }

    fn handle_pairing_random(&mut self, peer_random: u128) -> SmpResult<Vec<Action>> {
        self.transition(PairingState::RandomExchanged);

        let expected = self.confirm_value(peer_random);
        if Some(expected) != self.peer_confirm {
            warn!(peer = %self.peer, "Peer confirm value does not match its random");
            return Err(self.fail(
                SmpError::ConfirmValueFailed,
                Some(SMP_REASON_CONFIRM_VALUE_FAILED),
            ));
        }

        let stk = mask_key(s1(self.tk, peer_random, self.local_random), self.key_size);
        self.stk = Some(stk);
        self.transition(PairingState::KeyReady);

        let actions = vec![Action::StartEncryption(stk)];
        self.transition(PairingState::EncryptionPending);
        Ok(actions)
    }

    fn confirm_value(&self, random: u128) -> u128 {
        c1(
            self.tk,
            random,
            self.pres,
            self.preq,
            self.local.is_random(),
            self.local.as_u64(),
            self.peer.is_random(),
            self.peer.as_u64(),
        )
    }

    fn confirm_frame(&self) -> Action {
        Action::Send(SmpPdu::PairingConfirm(self.confirm_value(self.local_random)).to_bytes())
    }

    fn random_frame(&self) -> Action {
        Action::Send(SmpPdu::PairingRandom(self.local_random).to_bytes())
    }

    fn transition(&mut self, next: PairingState) {
        trace!(from = self.state.name(), to = next.name(), "Pairing state change");
        self.state = next;
    }

    fn fail(&mut self, error: SmpError, reason: Option<u8>) -> SmpError {
        self.transition(PairingState::Failed);
        self.failure_frame = reason.map(|reason| SmpPdu::PairingFailed(reason).to_bytes());
        error
    }
}
