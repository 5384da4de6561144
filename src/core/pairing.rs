//! Pairing driver: runs one legacy pairing attempt over a link session

use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use crate::backend::{LinkSession, SmpEvent};
use crate::core::error::PairingFailure;
use crate::core::passkey::PasskeyPrompt;
use crate::core::types::SecurityLevel;
use crate::smp::constants::{SMP_MAX_ENCRYPTION_KEY_SIZE, SMP_REASON_PASSKEY_ENTRY_FAILED};
use crate::smp::types::{AuthRequirements, IoCapability, KeyDistribution};
use crate::smp::{
    Action, AssociationModel, AuthType, DistributedKeys, PairingFeatures, PairingSession,
    SmpError, SmpPdu, SmpResult,
};

/// Pairing Request parameters sent to reach a security level
pub fn pairing_request(level: SecurityLevel) -> SmpResult<PairingFeatures> {
    let (io_capability, mitm, max_key_size) = match level {
        SecurityLevel::None => {
            return Err(SmpError::InvalidParameters(
                "no pairing is performed at security level None".into(),
            ));
        }
        SecurityLevel::Low => (IoCapability::NoInputNoOutput, false, 8),
        SecurityLevel::Medium => (IoCapability::DisplayYesNo, false, SMP_MAX_ENCRYPTION_KEY_SIZE),
        SecurityLevel::High => (IoCapability::KeyboardDisplay, true, SMP_MAX_ENCRYPTION_KEY_SIZE),
    };

    Ok(PairingFeatures {
        io_capability,
        oob_data_present: false,
        auth_req: AuthRequirements {
            bonding: true,
            mitm,
            secure_connections: false,
        },
        max_key_size,
        initiator_key_dist: KeyDistribution::none(),
        responder_key_dist: KeyDistribution::encryption_only(),
    })
}

/// Result of a successful pairing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingOutcome {
    pub level: SecurityLevel,
    pub auth_type: AuthType,
    pub assoc_model: AssociationModel,
    /// Passkey used for Passkey Entry
    pub passkey: Option<u32>,
    /// Passkey came from configuration rather than from the user
    pub fixed_pin: bool,
    pub key_size: u8,
    /// Long term key, if the responder distributed one
    pub keys: Option<DistributedKeys>,
}

/// Run one pairing attempt at the given level
///
/// The attempt is bounded by `limit`; time spent waiting for the user to type a passkey
/// does not count against it. Once encryption is up the driver waits for distributed keys
/// within the remaining time but succeeds without them.
pub async fn pair<S, P>(
    session: &S,
    level: SecurityLevel,
    passkey: Option<u32>,
    prompt: &P,
    limit: Duration,
) -> Result<PairingOutcome, PairingFailure>
where
    S: LinkSession,
    P: PasskeyPrompt,
{
    let request = pairing_request(level)?;
    let mut engine = PairingSession::new(
        session.local_address(),
        session.peer_address(),
        request,
        passkey,
        &mut StdRng::from_entropy(),
    );

    info!(%level, peer = %session.peer_address(), "Pairing");
    let mut deadline = Instant::now() + limit;
    let mut pending: VecDeque<Action> = engine.start()?.into();
    let mut used_passkey = passkey;
    let mut completed = None;

    loop {
        while let Some(action) = pending.pop_front() {
            match action {
                Action::Send(frame) => session.send_smp(&frame).await?,
                Action::RequestPasskey => {
                    let asked = Instant::now();
                    let entered = match prompt.prompt().await {
                        Ok(entered) => entered,
                        Err(e) => {
                            warn!("No passkey available: {}", e);
                            let frame = SmpPdu::PairingFailed(SMP_REASON_PASSKEY_ENTRY_FAILED);
                            if let Err(e) = session.send_smp(&frame.to_bytes()).await {
                                warn!("Could not send Pairing Failed: {}", e);
                            }
                            return Err(SmpError::InvalidPasskey(e.to_string()).into());
                        }
                    };
                    deadline += asked.elapsed();
                    used_passkey = Some(entered);

                    match engine.provide_passkey(entered) {
                        Ok(actions) => pending.extend(actions),
                        Err(e) => return Err(abort(session, &engine, e).await),
                    }
                }
                Action::StartEncryption(stk) => session.enable_encryption(stk).await?,
                Action::Complete {
                    auth_type,
                    assoc_model,
                } => {
                    info!(%level, %auth_type, %assoc_model, "Link encrypted");
                    completed = Some((auth_type, assoc_model));
                }
                Action::KeysDistributed(_) => debug!("Long term key received"),
            }
        }

        if let Some(negotiated) = completed {
            let promised = engine
                .response()
                .is_some_and(|response| response.responder_key_dist.encryption_key);
            if engine.keys().is_some() || !promised {
                return Ok(outcome(&engine, level, negotiated, used_passkey, passkey));
            }
        }

        let event = match timeout_at(deadline, session.next_smp_event()).await {
            Ok(event) => event?,
            Err(_) => match completed {
                Some(negotiated) => {
                    warn!("Responder did not distribute its keys in time");
                    return Ok(outcome(&engine, level, negotiated, used_passkey, passkey));
                }
                None => {
                    warn!(state = engine.state().name(), "Pairing timed out");
                    return Err(PairingFailure::Timeout);
                }
            },
        };

        let result = match event {
            SmpEvent::Frame(frame) => engine.handle_frame(&frame),
            SmpEvent::EncryptionChanged(encrypted) => engine.handle_encryption_changed(encrypted),
        };
        match result {
            Ok(actions) => pending.extend(actions),
            Err(e) => match completed {
                // Encryption is already up; bad key distribution only costs the keys
                Some(negotiated) => {
                    warn!("Key distribution failed: {}", e);
                    return Ok(outcome(&engine, level, negotiated, used_passkey, passkey));
                }
                None => return Err(abort(session, &engine, e).await),
            },
        }
    }
}

/// Tell the peer why pairing stopped, if the failure was ours
async fn abort<S: LinkSession>(
    session: &S,
    engine: &PairingSession,
    error: SmpError,
) -> PairingFailure {
    warn!("Pairing failed: {}", error);
    if let Some(frame) = engine.failure_frame() {
        if let Err(e) = session.send_smp(frame).await {
            warn!("Could not send Pairing Failed: {}", e);
        }
    }
    error.into()
}

fn outcome(
    engine: &PairingSession,
    level: SecurityLevel,
    (auth_type, assoc_model): (AuthType, AssociationModel),
    used_passkey: Option<u32>,
    preset: Option<u32>,
) -> PairingOutcome {
    let passkey_entry = assoc_model == AssociationModel::PasskeyEntry;
    PairingOutcome {
        level,
        auth_type,
        assoc_model,
        passkey: used_passkey.filter(|_| passkey_entry),
        fixed_pin: passkey_entry && preset.is_some(),
        key_size: engine.key_size(),
        keys: engine.keys(),
    }
}
