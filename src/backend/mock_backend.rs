//! Simulated BLE peripheral for testing

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use crate::backend::{LinkBackend, LinkSession, SmpEvent};
use crate::core::att::{
    ATT_ERROR_INSUFFICIENT_AUTHENTICATION, ATT_ERROR_INSUFFICIENT_ENCRYPTION,
    ATT_ERROR_INSUFFICIENT_ENCRYPTION_KEY_SIZE,
};
use crate::core::error::{LinkError, LinkResult};
use crate::core::types::{
    AccessType, AddressType, CCCD_UUID, CharacteristicCheck, CharacteristicId,
    CharacteristicInfo, CharacteristicProperties, DeviceAddress, ServiceInfo,
};
use crate::smp::constants::*;
use crate::smp::crypto::{c1, frame_value, mask_key, s1};
use crate::smp::packets::SmpPdu;
use crate::smp::types::{
    AssociationModel, AuthRequirements, IoCapability, KeyDistribution, PairingFeatures,
    association_model,
};

const LOCAL_ADDRESS: DeviceAddress =
    DeviceAddress::new([0xC0, 0xFF, 0xEE, 0x00, 0x00, 0x01], AddressType::Public);

/// Access rule enforced by the simulated peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessRule {
    #[default]
    Open,
    /// Any encrypted link
    Encrypted,
    /// Encrypted with at least this many key octets
    KeySize(u8),
    /// Encrypted with a MITM protected key
    Authenticated,
    /// Always rejected with this ATT error
    Reject(u8),
}

/// Pairing behaviour of the simulated peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeripheralPairing {
    pub io_capability: IoCapability,
    pub mitm: bool,
    pub oob: bool,
    pub secure_connections: bool,
    pub max_key_size: u8,
    /// Passkey shown on the peripheral display for Passkey Entry
    pub passkey: u32,
    /// Answer every Pairing Request with Pairing Failed and this reason
    pub reject: Option<u8>,
    /// Never answer SMP traffic
    pub silent: bool,
    pub distribute_ltk: bool,
}

impl Default for PeripheralPairing {
    fn default() -> Self {
        Self {
            io_capability: IoCapability::NoInputNoOutput,
            mitm: false,
            oob: false,
            secure_connections: false,
            max_key_size: SMP_MAX_ENCRYPTION_KEY_SIZE,
            passkey: 0,
            reject: None,
            silent: false,
            distribute_ltk: true,
        }
    }
}

impl PeripheralPairing {
    fn features(&self) -> PairingFeatures {
        PairingFeatures {
            io_capability: self.io_capability,
            oob_data_present: self.oob,
            auth_req: AuthRequirements {
                bonding: true,
                mitm: self.mitm,
                secure_connections: self.secure_connections,
            },
            max_key_size: self.max_key_size,
            initiator_key_dist: KeyDistribution::none(),
            responder_key_dist: if self.distribute_ltk {
                KeyDistribution::encryption_only()
            } else {
                KeyDistribution::none()
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LinkSecurity {
    key_size: u8,
    authenticated: bool,
}

#[derive(Debug, Clone, Default)]
struct MockCharacteristic {
    value: Vec<u8>,
    notify_value: Option<Vec<u8>>,
    rules: HashMap<AccessType, AccessRule>,
}

/// Responder half of a legacy pairing
#[derive(Debug, Clone, Default)]
struct ResponderState {
    preq: u128,
    pres: u128,
    model: Option<AssociationModel>,
    key_size: u8,
    tk: u128,
    random: u128,
    initiator_confirm: Option<u128>,
    stk: Option<u128>,
}

impl ResponderState {
    fn confirm_value(
        &self,
        random: u128,
        initiator: &DeviceAddress,
        responder: &DeviceAddress,
    ) -> u128 {
        c1(
            self.tk,
            random,
            self.pres,
            self.preq,
            initiator.is_random(),
            initiator.as_u64(),
            responder.is_random(),
            responder.as_u64(),
        )
    }
}

/// Internal state for the mock backend
#[derive(Debug)]
struct MockState {
    services: Vec<ServiceInfo>,
    characteristics: HashMap<CharacteristicId, MockCharacteristic>,
    hangs: HashMap<(CharacteristicId, AccessType), u32>,
    drops: HashMap<(CharacteristicId, AccessType), u32>,
    pairing: PeripheralPairing,
    should_fail_connect: bool,
    connected: bool,
    generation: u64,
    security: Option<LinkSecurity>,
    responder: ResponderState,
    smp_tx: Option<mpsc::UnboundedSender<SmpEvent>>,
    connects: usize,
    disconnects: usize,
    encryptions: usize,
    access_log: Vec<CharacteristicCheck>,
    pairing_requests: Vec<Vec<u8>>,
    pairing_failures: Vec<u8>,
}

impl MockState {
    fn ensure_live(&self, generation: u64) -> LinkResult<()> {
        if self.connected && self.generation == generation {
            Ok(())
        } else {
            Err(LinkError::Disconnected)
        }
    }

    /// Drop the link from the peripheral side
    fn drop_link(&mut self) {
        self.connected = false;
        self.security = None;
        self.responder = ResponderState::default();
        self.smp_tx = None;
    }

    fn emit(&self, event: SmpEvent) {
        if let Some(tx) = &self.smp_tx {
            let _ = tx.send(event);
        }
    }

    fn check_rule(&self, id: &CharacteristicId, access: AccessType) -> LinkResult<()> {
        let characteristic = self
            .characteristics
            .get(id)
            .ok_or_else(|| LinkError::NotFound(id.to_string()))?;
        let rule = characteristic
            .rules
            .get(&access)
            .copied()
            .unwrap_or_default();

        match (rule, self.security) {
            (AccessRule::Open, _) => Ok(()),
            (AccessRule::Reject(code), _) => Err(LinkError::Att(code)),
            (AccessRule::Authenticated, None) => {
                Err(LinkError::Att(ATT_ERROR_INSUFFICIENT_AUTHENTICATION))
            }
            (_, None) => Err(LinkError::Att(ATT_ERROR_INSUFFICIENT_ENCRYPTION)),
            (AccessRule::KeySize(min), Some(security)) if security.key_size < min => {
                Err(LinkError::Att(ATT_ERROR_INSUFFICIENT_ENCRYPTION_KEY_SIZE))
            }
            (AccessRule::Authenticated, Some(security)) if !security.authenticated => {
                Err(LinkError::Att(ATT_ERROR_INSUFFICIENT_AUTHENTICATION))
            }
            (_, Some(_)) => Ok(()),
        }
    }

    /// Answer one SMP frame from the initiator
    fn respond(
        &mut self,
        frame: &[u8],
        initiator: &DeviceAddress,
        responder: &DeviceAddress,
    ) -> Vec<SmpEvent> {
        let Ok(pdu) = SmpPdu::parse(frame) else {
            return vec![pairing_failed(SMP_REASON_INVALID_PARAMETERS)];
        };

        match pdu {
            SmpPdu::PairingRequest(request) => {
                self.pairing_requests.push(frame.to_vec());
                if let Some(reason) = self.pairing.reject {
                    return vec![pairing_failed(reason)];
                }

                let response = self.pairing.features();
                let model = association_model(&request, &response);
                self.responder = ResponderState {
                    preq: frame_value(&frame[..SMP_PAIRING_FEATURES_LEN]),
                    pres: frame_value(&response.frame(SMP_PAIRING_RESPONSE)),
                    model: Some(model),
                    key_size: request.max_key_size.min(response.max_key_size),
                    tk: match model {
                        AssociationModel::PasskeyEntry => u128::from(self.pairing.passkey),
                        _ => 0,
                    },
                    random: rand::random(),
                    initiator_confirm: None,
                    stk: None,
                };
                vec![SmpEvent::Frame(SmpPdu::PairingResponse(response).to_bytes())]
            }
            SmpPdu::PairingConfirm(confirm) => {
                self.responder.initiator_confirm = Some(confirm);
                let value =
                    self.responder
                        .confirm_value(self.responder.random, initiator, responder);
                vec![SmpEvent::Frame(SmpPdu::PairingConfirm(value).to_bytes())]
            }
            SmpPdu::PairingRandom(initiator_random) => {
                let expected = self
                    .responder
                    .confirm_value(initiator_random, initiator, responder);
                if Some(expected) != self.responder.initiator_confirm {
                    self.responder = ResponderState::default();
                    return vec![pairing_failed(SMP_REASON_CONFIRM_VALUE_FAILED)];
                }

                let stk = s1(self.responder.tk, self.responder.random, initiator_random);
                self.responder.stk = Some(mask_key(stk, self.responder.key_size));
                vec![SmpEvent::Frame(
                    SmpPdu::PairingRandom(self.responder.random).to_bytes(),
                )]
            }
            SmpPdu::PairingFailed(reason) => {
                self.pairing_failures.push(reason);
                self.responder = ResponderState::default();
                Vec::new()
            }
            _ => Vec::new(),
        }
    }
}

fn pairing_failed(reason: u8) -> SmpEvent {
    SmpEvent::Frame(SmpPdu::PairingFailed(reason).to_bytes())
}

fn take_one<K: Eq + Hash>(counts: &mut HashMap<K, u32>, key: &K) -> bool {
    match counts.get_mut(key) {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        }
        _ => false,
    }
}

/// Tracks how many accesses run at the same time
#[derive(Debug, Clone, Default)]
struct InFlight {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

struct InFlightGuard(Arc<AtomicUsize>);

impl InFlight {
    fn enter(&self) -> InFlightGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard(self.current.clone())
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Mock link backend for testing
///
/// Simulates a single peripheral with configurable access rules, a legacy pairing responder
/// and fault injection, without requiring actual hardware.
#[derive(Debug, Clone)]
pub struct MockLinkBackend {
    inner: Arc<Mutex<MockState>>,
    in_flight: InFlight,
}

impl MockLinkBackend {
    /// Create a new mock backend with an empty GATT database
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockState {
                services: Vec::new(),
                characteristics: HashMap::new(),
                hangs: HashMap::new(),
                drops: HashMap::new(),
                pairing: PeripheralPairing::default(),
                should_fail_connect: false,
                connected: false,
                generation: 0,
                security: None,
                responder: ResponderState::default(),
                smp_tx: None,
                connects: 0,
                disconnects: 0,
                encryptions: 0,
                access_log: Vec::new(),
                pairing_requests: Vec::new(),
                pairing_failures: Vec::new(),
            })),
            in_flight: InFlight::default(),
        }
    }

    /// Add a characteristic with the given GATT property byte
    pub async fn add_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
        properties: u8,
    ) -> CharacteristicId {
        let id = CharacteristicId {
            service,
            characteristic,
        };
        let properties = CharacteristicProperties::from(properties);
        let descriptors = if properties.notify || properties.indicate {
            vec![CCCD_UUID]
        } else {
            Vec::new()
        };

        let mut state = self.inner.lock().await;
        let info = CharacteristicInfo {
            id,
            properties,
            descriptors,
        };
        match state.services.iter_mut().find(|s| s.uuid == service) {
            Some(existing) => existing.characteristics.push(info),
            None => state.services.push(ServiceInfo {
                uuid: service,
                primary: true,
                characteristics: vec![info],
            }),
        }
        state.characteristics.insert(id, MockCharacteristic::default());
        id
    }

    /// Configure the rule guarding one kind of access
    pub async fn set_rule(&self, id: CharacteristicId, access: AccessType, rule: AccessRule) {
        if let Some(characteristic) = self.inner.lock().await.characteristics.get_mut(&id) {
            characteristic.rules.insert(access, rule);
        }
    }

    /// Configure the value returned on read
    pub async fn set_value(&self, id: CharacteristicId, value: Vec<u8>) {
        if let Some(characteristic) = self.inner.lock().await.characteristics.get_mut(&id) {
            characteristic.value = value;
        }
    }

    /// Configure a value notified right after subscribing
    pub async fn set_notify_value(&self, id: CharacteristicId, value: Option<Vec<u8>>) {
        if let Some(characteristic) = self.inner.lock().await.characteristics.get_mut(&id) {
            characteristic.notify_value = value;
        }
    }

    /// Make the next `times` accesses of this kind never complete
    pub async fn set_hangs(&self, id: CharacteristicId, access: AccessType, times: u32) {
        self.inner.lock().await.hangs.insert((id, access), times);
    }

    /// Make the next `times` accesses of this kind drop the link
    pub async fn set_disconnects(&self, id: CharacteristicId, access: AccessType, times: u32) {
        self.inner.lock().await.drops.insert((id, access), times);
    }

    /// Configure how the peripheral answers pairing
    pub async fn set_pairing(&self, pairing: PeripheralPairing) {
        self.inner.lock().await.pairing = pairing;
    }

    /// Configure mock to fail connect operations
    pub async fn set_connect_failure(&self, should_fail: bool) {
        self.inner.lock().await.should_fail_connect = should_fail;
    }

    /// Simulate the peripheral dropping the link
    pub async fn drop_link(&self) {
        self.inner.lock().await.drop_link();
    }

    pub async fn connect_count(&self) -> usize {
        self.inner.lock().await.connects
    }

    /// Disconnects requested by the central
    pub async fn disconnect_count(&self) -> usize {
        self.inner.lock().await.disconnects
    }

    /// Number of times link encryption was started successfully
    pub async fn encryption_count(&self) -> usize {
        self.inner.lock().await.encryptions
    }

    /// Every access that reached the peripheral, in order
    pub async fn access_log(&self) -> Vec<CharacteristicCheck> {
        self.inner.lock().await.access_log.clone()
    }

    /// Raw Pairing Request frames received, in order
    pub async fn pairing_requests(&self) -> Vec<Vec<u8>> {
        self.inner.lock().await.pairing_requests.clone()
    }

    /// Reasons of the Pairing Failed frames sent by the central, in order
    pub async fn pairing_failures(&self) -> Vec<u8> {
        self.inner.lock().await.pairing_failures.clone()
    }

    /// Last value written to a characteristic
    pub async fn written_value(&self, id: CharacteristicId) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .await
            .characteristics
            .get(&id)
            .map(|c| c.value.clone())
    }

    /// Highest number of accesses observed in flight at once
    pub fn max_in_flight(&self) -> usize {
        self.in_flight.peak.load(Ordering::SeqCst)
    }
}

impl Default for MockLinkBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkBackend for MockLinkBackend {
    type Session = MockLinkSession;

    async fn connect(&self, device: &DeviceAddress) -> LinkResult<Self::Session> {
        let mut state = self.inner.lock().await;
        if state.should_fail_connect {
            return Err(LinkError::ConnectionFailed("Mock connect failure".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.drop_link();
        state.connected = true;
        state.generation += 1;
        state.smp_tx = Some(tx);
        state.connects += 1;

        Ok(MockLinkSession {
            inner: self.inner.clone(),
            in_flight: self.in_flight.clone(),
            generation: state.generation,
            peer: *device,
            events: Mutex::new(rx),
        })
    }
}

/// A connection to the simulated peripheral
#[derive(Debug)]
pub struct MockLinkSession {
    inner: Arc<Mutex<MockState>>,
    in_flight: InFlight,
    generation: u64,
    peer: DeviceAddress,
    events: Mutex<mpsc::UnboundedReceiver<SmpEvent>>,
}

impl MockLinkSession {
    /// Run the access gate: hang and drop injection, then the access rule
    async fn begin(&self, id: &CharacteristicId, access: AccessType) -> LinkResult<InFlightGuard> {
        let guard = self.in_flight.enter();
        let hang = {
            let mut state = self.inner.lock().await;
            state.ensure_live(self.generation)?;
            state.access_log.push(CharacteristicCheck { id: *id, access });

            let key = (*id, access);
            if take_one(&mut state.hangs, &key) {
                true
            } else if take_one(&mut state.drops, &key) {
                state.drop_link();
                return Err(LinkError::Disconnected);
            } else {
                state.check_rule(id, access)?;
                false
            }
        };

        if hang {
            std::future::pending::<()>().await;
        }
        Ok(guard)
    }
}

impl LinkSession for MockLinkSession {
    fn local_address(&self) -> DeviceAddress {
        LOCAL_ADDRESS
    }

    fn peer_address(&self) -> DeviceAddress {
        self.peer
    }

    async fn is_connected(&self) -> bool {
        self.inner.lock().await.ensure_live(self.generation).is_ok()
    }

    async fn disconnect(&self) -> LinkResult<()> {
        let mut state = self.inner.lock().await;
        if state.ensure_live(self.generation).is_ok() {
            state.drop_link();
            state.disconnects += 1;
        }
        Ok(())
    }

    async fn discover(&self) -> LinkResult<Vec<ServiceInfo>> {
        let state = self.inner.lock().await;
        state.ensure_live(self.generation)?;
        Ok(state.services.clone())
    }

    async fn read(&self, id: &CharacteristicId) -> LinkResult<Vec<u8>> {
        let _guard = self.begin(id, AccessType::Read).await?;
        let state = self.inner.lock().await;
        Ok(state
            .characteristics
            .get(id)
            .map(|c| c.value.clone())
            .unwrap_or_default())
    }

    async fn write(&self, id: &CharacteristicId, value: &[u8]) -> LinkResult<()> {
        let _guard = self.begin(id, AccessType::Write).await?;
        let mut state = self.inner.lock().await;
        if let Some(characteristic) = state.characteristics.get_mut(id) {
            characteristic.value = value.to_vec();
        }
        Ok(())
    }

    async fn subscribe(&self, id: &CharacteristicId) -> LinkResult<Option<Vec<u8>>> {
        let _guard = self.begin(id, AccessType::Notify).await?;
        let state = self.inner.lock().await;
        Ok(state
            .characteristics
            .get(id)
            .and_then(|c| c.notify_value.clone()))
    }

    async fn send_smp(&self, frame: &[u8]) -> LinkResult<()> {
        let mut state = self.inner.lock().await;
        state.ensure_live(self.generation)?;
        if state.pairing.silent {
            return Ok(());
        }

        let replies = state.respond(frame, &LOCAL_ADDRESS, &self.peer);
        for reply in replies {
            state.emit(reply);
        }
        Ok(())
    }

    async fn next_smp_event(&self) -> LinkResult<SmpEvent> {
        self.events
            .lock()
            .await
            .recv()
            .await
            .ok_or(LinkError::Disconnected)
    }

    async fn enable_encryption(&self, key: u128) -> LinkResult<()> {
        let mut state = self.inner.lock().await;
        state.ensure_live(self.generation)?;

        let accepted = state.responder.stk == Some(key);
        if !accepted {
            state.emit(SmpEvent::EncryptionChanged(false));
            return Ok(());
        }

        state.security = Some(LinkSecurity {
            key_size: state.responder.key_size,
            authenticated: state.responder.model == Some(AssociationModel::PasskeyEntry),
        });
        state.encryptions += 1;
        state.emit(SmpEvent::EncryptionChanged(true));

        if state.pairing.distribute_ltk {
            let ltk: u128 = rand::random();
            state.emit(SmpEvent::Frame(SmpPdu::EncryptionInformation(ltk).to_bytes()));
            state.emit(SmpEvent::Frame(
                SmpPdu::MasterIdentification {
                    ediv: rand::random(),
                    rand: rand::random(),
                }
                .to_bytes(),
            ));
        }
        Ok(())
    }
}
