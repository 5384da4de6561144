//! Link backend trait definitions

use trait_variant::make;

use crate::core::error::LinkResult;
use crate::core::types::{CharacteristicId, DeviceAddress, ServiceInfo};

/// Event delivered on the SMP side of a link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmpEvent {
    /// Raw frame received on the SMP fixed channel
    Frame(Vec<u8>),
    /// Result of a previous `enable_encryption` request
    EncryptionChanged(bool),
}

/// Abstraction over the Bluetooth stack used to reach the target device
///
/// This trait enables testing by allowing a simulated peripheral in place of a real
/// controller.
#[make(Send)]
pub trait LinkBackend: Sync + 'static {
    type Session: LinkSession;

    /// Open an LE connection to the device
    async fn connect(&self, device: &DeviceAddress) -> LinkResult<Self::Session>;
}

/// One established LE connection
///
/// A session is dead once the link drops; all operations then fail with
/// [`LinkError::Disconnected`](crate::core::error::LinkError::Disconnected) and a new session
/// has to be opened through [`LinkBackend::connect`].
#[make(Send)]
pub trait LinkSession: Send + Sync + 'static {
    /// Address used by the local controller for this connection
    fn local_address(&self) -> DeviceAddress;

    fn peer_address(&self) -> DeviceAddress;

    async fn is_connected(&self) -> bool;

    async fn disconnect(&self) -> LinkResult<()>;

    /// Enumerate services, characteristics and descriptors
    async fn discover(&self) -> LinkResult<Vec<ServiceInfo>>;

    async fn read(&self, id: &CharacteristicId) -> LinkResult<Vec<u8>>;

    /// Write with response
    async fn write(&self, id: &CharacteristicId, value: &[u8]) -> LinkResult<()>;

    /// Enable notifications
    ///
    /// Returns the first notified value if one arrived together with the acknowledgement.
    async fn subscribe(&self, id: &CharacteristicId) -> LinkResult<Option<Vec<u8>>>;

    /// Transmit a raw frame on the SMP fixed channel (CID 0x0006)
    async fn send_smp(&self, frame: &[u8]) -> LinkResult<()>;

    /// Wait for the next SMP frame or encryption change
    async fn next_smp_event(&self) -> LinkResult<SmpEvent>;

    /// Start link encryption with the given key
    ///
    /// The outcome arrives later as [`SmpEvent::EncryptionChanged`].
    async fn enable_encryption(&self, key: u128) -> LinkResult<()>;
}
