//! BlueZ link backend using bluer
//!
//! BlueZ runs the Security Manager inside the kernel and does not expose the SMP fixed
//! channel, so the raw SMP operations of this backend report [`LinkError::Unsupported`].
//! Characteristic probing at security level None works as usual.

use bluer::gatt::WriteOp;
use bluer::gatt::remote::{Characteristic, CharacteristicWriteRequest};
use bluer::{Adapter, Device, ErrorKind};
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{LinkBackend, LinkSession, SmpEvent};
use crate::core::att::{
    ATT_ERROR_INSUFFICIENT_AUTHENTICATION, ATT_ERROR_INSUFFICIENT_AUTHORIZATION,
    ATT_ERROR_INVALID_ATTRIBUTE_VALUE_LENGTH, ATT_ERROR_INVALID_OFFSET,
    ATT_ERROR_READ_NOT_PERMITTED, ATT_ERROR_REQUEST_NOT_SUPPORTED, ATT_ERROR_WRITE_NOT_PERMITTED,
};
use crate::core::error::{LinkError, LinkResult};
use crate::core::types::{
    AddressType, CharacteristicId, CharacteristicInfo, CharacteristicProperties, DeviceAddress,
    ServiceInfo,
};

const SERVICES_RESOLVE_POLL: Duration = Duration::from_millis(100);
const SERVICES_RESOLVE_ATTEMPTS: u32 = 100;
const NOTIFY_WINDOW: Duration = Duration::from_secs(1);
const SMP_UNAVAILABLE: &str = "BlueZ does not expose the SMP channel";

impl From<bluer::Error> for LinkError {
    fn from(error: bluer::Error) -> Self {
        let message = error.message.to_lowercase();
        match error.kind {
            ErrorKind::NotAuthorized => LinkError::Att(ATT_ERROR_INSUFFICIENT_AUTHORIZATION),
            ErrorKind::NotPermitted if message.contains("read") => {
                LinkError::Att(ATT_ERROR_READ_NOT_PERMITTED)
            }
            ErrorKind::NotPermitted if message.contains("write") => {
                LinkError::Att(ATT_ERROR_WRITE_NOT_PERMITTED)
            }
            ErrorKind::AuthenticationFailed => {
                LinkError::Att(ATT_ERROR_INSUFFICIENT_AUTHENTICATION)
            }
            // Policy refusal by bluetoothd, not an ATT answer from the peer
            ErrorKind::NotPermitted => LinkError::Backend(error.message),
            ErrorKind::NotSupported => LinkError::Att(ATT_ERROR_REQUEST_NOT_SUPPORTED),
            ErrorKind::InvalidOffset => LinkError::Att(ATT_ERROR_INVALID_OFFSET),
            ErrorKind::InvalidLength => LinkError::Att(ATT_ERROR_INVALID_ATTRIBUTE_VALUE_LENGTH),
            ErrorKind::NotReady => LinkError::Disconnected,
            ErrorKind::Failed => match att_code(&message) {
                Some(code) => LinkError::Att(code),
                None if message.contains("not connected") => LinkError::Disconnected,
                None => LinkError::Backend(error.message),
            },
            ErrorKind::ConnectionAttemptFailed => LinkError::ConnectionFailed(error.message),
            _ => LinkError::Backend(error.to_string()),
        }
    }
}

/// Extract the code from BlueZ's "Operation failed with ATT error: 0x.." message
fn att_code(message: &str) -> Option<u8> {
    let (_, code) = message.split_once("att error: 0x")?;
    u8::from_str_radix(code.get(..2)?, 16).ok()
}

fn to_bluer_address(address: &DeviceAddress) -> bluer::Address {
    bluer::Address::new(address.octets())
}

/// Link backend talking to bluetoothd over D-Bus
pub struct BluerBackend {
    adapter: Adapter,
    local: DeviceAddress,
}

impl BluerBackend {
    /// Open the named adapter, or the default one
    pub async fn new(adapter_name: Option<&str>) -> LinkResult<Self> {
        let session = bluer::Session::new().await?;
        let adapter = match adapter_name {
            Some(name) => session.adapter(name)?,
            None => session.default_adapter().await?,
        };

        info!("Using BLE adapter: {}", adapter.name());
        adapter.set_powered(true).await?;

        let kind = match adapter.address_type().await? {
            bluer::AddressType::LeRandom => AddressType::Random,
            _ => AddressType::Public,
        };
        let local = DeviceAddress::new(adapter.address().await?.0, kind);

        Ok(Self { adapter, local })
    }
}

impl LinkBackend for BluerBackend {
    type Session = BluerSession;

    async fn connect(&self, device: &DeviceAddress) -> LinkResult<Self::Session> {
        let remote = self.adapter.device(to_bluer_address(device))?;

        if !remote.is_connected().await? {
            debug!(%device, "Connecting");
            remote.connect().await?;
        }

        // GATT is only usable once BlueZ has resolved the services
        let mut attempts = 0;
        while !remote.is_services_resolved().await? {
            attempts += 1;
            if attempts > SERVICES_RESOLVE_ATTEMPTS {
                return Err(LinkError::ConnectionFailed(
                    "services were not resolved".into(),
                ));
            }
            tokio::time::sleep(SERVICES_RESOLVE_POLL).await;
        }

        let kind = match remote.address_type().await? {
            bluer::AddressType::LeRandom => AddressType::Random,
            _ => AddressType::Public,
        };

        info!(%device, "Connected");
        Ok(BluerSession {
            device: remote,
            local: self.local,
            peer: device.with_kind(kind),
            characteristics: Mutex::new(HashMap::new()),
        })
    }
}

/// A BlueZ connection
pub struct BluerSession {
    device: Device,
    local: DeviceAddress,
    peer: DeviceAddress,
    characteristics: Mutex<HashMap<CharacteristicId, Characteristic>>,
}

impl BluerSession {
    async fn characteristic(&self, id: &CharacteristicId) -> LinkResult<Characteristic> {
        self.characteristics
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| LinkError::NotFound(id.to_string()))
    }
}

impl LinkSession for BluerSession {
    fn local_address(&self) -> DeviceAddress {
        self.local
    }

    fn peer_address(&self) -> DeviceAddress {
        self.peer
    }

    async fn is_connected(&self) -> bool {
        self.device.is_connected().await.unwrap_or(false)
    }

    async fn disconnect(&self) -> LinkResult<()> {
        match self.device.disconnect().await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Disconnect failed: {}", e);
                match LinkError::from(e) {
                    LinkError::Disconnected => Ok(()),
                    other => Err(other),
                }
            }
        }
    }

    async fn discover(&self) -> LinkResult<Vec<ServiceInfo>> {
        let mut services = Vec::new();
        let mut handles = HashMap::new();

        for service in self.device.services().await? {
            let uuid = service.uuid().await?;
            let mut characteristics = Vec::new();

            for characteristic in service.characteristics().await? {
                let flags = characteristic.flags().await?;
                let properties = CharacteristicProperties {
                    broadcast: flags.broadcast,
                    read: flags.read,
                    write_without_response: flags.write_without_response,
                    write: flags.write,
                    notify: flags.notify,
                    indicate: flags.indicate,
                    authenticated_signed_writes: flags.authenticated_signed_writes,
                    extended_properties: flags.extended_properties,
                };

                let mut descriptors = Vec::new();
                for descriptor in characteristic.descriptors().await? {
                    descriptors.push(descriptor.uuid().await?);
                }

                let id = CharacteristicId {
                    service: uuid,
                    characteristic: characteristic.uuid().await?,
                };
                characteristics.push(CharacteristicInfo {
                    id,
                    properties,
                    descriptors,
                });
                handles.insert(id, characteristic);
            }

            services.push(ServiceInfo {
                uuid,
                primary: service.primary().await?,
                characteristics,
            });
        }

        debug!(services = services.len(), "GATT discovery complete");
        *self.characteristics.lock().await = handles;
        Ok(services)
    }

    async fn read(&self, id: &CharacteristicId) -> LinkResult<Vec<u8>> {
        Ok(self.characteristic(id).await?.read().await?)
    }

    async fn write(&self, id: &CharacteristicId, value: &[u8]) -> LinkResult<()> {
        let request = CharacteristicWriteRequest {
            op_type: WriteOp::Request,
            ..Default::default()
        };
        Ok(self
            .characteristic(id)
            .await?
            .write_ext(value, &request)
            .await?)
    }

    async fn subscribe(&self, id: &CharacteristicId) -> LinkResult<Option<Vec<u8>>> {
        // Notification session ends when the stream is dropped
        let stream = self.characteristic(id).await?.notify().await?;
        futures::pin_mut!(stream);
        match tokio::time::timeout(NOTIFY_WINDOW, stream.next()).await {
            Ok(value) => Ok(value),
            Err(_) => {
                debug!(%id, "Subscribed, no notification within window");
                Ok(None)
            }
        }
    }

    async fn send_smp(&self, _frame: &[u8]) -> LinkResult<()> {
        Err(LinkError::Unsupported(SMP_UNAVAILABLE.into()))
    }

    async fn next_smp_event(&self) -> LinkResult<SmpEvent> {
        Err(LinkError::Unsupported(SMP_UNAVAILABLE.into()))
    }

    async fn enable_encryption(&self, _key: u128) -> LinkResult<()> {
        Err(LinkError::Unsupported(SMP_UNAVAILABLE.into()))
    }
}
