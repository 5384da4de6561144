//! Security report document

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::error::ProfilerResult;
use crate::core::executor::AccessValue;
use crate::core::pairing::PairingOutcome;
use crate::core::scheduler::CheckOutcome;
use crate::core::types::{
    AccessType, AddressType, CharacteristicCheck, CharacteristicId, DeviceAddress, SecurityLevel,
    ServiceInfo, short_uuid,
};
use crate::smp::{AssociationModel, AuthType};

/// GAP Device Name characteristic
const DEVICE_NAME_UUID: Uuid = short_uuid(0x2A00);

/// Security level as written to the report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LevelLabel {
    None,
    Low,
    Medium,
    High,
    /// Failed for a reason unrelated to security before any pairing
    Unknown,
    /// Still refused at the highest level, or pairing at that level was impossible
    Custom,
}

impl From<SecurityLevel> for LevelLabel {
    fn from(level: SecurityLevel) -> Self {
        match level {
            SecurityLevel::None => LevelLabel::None,
            SecurityLevel::Low => LevelLabel::Low,
            SecurityLevel::Medium => LevelLabel::Medium,
            SecurityLevel::High => LevelLabel::High,
        }
    }
}

/// Association model as written to the report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AssocLabel {
    #[serde(rename = "Just Works")]
    JustWorks,
    #[serde(rename = "Passkey")]
    Passkey,
    #[serde(rename = "Passkey with Fixed PIN")]
    PasskeyFixedPin,
    #[serde(rename = "OOB")]
    Oob,
}

impl AssocLabel {
    pub fn new(model: AssociationModel, fixed_pin: bool) -> Self {
        match model {
            AssociationModel::JustWorks => AssocLabel::JustWorks,
            AssociationModel::PasskeyEntry if fixed_pin => AssocLabel::PasskeyFixedPin,
            AssociationModel::PasskeyEntry => AssocLabel::Passkey,
            AssociationModel::OutOfBand => AssocLabel::Oob,
        }
    }
}

/// Link security under which outcomes are recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityContext {
    pub level: SecurityLevel,
    pub auth_type: Option<AuthType>,
    pub assoc_model: Option<AssocLabel>,
}

impl SecurityContext {
    /// No pairing performed
    pub fn unpaired() -> Self {
        Self {
            level: SecurityLevel::None,
            auth_type: None,
            assoc_model: None,
        }
    }
}

impl From<&PairingOutcome> for SecurityContext {
    fn from(outcome: &PairingOutcome) -> Self {
        Self {
            level: outcome.level,
            auth_type: Some(outcome.auth_type),
            assoc_model: Some(AssocLabel::new(outcome.assoc_model, outcome.fixed_pin)),
        }
    }
}

/// Result of probing one access type of one characteristic
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessReport {
    /// Security related ATT error
    pub error: Option<String>,
    /// Any other failure
    pub other_error: Option<String>,
    /// Hex encoded value, reads only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub security_level: Option<LevelLabel>,
    pub auth_type: Option<AuthType>,
    pub assoc_model: Option<AssocLabel>,
    #[serde(skip)]
    security_failure: bool,
}

impl AccessReport {
    /// Last outcome was refused for lack of security
    pub fn is_security_failure(&self) -> bool {
        self.security_failure
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CharacteristicReport {
    pub properties: Vec<&'static str>,
    #[serde(rename = "Descriptors")]
    pub descriptors: Vec<Uuid>,
    pub security: BTreeMap<AccessType, AccessReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceReport {
    pub primary: bool,
    #[serde(rename = "Characteristics")]
    pub characteristics: BTreeMap<Uuid, CharacteristicReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDetails {
    pub address: DeviceAddress,
    pub address_type: AddressType,
    pub name: Option<String>,
}

/// Per characteristic security requirements of one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityReport {
    #[serde(rename = "deviceDetails")]
    pub device: DeviceDetails,
    #[serde(rename = "Services")]
    pub services: BTreeMap<Uuid, ServiceReport>,
}

impl SecurityReport {
    /// Report skeleton for the discovered GATT database, without any checks
    pub fn new(device: DeviceAddress, services: &[ServiceInfo]) -> Self {
        let services = services
            .iter()
            .map(|service| {
                let characteristics = service
                    .characteristics
                    .iter()
                    .map(|c| {
                        let report = CharacteristicReport {
                            properties: c.properties.names(),
                            descriptors: c.descriptors.clone(),
                            security: BTreeMap::new(),
                        };
                        (c.id.characteristic, report)
                    })
                    .collect();
                let report = ServiceReport {
                    primary: service.primary,
                    characteristics,
                };
                (service.uuid, report)
            })
            .collect();

        Self {
            device: DeviceDetails {
                address: device,
                address_type: device.kind(),
                name: None,
            },
            services,
        }
    }

    /// Add an empty entry for a check that will be run
    pub fn register(&mut self, check: CharacteristicCheck) {
        if let Some(characteristic) = self.characteristic_mut(&check.id) {
            characteristic.security.entry(check.access).or_default();
        }
    }

    pub fn entry(&self, check: &CharacteristicCheck) -> Option<&AccessReport> {
        self.services
            .get(&check.id.service)?
            .characteristics
            .get(&check.id.characteristic)?
            .security
            .get(&check.access)
    }

    /// Record a terminal outcome observed under `context`
    pub fn record(&mut self, outcome: &CheckOutcome, context: &SecurityContext) {
        let check = outcome.check;

        if check.id.characteristic == DEVICE_NAME_UUID {
            if let Ok(AccessValue::Read(name)) = &outcome.result {
                self.device.name = Some(String::from_utf8_lossy(name).into_owned());
            }
        }

        let Some(entry) = self.entry_mut(&check) else {
            return;
        };
        let (error, other_error, value, level, security_failure) = match &outcome.result {
            Ok(value) => (None, None, value.report_value(), LevelLabel::from(context.level), false),
            Err(e) if e.is_security_related() => {
                let level = context.level.next().map_or(LevelLabel::Custom, LevelLabel::from);
                (Some(e.to_string()), None, None, level, true)
            }
            Err(e) => {
                let level = match context.level {
                    SecurityLevel::None => LevelLabel::Unknown,
                    level => LevelLabel::from(level),
                };
                (None, Some(e.to_string()), None, level, false)
            }
        };

        debug!(%check, level = ?level, "Recorded outcome");
        *entry = AccessReport {
            error,
            other_error,
            value,
            security_level: Some(level),
            auth_type: context.auth_type,
            assoc_model: context.assoc_model,
            security_failure,
        };
    }

    /// Label a check that no reachable security level satisfies
    pub fn mark_custom(&mut self, check: &CharacteristicCheck, context: &SecurityContext) {
        if let Some(entry) = self.entry_mut(check) {
            entry.security_level = Some(LevelLabel::Custom);
            entry.auth_type = context.auth_type;
            entry.assoc_model = context.assoc_model;
        }
    }

    /// Checks whose last outcome was a security refusal, in report order
    pub fn security_failures(&self) -> Vec<CharacteristicCheck> {
        self.checks()
            .filter(|(_, entry)| entry.security_failure)
            .map(|(check, _)| check)
            .collect()
    }

    /// Every registered entry has a security level
    pub fn is_complete(&self) -> bool {
        self.checks().all(|(_, entry)| entry.security_level.is_some())
    }

    /// Number of registered entries
    pub fn len(&self) -> usize {
        self.checks().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the report as pretty printed JSON
    pub async fn write_json(&self, path: &Path) -> ProfilerResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        info!(path = %path.display(), "Report written");
        Ok(())
    }

    fn checks(&self) -> impl Iterator<Item = (CharacteristicCheck, &AccessReport)> {
        self.services.iter().flat_map(|(service, s)| {
            s.characteristics.iter().flat_map(move |(characteristic, c)| {
                c.security.iter().map(move |(access, entry)| {
                    let check = CharacteristicCheck {
                        id: CharacteristicId {
                            service: *service,
                            characteristic: *characteristic,
                        },
                        access: *access,
                    };
                    (check, entry)
                })
            })
        })
    }

    fn characteristic_mut(&mut self, id: &CharacteristicId) -> Option<&mut CharacteristicReport> {
        self.services
            .get_mut(&id.service)?
            .characteristics
            .get_mut(&id.characteristic)
    }

    fn entry_mut(&mut self, check: &CharacteristicCheck) -> Option<&mut AccessReport> {
        self.characteristic_mut(&check.id)?
            .security
            .get_mut(&check.access)
    }
}
