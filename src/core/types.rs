//! Domain types for BLE security profiling

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Client Characteristic Configuration descriptor UUID
pub const CCCD_UUID: Uuid = short_uuid(0x2902);

/// Expand a 16-bit SIG assigned number onto the Bluetooth base UUID
pub const fn short_uuid(value: u16) -> Uuid {
    Uuid::from_u128(0x0000_0000_0000_1000_8000_0080_5f9b_34fb | ((value as u128) << 96))
}

/// Bluetooth LE address type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressType {
    Public,
    Random,
}

/// A Bluetooth device address
///
/// Octets are stored in display order, most significant first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceAddress {
    octets: [u8; 6],
    kind: AddressType,
}

impl DeviceAddress {
    pub const fn new(octets: [u8; 6], kind: AddressType) -> Self {
        Self { octets, kind }
    }

    pub fn with_kind(self, kind: AddressType) -> Self {
        Self { kind, ..self }
    }

    pub fn octets(&self) -> [u8; 6] {
        self.octets
    }

    pub fn kind(&self) -> AddressType {
        self.kind
    }

    pub fn is_random(&self) -> bool {
        self.kind == AddressType::Random
    }

    /// 48-bit numeric value as used by the SMP confirm function
    pub fn as_u64(&self) -> u64 {
        self.octets
            .iter()
            .fold(0u64, |acc, octet| (acc << 8) | u64::from(*octet))
    }
}

impl FromStr for DeviceAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(format!("invalid device address '{s}'"));
        }

        let mut octets = [0u8; 6];
        for (octet, part) in octets.iter_mut().zip(parts) {
            if part.len() != 2 {
                return Err(format!("invalid device address '{s}'"));
            }
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| format!("invalid device address '{s}'"))?;
        }

        Ok(Self::new(octets, AddressType::Public))
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.octets;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl Serialize for DeviceAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Security level reached by pairing
///
/// Ordered; a profiling run only ever moves upwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SecurityLevel {
    None,
    Low,
    Medium,
    High,
}

impl SecurityLevel {
    /// The next level up, `None` above `High`
    pub fn next(self) -> Option<Self> {
        match self {
            SecurityLevel::None => Some(SecurityLevel::Low),
            SecurityLevel::Low => Some(SecurityLevel::Medium),
            SecurityLevel::Medium => Some(SecurityLevel::High),
            SecurityLevel::High => None,
        }
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityLevel::None => write!(f, "None"),
            SecurityLevel::Low => write!(f, "Low"),
            SecurityLevel::Medium => write!(f, "Medium"),
            SecurityLevel::High => write!(f, "High"),
        }
    }
}

/// Kind of characteristic access being probed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    Read,
    Write,
    Notify,
}

impl AccessType {
    pub const ALL: [AccessType; 3] = [AccessType::Read, AccessType::Write, AccessType::Notify];
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessType::Read => write!(f, "read"),
            AccessType::Write => write!(f, "write"),
            AccessType::Notify => write!(f, "notify"),
        }
    }
}

/// GATT characteristic properties (Vol 3, Part G, section 3.3.1.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharacteristicProperties {
    pub broadcast: bool,
    pub read: bool,
    pub write_without_response: bool,
    pub write: bool,
    pub notify: bool,
    pub indicate: bool,
    pub authenticated_signed_writes: bool,
    pub extended_properties: bool,
}

impl CharacteristicProperties {
    /// Whether the advertised properties allow this kind of access
    pub fn supports(&self, access: AccessType) -> bool {
        match access {
            AccessType::Read => self.read,
            AccessType::Write => self.write,
            AccessType::Notify => self.notify,
        }
    }

    /// Property names as listed in the report
    pub fn names(&self) -> Vec<&'static str> {
        [
            (self.broadcast, "broadcast"),
            (self.read, "read"),
            (self.write_without_response, "writeWithoutResponse"),
            (self.write, "write"),
            (self.notify, "notify"),
            (self.indicate, "indicate"),
            (self.authenticated_signed_writes, "authenticatedSignedWrites"),
            (self.extended_properties, "extendedProperties"),
        ]
        .into_iter()
        .filter_map(|(set, name)| set.then_some(name))
        .collect()
    }
}

impl From<u8> for CharacteristicProperties {
    fn from(value: u8) -> Self {
        Self {
            broadcast: value & 0x01 != 0,
            read: value & 0x02 != 0,
            write_without_response: value & 0x04 != 0,
            write: value & 0x08 != 0,
            notify: value & 0x10 != 0,
            indicate: value & 0x20 != 0,
            authenticated_signed_writes: value & 0x40 != 0,
            extended_properties: value & 0x80 != 0,
        }
    }
}

/// Identifies a characteristic by its service and characteristic UUID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CharacteristicId {
    pub service: Uuid,
    pub characteristic: Uuid,
}

impl fmt::Display for CharacteristicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.characteristic)
    }
}

/// A discovered GATT characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub id: CharacteristicId,
    pub properties: CharacteristicProperties,
    pub descriptors: Vec<Uuid>,
}

/// A discovered GATT service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub uuid: Uuid,
    pub primary: bool,
    pub characteristics: Vec<CharacteristicInfo>,
}

/// One (characteristic, access type) probe scheduled in a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicCheck {
    pub id: CharacteristicId,
    pub access: AccessType,
}

impl fmt::Display for CharacteristicCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.access, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_address_parse_and_display() {
        let address: DeviceAddress = "a1:A2:a3:A4:a5:A6".parse().unwrap();
        assert_eq!(address.to_string(), "A1:A2:A3:A4:A5:A6");
        assert_eq!(address.as_u64(), 0xA1A2A3A4A5A6);
        assert!(!address.is_random());
        assert!(address.with_kind(AddressType::Random).is_random());
    }

    #[test]
    fn test_short_uuid() {
        assert_eq!(
            CCCD_UUID.to_string(),
            "00002902-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            short_uuid(0x180F).to_string(),
            "0000180f-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_device_address_rejects_garbage() {
        assert!("A1:A2:A3".parse::<DeviceAddress>().is_err());
        assert!("A1:A2:A3:A4:A5:ZZ".parse::<DeviceAddress>().is_err());
        assert!("A1:A2:A3:A4:A5:A66".parse::<DeviceAddress>().is_err());
    }

    #[test]
    fn test_security_level_ordering() {
        assert!(SecurityLevel::None < SecurityLevel::Low);
        assert!(SecurityLevel::Medium < SecurityLevel::High);
        assert_eq!(SecurityLevel::None.next(), Some(SecurityLevel::Low));
        assert_eq!(SecurityLevel::High.next(), None);
    }

    #[test]
    fn test_properties_from_gatt_byte() {
        let props = CharacteristicProperties::from(0x1A);
        assert!(props.read);
        assert!(props.write);
        assert!(props.notify);
        assert!(!props.write_without_response);
        assert_eq!(props.names(), vec!["read", "write", "notify"]);

        assert!(props.supports(AccessType::Notify));
        assert!(!CharacteristicProperties::from(0x04).supports(AccessType::Write));
    }
}
