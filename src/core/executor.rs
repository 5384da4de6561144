//! Single characteristic access with a hard deadline

use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::backend::LinkSession;
use crate::core::error::AccessError;
use crate::core::types::{AccessType, CharacteristicId};

/// Value written by write probes ("hi")
pub const WRITE_PROBE: [u8; 2] = [0x68, 0x69];

/// Successful outcome of one access
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessValue {
    Read(Vec<u8>),
    Written,
    /// Subscription acknowledged, with the first notified value if one came along
    Subscribed(Option<Vec<u8>>),
}

impl AccessValue {
    /// Value as it appears in the report; only reads carry one
    pub fn report_value(&self) -> Option<String> {
        match self {
            AccessValue::Read(data) => Some(hex::encode(data)),
            _ => None,
        }
    }
}

/// Perform one access on an open session
///
/// The access is abandoned after `limit`; a late answer from the peripheral is never
/// attributed to a later check because the future is dropped on timeout.
pub async fn access<S: LinkSession>(
    session: &S,
    id: &CharacteristicId,
    access: AccessType,
    limit: Duration,
) -> Result<AccessValue, AccessError> {
    trace!(%id, %access, "Access started");

    let operation = async {
        match access {
            AccessType::Read => session.read(id).await.map(AccessValue::Read),
            AccessType::Write => session
                .write(id, &WRITE_PROBE)
                .await
                .map(|()| AccessValue::Written),
            AccessType::Notify => session.subscribe(id).await.map(AccessValue::Subscribed),
        }
    };

    let result = match timeout(limit, operation).await {
        Ok(result) => result.map_err(AccessError::from),
        Err(_) => Err(AccessError::Timeout),
    };

    match &result {
        Ok(_) => debug!(%id, %access, "Access succeeded"),
        Err(e) => debug!(%id, %access, error = %e, "Access failed"),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AccessRule, LinkBackend, MockLinkBackend};
    use crate::core::types::{AddressType, DeviceAddress, short_uuid};

    const PEER: DeviceAddress =
        DeviceAddress::new([0xB1, 0xB2, 0xB3, 0xB4, 0xB5, 0xB6], AddressType::Public);
    const LIMIT: Duration = Duration::from_secs(8);

    async fn setup() -> (MockLinkBackend, CharacteristicId) {
        let backend = MockLinkBackend::new();
        let id = backend
            .add_characteristic(short_uuid(0x180F), short_uuid(0x2A19), 0x1A)
            .await;
        (backend, id)
    }

    #[tokio::test]
    async fn test_read_returns_value() {
        let (backend, id) = setup().await;
        backend.set_value(id, vec![0x64, 0x00]).await;
        let session = backend.connect(&PEER).await.unwrap();

        let value = access(&session, &id, AccessType::Read, LIMIT).await.unwrap();
        assert_eq!(value, AccessValue::Read(vec![0x64, 0x00]));
        assert_eq!(value.report_value().as_deref(), Some("6400"));
    }

    #[tokio::test]
    async fn test_write_sends_probe() {
        let (backend, id) = setup().await;
        let session = backend.connect(&PEER).await.unwrap();

        let value = access(&session, &id, AccessType::Write, LIMIT).await.unwrap();
        assert_eq!(value, AccessValue::Written);
        assert_eq!(value.report_value(), None);
        assert_eq!(backend.written_value(id).await, Some(WRITE_PROBE.to_vec()));
    }

    #[tokio::test]
    async fn test_notify_subscribes() {
        let (backend, id) = setup().await;
        backend.set_notify_value(id, Some(vec![0x01])).await;
        let session = backend.connect(&PEER).await.unwrap();

        let value = access(&session, &id, AccessType::Notify, LIMIT).await.unwrap();
        assert_eq!(value, AccessValue::Subscribed(Some(vec![0x01])));
        assert_eq!(value.report_value(), None);
    }

    #[tokio::test]
    async fn test_att_error_mapped() {
        let (backend, id) = setup().await;
        backend.set_rule(id, AccessType::Read, AccessRule::Encrypted).await;
        let session = backend.connect(&PEER).await.unwrap();

        let error = access(&session, &id, AccessType::Read, LIMIT)
            .await
            .unwrap_err();
        assert_eq!(error, AccessError::Protocol(0x0F));
        assert_eq!(error.to_string(), "Insufficient Encryption");
        assert!(error.is_security_related());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_access_times_out() {
        let (backend, id) = setup().await;
        backend.set_hangs(id, AccessType::Read, 1).await;
        let session = backend.connect(&PEER).await.unwrap();

        let started = tokio::time::Instant::now();
        let result = access(&session, &id, AccessType::Read, LIMIT).await;
        assert_eq!(result, Err(AccessError::Timeout));
        assert!(started.elapsed() >= LIMIT);

        // Next access is unaffected
        assert!(access(&session, &id, AccessType::Read, LIMIT).await.is_ok());
    }

    #[tokio::test]
    async fn test_disconnected_session() {
        let (backend, id) = setup().await;
        let session = backend.connect(&PEER).await.unwrap();
        backend.drop_link().await;

        let result = access(&session, &id, AccessType::Read, LIMIT).await;
        assert_eq!(result, Err(AccessError::Disconnected));
    }
}
