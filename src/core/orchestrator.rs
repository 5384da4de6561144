//! Security escalation: probe, pair one level higher, probe again

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::LinkBackend;
use crate::config::ProfileOptions;
use crate::core::connection::Connection;
use crate::core::error::ProfilerResult;
use crate::core::pairing::{self, PairingOutcome};
use crate::core::passkey::{NoPrompt, PasskeyPrompt, PasskeyStrategy};
use crate::core::report::{SecurityContext, SecurityReport};
use crate::core::scheduler::Scheduler;
use crate::core::types::{AccessType, CharacteristicCheck, DeviceAddress, SecurityLevel, ServiceInfo};

/// Checks to run for a GATT database
///
/// Filtered mode probes only what a characteristic advertises. Unfiltered mode probes read
/// and write everywhere; notify is still limited to characteristics that advertise it.
pub fn in_scope_checks(services: &[ServiceInfo], options: &ProfileOptions) -> Vec<CharacteristicCheck> {
    services
        .iter()
        .flat_map(|service| service.characteristics.iter())
        .flat_map(|characteristic| {
            options.access_types.iter().filter_map(move |&access| {
                let advertised = characteristic.properties.supports(access);
                let forced = !options.filtered && access != AccessType::Notify;
                (advertised || forced).then_some(CharacteristicCheck {
                    id: characteristic.id,
                    access,
                })
            })
        })
        .collect()
}

/// Drives a whole profiling run against one device
pub struct Orchestrator<B: LinkBackend, P: PasskeyPrompt> {
    backend: Arc<B>,
    device: DeviceAddress,
    options: ProfileOptions,
    passkeys: PasskeyStrategy,
    prompt: P,
}

impl<B: LinkBackend, P: PasskeyPrompt> Orchestrator<B, P> {
    pub fn new(
        backend: Arc<B>,
        device: DeviceAddress,
        options: ProfileOptions,
        passkeys: PasskeyStrategy,
        prompt: P,
    ) -> Self {
        Self {
            backend,
            device,
            options,
            passkeys,
            prompt,
        }
    }

    /// Profile the device and return the finished report
    ///
    /// Every in-scope check is run without security first. Checks refused for lack of security
    /// are run again after pairing one level higher, until they pass or the highest level was
    /// tried. Only connection failures abort the run.
    pub async fn run(&mut self) -> ProfilerResult<SecurityReport> {
        let mut connection =
            Connection::open(self.backend.clone(), self.device, self.options.timings).await?;

        let mut report = SecurityReport::new(connection.peer_address(), connection.services());
        let mut pending = in_scope_checks(connection.services(), &self.options);
        for check in &pending {
            report.register(*check);
        }
        info!(device = %self.device, checks = pending.len(), "Profiling started");

        let mut context = SecurityContext::unpaired();
        loop {
            let pass = Scheduler::new(&mut connection, self.options.max_recoveries)
                .run(pending, |outcome| report.record(&outcome, &context))
                .await?;
            debug!(level = %context.level, recoveries = pass.recoveries(), "Pass complete");

            let failing = report.security_failures();
            if failing.is_empty() {
                break;
            }
            info!(level = %context.level, failing = failing.len(), "Security required");

            let Some(outcome) = self.escalate(&mut connection, context.level).await? else {
                warn!("No higher security level reachable");
                for check in &failing {
                    report.mark_custom(check, &context);
                }
                break;
            };
            context = SecurityContext::from(&outcome);
            pending = failing;
        }

        connection.disconnect().await;
        info!(
            entries = report.len(),
            reconnects = connection.reconnects(),
            "Profiling finished"
        );
        Ok(report)
    }

    /// Pair at the first level above `current` that accepts pairing
    ///
    /// Passkey failures are retried at the same level while the dictionary has untried
    /// entries. Only the interactive strategy asks the user; an exhausted dictionary fails
    /// Passkey Entry outright. Returns `None` once pairing failed at the highest level.
    async fn escalate(
        &mut self,
        connection: &mut Connection<B>,
        current: SecurityLevel,
    ) -> ProfilerResult<Option<PairingOutcome>> {
        let mut target = current.next();

        while let Some(level) = target {
            connection.clear_restore();
            connection.reconnect().await?;

            let session = connection.session()?;
            let preset = self.passkeys.preset();
            let limit = self.options.timings.pairing_timeout;
            let result = if self.passkeys.prompts_user() {
                pairing::pair(session, level, preset, &self.prompt, limit).await
            } else {
                pairing::pair(session, level, preset, &NoPrompt, limit).await
            };

            match result {
                Ok(outcome) => {
                    info!(
                        %level,
                        auth_type = %outcome.auth_type,
                        assoc_model = %outcome.assoc_model,
                        "Security level raised"
                    );
                    connection.restore_pairing(&outcome);
                    return Ok(Some(outcome));
                }
                Err(failure) if failure.is_passkey_related() && self.passkeys.advance() => {
                    warn!(%level, reason = %failure, "Passkey rejected, trying the next one");
                }
                Err(failure) => {
                    warn!(%level, reason = %failure, "Pairing failed");
                    target = level.next();
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AccessRule, MockLinkBackend, PeripheralPairing};
    use crate::core::passkey::{PasskeyDictionary, ScriptedPrompt};
    use crate::core::report::{AssocLabel, LevelLabel};
    use crate::core::types::{AddressType, CharacteristicId, short_uuid};
    use crate::smp::AuthType;
    use crate::smp::constants::{
        SMP_REASON_PAIRING_NOT_SUPPORTED, SMP_REASON_PASSKEY_ENTRY_FAILED,
    };
    use crate::smp::types::IoCapability;
    use pretty_assertions::assert_eq;

    const PEER: DeviceAddress =
        DeviceAddress::new([0xB1, 0xB2, 0xB3, 0xB4, 0xB5, 0xB6], AddressType::Public);
    const SERVICE: u16 = 0xFFF0;

    fn read(id: CharacteristicId) -> CharacteristicCheck {
        CharacteristicCheck {
            id,
            access: AccessType::Read,
        }
    }

    async fn characteristic(backend: &MockLinkBackend, n: u16, rule: AccessRule) -> CharacteristicId {
        let id = backend
            .add_characteristic(short_uuid(SERVICE), short_uuid(0xFFF1 + n), 0x02)
            .await;
        backend.set_rule(id, AccessType::Read, rule).await;
        id
    }

    fn orchestrator(
        backend: &Arc<MockLinkBackend>,
        passkeys: PasskeyStrategy,
    ) -> Orchestrator<MockLinkBackend, ScriptedPrompt> {
        Orchestrator::new(
            backend.clone(),
            PEER,
            ProfileOptions::default(),
            passkeys,
            ScriptedPrompt::default(),
        )
    }

    fn level(report: &SecurityReport, id: CharacteristicId) -> Option<LevelLabel> {
        report.entry(&read(id)).and_then(|entry| entry.security_level)
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_characteristic_needs_no_pairing() {
        let backend = Arc::new(MockLinkBackend::new());
        let id = characteristic(&backend, 0, AccessRule::Open).await;

        let report =
            tokio_test::assert_ok!(orchestrator(&backend, PasskeyStrategy::Interactive).run().await);

        assert_eq!(report.len(), 1);
        let security = &report.services[&id.service].characteristics[&id.characteristic].security;
        assert_eq!(security.keys().copied().collect::<Vec<_>>(), vec![AccessType::Read]);
        assert_eq!(level(&report, id), Some(LevelLabel::None));
        assert!(backend.pairing_requests().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalates_level_by_level() {
        let backend = Arc::new(MockLinkBackend::new());
        backend
            .set_pairing(PeripheralPairing {
                io_capability: IoCapability::DisplayOnly,
                mitm: true,
                passkey: 123456,
                ..PeripheralPairing::default()
            })
            .await;
        let open = characteristic(&backend, 0, AccessRule::Open).await;
        let encrypted = characteristic(&backend, 1, AccessRule::Encrypted).await;
        let long_key = characteristic(&backend, 2, AccessRule::KeySize(16)).await;
        let mitm = characteristic(&backend, 3, AccessRule::Authenticated).await;

        let report = orchestrator(&backend, PasskeyStrategy::Fixed(123456))
            .run()
            .await
            .unwrap();

        assert!(report.is_complete());
        assert_eq!(level(&report, open), Some(LevelLabel::None));
        assert_eq!(level(&report, encrypted), Some(LevelLabel::Low));
        assert_eq!(level(&report, long_key), Some(LevelLabel::Medium));
        assert_eq!(level(&report, mitm), Some(LevelLabel::High));

        let entry = report.entry(&read(mitm)).unwrap();
        assert_eq!(entry.auth_type, Some(AuthType::Legacy));
        assert_eq!(entry.assoc_model, Some(AssocLabel::PasskeyFixedPin));
        assert_eq!(entry.error, None);
        let entry = report.entry(&read(encrypted)).unwrap();
        assert_eq!(entry.assoc_model, Some(AssocLabel::JustWorks));

        // One pairing per level, in increasing order
        let requested_io: Vec<u8> = backend
            .pairing_requests()
            .await
            .iter()
            .map(|frame| frame[1])
            .collect();
        assert_eq!(requested_io, vec![0x03, 0x01, 0x04]);

        // Passing checks are not repeated at higher levels
        let log = backend.access_log().await;
        assert_eq!(log.iter().filter(|c| c.id == open).count(), 1);
        assert_eq!(log.iter().filter(|c| c.id == mitm).count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_still_refused_at_high_is_custom() {
        let backend = Arc::new(MockLinkBackend::new());
        let id = characteristic(&backend, 0, AccessRule::Reject(0x08)).await;

        let report = orchestrator(&backend, PasskeyStrategy::Interactive)
            .run()
            .await
            .unwrap();

        let entry = report.entry(&read(id)).unwrap();
        assert_eq!(entry.security_level, Some(LevelLabel::Custom));
        assert_eq!(entry.error.as_deref(), Some("Insufficient Authorization"));
        // No pairing beyond High
        assert_eq!(backend.pairing_requests().await.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pairing_impossible_is_custom() {
        let backend = Arc::new(MockLinkBackend::new());
        backend
            .set_pairing(PeripheralPairing {
                reject: Some(SMP_REASON_PAIRING_NOT_SUPPORTED),
                ..PeripheralPairing::default()
            })
            .await;
        let id = characteristic(&backend, 0, AccessRule::Encrypted).await;

        let report = orchestrator(&backend, PasskeyStrategy::Interactive)
            .run()
            .await
            .unwrap();

        let entry = report.entry(&read(id)).unwrap();
        assert_eq!(entry.security_level, Some(LevelLabel::Custom));
        assert_eq!(entry.auth_type, None);
        assert_eq!(backend.pairing_requests().await.len(), 3);
        assert_eq!(backend.encryption_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dictionary_retries_until_passkey_matches() {
        let backend = Arc::new(MockLinkBackend::new());
        backend
            .set_pairing(PeripheralPairing {
                io_capability: IoCapability::DisplayOnly,
                mitm: true,
                passkey: 333333,
                ..PeripheralPairing::default()
            })
            .await;
        let id = characteristic(&backend, 0, AccessRule::Authenticated).await;
        let dictionary = PasskeyDictionary::new(vec![111111, 222222, 333333]).unwrap();

        let report = orchestrator(&backend, PasskeyStrategy::Dictionary(dictionary))
            .run()
            .await
            .unwrap();

        assert_eq!(level(&report, id), Some(LevelLabel::High));
        assert_eq!(
            report.entry(&read(id)).unwrap().assoc_model,
            Some(AssocLabel::PasskeyFixedPin)
        );
        // Low and Medium once, High for every dictionary entry
        assert_eq!(backend.pairing_requests().await.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_dictionary_escalates() {
        let backend = Arc::new(MockLinkBackend::new());
        backend
            .set_pairing(PeripheralPairing {
                reject: Some(SMP_REASON_PASSKEY_ENTRY_FAILED),
                ..PeripheralPairing::default()
            })
            .await;
        let id = characteristic(&backend, 0, AccessRule::Encrypted).await;
        let dictionary = PasskeyDictionary::new(vec![1, 2]).unwrap();

        let report = orchestrator(&backend, PasskeyStrategy::Dictionary(dictionary))
            .run()
            .await
            .unwrap();

        let levels: Vec<u8> = backend
            .pairing_requests()
            .await
            .iter()
            .map(|frame| frame[1])
            .collect();
        // Low twice (one per entry), then Medium and High
        assert_eq!(levels, vec![0x03, 0x03, 0x01, 0x04]);
        assert_eq!(level(&report, id), Some(LevelLabel::Custom));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_dictionary_never_prompts() {
        let backend = Arc::new(MockLinkBackend::new());
        backend
            .set_pairing(PeripheralPairing {
                io_capability: IoCapability::DisplayOnly,
                mitm: true,
                passkey: 333333,
                ..PeripheralPairing::default()
            })
            .await;
        let id = characteristic(&backend, 0, AccessRule::Authenticated).await;
        let dictionary = PasskeyDictionary::new(vec![111111]).unwrap();
        let mut passkeys = PasskeyStrategy::Dictionary(dictionary);
        assert!(!passkeys.advance());

        let mut orchestrator = Orchestrator::new(
            backend.clone(),
            PEER,
            ProfileOptions::default(),
            passkeys,
            ScriptedPrompt::new([333333]),
        );
        let report = orchestrator.run().await.unwrap();

        // Passkey Entry at High fails without asking anyone
        assert_eq!(orchestrator.prompt.asked(), 0);
        assert_eq!(
            backend.pairing_failures().await,
            vec![SMP_REASON_PASSKEY_ENTRY_FAILED]
        );
        assert_eq!(level(&report, id), Some(LevelLabel::Custom));
        assert_eq!(backend.pairing_requests().await.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_secure_connections_peer_is_profiled_as_legacy() {
        let backend = Arc::new(MockLinkBackend::new());
        backend
            .set_pairing(PeripheralPairing {
                secure_connections: true,
                oob: true,
                ..PeripheralPairing::default()
            })
            .await;
        let id = characteristic(&backend, 0, AccessRule::Encrypted).await;

        let report = orchestrator(&backend, PasskeyStrategy::Interactive)
            .run()
            .await
            .unwrap();

        let entry = report.entry(&read(id)).unwrap();
        assert_eq!(entry.security_level, Some(LevelLabel::Low));
        assert_eq!(entry.auth_type, Some(AuthType::Legacy));
        assert_eq!(entry.assoc_model, Some(AssocLabel::JustWorks));
        assert!(backend.pairing_failures().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unfiltered_mode_probes_read_and_write() {
        let backend = Arc::new(MockLinkBackend::new());
        let id = characteristic(&backend, 0, AccessRule::Open).await;
        let options = ProfileOptions {
            access_types: AccessType::ALL.to_vec(),
            filtered: false,
            ..ProfileOptions::default()
        };

        let report = Orchestrator::new(
            backend.clone(),
            PEER,
            options,
            PasskeyStrategy::Interactive,
            ScriptedPrompt::default(),
        )
        .run()
        .await
        .unwrap();

        let security = &report.services[&id.service].characteristics[&id.characteristic].security;
        assert_eq!(
            security.keys().copied().collect::<Vec<_>>(),
            vec![AccessType::Read, AccessType::Write]
        );
        assert_eq!(
            security[&AccessType::Write].security_level,
            Some(LevelLabel::None)
        );
    }

    #[test]
    fn test_in_scope_checks_filtered() {
        let id = CharacteristicId {
            service: short_uuid(SERVICE),
            characteristic: short_uuid(0xFFF1),
        };
        let services = vec![ServiceInfo {
            uuid: id.service,
            primary: true,
            characteristics: vec![crate::core::types::CharacteristicInfo {
                id,
                properties: 0x12.into(),
                descriptors: Vec::new(),
            }],
        }];
        let options = ProfileOptions {
            access_types: AccessType::ALL.to_vec(),
            ..ProfileOptions::default()
        };

        let accesses: Vec<AccessType> = in_scope_checks(&services, &options)
            .iter()
            .map(|c| c.access)
            .collect();
        assert_eq!(accesses, vec![AccessType::Read, AccessType::Notify]);
    }

    #[tokio::test]
    async fn test_unreachable_device_aborts() {
        let backend = Arc::new(MockLinkBackend::new());
        backend.set_connect_failure(true).await;

        tokio_test::assert_err!(orchestrator(&backend, PasskeyStrategy::Interactive).run().await);
    }
}
