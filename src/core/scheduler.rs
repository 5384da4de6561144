//! Check queue: sequential dispatch with stuck link recovery

use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, info, warn};

use crate::backend::LinkBackend;
use crate::core::connection::Connection;
use crate::core::error::{AccessError, ProfilerResult};
use crate::core::executor::{self, AccessValue};
use crate::core::types::{AccessType, CharacteristicCheck};

/// Timeouts in a row tolerated before the link is considered stuck
const MAX_CONSECUTIVE_TIMEOUTS: u32 = 2;

/// Progress of one access type within a pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessCounts {
    pub checkable: usize,
    pub checked: usize,
}

/// Counters for one pass of the scheduler
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassContext {
    counts: BTreeMap<AccessType, AccessCounts>,
    recoveries: u32,
}

impl PassContext {
    fn new(checks: &VecDeque<CharacteristicCheck>) -> Self {
        let mut counts: BTreeMap<AccessType, AccessCounts> = BTreeMap::new();
        for check in checks {
            counts.entry(check.access).or_default().checkable += 1;
        }
        Self {
            counts,
            recoveries: 0,
        }
    }

    pub fn counts(&self, access: AccessType) -> AccessCounts {
        self.counts.get(&access).copied().unwrap_or_default()
    }

    /// Disconnect/reconnect cycles spent on stuck or dropped links
    pub fn recoveries(&self) -> u32 {
        self.recoveries
    }

    /// Every scheduled check has a recorded outcome
    pub fn is_complete(&self) -> bool {
        self.counts.values().all(|c| c.checked == c.checkable)
    }

    fn delivered(&mut self, access: AccessType) {
        self.counts.entry(access).or_default().checked += 1;
    }

    fn withdrawn(&mut self, access: AccessType) {
        if let Some(counts) = self.counts.get_mut(&access) {
            counts.checked = counts.checked.saturating_sub(1);
        }
    }
}

/// Terminal outcome of one check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub check: CharacteristicCheck,
    pub result: Result<AccessValue, AccessError>,
}

/// Runs checks one at a time over a borrowed connection
pub struct Scheduler<'a, B: LinkBackend> {
    connection: &'a mut Connection<B>,
    max_recoveries: u32,
}

impl<'a, B: LinkBackend> Scheduler<'a, B> {
    pub fn new(connection: &'a mut Connection<B>, max_recoveries: u32) -> Self {
        Self {
            connection,
            max_recoveries,
        }
    }

    /// Dispatch every check and hand each terminal outcome to `sink`
    ///
    /// A timed out check is delivered as such, but stays parked. When more than two checks in
    /// a row time out, the parked ones are withdrawn and queued again behind the remaining
    /// checks, and the link is cycled. A check that drops the link is retried first after
    /// reconnecting. Both recoveries share a per pass budget; once it is spent, outcomes are
    /// delivered as they come so the pass always ends.
    ///
    /// A parked check that is retried is delivered a second time; the later outcome wins.
    pub async fn run<F>(
        &mut self,
        checks: Vec<CharacteristicCheck>,
        mut sink: F,
    ) -> ProfilerResult<PassContext>
    where
        F: FnMut(CheckOutcome),
    {
        let mut queue: VecDeque<CharacteristicCheck> = checks.into();
        let mut context = PassContext::new(&queue);
        let mut parked: Vec<CharacteristicCheck> = Vec::new();
        let mut consecutive_timeouts = 0;
        let limit = self.connection.timings().access_timeout;

        info!(checks = queue.len(), "Starting pass");

        while let Some(check) = queue.pop_front() {
            if !self.connection.is_connected().await {
                info!("Link is down, reconnecting");
                self.connection.reconnect().await?;
            }

            let session = self.connection.session()?;
            let result = executor::access(session, &check.id, check.access, limit).await;

            match result {
                Err(AccessError::Timeout) => {
                    consecutive_timeouts += 1;
                    if consecutive_timeouts > MAX_CONSECUTIVE_TIMEOUTS
                        && self.can_recover(&context)
                    {
                        warn!(
                            timeouts = consecutive_timeouts,
                            "Link looks stuck, requeueing timed out checks"
                        );
                        for retry in parked.drain(..) {
                            context.withdrawn(retry.access);
                            queue.push_back(retry);
                        }
                        queue.push_back(check);
                        consecutive_timeouts = 0;
                        context.recoveries += 1;
                        self.connection.reconnect().await?;
                        continue;
                    }

                    parked.push(check);
                    context.delivered(check.access);
                    sink(CheckOutcome { check, result });
                }
                Err(AccessError::Disconnected) if self.can_recover(&context) => {
                    warn!(%check, "Link dropped during access, retrying after reconnect");
                    queue.push_front(check);
                    context.recoveries += 1;
                    self.connection.reconnect().await?;
                }
                result => {
                    consecutive_timeouts = 0;
                    parked.clear();
                    context.delivered(check.access);
                    sink(CheckOutcome { check, result });
                }
            }
        }

        debug!(recoveries = context.recoveries, "Pass finished");
        Ok(context)
    }

    fn can_recover(&self, context: &PassContext) -> bool {
        context.recoveries < self.max_recoveries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockLinkBackend;
    use crate::config::Timings;
    use crate::core::types::{AddressType, CharacteristicId, DeviceAddress, short_uuid};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::Arc;

    const PEER: DeviceAddress =
        DeviceAddress::new([0xB1, 0xB2, 0xB3, 0xB4, 0xB5, 0xB6], AddressType::Public);

    async fn setup(count: u16) -> (Arc<MockLinkBackend>, Vec<CharacteristicId>) {
        let backend = Arc::new(MockLinkBackend::new());
        let mut ids = Vec::new();
        for n in 0..count {
            ids.push(
                backend
                    .add_characteristic(short_uuid(0x1800), short_uuid(0x2A00 + n), 0x02)
                    .await,
            );
        }
        (backend, ids)
    }

    fn reads(ids: &[CharacteristicId]) -> Vec<CharacteristicCheck> {
        ids.iter()
            .map(|id| CharacteristicCheck {
                id: *id,
                access: AccessType::Read,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_check_gets_one_outcome() {
        let (backend, ids) = setup(5).await;
        let mut connection = Connection::open(backend.clone(), PEER, Timings::default())
            .await
            .unwrap();

        let mut outcomes = Vec::new();
        let context = Scheduler::new(&mut connection, 5)
            .run(reads(&ids), |outcome| outcomes.push(outcome))
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 5);
        assert!(outcomes.iter().all(|o| o.result.is_ok()));
        assert!(context.is_complete());
        assert_eq!(
            context.counts(AccessType::Read),
            AccessCounts {
                checkable: 5,
                checked: 5
            }
        );
        assert_eq!(context.counts(AccessType::Write), AccessCounts::default());
        assert_eq!(backend.max_in_flight(), 1);

        // Queue order is kept
        let order: Vec<_> = outcomes.iter().map(|o| o.check.id).collect();
        assert_eq!(order, ids);
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_timeouts_cycle_link_once() {
        let (backend, ids) = setup(4).await;
        for id in &ids[..3] {
            backend.set_hangs(*id, AccessType::Read, 1).await;
        }
        let mut connection = Connection::open(backend.clone(), PEER, Timings::default())
            .await
            .unwrap();

        let mut last: HashMap<CharacteristicId, Result<AccessValue, AccessError>> = HashMap::new();
        let mut delivered = 0;
        let context = Scheduler::new(&mut connection, 5)
            .run(reads(&ids), |outcome| {
                delivered += 1;
                last.insert(outcome.check.id, outcome.result);
            })
            .await
            .unwrap();

        assert_eq!(backend.disconnect_count().await, 1);
        assert_eq!(backend.connect_count().await, 2);
        assert_eq!(context.recoveries(), 1);
        assert!(context.is_complete());

        // Two timeouts were delivered before the third triggered the requeue
        assert_eq!(delivered, 6);
        assert_eq!(last.len(), 4);
        assert!(last.values().all(|result| result.is_ok()));

        // Requeued checks ran after the untouched one
        let log: Vec<_> = backend.access_log().await.iter().map(|c| c.id).collect();
        assert_eq!(
            log,
            vec![ids[0], ids[1], ids[2], ids[3], ids[0], ids[1], ids[2]]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_interleaved_success_resets_timeout_counter() {
        let (backend, ids) = setup(4).await;
        for index in [0, 1, 3] {
            backend.set_hangs(ids[index], AccessType::Read, 1).await;
        }
        let mut connection = Connection::open(backend.clone(), PEER, Timings::default())
            .await
            .unwrap();

        let mut outcomes = Vec::new();
        let context = Scheduler::new(&mut connection, 5)
            .run(reads(&ids), |outcome| outcomes.push(outcome))
            .await
            .unwrap();

        assert_eq!(context.recoveries(), 0);
        assert_eq!(backend.disconnect_count().await, 0);
        let timeouts = outcomes
            .iter()
            .filter(|o| o.result == Err(AccessError::Timeout))
            .count();
        assert_eq!(timeouts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_recoveries_record_timeouts() {
        let (backend, ids) = setup(3).await;
        for id in &ids {
            backend.set_hangs(*id, AccessType::Read, 1).await;
        }
        let mut connection = Connection::open(backend.clone(), PEER, Timings::default())
            .await
            .unwrap();

        let mut outcomes = Vec::new();
        let context = Scheduler::new(&mut connection, 0)
            .run(reads(&ids), |outcome| outcomes.push(outcome))
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| o.result == Err(AccessError::Timeout)));
        assert!(context.is_complete());
        assert_eq!(backend.connect_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_link_retries_check() {
        let (backend, ids) = setup(2).await;
        backend.set_disconnects(ids[0], AccessType::Read, 1).await;
        let mut connection = Connection::open(backend.clone(), PEER, Timings::default())
            .await
            .unwrap();

        let mut outcomes = Vec::new();
        let context = Scheduler::new(&mut connection, 5)
            .run(reads(&ids), |outcome| outcomes.push(outcome))
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].check.id, ids[0]);
        assert!(outcomes.iter().all(|o| o.result.is_ok()));
        assert_eq!(context.recoveries(), 1);
        assert_eq!(backend.connect_count().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_before_dispatch_when_link_is_down() {
        let (backend, ids) = setup(1).await;
        let mut connection = Connection::open(backend.clone(), PEER, Timings::default())
            .await
            .unwrap();
        backend.drop_link().await;

        let mut outcomes = Vec::new();
        Scheduler::new(&mut connection, 5)
            .run(reads(&ids), |outcome| outcomes.push(outcome))
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].result.is_ok());
        assert_eq!(backend.connect_count().await, 2);
    }

    #[tokio::test]
    async fn test_reconnect_failure_aborts_pass() {
        let (backend, ids) = setup(1).await;
        let timings = Timings {
            settle_delay: std::time::Duration::ZERO,
            ..Timings::default()
        };
        let mut connection = Connection::open(backend.clone(), PEER, timings)
            .await
            .unwrap();
        backend.drop_link().await;
        backend.set_connect_failure(true).await;

        let result = Scheduler::new(&mut connection, 5)
            .run(reads(&ids), |_| {})
            .await;
        assert!(result.is_err());
    }
}
