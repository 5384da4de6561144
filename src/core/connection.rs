//! Link ownership: connect, force disconnect, reconnect

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::{LinkBackend, LinkSession};
use crate::config::Timings;
use crate::core::error::{LinkError, LinkResult, ProfilerResult};
use crate::core::pairing::{self, PairingOutcome};
use crate::core::passkey::NoPrompt;
use crate::core::types::{DeviceAddress, SecurityLevel, ServiceInfo};

/// Pairing to repeat after every reconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RestorePairing {
    level: SecurityLevel,
    passkey: Option<u32>,
}

/// The link to the target device
///
/// Owns the current session and replaces it on reconnect, so a session is never used after
/// the link it belongs to went down.
pub struct Connection<B: LinkBackend> {
    backend: Arc<B>,
    device: DeviceAddress,
    session: Option<B::Session>,
    services: Vec<ServiceInfo>,
    timings: Timings,
    restore: Option<RestorePairing>,
    reconnects: usize,
}

impl<B: LinkBackend> Connection<B> {
    /// Connect and enumerate the GATT database
    pub async fn open(backend: Arc<B>, device: DeviceAddress, timings: Timings) -> ProfilerResult<Self> {
        let session = backend.connect(&device).await?;
        let services = session.discover().await?;
        info!(%device, services = services.len(), "Connected to target");

        Ok(Self {
            backend,
            device,
            session: Some(session),
            services,
            timings,
            restore: None,
            reconnects: 0,
        })
    }

    pub fn session(&self) -> LinkResult<&B::Session> {
        self.session.as_ref().ok_or(LinkError::Disconnected)
    }

    /// GATT database discovered on the first connect
    pub fn services(&self) -> &[ServiceInfo] {
        &self.services
    }

    /// Address of the peer as reported by the link
    pub fn peer_address(&self) -> DeviceAddress {
        self.session
            .as_ref()
            .map(|session| session.peer_address())
            .unwrap_or(self.device)
    }

    pub fn timings(&self) -> Timings {
        self.timings
    }

    /// Number of reconnects performed so far
    pub fn reconnects(&self) -> usize {
        self.reconnects
    }

    pub async fn is_connected(&self) -> bool {
        match &self.session {
            Some(session) => session.is_connected().await,
            None => false,
        }
    }

    /// Force the link down
    pub async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            debug!(device = %self.device, "Disconnecting");
            if let Err(e) = session.disconnect().await {
                warn!("Disconnect failed: {}", e);
            }
        }
    }

    /// Force disconnect, wait the settle delay, connect again
    ///
    /// Re-enumerates the GATT database so backend handles are fresh, then repeats the pairing
    /// registered with [`Connection::restore_pairing`]. The database from the first connect
    /// stays authoritative. A failed restore is logged; the checks that follow will report what
    /// the link allows.
    pub async fn reconnect(&mut self) -> ProfilerResult<()> {
        self.disconnect().await;
        tokio::time::sleep(self.timings.settle_delay).await;

        let session = self.backend.connect(&self.device).await?;
        let services = session.discover().await?;
        if services != self.services {
            warn!(
                device = %self.device,
                before = self.services.len(),
                after = services.len(),
                "GATT database changed across reconnect, keeping the first one"
            );
        }
        self.session = Some(session);
        self.reconnects += 1;
        info!(device = %self.device, reconnects = self.reconnects, "Reconnected");

        if let Some(restore) = self.restore {
            let session = self.session()?;
            match pairing::pair(
                session,
                restore.level,
                restore.passkey,
                &NoPrompt,
                self.timings.pairing_timeout,
            )
            .await
            {
                Ok(outcome) => debug!(level = %outcome.level, "Pairing restored"),
                Err(e) => warn!(level = %restore.level, "Could not restore pairing: {}", e),
            }
        }
        Ok(())
    }

    /// Repeat this pairing after every later reconnect
    pub fn restore_pairing(&mut self, outcome: &PairingOutcome) {
        self.restore = Some(RestorePairing {
            level: outcome.level,
            passkey: outcome.passkey,
        });
    }

    pub fn clear_restore(&mut self) {
        self.restore = None;
    }
}
