//! Connection Manager
//!
//! Scan → connect and disconnect against the registry and transport. Every
//! transport call is bounded by a timeout and every failure comes back as an
//! outcome value with the registry left consistent.

use crate::domain::error::{SessionError, TransportError};
use crate::domain::models::{ConnectOutcome, DisconnectOutcome, SessionId, SessionStatus};
use crate::domain::settings::SessionConfig;
use crate::infrastructure::bluetooth::{protocol, BleTransport, TransportHandle};
use crate::session::monitor;
use crate::session::registry::{SessionRegistry, SessionSlot};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Headroom on top of the scan window before discovery counts as hung
const DISCOVERY_GRACE: Duration = Duration::from_secs(5);

pub struct ConnectionManager<T: BleTransport> {
    transport: Arc<T>,
    registry: Arc<SessionRegistry>,
    config: Arc<SessionConfig>,
}

impl<T: BleTransport> Clone for ConnectionManager<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            registry: self.registry.clone(),
            config: self.config.clone(),
        }
    }
}

impl<T: BleTransport> ConnectionManager<T> {
    pub fn new(
        transport: Arc<T>,
        registry: Arc<SessionRegistry>,
        config: Arc<SessionConfig>,
    ) -> Self {
        Self {
            transport,
            registry,
            config,
        }
    }

    /// Connect `session` to the device at `address`
    pub async fn connect(&self, session: SessionId, address: &str) -> ConnectOutcome {
        let slot = self.registry.slot(&session);
        let _ops = slot.lock_ops().await;

        if let Some(handle) = slot.handle() {
            if self.transport.is_connected(&handle).await {
                info!(session = %session, "Already connected to {}", handle);
                return ConnectOutcome::AlreadyConnected;
            }
            // The link died and the monitor has not caught up yet
            warn!(session = %session, "Dropping stale link {}", handle);
            if let Some(mut link) = slot.detach(SessionStatus::Disconnected.into()) {
                link.stop_monitor();
            }
            let _ = timeout(
                self.config.disconnect_timeout,
                self.transport
                    .disconnect(&handle, self.config.disconnect_timeout),
            )
            .await;
        }

        slot.begin_connect();
        match self.establish(address).await {
            Ok(handle) => {
                slot.attach(handle.clone());
                let monitor = monitor::spawn(
                    self.transport.clone(),
                    slot.clone(),
                    session,
                    handle.clone(),
                    self.config.monitor_interval,
                );
                slot.attach_monitor(&handle, monitor.abort_handle());
                info!(session = %session, "Connected to {}", handle);
                ConnectOutcome::Connected
            }
            Err(outcome) => {
                warn!(session = %session, "Connect to {} failed: {:?}", address, outcome);
                slot.set_idle_report(outcome.status_report());
                outcome
            }
        }
    }

    async fn establish(&self, address: &str) -> Result<TransportHandle, ConnectOutcome> {
        let scan = self.config.scan_timeout;
        info!("Scanning for {} ({:?})", address, scan);

        let devices = match timeout(scan + DISCOVERY_GRACE, self.transport.discover(scan)).await {
            Ok(Ok(devices)) => devices,
            Err(_) | Ok(Err(TransportError::Timeout)) => {
                return Err(ConnectOutcome::ConnectFailed(
                    SessionError::DiscoveryTimeout(scan),
                ))
            }
            Ok(Err(e)) => return Err(ConnectOutcome::ConnectFailed(e.into())),
        };

        if !devices
            .iter()
            .any(|d| protocol::addresses_match(&d.address, address))
        {
            info!("{} not among {} discovered device(s)", address, devices.len());
            return Err(ConnectOutcome::DeviceNotFound);
        }

        let limit = self.config.connect_timeout;
        let handle = match timeout(limit, self.transport.connect(address, limit)).await {
            Ok(Ok(handle)) => handle,
            Err(_) | Ok(Err(TransportError::Timeout)) => {
                return Err(ConnectOutcome::ConnectFailed(SessionError::ConnectTimeout(
                    limit,
                )))
            }
            Ok(Err(TransportError::DeviceNotFound(_))) => {
                return Err(ConnectOutcome::DeviceNotFound)
            }
            Ok(Err(e)) => {
                return Err(ConnectOutcome::ConnectFailed(SessionError::ConnectFailed(
                    e.to_string(),
                )))
            }
        };

        if !self.transport.is_connected(&handle).await {
            error!("Link to {} not up after connect", handle);
            let _ = timeout(
                self.config.disconnect_timeout,
                self.transport
                    .disconnect(&handle, self.config.disconnect_timeout),
            )
            .await;
            return Err(ConnectOutcome::ConnectFailed(SessionError::ConnectFailed(
                "link not established".to_string(),
            )));
        }

        Ok(handle)
    }

    /// Release `session`'s link. Local state is cleared whatever the radio says.
    ///
    /// A measurement in flight gets `measurement_wait` to finish on its own,
    /// then it is told to abort.
    pub async fn disconnect(&self, session: SessionId) -> DisconnectOutcome {
        let Some(slot) = self.registry.get(&session) else {
            return DisconnectOutcome::NoActiveSession;
        };
        let _ops = self.lock_for_teardown(&session, &slot).await;

        let Some(mut link) = slot.detach(SessionStatus::Disconnected.into()) else {
            slot.set_idle_report(DisconnectOutcome::NoActiveSession.status_report());
            return DisconnectOutcome::NoActiveSession;
        };
        link.stop_monitor();
        let handle = link.handle;

        let outcome = if !self.transport.is_connected(&handle).await {
            debug!(session = %session, "Link {} already down", handle);
            let _ = timeout(
                self.config.disconnect_timeout,
                self.transport
                    .disconnect(&handle, self.config.disconnect_timeout),
            )
            .await;
            DisconnectOutcome::NoActiveSession
        } else {
            let limit = self.config.disconnect_timeout;
            match timeout(limit, self.transport.disconnect(&handle, limit)).await {
                Ok(Ok(())) => DisconnectOutcome::Disconnected,
                Err(_) | Ok(Err(TransportError::Timeout)) => {
                    warn!(
                        session = %session,
                        "Timeout occurred while disconnecting {}; local state cleared",
                        handle
                    );
                    DisconnectOutcome::DisconnectTimedOut
                }
                Ok(Err(e)) => {
                    warn!(session = %session, "Disconnect of {} failed: {}", handle, e);
                    DisconnectOutcome::DisconnectFailed(e.into())
                }
            }
        };

        info!(session = %session, "Disconnect finished: {:?}", outcome);
        slot.set_idle_report(outcome.status_report());
        outcome
    }

    async fn lock_for_teardown<'a>(
        &self,
        session: &SessionId,
        slot: &'a SessionSlot,
    ) -> tokio::sync::MutexGuard<'a, ()> {
        match timeout(self.config.measurement_wait, slot.lock_ops()).await {
            Ok(guard) => guard,
            Err(_) => {
                warn!(
                    session = %session,
                    "Operation still running after {:?}, aborting it",
                    self.config.measurement_wait
                );
                slot.signal_abort();
                slot.lock_ops().await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::mock::MockTransport;

    fn manager(mock: MockTransport) -> (ConnectionManager<MockTransport>, Arc<MockTransport>) {
        let mock = Arc::new(mock);
        let manager = ConnectionManager::new(
            mock.clone(),
            Arc::new(SessionRegistry::new()),
            Arc::new(SessionConfig::default()),
        );
        (manager, mock)
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_then_already_connected() {
        let (manager, mock) = manager(MockTransport::with_target_device());
        let id = manager.registry.open();

        let first = manager.connect(id, protocol::DEFAULT_DEVICE_ADDRESS).await;
        assert_eq!(first, ConnectOutcome::Connected);
        let second = manager.connect(id, protocol::DEFAULT_DEVICE_ADDRESS).await;
        assert_eq!(second, ConnectOutcome::AlreadyConnected);

        assert_eq!(mock.discover_calls(), 1);
        assert_eq!(mock.connect_calls(), 1);
        assert_eq!(
            manager.registry.status(&id).status,
            SessionStatus::Connected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_not_found_leaves_no_link() {
        let (manager, mock) = manager(MockTransport::new().with_device("00:11:22:33:44:55"));
        let id = manager.registry.open();

        let outcome = manager.connect(id, protocol::DEFAULT_DEVICE_ADDRESS).await;
        assert_eq!(outcome, ConnectOutcome::DeviceNotFound);
        assert_eq!(mock.connect_calls(), 0);
        assert!(!manager.registry.is_attached(&id));

        let report = manager.registry.status(&id);
        assert_eq!(report.status, SessionStatus::Error);
        assert_eq!(report.text, "No device found");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_discovery_times_out() {
        let (manager, _mock) = manager(
            MockTransport::with_target_device().with_discover_delay(Duration::from_secs(600)),
        );
        let id = manager.registry.open();

        let started = tokio::time::Instant::now();
        let outcome = manager.connect(id, protocol::DEFAULT_DEVICE_ADDRESS).await;
        assert_eq!(
            outcome,
            ConnectOutcome::ConnectFailed(SessionError::DiscoveryTimeout(Duration::from_secs(5)))
        );
        assert!(started.elapsed() <= Duration::from_secs(5) + DISCOVERY_GRACE);
        assert_eq!(manager.registry.status(&id).status, SessionStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let (manager, _mock) = manager(
            MockTransport::with_target_device().with_connect_delay(Duration::from_secs(60)),
        );
        let id = manager.registry.open();

        let outcome = manager.connect(id, protocol::DEFAULT_DEVICE_ADDRESS).await;
        assert_eq!(
            outcome,
            ConnectOutcome::ConnectFailed(SessionError::ConnectTimeout(Duration::from_secs(20)))
        );
        assert!(!manager.registry.is_attached(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_transport_failure() {
        let (manager, _mock) = manager(
            MockTransport::with_target_device()
                .with_connect_error(TransportError::Backend("le-connection-abort".into())),
        );
        let id = manager.registry.open();

        let outcome = manager.connect(id, protocol::DEFAULT_DEVICE_ADDRESS).await;
        assert!(matches!(
            outcome,
            ConnectOutcome::ConnectFailed(SessionError::ConnectFailed(_))
        ));
        assert_eq!(manager.registry.status(&id).text, "Connect again");
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_unknown_session_is_idempotent() {
        let (manager, mock) = manager(MockTransport::with_target_device());
        let id = SessionId::new();

        assert_eq!(manager.disconnect(id).await, DisconnectOutcome::NoActiveSession);
        assert_eq!(manager.disconnect(id).await, DisconnectOutcome::NoActiveSession);
        assert_eq!(mock.disconnect_calls(), 0);
        assert!(manager.registry.get(&id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_releases_link() {
        let (manager, mock) = manager(MockTransport::with_target_device());
        let id = manager.registry.open();
        manager.connect(id, protocol::DEFAULT_DEVICE_ADDRESS).await;

        assert_eq!(manager.disconnect(id).await, DisconnectOutcome::Disconnected);
        assert_eq!(mock.live_links(), 0);
        assert!(!manager.registry.is_attached(&id));
        assert_eq!(
            manager.registry.status(&id).status,
            SessionStatus::Disconnected
        );

        assert_eq!(manager.disconnect(id).await, DisconnectOutcome::NoActiveSession);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_timeout_still_clears_state() {
        let (manager, _mock) = manager(
            MockTransport::with_target_device().with_disconnect_delay(Duration::from_secs(60)),
        );
        let id = manager.registry.open();
        manager.connect(id, protocol::DEFAULT_DEVICE_ADDRESS).await;

        assert_eq!(
            manager.disconnect(id).await,
            DisconnectOutcome::DisconnectTimedOut
        );
        let snapshot = manager.registry.snapshot(&id).unwrap();
        assert_eq!(snapshot.status(), SessionStatus::Disconnected);
        assert_eq!(snapshot.report.text, "Disconnect again");
        assert!(snapshot.handle.is_none());

        // A fresh attempt is always possible afterwards
        assert_eq!(
            manager.connect(id, protocol::DEFAULT_DEVICE_ADDRESS).await,
            ConnectOutcome::Connected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_silent_drop() {
        let (manager, mock) = manager(MockTransport::with_target_device());
        let id = manager.registry.open();
        manager.connect(id, protocol::DEFAULT_DEVICE_ADDRESS).await;

        mock.drop_all_links();
        // Before the monitor notices, connect sees the dead link and replaces it
        assert_eq!(
            manager.connect(id, protocol::DEFAULT_DEVICE_ADDRESS).await,
            ConnectOutcome::Connected
        );
        assert_eq!(mock.connect_calls(), 2);
        assert_eq!(mock.live_links(), 1);
    }
}
