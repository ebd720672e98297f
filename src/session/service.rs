//! Session Service
//!
//! The inbound control surface: connect, disconnect and start-measurement,
//! each scoped to a caller's session id.

use crate::domain::models::{
    ConnectOutcome, DisconnectOutcome, MeasurementOutcome, SessionId, StatusReport,
};
use crate::domain::settings::SessionConfig;
use crate::infrastructure::bluetooth::BleTransport;
use crate::session::manager::ConnectionManager;
use crate::session::measurement::MeasurementDriver;
use crate::session::registry::{SessionRegistry, SessionSnapshot};
use std::sync::Arc;
use tracing::info;

pub struct SessionService<T: BleTransport> {
    registry: Arc<SessionRegistry>,
    config: Arc<SessionConfig>,
    manager: ConnectionManager<T>,
    driver: MeasurementDriver<T>,
}

impl<T: BleTransport> Clone for SessionService<T> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            config: self.config.clone(),
            manager: self.manager.clone(),
            driver: self.driver.clone(),
        }
    }
}

impl<T: BleTransport> SessionService<T> {
    pub fn new(transport: Arc<T>, config: SessionConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let config = Arc::new(config);
        Self {
            manager: ConnectionManager::new(transport.clone(), registry.clone(), config.clone()),
            driver: MeasurementDriver::new(transport, registry.clone(), config.clone()),
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Start a new UI session; it begins with no active device
    pub fn open_session(&self) -> SessionId {
        let id = self.registry.open();
        info!(session = %id, "Session opened");
        id
    }

    /// Connect to the configured device
    pub async fn connect(&self, session: SessionId) -> ConnectOutcome {
        self.manager
            .connect(session, &self.config.device_address)
            .await
    }

    pub async fn connect_to(&self, session: SessionId, address: &str) -> ConnectOutcome {
        self.manager.connect(session, address).await
    }

    pub async fn disconnect(&self, session: SessionId) -> DisconnectOutcome {
        self.manager.disconnect(session).await
    }

    pub async fn start_measurement(&self, session: SessionId) -> MeasurementOutcome {
        self.driver.run_measurement(session).await
    }

    pub fn status(&self, session: &SessionId) -> StatusReport {
        self.registry.status(session)
    }

    pub fn snapshot(&self, session: &SessionId) -> Option<SessionSnapshot> {
        self.registry.snapshot(session)
    }

    /// Disconnect if needed, then forget the session. Returns false if another
    /// operation started on it in between.
    pub async fn close_session(&self, session: SessionId) -> bool {
        if self.registry.get(&session).is_none() {
            return false;
        }
        self.manager.disconnect(session).await;
        let forgotten = self.registry.forget(&session);
        if forgotten {
            info!(session = %session, "Session closed");
        }
        forgotten
    }
}
