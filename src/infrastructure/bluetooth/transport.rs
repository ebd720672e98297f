//! BLE Transport Interface
//!
//! The narrow surface the session layer needs from a BLE stack. Keeping it a
//! trait lets the protocol logic run against btleplug in production and an
//! in-memory mock in tests.

use crate::domain::error::TransportError;
use crate::domain::models::{DeviceDescriptor, ServiceDescriptor};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A live connection issued by a transport.
///
/// Only meaningful to the transport that created it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransportHandle {
    id: u64,
    address: String,
}

impl TransportHandle {
    pub fn new(id: u64, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl fmt::Display for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.address, self.id)
    }
}

#[async_trait]
pub trait BleTransport: Send + Sync + 'static {
    /// Scan for `timeout` and return everything seen
    async fn discover(&self, timeout: Duration) -> Result<Vec<DeviceDescriptor>, TransportError>;

    async fn connect(
        &self,
        address: &str,
        timeout: Duration,
    ) -> Result<TransportHandle, TransportError>;

    /// Release the link. The handle is invalid afterwards even on error.
    async fn disconnect(
        &self,
        handle: &TransportHandle,
        timeout: Duration,
    ) -> Result<(), TransportError>;

    async fn is_connected(&self, handle: &TransportHandle) -> bool;

    async fn list_services(
        &self,
        handle: &TransportHandle,
    ) -> Result<Vec<ServiceDescriptor>, TransportError>;

    async fn write_characteristic(
        &self,
        handle: &TransportHandle,
        characteristic: Uuid,
        data: &[u8],
        with_response: bool,
    ) -> Result<(), TransportError>;

    /// Forward every notification payload on `characteristic` into `sink`
    /// until the sink is closed or the link drops
    async fn subscribe_notifications(
        &self,
        handle: &TransportHandle,
        characteristic: Uuid,
        sink: mpsc::Sender<Vec<u8>>,
    ) -> Result<(), TransportError>;

    async fn unsubscribe_notifications(
        &self,
        handle: &TransportHandle,
        characteristic: Uuid,
    ) -> Result<(), TransportError>;
}
