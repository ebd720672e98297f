//! BLE Connection Module
//!
//! btleplug-backed [`BleTransport`]: device connection, GATT service access,
//! characteristic writes and notification forwarding.

use crate::domain::error::TransportError;
use crate::domain::models::{DeviceDescriptor, ServiceDescriptor};
use crate::infrastructure::bluetooth::scanner::BleScanner;
use crate::infrastructure::bluetooth::transport::{BleTransport, TransportHandle};
use async_trait::async_trait;
use btleplug::api::{Characteristic, Manager as _, Peripheral as _, WriteType};
use btleplug::platform::{Manager, Peripheral};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Transport over the host's first Bluetooth adapter
pub struct BtleplugTransport {
    scanner: BleScanner,
    links: Mutex<HashMap<u64, Peripheral>>,
    forwarders: Mutex<HashMap<(u64, Uuid), JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl BtleplugTransport {
    /// Open the first adapter the platform reports
    pub async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(TransportError::NoAdapter)?;

        Ok(Self {
            scanner: BleScanner::new(adapter),
            links: Mutex::new(HashMap::new()),
            forwarders: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    fn links(&self) -> MutexGuard<'_, HashMap<u64, Peripheral>> {
        self.links.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn forwarders(&self) -> MutexGuard<'_, HashMap<(u64, Uuid), JoinHandle<()>>> {
        self.forwarders.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn peripheral(&self, handle: &TransportHandle) -> Result<Peripheral, TransportError> {
        self.links()
            .get(&handle.id())
            .cloned()
            .ok_or(TransportError::UnknownHandle)
    }

    fn characteristic(
        peripheral: &Peripheral,
        uuid: Uuid,
    ) -> Result<Characteristic, TransportError> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(TransportError::CharacteristicNotFound(uuid))
    }

    fn stop_forwarders(&self, link_id: u64) {
        self.forwarders().retain(|(id, _), task| {
            if *id == link_id {
                task.abort();
                false
            } else {
                true
            }
        });
    }
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    async fn discover(&self, timeout: Duration) -> Result<Vec<DeviceDescriptor>, TransportError> {
        self.scanner.scan(timeout).await
    }

    async fn connect(
        &self,
        address: &str,
        timeout: Duration,
    ) -> Result<TransportHandle, TransportError> {
        info!("Connecting to Bluetooth device: {}", address);

        let peripheral = self
            .scanner
            .find(address)
            .await?
            .ok_or_else(|| TransportError::DeviceNotFound(address.to_string()))?;

        // BlueZ can block forever on Device1.Connect when the device is out of range
        tokio::time::timeout(timeout, peripheral.connect())
            .await
            .map_err(|_| TransportError::Timeout)??;

        // Linux signals the connection before the remote GATT cache is populated
        #[cfg(target_os = "linux")]
        tokio::time::sleep(Duration::from_millis(600)).await;

        tokio::time::timeout(timeout, peripheral.discover_services())
            .await
            .map_err(|_| TransportError::Timeout)??;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.links().insert(id, peripheral);

        let handle = TransportHandle::new(id, address);
        info!("Device connected: {}", handle);
        Ok(handle)
    }

    async fn disconnect(
        &self,
        handle: &TransportHandle,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let peripheral = self
            .links()
            .remove(&handle.id())
            .ok_or(TransportError::UnknownHandle)?;
        self.stop_forwarders(handle.id());

        tokio::time::timeout(timeout, peripheral.disconnect())
            .await
            .map_err(|_| TransportError::Timeout)??;

        info!("Disconnected from device {}", handle);
        Ok(())
    }

    async fn is_connected(&self, handle: &TransportHandle) -> bool {
        match self.peripheral(handle) {
            Ok(peripheral) => peripheral.is_connected().await.unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn list_services(
        &self,
        handle: &TransportHandle,
    ) -> Result<Vec<ServiceDescriptor>, TransportError> {
        let peripheral = self.peripheral(handle)?;
        let services = peripheral
            .services()
            .into_iter()
            .map(|s| ServiceDescriptor {
                uuid: s.uuid,
                characteristics: s.characteristics.iter().map(|c| c.uuid).collect(),
            })
            .collect::<Vec<_>>();

        debug!("{} exposes {} service(s)", handle, services.len());
        Ok(services)
    }

    async fn write_characteristic(
        &self,
        handle: &TransportHandle,
        characteristic: Uuid,
        data: &[u8],
        with_response: bool,
    ) -> Result<(), TransportError> {
        let peripheral = self.peripheral(handle)?;
        let target = Self::characteristic(&peripheral, characteristic)?;
        let write_type = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        peripheral
            .write(&target, data, write_type)
            .await
            .map_err(|e| TransportError::Rejected(e.to_string()))
    }

    async fn subscribe_notifications(
        &self,
        handle: &TransportHandle,
        characteristic: Uuid,
        sink: mpsc::Sender<Vec<u8>>,
    ) -> Result<(), TransportError> {
        let peripheral = self.peripheral(handle)?;
        let target = Self::characteristic(&peripheral, characteristic)?;

        let mut notifications = peripheral.notifications().await?;
        peripheral.subscribe(&target).await?;
        info!("Notifications enabled on {}", characteristic);

        let link = handle.to_string();
        let task = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != characteristic {
                    continue;
                }
                if sink.send(notification.value).await.is_err() {
                    debug!("Notification sink for {} closed", link);
                    break;
                }
            }
        });

        if let Some(previous) = self.forwarders().insert((handle.id(), characteristic), task) {
            warn!("Replacing existing notification forwarder on {}", characteristic);
            previous.abort();
        }
        Ok(())
    }

    async fn unsubscribe_notifications(
        &self,
        handle: &TransportHandle,
        characteristic: Uuid,
    ) -> Result<(), TransportError> {
        if let Some(task) = self.forwarders().remove(&(handle.id(), characteristic)) {
            task.abort();
        }

        let peripheral = self.peripheral(handle)?;
        let target = Self::characteristic(&peripheral, characteristic)?;
        peripheral.unsubscribe(&target).await?;
        Ok(())
    }
}
