//! In-memory [`BleTransport`] with scriptable behaviour, for tests and for
//! exercising the session layer without a radio.

use crate::domain::error::TransportError;
use crate::domain::models::{DeviceDescriptor, ServiceDescriptor};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::{BleTransport, TransportHandle};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Default)]
struct MockState {
    next_id: u64,
    /// link id -> still connected
    links: HashMap<u64, bool>,
    sinks: HashMap<(u64, Uuid), mpsc::Sender<Vec<u8>>>,
    writes: Vec<Vec<u8>>,
    discover_calls: usize,
    connect_calls: usize,
    disconnect_calls: usize,
}

#[derive(Debug, Default)]
pub struct MockTransport {
    devices: Vec<DeviceDescriptor>,
    services: Vec<ServiceDescriptor>,
    discover_delay: Duration,
    connect_delay: Duration,
    disconnect_delay: Duration,
    write_delay: Duration,
    connect_error: Option<TransportError>,
    reject_write_at: Option<usize>,
    /// write index -> payloads notified once that write is acknowledged
    emissions: HashMap<usize, Vec<Vec<u8>>>,
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that can see the default device and exposes the
    /// measurement service
    pub fn with_target_device() -> Self {
        Self::new()
            .with_device(protocol::DEFAULT_DEVICE_ADDRESS)
            .with_service(protocol::SERVICE, vec![protocol::CHARACTERISTIC])
    }

    pub fn with_device(mut self, address: &str) -> Self {
        self.devices.push(DeviceDescriptor {
            address: address.to_string(),
            name: Some("Mock Wearable".to_string()),
            rssi: Some(-58),
        });
        self
    }

    pub fn with_service(mut self, uuid: Uuid, characteristics: Vec<Uuid>) -> Self {
        self.services.push(ServiceDescriptor {
            uuid,
            characteristics,
        });
        self
    }

    pub fn with_discover_delay(mut self, delay: Duration) -> Self {
        self.discover_delay = delay;
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn with_disconnect_delay(mut self, delay: Duration) -> Self {
        self.disconnect_delay = delay;
        self
    }

    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    pub fn with_connect_error(mut self, error: TransportError) -> Self {
        self.connect_error = Some(error);
        self
    }

    /// Reject the `index`-th write (0-based, counted over the transport's lifetime)
    pub fn reject_write(mut self, index: usize) -> Self {
        self.reject_write_at = Some(index);
        self
    }

    /// Notify `payload` to subscribers right after write `index` is acknowledged
    pub fn emit_after_write(mut self, index: usize, payload: Vec<u8>) -> Self {
        self.emissions.entry(index).or_default().push(payload);
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulate the device silently going away
    pub fn drop_link(&self, handle: &TransportHandle) {
        let mut state = self.state();
        if let Some(connected) = state.links.get_mut(&handle.id()) {
            *connected = false;
        }
        state.sinks.retain(|(id, _), _| *id != handle.id());
    }

    pub fn drop_all_links(&self) {
        let mut state = self.state();
        state.links.values_mut().for_each(|c| *c = false);
        state.sinks.clear();
    }

    /// Every payload written so far, in order
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state().writes.clone()
    }

    pub fn discover_calls(&self) -> usize {
        self.state().discover_calls
    }

    pub fn connect_calls(&self) -> usize {
        self.state().connect_calls
    }

    pub fn disconnect_calls(&self) -> usize {
        self.state().disconnect_calls
    }

    pub fn live_links(&self) -> usize {
        self.state().links.values().filter(|c| **c).count()
    }

    fn ensure_connected(&self, handle: &TransportHandle) -> Result<(), TransportError> {
        match self.state().links.get(&handle.id()) {
            Some(true) => Ok(()),
            Some(false) => Err(TransportError::Rejected("not connected".to_string())),
            None => Err(TransportError::UnknownHandle),
        }
    }
}

#[async_trait]
impl BleTransport for MockTransport {
    async fn discover(&self, _timeout: Duration) -> Result<Vec<DeviceDescriptor>, TransportError> {
        self.state().discover_calls += 1;
        tokio::time::sleep(self.discover_delay).await;
        Ok(self.devices.clone())
    }

    async fn connect(
        &self,
        address: &str,
        _timeout: Duration,
    ) -> Result<TransportHandle, TransportError> {
        self.state().connect_calls += 1;
        tokio::time::sleep(self.connect_delay).await;

        if let Some(error) = &self.connect_error {
            return Err(error.clone());
        }
        if !self
            .devices
            .iter()
            .any(|d| protocol::addresses_match(&d.address, address))
        {
            return Err(TransportError::DeviceNotFound(address.to_string()));
        }

        let mut state = self.state();
        state.next_id += 1;
        let id = state.next_id;
        state.links.insert(id, true);
        Ok(TransportHandle::new(id, address))
    }

    async fn disconnect(
        &self,
        handle: &TransportHandle,
        _timeout: Duration,
    ) -> Result<(), TransportError> {
        self.state().disconnect_calls += 1;
        tokio::time::sleep(self.disconnect_delay).await;

        let mut state = self.state();
        state.sinks.retain(|(id, _), _| *id != handle.id());
        state
            .links
            .remove(&handle.id())
            .map(|_| ())
            .ok_or(TransportError::UnknownHandle)
    }

    async fn is_connected(&self, handle: &TransportHandle) -> bool {
        self.state().links.get(&handle.id()).copied().unwrap_or(false)
    }

    async fn list_services(
        &self,
        handle: &TransportHandle,
    ) -> Result<Vec<ServiceDescriptor>, TransportError> {
        self.ensure_connected(handle)?;
        Ok(self.services.clone())
    }

    async fn write_characteristic(
        &self,
        handle: &TransportHandle,
        characteristic: Uuid,
        data: &[u8],
        _with_response: bool,
    ) -> Result<(), TransportError> {
        self.ensure_connected(handle)?;
        tokio::time::sleep(self.write_delay).await;

        let (index, sinks) = {
            let mut state = self.state();
            let index = state.writes.len();
            if self.reject_write_at == Some(index) {
                return Err(TransportError::Rejected(format!(
                    "write {} refused by mock",
                    index
                )));
            }
            state.writes.push(data.to_vec());
            let sinks: Vec<_> = state
                .sinks
                .iter()
                .filter(|((id, uuid), _)| *id == handle.id() && *uuid == characteristic)
                .map(|(_, sink)| sink.clone())
                .collect();
            (index, sinks)
        };

        if let Some(payloads) = self.emissions.get(&index) {
            for sink in &sinks {
                for payload in payloads {
                    let _ = sink.send(payload.clone()).await;
                }
            }
        }
        Ok(())
    }

    async fn subscribe_notifications(
        &self,
        handle: &TransportHandle,
        characteristic: Uuid,
        sink: mpsc::Sender<Vec<u8>>,
    ) -> Result<(), TransportError> {
        self.ensure_connected(handle)?;
        if !self
            .services
            .iter()
            .any(|s| s.has_characteristic(&characteristic))
        {
            return Err(TransportError::CharacteristicNotFound(characteristic));
        }
        self.state()
            .sinks
            .insert((handle.id(), characteristic), sink);
        Ok(())
    }

    async fn unsubscribe_notifications(
        &self,
        handle: &TransportHandle,
        characteristic: Uuid,
    ) -> Result<(), TransportError> {
        self.state().sinks.remove(&(handle.id(), characteristic));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_unknown_address() {
        let mock = MockTransport::with_target_device();
        let result = mock.connect("00:11:22:33:44:55", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(TransportError::DeviceNotFound(_))));
        assert_eq!(mock.connect_calls(), 1);
    }

    #[tokio::test]
    async fn test_drop_link_reports_disconnected() {
        let mock = MockTransport::with_target_device();
        let handle = mock
            .connect(protocol::DEFAULT_DEVICE_ADDRESS, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(mock.is_connected(&handle).await);

        mock.drop_link(&handle);
        assert!(!mock.is_connected(&handle).await);
        assert!(mock
            .write_characteristic(&handle, protocol::CHARACTERISTIC, &[0x01], true)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_emits_after_acknowledged_write() {
        let mock = MockTransport::with_target_device().emit_after_write(1, vec![0xab, 0xcd]);
        let handle = mock
            .connect(protocol::DEFAULT_DEVICE_ADDRESS, Duration::from_secs(1))
            .await
            .unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        mock.subscribe_notifications(&handle, protocol::CHARACTERISTIC, tx)
            .await
            .unwrap();

        mock.write_characteristic(&handle, protocol::CHARACTERISTIC, &[0x00], true)
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());

        mock.write_characteristic(&handle, protocol::CHARACTERISTIC, &[0x01], true)
            .await
            .unwrap();
        assert_eq!(rx.recv().await, Some(vec![0xab, 0xcd]));
    }
}
