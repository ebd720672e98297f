//! BLE Scanner Module
//!
//! Handles Bluetooth LE device discovery through btleplug.

use crate::domain::error::TransportError;
use crate::domain::models::DeviceDescriptor;
use crate::infrastructure::bluetooth::protocol;
use btleplug::api::{BDAddr, Central, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Peripheral};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// BLE Scanner bound to one adapter
pub struct BleScanner {
    adapter: Adapter,
    scanning: AtomicBool,
}

impl BleScanner {
    /// Create a new scanner
    pub fn new(adapter: Adapter) -> Self {
        Self {
            adapter,
            scanning: AtomicBool::new(false),
        }
    }

    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Start an unfiltered scan
    pub async fn start(&self) -> Result<(), TransportError> {
        info!("Starting BLE scan");
        self.adapter.start_scan(ScanFilter::default()).await?;
        self.scanning.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Stop scanning
    pub async fn stop(&self) -> Result<(), TransportError> {
        if self.scanning.swap(false, Ordering::SeqCst) {
            info!("Stopping BLE scan...");
            self.adapter.stop_scan().await?;
        }
        Ok(())
    }

    /// Check if currently scanning
    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    /// Scan for `window` and return every peripheral the adapter knows about
    pub async fn scan(&self, window: Duration) -> Result<Vec<DeviceDescriptor>, TransportError> {
        self.start().await?;
        tokio::time::sleep(window).await;
        if let Err(e) = self.stop().await {
            warn!("Failed to stop scan cleanly: {}", e);
        }

        let mut found = Vec::new();
        for peripheral in self.adapter.peripherals().await? {
            let props = peripheral.properties().await?.unwrap_or_default();
            let device = DeviceDescriptor {
                address: peripheral_address(&peripheral),
                name: props.local_name,
                rssi: props.rssi,
            };
            debug!("Seen {} ({:?}, rssi {:?})", device.address, device.name, device.rssi);
            found.push(device);
        }

        info!("Scan finished: {} device(s) seen", found.len());
        Ok(found)
    }

    /// Look up a previously discovered peripheral by address
    pub async fn find(&self, address: &str) -> Result<Option<Peripheral>, TransportError> {
        let peripherals = self.adapter.peripherals().await?;
        Ok(peripherals
            .into_iter()
            .find(|p| protocol::addresses_match(&peripheral_address(p), address)))
    }
}

/// MAC address where the platform exposes one, otherwise the platform id
/// (CoreBluetooth hides addresses behind per-host UUIDs)
pub fn peripheral_address(peripheral: &Peripheral) -> String {
    let address = peripheral.address();
    if address == BDAddr::default() {
        peripheral.id().to_string()
    } else {
        address.to_string()
    }
}
