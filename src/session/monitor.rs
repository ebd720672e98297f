//! Connection Monitor
//!
//! One background task per connected session. It polls link liveness and, on
//! a drop nobody asked for, detaches the session and marks it `Disconnected`.

use crate::domain::models::{SessionId, SessionStatus};
use crate::infrastructure::bluetooth::{BleTransport, TransportHandle};
use crate::session::registry::SessionSlot;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Why a monitor stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    /// The session let go of the link (explicit disconnect or reconnect)
    Released,
    /// The link dropped underneath the session
    LinkLost,
}

pub fn spawn<T: BleTransport>(
    transport: Arc<T>,
    slot: Arc<SessionSlot>,
    session: SessionId,
    handle: TransportHandle,
    interval: Duration,
) -> JoinHandle<MonitorExit> {
    tokio::spawn(watch(transport, slot, session, handle, interval))
}

async fn watch<T: BleTransport>(
    transport: Arc<T>,
    slot: Arc<SessionSlot>,
    session: SessionId,
    handle: TransportHandle,
    interval: Duration,
) -> MonitorExit {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;

        if slot.handle().as_ref() != Some(&handle) {
            debug!(session = %session, "Monitor released for {}", handle);
            return MonitorExit::Released;
        }

        if transport.is_connected(&handle).await {
            continue;
        }

        if slot
            .detach_if(&handle, SessionStatus::Disconnected.into())
            .is_none()
        {
            // An explicit disconnect got there first
            return MonitorExit::Released;
        }

        warn!(session = %session, "Client disconnected ({}), updating status", handle);
        // Free whatever the transport still holds for the dead link
        if let Err(e) = transport.disconnect(&handle, interval).await {
            debug!(session = %session, "Cleanup after link loss: {}", e);
        }
        return MonitorExit::LinkLost;
    }
}
