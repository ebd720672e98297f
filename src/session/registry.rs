//! Session Registry
//!
//! Process-wide map from [`SessionId`] to per-session state. Each slot carries
//! an async operation lock that serializes connect, disconnect and measurement
//! for that session, while different sessions proceed independently.
//!
//! A slot's status and transport handle only change together, so a session
//! never reads `Connected` without a handle.

use crate::domain::models::{SessionId, SessionStatus, StatusReport};
use crate::infrastructure::bluetooth::TransportHandle;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub report: StatusReport,
    pub handle: Option<TransportHandle>,
}

impl SessionSnapshot {
    pub fn status(&self) -> SessionStatus {
        self.report.status
    }
}

/// The live connection attached to a session, with the monitor watching it
#[derive(Debug)]
pub(crate) struct Link {
    pub(crate) handle: TransportHandle,
    monitor: Option<AbortHandle>,
}

impl Link {
    pub(crate) fn stop_monitor(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
    }
}

#[derive(Debug)]
struct SessionRecord {
    report: StatusReport,
    link: Option<Link>,
}

#[derive(Debug)]
pub struct SessionSlot {
    ops: tokio::sync::Mutex<()>,
    record: Mutex<SessionRecord>,
    abort: Mutex<Option<oneshot::Sender<()>>>,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            ops: tokio::sync::Mutex::new(()),
            record: Mutex::new(SessionRecord {
                report: SessionStatus::NoActiveDevice.into(),
                link: None,
            }),
            abort: Mutex::new(None),
        }
    }

    fn record(&self) -> MutexGuard<'_, SessionRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn abort_slot(&self) -> MutexGuard<'_, Option<oneshot::Sender<()>>> {
        self.abort.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for exclusive access to this session's connect/disconnect/measure path
    pub async fn lock_ops(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.ops.lock().await
    }

    pub fn is_busy(&self) -> bool {
        self.ops.try_lock().is_err()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let record = self.record();
        SessionSnapshot {
            report: record.report.clone(),
            handle: record.link.as_ref().map(|l| l.handle.clone()),
        }
    }

    pub fn report(&self) -> StatusReport {
        self.record().report.clone()
    }

    pub fn handle(&self) -> Option<TransportHandle> {
        self.record().link.as_ref().map(|l| l.handle.clone())
    }

    pub(crate) fn begin_connect(&self) {
        let mut record = self.record();
        if record.link.is_none() {
            record.report = SessionStatus::Connecting.into();
        }
    }

    /// Record a new live link; status becomes `Connected`
    pub(crate) fn attach(&self, handle: TransportHandle) {
        let mut record = self.record();
        if let Some(mut stale) = record.link.take() {
            stale.stop_monitor();
        }
        record.link = Some(Link {
            handle,
            monitor: None,
        });
        record.report = SessionStatus::Connected.into();
    }

    /// Hand the monitor for `handle` to the link it watches. If that link is
    /// already gone the monitor is stopped.
    pub(crate) fn attach_monitor(&self, handle: &TransportHandle, monitor: AbortHandle) {
        let mut record = self.record();
        match record.link.as_mut() {
            Some(link) if link.handle == *handle => link.monitor = Some(monitor),
            _ => monitor.abort(),
        }
    }

    /// Remove the link (if any) and publish `report`
    pub(crate) fn detach(&self, report: StatusReport) -> Option<Link> {
        let mut record = self.record();
        record.report = idle(report);
        record.link.take()
    }

    /// Remove the link only if it is still `handle`
    pub(crate) fn detach_if(&self, handle: &TransportHandle, report: StatusReport) -> Option<Link> {
        let mut record = self.record();
        match record.link.as_ref() {
            Some(link) if link.handle == *handle => {
                record.report = idle(report);
                record.link.take()
            }
            _ => None,
        }
    }

    /// Publish a status while no link is attached
    pub(crate) fn set_idle_report(&self, report: StatusReport) {
        let mut record = self.record();
        if record.link.is_none() {
            record.report = idle(report);
        }
    }

    /// Install a fresh abort signal for an in-flight measurement
    pub(crate) fn arm_abort(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        *self.abort_slot() = Some(tx);
        rx
    }

    pub(crate) fn disarm_abort(&self) {
        self.abort_slot().take();
    }

    /// Ask the in-flight measurement to stop. Returns false if none is running.
    pub(crate) fn signal_abort(&self) -> bool {
        match self.abort_slot().take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}

/// `Connected` is only valid with a link attached
fn idle(report: StatusReport) -> StatusReport {
    if report.status == SessionStatus::Connected {
        SessionStatus::Disconnected.into()
    } else {
        report
    }
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<SessionSlot>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a new session id with an empty slot
    pub fn open(&self) -> SessionId {
        let id = SessionId::new();
        self.slot(&id);
        id
    }

    /// Get or lazily create the slot for `id`
    pub fn slot(&self, id: &SessionId) -> Arc<SessionSlot> {
        if let Some(slot) = self.get(id) {
            return slot;
        }
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions
            .entry(*id)
            .or_insert_with(|| Arc::new(SessionSlot::new()))
            .clone()
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<SessionSlot>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Status for `id`; unknown sessions have no active device
    pub fn status(&self, id: &SessionId) -> StatusReport {
        self.get(id)
            .map(|slot| slot.report())
            .unwrap_or_else(|| SessionStatus::NoActiveDevice.into())
    }

    pub fn snapshot(&self, id: &SessionId) -> Option<SessionSnapshot> {
        self.get(id).map(|slot| slot.snapshot())
    }

    /// Whether `id` currently has a transport handle attached
    pub fn is_attached(&self, id: &SessionId) -> bool {
        self.get(id).map(|slot| slot.handle().is_some()).unwrap_or(false)
    }

    pub fn attached_sessions(&self) -> Vec<SessionId> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, slot)| slot.handle().is_some())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Drop an idle, unattached session entirely. Returns false when the
    /// session is busy or still holds a link.
    pub fn forget(&self, id: &SessionId) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let removable = match sessions.get(id) {
            Some(slot) => !slot.is_busy() && slot.handle().is_none(),
            None => return false,
        };
        if removable {
            sessions.remove(id);
        }
        removable
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
