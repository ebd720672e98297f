//! Measurement Driver
//!
//! Replays the command table against a connected session while draining the
//! notification stream into a [`SampleBuffer`]. The device starts streaming
//! part way through the table, so writes and notification intake run
//! concurrently in one task.

use crate::domain::error::SessionError;
use crate::domain::models::{MeasurementOutcome, SampleBuffer, SessionId};
use crate::domain::settings::SessionConfig;
use crate::infrastructure::bluetooth::{protocol, BleTransport, TransportHandle};
use crate::session::registry::SessionRegistry;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct MeasurementDriver<T: BleTransport> {
    transport: Arc<T>,
    registry: Arc<SessionRegistry>,
    config: Arc<SessionConfig>,
}

impl<T: BleTransport> Clone for MeasurementDriver<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            registry: self.registry.clone(),
            config: self.config.clone(),
        }
    }
}

impl<T: BleTransport> MeasurementDriver<T> {
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

    /// Run one full measurement on `session` and hand back what was captured
    pub async fn run_measurement(&self, session: SessionId) -> MeasurementOutcome {
        let Some(slot) = self.registry.get(&session) else {
            return MeasurementOutcome::NoActiveSession;
        };
        let _ops = slot.lock_ops().await;
        // Armed before the first await so a teardown can never miss it
        let abort = slot.arm_abort();

        let outcome = match slot.handle() {
            None => MeasurementOutcome::NoActiveSession,
            Some(handle) => self.measure(&session, &handle, abort).await,
        };

        slot.disarm_abort();
        outcome
    }

    async fn measure(
        &self,
        session: &SessionId,
        handle: &TransportHandle,
        abort: oneshot::Receiver<()>,
    ) -> MeasurementOutcome {
        if !self.transport.is_connected(handle).await {
            return MeasurementOutcome::NotConnected;
        }

        info!(session = %session, "Starting measurement on {}", handle);
        match self.capture(session, handle, abort).await {
            Ok(buffer) => {
                info!(session = %session, len = buffer.len(), "Measurement complete");
                MeasurementOutcome::Success(buffer)
            }
            Err(e) => {
                warn!(session = %session, "Measurement failed: {}", e);
                MeasurementOutcome::ProtocolError(e)
            }
        }
    }

    async fn capture(
        &self,
        session: &SessionId,
        handle: &TransportHandle,
        abort: oneshot::Receiver<()>,
    ) -> Result<SampleBuffer, SessionError> {
        let characteristic = self.locate_characteristic(handle).await?;

        let (tx, mut rx) = mpsc::channel(self.config.notification_channel_capacity);
        match timeout(
            self.config.write_timeout,
            self.transport
                .subscribe_notifications(handle, characteristic, tx),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(SessionError::ProtocolError(
                    "notification subscribe timed out".to_string(),
                ))
            }
        }

        let mut buffer = SampleBuffer::new();
        let replay = self.replay(handle, characteristic);
        tokio::pin!(replay);
        let aborted = async move {
            // A dropped sender means nobody will ever ask us to stop
            if abort.await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        tokio::pin!(aborted);

        let mut stream_open = true;
        let result = loop {
            tokio::select! {
                biased;
                _ = &mut aborted => {
                    break Err(SessionError::ProtocolError(
                        "measurement aborted by disconnect".to_string(),
                    ));
                }
                payload = rx.recv(), if stream_open => match payload {
                    Some(payload) => buffer.extend_from_slice(&protocol::decode_samples(&payload)),
                    None => {
                        debug!(session = %session, "Notification stream closed");
                        stream_open = false;
                    }
                },
                result = &mut replay => break result,
            }
        };

        // Anything already queued arrived before the stop command was acknowledged
        while let Ok(payload) = rx.try_recv() {
            buffer.extend_from_slice(&protocol::decode_samples(&payload));
        }

        match timeout(
            self.config.write_timeout,
            self.transport
                .unsubscribe_notifications(handle, characteristic),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(session = %session, "Unsubscribe failed: {}", e),
            Err(_) => debug!(session = %session, "Unsubscribe timed out"),
        }

        result.map(|()| buffer)
    }

    async fn locate_characteristic(&self, handle: &TransportHandle) -> Result<Uuid, SessionError> {
        let services = match timeout(
            self.config.write_timeout,
            self.transport.list_services(handle),
        )
        .await
        {
            Ok(Ok(services)) => services,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(SessionError::ProtocolError(
                    "service discovery timed out".to_string(),
                ))
            }
        };

        let service = self.config.service_uuid;
        let characteristic = self.config.characteristic_uuid;
        let found = services
            .iter()
            .any(|s| s.uuid == service && s.has_characteristic(&characteristic));
        if !found {
            return Err(SessionError::ProtocolError(format!(
                "characteristic {} not found in service {}",
                characteristic, service
            )));
        }
        Ok(characteristic)
    }

    /// Command table in order, each write acknowledged before the next, then
    /// the quiescence wait and the stop command
    async fn replay(&self, handle: &TransportHandle, characteristic: Uuid) -> Result<(), SessionError> {
        for (step, command) in protocol::COMMAND_TABLE.iter().enumerate() {
            self.write(handle, characteristic, command)
                .await
                .map_err(|reason| SessionError::WriteRejected { step, reason })?;
            debug!(step, len = command.len(), "Command acknowledged");
        }

        debug!("Command table written, waiting {:?}", self.config.quiescence);
        tokio::time::sleep(self.config.quiescence).await;

        self.write(handle, characteristic, &protocol::STOP_COMMAND)
            .await
            .map_err(|reason| {
                SessionError::ProtocolError(format!("stop command rejected: {}", reason))
            })
    }

    async fn write(
        &self,
        handle: &TransportHandle,
        characteristic: Uuid,
        data: &[u8],
    ) -> Result<(), String> {
        let limit = self.config.write_timeout;
        match timeout(
            limit,
            self.transport
                .write_characteristic(handle, characteristic, data, true),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("no acknowledgement within {:?}", limit)),
        }
    }
}
