use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Failures reported by a [`BleTransport`](crate::infrastructure::bluetooth::BleTransport)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("operation timed out")]
    Timeout,

    #[error("no Bluetooth adapter found")]
    NoAdapter,

    #[error("device {0} not found")]
    DeviceNotFound(String),

    #[error("unknown transport handle")]
    UnknownHandle,

    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    #[error("rejected by device: {0}")]
    Rejected(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<btleplug::Error> for TransportError {
    fn from(e: btleplug::Error) -> Self {
        match e {
            btleplug::Error::TimedOut(_) => Self::Timeout,
            btleplug::Error::DeviceNotFound => Self::DeviceNotFound("peripheral".to_string()),
            btleplug::Error::NotConnected => Self::Rejected("not connected".to_string()),
            other => Self::Backend(other.to_string()),
        }
    }
}

/// Typed failures surfaced by the session layer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("device discovery timed out after {0:?}")]
    DiscoveryTimeout(Duration),

    #[error("device {0} not found")]
    DeviceNotFound(String),

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("no active session")]
    NoActiveSession,

    #[error("session is not connected")]
    NotConnected,

    #[error("disconnect timed out after {0:?}")]
    DisconnectTimeout(Duration),

    #[error("write {step} rejected: {reason}")]
    WriteRejected { step: usize, reason: String },

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("transport fault: {0}")]
    TransportFault(String),
}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        Self::TransportFault(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_display() {
        let err = SessionError::WriteRejected {
            step: 3,
            reason: "gatt status 0x03".to_string(),
        };
        assert_eq!(err.to_string(), "write 3 rejected: gatt status 0x03");

        let err = SessionError::ConnectTimeout(Duration::from_secs(20));
        assert_eq!(err.to_string(), "connect timed out after 20s");

        let err = SessionError::from(TransportError::UnknownHandle);
        assert_eq!(err.to_string(), "transport fault: unknown transport handle");
    }
}
