//! Domain Models
//!
//! Session identity and status, discovery descriptors, the captured sample
//! buffer, and the outcome types returned by the session layer.

use crate::domain::error::SessionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Index;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque token identifying one logical UI-to-device interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Mint a fresh random token. Tokens are never reused.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    NoActiveDevice,
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl SessionStatus {
    /// Default status text shown when no outcome-specific text applies
    pub fn label(&self) -> &'static str {
        match self {
            Self::NoActiveDevice => "No active device",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Disconnected => "Disconnected",
            Self::Error => "Connect again",
        }
    }

    pub fn color(&self) -> StatusColor {
        match self {
            Self::Connected => StatusColor::Success,
            _ => StatusColor::Danger,
        }
    }
}

/// Severity hint the UI renders the status text with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusColor {
    Success,
    Danger,
}

/// What the UI shows for a session: status, short text and a colour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: SessionStatus,
    pub text: String,
    pub color: StatusColor,
}

impl StatusReport {
    pub fn new(status: SessionStatus, text: impl Into<String>) -> Self {
        Self {
            status,
            text: text.into(),
            color: status.color(),
        }
    }
}

impl From<SessionStatus> for StatusReport {
    fn from(status: SessionStatus) -> Self {
        Self::new(status, status.label())
    }
}

/// A peripheral seen during discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// `AA:BB:CC:DD:EE:FF` on Linux/Windows, a platform UUID on macOS
    pub address: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
}

/// A GATT service and the characteristics it exposes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub uuid: Uuid,
    pub characteristics: Vec<Uuid>,
}

impl ServiceDescriptor {
    pub fn has_characteristic(&self, uuid: &Uuid) -> bool {
        self.characteristics.contains(uuid)
    }
}

/// Ordered samples captured during one measurement, in arrival order.
///
/// Handed out as an immutable snapshot; the UI pages through it by index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleBuffer {
    samples: Vec<u16>,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn extend_from_slice(&mut self, samples: &[u16]) {
        self.samples.extend_from_slice(samples);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<u16> {
        self.samples.get(index).copied()
    }

    /// Samples in `[start, end)`, clamped to the buffer bounds
    pub fn window(&self, start: usize, end: usize) -> &[u16] {
        let end = end.min(self.samples.len());
        let start = start.min(end);
        &self.samples[start..end]
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.samples
    }

    pub fn into_vec(self) -> Vec<u16> {
        self.samples
    }
}

impl From<Vec<u16>> for SampleBuffer {
    fn from(samples: Vec<u16>) -> Self {
        Self { samples }
    }
}

impl Index<usize> for SampleBuffer {
    type Output = u16;

    fn index(&self, index: usize) -> &u16 {
        &self.samples[index]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectOutcome {
    Connected,
    /// The session already held a live link; no transport work was done
    AlreadyConnected,
    DeviceNotFound,
    ConnectFailed(SessionError),
}

impl ConnectOutcome {
    pub fn status_report(&self) -> StatusReport {
        match self {
            Self::Connected | Self::AlreadyConnected => SessionStatus::Connected.into(),
            Self::DeviceNotFound => StatusReport::new(SessionStatus::Error, "No device found"),
            Self::ConnectFailed(_) => SessionStatus::Error.into(),
        }
    }

    pub fn message(&self, address: &str) -> String {
        match self {
            Self::Connected | Self::AlreadyConnected => {
                format!("Successfully connected to device {address}!")
            }
            Self::DeviceNotFound => format!("No device found {address}."),
            Self::ConnectFailed(e) => format!("Failed to connect to device {address}: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DisconnectOutcome {
    Disconnected,
    /// Nothing to disconnect; repeated calls keep returning this
    NoActiveSession,
    /// The radio did not confirm in time; local state was cleared anyway
    DisconnectTimedOut,
    /// The adapter reported an error; local state was cleared anyway
    DisconnectFailed(SessionError),
}

impl DisconnectOutcome {
    pub fn status_report(&self) -> StatusReport {
        match self {
            Self::Disconnected => SessionStatus::Disconnected.into(),
            Self::NoActiveSession => SessionStatus::NoActiveDevice.into(),
            Self::DisconnectTimedOut | Self::DisconnectFailed(_) => {
                StatusReport::new(SessionStatus::Disconnected, "Disconnect again")
            }
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Disconnected => "Successfully disconnected!".to_string(),
            Self::NoActiveSession => "No active session to disconnect.".to_string(),
            Self::DisconnectTimedOut => "Timeout occurred while disconnecting.".to_string(),
            Self::DisconnectFailed(e) => format!("An error occurred: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MeasurementOutcome {
    Success(SampleBuffer),
    NoActiveSession,
    NotConnected,
    ProtocolError(SessionError),
}

impl MeasurementOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn message(&self) -> String {
        match self {
            Self::Success(buffer) => format!("Captured {} samples.", buffer.len()),
            Self::NoActiveSession => "No active session to read.".to_string(),
            Self::NotConnected => "No active connection to read from.".to_string(),
            Self::ProtocolError(e) => format!("An error occurred: {e}"),
        }
    }
}
