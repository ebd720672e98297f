//! Biosensor Link
//!
//! Session manager for a wearable BLE biosensor: connect, replay the device's
//! configuration sequence, capture the notification stream and tear down.
//!
//! - [`domain`] - session models, errors and settings
//! - [`infrastructure`] - BLE transports and logging
//! - [`session`] - registry, connection manager, measurement driver, monitor
//! - [`presentation`] - JSON line console

pub mod domain;
pub mod infrastructure;
pub mod presentation;
pub mod session;

pub mod prelude {
    pub use crate::domain::error::{SessionError, TransportError};
    pub use crate::domain::models::{
        ConnectOutcome, DisconnectOutcome, MeasurementOutcome, SampleBuffer, SessionId,
        SessionStatus, StatusColor, StatusReport,
    };
    pub use crate::domain::settings::{SessionConfig, Settings, SettingsService};
    pub use crate::infrastructure::bluetooth::mock::MockTransport;
    pub use crate::infrastructure::bluetooth::{BleTransport, BtleplugTransport, TransportHandle};
    pub use crate::session::SessionService;
}
