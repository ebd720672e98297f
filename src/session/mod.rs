//! Session Layer
//!
//! Orchestration on top of a [`BleTransport`](crate::infrastructure::bluetooth::BleTransport):
//!
//! - [`registry`] - per-session state and the per-session operation lock
//! - [`manager`] - scan, connect and disconnect
//! - [`measurement`] - command table replay and sample capture
//! - [`monitor`] - background link liveness watcher
//! - [`service`] - the control surface the front end talks to

pub mod manager;
pub mod measurement;
pub mod monitor;
pub mod registry;
pub mod service;

pub use manager::ConnectionManager;
pub use measurement::MeasurementDriver;
pub use registry::{SessionRegistry, SessionSnapshot};
pub use service::SessionService;
