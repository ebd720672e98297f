//! Bluetooth Module
//!
//! BLE access to the biosensor, behind the [`BleTransport`] trait.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 BleTransport (trait)                     │
//! │   (what the session layer sees - handles, not radios)    │
//! └──────────────┬──────────────────────────┬───────────────┘
//!                │                          │
//!                ▼                          ▼
//!      ┌──────────────────┐        ┌────────────────┐
//!      │ BtleplugTransport│        │ MockTransport  │
//!      │ - GATT access    │        │ - scripted     │
//!      │ - notifications  │        │   devices      │
//!      └───────┬──────────┘        └────────────────┘
//!              │
//!       ┌──────┴──────┐
//!       ▼             ▼
//! ┌───────────┐  ┌────────────┐
//! │  Scanner  │  │  Protocol  │
//! │ - BLE     │  │ - UUIDs    │
//! │ discovery │  │ - commands │
//! │           │  │ - decoding │
//! └───────────┘  └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Device UUIDs, command table, stop payload and sample decoding
//! - [`transport`] - The transport trait and connection handle
//! - [`scanner`] - BLE device discovery
//! - [`connection`] - btleplug-backed transport
//! - [`mock`] - In-memory transport for tests

pub mod connection;
pub mod mock;
pub mod protocol;
pub mod scanner;
pub mod transport;

pub use connection::BtleplugTransport;
pub use transport::{BleTransport, TransportHandle};
