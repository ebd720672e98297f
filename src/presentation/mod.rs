pub mod console;

pub use console::{Console, ControlCommand, ControlResponse};
