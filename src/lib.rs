//! Connection and write bridge for ESC/POS thermal printers over Bluetooth
//! Classic, BLE and USB.

pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod presentation;

pub use error::{BridgeError, BridgeResult};
