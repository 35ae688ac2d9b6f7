//! Bluetooth Module
//!
//! Discovery, the single printer connection and chunked writes over
//! Bluetooth Classic and BLE.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     PrinterService                       │
//! │   (coordinator behind one async mutex - public API)      │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼──────────────┐
//!         │             │              │
//!         ▼             ▼              ▼
//! ┌───────────┐  ┌────────────┐  ┌─────────────┐
//! │  Scanner  │  │ Connection │  │   Writer    │
//! │           │  │            │  │             │
//! │ - bonded  │  │ - SPP link │  │ - 512 byte  │
//! │ - BLE scan│  │ - GATT link│  │   chunks    │
//! │ - USB     │  │ - selector │  │ - pacing    │
//! └─────┬─────┘  └─────┬──────┘  └─────────────┘
//!       │              │
//!       ▼              ▼
//! ┌─────────────────────────────┐
//! │  Transport traits           │
//! │  classic / winrt / mock     │
//! └─────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`transport`] - Backend traits, the `Link` byte-sink and transport errors
//! - [`completion`] - Single-slot pending result fed by platform callbacks
//! - [`protocol`] - SPP UUID, chunk size, UUID and MAC helpers
//! - [`selection`] - BLE byte-sink selection strategies
//! - [`scanner`] - Device discovery per transport
//! - [`connection`] - Connection state machine and links
//! - [`writer`] - Chunked writes
//! - [`service`] - Main service coordinator
//! - [`classic`] - Classic adapter over bonded serial ports
//! - [`mock`] - Simulated printers, radios and host

pub mod classic;
pub mod completion;
pub mod connection;
pub mod mock;
pub mod protocol;
pub mod scanner;
pub mod selection;
pub mod service;
pub mod transport;
#[cfg(windows)]
pub mod winrt;
pub mod writer;

// Re-export main service for convenience
pub use service::{Backends, PrinterService};
