//! Outer surface: method dispatch and the local-socket bridge.

pub mod client;
pub mod dispatcher;
pub mod server;

pub use client::BridgeClient;
pub use dispatcher::{Dispatcher, Request, Response};
pub use server::BridgeServer;
