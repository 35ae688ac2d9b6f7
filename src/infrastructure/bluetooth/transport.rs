//! Transport seams
//!
//! Backends implement [`ClassicAdapter`] (serial-profile sockets) and
//! [`GattCentral`] (BLE). The connection manager wraps whatever they open
//! in a [`Link`], the single byte-sink abstraction the chunked writer sees.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Backend-level failures. Translated into `BridgeError` by the connection
/// manager and the chunked writer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Bluetooth adapter not available")]
    AdapterUnavailable,

    #[error("Bluetooth adapter is disabled")]
    AdapterDisabled,

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("GATT error: {0}")]
    Gatt(String),

    #[error("no writable characteristic resolved")]
    NoWritableCharacteristic,

    #[error("link closed")]
    LinkClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("platform error: {0}")]
    Platform(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Radio state as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Unavailable,
    Disabled,
    Enabled,
}

impl AdapterState {
    pub fn check(self) -> TransportResult<()> {
        match self {
            Self::Enabled => Ok(()),
            Self::Disabled => Err(TransportError::AdapterDisabled),
            Self::Unavailable => Err(TransportError::AdapterUnavailable),
        }
    }
}

/// Delivery guarantee a link gives for each chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// The transport acknowledges every chunk (BLE write with response).
    Confirmed,
    /// Chunks are pushed into a stream; success means "issued", not
    /// "delivered" (Classic sockets).
    FireAndForget,
}

/// An open connection to one printer.
#[async_trait]
pub trait Link: Send + Sync {
    fn write_mode(&self) -> WriteMode;

    /// Transport-level link state only.
    fn is_connected(&self) -> bool;

    /// Whether a byte-sink was resolved for this link.
    fn has_sink(&self) -> bool {
        true
    }

    /// Send one chunk. For [`WriteMode::Confirmed`] links this resolves once
    /// the transport acknowledged the chunk.
    async fn write_chunk(&mut self, chunk: &[u8]) -> TransportResult<()>;

    async fn close(&mut self) -> TransportResult<()>;
}

// ---------------------------------------------------------------------------
// Classic
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BondedInfo {
    pub name: String,
    pub address: String,
}

/// Streaming serial-profile socket.
#[async_trait]
pub trait SppSocket: Send + Sync {
    fn is_connected(&self) -> bool;
    async fn write_all(&mut self, data: &[u8]) -> TransportResult<()>;
    async fn flush(&mut self) -> TransportResult<()>;
    async fn close(&mut self) -> TransportResult<()>;
}

#[async_trait]
pub trait ClassicAdapter: Send + Sync {
    async fn adapter_state(&self) -> AdapterState;

    /// Devices already bonded with the host. No radio scan.
    async fn bonded_devices(&self) -> TransportResult<Vec<BondedInfo>>;

    /// Stop any inquiry in progress; running discovery destabilises new
    /// RFCOMM connections.
    async fn cancel_discovery(&self);

    async fn open(&self, address: &str, service_uuid: &str) -> TransportResult<Box<dyn SppSocket>>;
}

// ---------------------------------------------------------------------------
// BLE
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub address: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub service_uuid: String,
    pub uuid: String,
    pub properties: CharacteristicProperties,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    WithResponse,
    WithoutResponse,
}

#[async_trait]
pub trait GattCentral: Send + Sync {
    async fn adapter_state(&self) -> AdapterState;

    /// Start a scan; advertisements are delivered on the returned channel
    /// until [`GattCentral::stop_scan`].
    async fn start_scan(&self) -> TransportResult<mpsc::UnboundedReceiver<Advertisement>>;

    async fn stop_scan(&self);

    /// Resolves when the platform reports the link is up.
    async fn connect(&self, address: &str) -> TransportResult<Box<dyn GattPeripheral>>;
}

#[async_trait]
pub trait GattPeripheral: Send + Sync {
    fn address(&self) -> &str;
    fn is_connected(&self) -> bool;
    async fn discover_services(&self) -> TransportResult<Vec<GattService>>;
    async fn discover_characteristics(
        &self,
        service: &GattService,
    ) -> TransportResult<Vec<GattCharacteristic>>;
    async fn write(
        &self,
        characteristic: &GattCharacteristic,
        data: &[u8],
        kind: WriteKind,
    ) -> TransportResult<()>;
    async fn disconnect(&self) -> TransportResult<()>;
}
