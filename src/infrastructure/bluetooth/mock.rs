//! Simulated printers, radios and host.
//!
//! Used as test doubles and by the `simulated` backend. Callbacks are
//! emulated with spawned tasks that fulfil a [`Completion`], the same way a
//! platform delegate would from its own thread.

use crate::error::{BridgeError, BridgeResult};
use crate::infrastructure::bluetooth::completion::Completion;
use crate::infrastructure::bluetooth::transport::{
    AdapterState, Advertisement, BondedInfo, CharacteristicProperties, ClassicAdapter,
    GattCentral, GattCharacteristic, GattPeripheral, GattService, SppSocket, TransportError,
    TransportResult, WriteKind,
};
use crate::infrastructure::platform::{
    Permission, PermissionModel, PermissionState, PlatformHost,
};
use crate::infrastructure::usb::{UsbDeviceInfo, UsbEnumerator, PRINTER_CLASS};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Radio shared by the simulated adapters and host, so an approved enable
/// prompt turns every simulated adapter on.
#[derive(Debug, Clone)]
pub struct MockRadio(Arc<Mutex<AdapterState>>);

impl Default for MockRadio {
    fn default() -> Self {
        Self::new(AdapterState::Enabled)
    }
}

impl MockRadio {
    pub fn new(state: AdapterState) -> Self {
        Self(Arc::new(Mutex::new(state)))
    }

    pub fn get(&self) -> AdapterState {
        *lock(&self.0)
    }

    pub fn set(&self, state: AdapterState) {
        *lock(&self.0) = state;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockService {
    pub uuid: String,
    pub characteristics: Vec<GattCharacteristic>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockPrinter {
    /// Empty for devices that advertise no name.
    pub name: String,
    pub address: String,
    pub services: Vec<MockService>,
}

fn characteristic(service: &str, uuid: &str, properties: CharacteristicProperties) -> GattCharacteristic {
    GattCharacteristic {
        service_uuid: service.to_string(),
        uuid: uuid.to_string(),
        properties,
    }
}

fn generic_access() -> MockService {
    MockService {
        uuid: "1800".to_string(),
        characteristics: vec![characteristic(
            "1800",
            "2a00",
            CharacteristicProperties {
                read: true,
                ..Default::default()
            },
        )],
    }
}

impl MockPrinter {
    pub fn classic(name: &str, address: &str) -> Self {
        Self {
            name: name.to_string(),
            address: address.to_string(),
            services: Vec::new(),
        }
    }

    /// BLE printer with the common 0x18F0 print service: a notify
    /// characteristic followed by a writable one.
    pub fn ble(name: &str, address: &str) -> Self {
        let print_service = MockService {
            uuid: "18f0".to_string(),
            characteristics: vec![
                characteristic(
                    "18f0",
                    "2af0",
                    CharacteristicProperties {
                        notify: true,
                        ..Default::default()
                    },
                ),
                characteristic(
                    "18f0",
                    "2af1",
                    CharacteristicProperties {
                        write: true,
                        write_without_response: true,
                        ..Default::default()
                    },
                ),
            ],
        };
        Self {
            name: name.to_string(),
            address: address.to_string(),
            services: vec![generic_access(), print_service],
        }
    }

    pub fn ble_read_only(name: &str, address: &str) -> Self {
        Self {
            name: name.to_string(),
            address: address.to_string(),
            services: vec![generic_access()],
        }
    }

    pub fn ble_unnamed(address: &str) -> Self {
        Self::ble("", address)
    }

    fn advertisement(&self) -> Advertisement {
        Advertisement {
            address: self.address.clone(),
            name: (!self.name.is_empty()).then(|| self.name.clone()),
            rssi: Some(-60),
        }
    }
}

type Inbox = Arc<Mutex<HashMap<String, Vec<u8>>>>;

fn deliver(inbox: &Inbox, address: &str, data: &[u8]) {
    lock(inbox)
        .entry(address.to_ascii_uppercase())
        .or_default()
        .extend_from_slice(data);
}

fn received(inbox: &Inbox, address: &str) -> Vec<u8> {
    lock(inbox)
        .get(&address.to_ascii_uppercase())
        .cloned()
        .unwrap_or_default()
}

/// Counts live links so tests can assert no two are open at once.
#[derive(Debug, Default)]
struct LinkCounter {
    live: AtomicUsize,
    max: AtomicUsize,
}

impl LinkCounter {
    fn opened(&self) {
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(live, Ordering::SeqCst);
    }

    fn closed(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

fn find_printer(printers: &[MockPrinter], address: &str) -> Option<MockPrinter> {
    printers
        .iter()
        .find(|p| p.address.eq_ignore_ascii_case(address))
        .cloned()
}

// ---------------------------------------------------------------------------
// Classic
// ---------------------------------------------------------------------------

pub struct MockClassicAdapter {
    radio: MockRadio,
    printers: Mutex<Vec<MockPrinter>>,
    inbox: Inbox,
    links: Arc<LinkCounter>,
    cancellations: AtomicUsize,
    fail_write_at: Mutex<Option<usize>>,
}

impl Default for MockClassicAdapter {
    fn default() -> Self {
        Self::with_radio(MockRadio::default())
    }
}

impl MockClassicAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_radio(radio: MockRadio) -> Self {
        Self {
            radio,
            printers: Mutex::new(Vec::new()),
            inbox: Arc::default(),
            links: Arc::default(),
            cancellations: AtomicUsize::new(0),
            fail_write_at: Mutex::new(None),
        }
    }

    pub fn with_sample_printers() -> Self {
        let adapter = Self::new();
        adapter.add_printer(MockPrinter::classic("Printer-X", "AA:BB:CC:DD:EE:FF"));
        adapter.add_printer(MockPrinter::classic("Printer-Y", "11:22:33:44:55:66"));
        adapter
    }

    pub fn add_printer(&self, printer: MockPrinter) {
        lock(&self.printers).push(printer);
    }

    pub fn printers(&self) -> Vec<MockPrinter> {
        lock(&self.printers).clone()
    }

    pub fn set_adapter_state(&self, state: AdapterState) {
        self.radio.set(state);
    }

    /// Make the socket write with this index fail.
    pub fn fail_write_at(&self, index: Option<usize>) {
        *lock(&self.fail_write_at) = index;
    }

    pub fn received(&self, address: &str) -> Vec<u8> {
        received(&self.inbox, address)
    }

    pub fn live_links(&self) -> usize {
        self.links.live.load(Ordering::SeqCst)
    }

    pub fn max_live_links(&self) -> usize {
        self.links.max.load(Ordering::SeqCst)
    }

    pub fn discovery_cancellations(&self) -> usize {
        self.cancellations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClassicAdapter for MockClassicAdapter {
    async fn adapter_state(&self) -> AdapterState {
        self.radio.get()
    }

    async fn bonded_devices(&self) -> TransportResult<Vec<BondedInfo>> {
        self.radio.get().check()?;
        Ok(lock(&self.printers)
            .iter()
            .map(|p| BondedInfo {
                name: p.name.clone(),
                address: p.address.clone(),
            })
            .collect())
    }

    async fn cancel_discovery(&self) {
        self.cancellations.fetch_add(1, Ordering::SeqCst);
    }

    async fn open(&self, address: &str, _service_uuid: &str) -> TransportResult<Box<dyn SppSocket>> {
        self.radio.get().check()?;
        let printer = find_printer(&lock(&self.printers), address)
            .ok_or_else(|| TransportError::DeviceNotFound(address.to_string()))?;

        self.links.opened();
        Ok(Box::new(MockSppSocket {
            address: printer.address,
            open: true,
            inbox: self.inbox.clone(),
            links: self.links.clone(),
            writes: 0,
            fail_write_at: *lock(&self.fail_write_at),
        }))
    }
}

struct MockSppSocket {
    address: String,
    open: bool,
    inbox: Inbox,
    links: Arc<LinkCounter>,
    writes: usize,
    fail_write_at: Option<usize>,
}

#[async_trait]
impl SppSocket for MockSppSocket {
    fn is_connected(&self) -> bool {
        self.open
    }

    async fn write_all(&mut self, data: &[u8]) -> TransportResult<()> {
        if !self.open {
            return Err(TransportError::LinkClosed);
        }
        if self.fail_write_at == Some(self.writes) {
            return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "socket closed by peer").into());
        }
        deliver(&self.inbox, &self.address, data);
        self.writes += 1;
        Ok(())
    }

    async fn flush(&mut self) -> TransportResult<()> {
        Ok(())
    }

    async fn close(&mut self) -> TransportResult<()> {
        if std::mem::replace(&mut self.open, false) {
            self.links.closed();
        }
        Ok(())
    }
}

impl Drop for MockSppSocket {
    fn drop(&mut self) {
        if self.open {
            self.links.closed();
        }
    }
}

// ---------------------------------------------------------------------------
// BLE
// ---------------------------------------------------------------------------

const ACK_LATENCY: Duration = Duration::from_millis(5);

pub struct MockCentral {
    radio: MockRadio,
    printers: Mutex<Vec<MockPrinter>>,
    scan_tx: Mutex<Option<mpsc::UnboundedSender<Advertisement>>>,
    scans: AtomicUsize,
    link_up: Arc<Completion<()>>,
    connect_attempt: Arc<AtomicUsize>,
    link_latency: Mutex<Duration>,
    stall_discovery: AtomicBool,
    fail_write_at: Mutex<Option<usize>>,
    peers: Mutex<Vec<(String, Arc<AtomicBool>)>>,
    inbox: Inbox,
    links: Arc<LinkCounter>,
}

impl Default for MockCentral {
    fn default() -> Self {
        Self::with_radio(MockRadio::default())
    }
}

impl MockCentral {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_radio(radio: MockRadio) -> Self {
        Self {
            radio,
            printers: Mutex::new(Vec::new()),
            scan_tx: Mutex::new(None),
            scans: AtomicUsize::new(0),
            link_up: Arc::new(Completion::new()),
            connect_attempt: Arc::default(),
            link_latency: Mutex::new(Duration::from_millis(200)),
            stall_discovery: AtomicBool::new(false),
            fail_write_at: Mutex::new(None),
            peers: Mutex::new(Vec::new()),
            inbox: Arc::default(),
            links: Arc::default(),
        }
    }

    pub fn with_sample_printers() -> Self {
        let central = Self::new();
        central.add_printer(MockPrinter::ble(
            "Printer-BLE",
            "5F3A2C1E-0B7D-4E8A-9C61-2D4F8B0A7E13",
        ));
        central.add_printer(MockPrinter::ble_unnamed("0C6E1F52-8D34-4B2A-A1F0-7E93C5D2B846"));
        central
    }

    pub fn add_printer(&self, printer: MockPrinter) {
        lock(&self.printers).push(printer);
    }

    pub fn remove_printer(&self, address: &str) {
        lock(&self.printers).retain(|p| !p.address.eq_ignore_ascii_case(address));
    }

    pub fn printers(&self) -> Vec<MockPrinter> {
        lock(&self.printers).clone()
    }

    pub fn set_adapter_state(&self, state: AdapterState) {
        self.radio.set(state);
    }

    pub fn set_link_latency(&self, latency: Duration) {
        *lock(&self.link_latency) = latency;
    }

    /// Characteristic discovery on links opened from now on never answers.
    pub fn stall_discovery(&self, stall: bool) {
        self.stall_discovery.store(stall, Ordering::SeqCst);
    }

    /// Make the acknowledged write with this index fail.
    pub fn fail_write_at(&self, index: Option<usize>) {
        *lock(&self.fail_write_at) = index;
    }

    /// The printer at `address` drops its link, as on power-off.
    pub fn drop_link(&self, address: &str) {
        let mut peers = lock(&self.peers);
        for (_, connected) in peers.iter().filter(|(a, _)| a.eq_ignore_ascii_case(address)) {
            if connected.swap(false, Ordering::SeqCst) {
                self.links.closed();
            }
        }
        peers.retain(|(a, _)| !a.eq_ignore_ascii_case(address));
    }

    pub fn received(&self, address: &str) -> Vec<u8> {
        received(&self.inbox, address)
    }

    pub fn live_links(&self) -> usize {
        self.links.live.load(Ordering::SeqCst)
    }

    pub fn scans_started(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    pub fn is_scanning(&self) -> bool {
        lock(&self.scan_tx).is_some()
    }
}

#[async_trait]
impl GattCentral for MockCentral {
    async fn adapter_state(&self) -> AdapterState {
        self.radio.get()
    }

    async fn start_scan(&self) -> TransportResult<mpsc::UnboundedReceiver<Advertisement>> {
        self.radio.get().check()?;
        self.scans.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        // Radios repeat advertisements; every printer shows up twice.
        for _ in 0..2 {
            for printer in lock(&self.printers).iter() {
                let _ = tx.send(printer.advertisement());
            }
        }
        *lock(&self.scan_tx) = Some(tx);
        Ok(rx)
    }

    async fn stop_scan(&self) {
        lock(&self.scan_tx).take();
    }

    async fn connect(&self, address: &str) -> TransportResult<Box<dyn GattPeripheral>> {
        self.radio.get().check()?;
        let printer = find_printer(&lock(&self.printers), address)
            .ok_or_else(|| TransportError::DeviceNotFound(address.to_string()))?;

        let link_up = self
            .link_up
            .arm()
            .ok_or_else(|| TransportError::Platform("connect already pending".to_string()))?;

        let attempt = self.connect_attempt.fetch_add(1, Ordering::SeqCst) + 1;
        let current = self.connect_attempt.clone();
        let completion = self.link_up.clone();
        let latency = *lock(&self.link_latency);
        let late_address = printer.address.clone();
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            // A superseded attempt must not complete the next one.
            if current.load(Ordering::SeqCst) != attempt || !completion.fulfill(()) {
                debug!("Late link-up for {} ignored", late_address);
            }
        });

        link_up.await.map_err(|_| TransportError::LinkClosed)?;

        self.links.opened();
        let connected = Arc::new(AtomicBool::new(true));
        lock(&self.peers).push((printer.address.clone(), connected.clone()));
        Ok(Box::new(MockPeripheral {
            address: printer.address,
            services: printer.services,
            connected,
            ack: Arc::new(Completion::new()),
            stall_discovery: self.stall_discovery.load(Ordering::SeqCst),
            fail_write_at: *lock(&self.fail_write_at),
            writes: AtomicUsize::new(0),
            inbox: self.inbox.clone(),
            links: self.links.clone(),
        }))
    }
}

struct MockPeripheral {
    address: String,
    services: Vec<MockService>,
    connected: Arc<AtomicBool>,
    ack: Arc<Completion<TransportResult<()>>>,
    stall_discovery: bool,
    fail_write_at: Option<usize>,
    writes: AtomicUsize,
    inbox: Inbox,
    links: Arc<LinkCounter>,
}

#[async_trait]
impl GattPeripheral for MockPeripheral {
    fn address(&self) -> &str {
        &self.address
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn discover_services(&self) -> TransportResult<Vec<GattService>> {
        Ok(self
            .services
            .iter()
            .map(|s| GattService {
                uuid: s.uuid.clone(),
            })
            .collect())
    }

    async fn discover_characteristics(
        &self,
        service: &GattService,
    ) -> TransportResult<Vec<GattCharacteristic>> {
        if self.stall_discovery {
            std::future::pending::<()>().await;
        }
        self.services
            .iter()
            .find(|s| s.uuid == service.uuid)
            .map(|s| s.characteristics.clone())
            .ok_or_else(|| TransportError::Gatt(format!("unknown service {}", service.uuid)))
    }

    async fn write(
        &self,
        characteristic: &GattCharacteristic,
        data: &[u8],
        kind: WriteKind,
    ) -> TransportResult<()> {
        if !self.is_connected() {
            return Err(TransportError::LinkClosed);
        }

        match kind {
            WriteKind::WithoutResponse => {
                deliver(&self.inbox, &self.address, data);
                Ok(())
            }
            WriteKind::WithResponse => {
                if !characteristic.properties.write {
                    return Err(TransportError::Gatt(format!(
                        "characteristic {} is not writable",
                        characteristic.uuid
                    )));
                }

                let index = self.writes.fetch_add(1, Ordering::SeqCst);
                let ack = self
                    .ack
                    .arm()
                    .ok_or_else(|| TransportError::Gatt("write already in flight".to_string()))?;

                let completion = self.ack.clone();
                let inbox = self.inbox.clone();
                let address = self.address.clone();
                let chunk = data.to_vec();
                let latency = ACK_LATENCY;
                let fail = self.fail_write_at == Some(index);
                tokio::spawn(async move {
                    tokio::time::sleep(latency).await;
                    let result = if fail {
                        Err(TransportError::Gatt(format!("write {} rejected", index)))
                    } else {
                        deliver(&inbox, &address, &chunk);
                        Ok(())
                    };
                    if !completion.fulfill(result) {
                        debug!("Write acknowledgment {} for {} ignored", index, address);
                    }
                });

                ack.await.map_err(|_| TransportError::LinkClosed)?
            }
        }
    }

    async fn disconnect(&self) -> TransportResult<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.ack.cancel();
            self.links.closed();
        }
        Ok(())
    }
}

impl Drop for MockPeripheral {
    fn drop(&mut self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.links.closed();
        }
    }
}

// ---------------------------------------------------------------------------
// USB
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MockUsbBus {
    devices: Mutex<Vec<UsbDeviceInfo>>,
}

impl MockUsbBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sample_devices() -> Self {
        let bus = Self::new();
        bus.attach(UsbDeviceInfo {
            bus_number: 1,
            device_address: 4,
            vendor_id: 0x04b8,
            product_id: 0x0202,
            class: 0,
            interface_classes: vec![PRINTER_CLASS],
            product: Some("TM-T20II".to_string()),
            manufacturer: Some("EPSON".to_string()),
        });
        bus.attach(UsbDeviceInfo {
            bus_number: 1,
            device_address: 7,
            vendor_id: 0x046d,
            product_id: 0xc52b,
            class: 0,
            interface_classes: vec![0x03, 0x03],
            product: Some("USB Receiver".to_string()),
            manufacturer: Some("Logitech".to_string()),
        });
        bus
    }

    pub fn attach(&self, device: UsbDeviceInfo) {
        lock(&self.devices).push(device);
    }
}

impl UsbEnumerator for MockUsbBus {
    fn enumerate(&self) -> TransportResult<Vec<UsbDeviceInfo>> {
        Ok(lock(&self.devices).clone())
    }
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

/// Host with a scripted user: prompts are answered after `prompt_latency`
/// with the configured decision.
pub struct MockHost {
    model: PermissionModel,
    radio: Option<MockRadio>,
    permissions: Arc<Mutex<PermissionState>>,
    foreground: AtomicBool,
    grant_on_prompt: AtomicBool,
    enable_on_prompt: AtomicBool,
    prompt_latency: Duration,
    permission_prompt: Arc<Completion<bool>>,
    enable_prompt: Arc<Completion<bool>>,
    prompts: AtomicUsize,
}

impl MockHost {
    pub fn new(model: PermissionModel) -> Self {
        Self {
            model,
            radio: None,
            permissions: Arc::new(Mutex::new(PermissionState::all())),
            foreground: AtomicBool::new(true),
            grant_on_prompt: AtomicBool::new(true),
            enable_on_prompt: AtomicBool::new(true),
            prompt_latency: Duration::from_millis(300),
            permission_prompt: Arc::new(Completion::new()),
            enable_prompt: Arc::new(Completion::new()),
            prompts: AtomicUsize::new(0),
        }
    }

    pub fn with_radio(mut self, radio: MockRadio) -> Self {
        self.radio = Some(radio);
        self
    }

    pub fn set_permissions(&self, state: PermissionState) {
        *lock(&self.permissions) = state;
    }

    pub fn set_foreground(&self, foreground: bool) {
        self.foreground.store(foreground, Ordering::SeqCst);
    }

    pub fn answer_prompts(&self, grant: bool) {
        self.grant_on_prompt.store(grant, Ordering::SeqCst);
        self.enable_on_prompt.store(grant, Ordering::SeqCst);
    }

    pub fn prompts_shown(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformHost for MockHost {
    fn platform_version(&self) -> String {
        "Simulated 1.0".to_string()
    }

    fn permission_model(&self) -> PermissionModel {
        self.model
    }

    async fn permission_state(&self) -> PermissionState {
        *lock(&self.permissions)
    }

    fn has_foreground(&self) -> bool {
        self.foreground.load(Ordering::SeqCst)
    }

    async fn request_permissions(&self, permissions: &[Permission]) -> BridgeResult<bool> {
        if !self.has_foreground() {
            return Err(BridgeError::ActivityNotAvailable);
        }
        let answer = self
            .permission_prompt
            .arm()
            .ok_or(BridgeError::ActivityNotAvailable)?;
        self.prompts.fetch_add(1, Ordering::SeqCst);

        let completion = self.permission_prompt.clone();
        let state = self.permissions.clone();
        let requested = permissions.to_vec();
        let grant = self.grant_on_prompt.load(Ordering::SeqCst);
        let latency = self.prompt_latency;
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            if grant {
                let mut state = lock(&state);
                for permission in requested {
                    match permission {
                        Permission::Connect => state.connect = true,
                        Permission::Scan => state.scan = true,
                        Permission::FineLocation => state.location = true,
                    }
                }
            }
            completion.fulfill(grant);
        });

        answer.await.map_err(|_| BridgeError::ActivityNotAvailable)
    }

    async fn request_enable_adapter(&self) -> BridgeResult<bool> {
        if !self.has_foreground() {
            return Err(BridgeError::ActivityNotAvailable);
        }
        let answer = self
            .enable_prompt
            .arm()
            .ok_or(BridgeError::ActivityNotAvailable)?;
        self.prompts.fetch_add(1, Ordering::SeqCst);

        let completion = self.enable_prompt.clone();
        let radio = self.radio.clone();
        let approve = self.enable_on_prompt.load(Ordering::SeqCst);
        let latency = self.prompt_latency;
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            if approve {
                if let Some(radio) = radio {
                    radio.set(AdapterState::Enabled);
                }
            }
            completion.fulfill(approve);
        });

        answer.await.map_err(|_| BridgeError::ActivityNotAvailable)
    }
}
