//! Command Dispatcher
//!
//! Maps external method names onto [`PrinterService`] operations and
//! translates outcomes into the response envelope.

use crate::domain::models::{Device, DeviceRecord, TransportKind};
use crate::error::{BridgeError, BridgeResult};
use crate::infrastructure::bluetooth::PrinterService;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub arguments: Value,
}

impl Request {
    pub fn new(method: impl Into<String>, arguments: Value) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Response {
    Success { result: Value },
    Error { code: String, message: String },
    NotImplemented,
}

impl Response {
    pub fn error(err: &BridgeError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    PlatformVersion,
    CheckPermissions,
    IsBluetoothEnabled,
    EnableBluetooth,
    GetPrinters,
    PairedBluetooths,
    UsbPrinters,
    Connect,
    WriteBytes,
    PrintString,
    Disconnect,
    IsConnected,
}

impl Method {
    fn parse(name: &str) -> Option<Self> {
        let method = match name {
            "getPlatformVersion" | "platformVersion" => Self::PlatformVersion,
            "checkBluetoothPermissions" => Self::CheckPermissions,
            "isBluetoothEnabled" => Self::IsBluetoothEnabled,
            "enableBluetooth" => Self::EnableBluetooth,
            "getPrinters" | "listPairedOrDiscovered" => Self::GetPrinters,
            "pairedbluetooths" => Self::PairedBluetooths,
            "usbprinters" => Self::UsbPrinters,
            "connect" => Self::Connect,
            "writebytes" | "writeBytes" => Self::WriteBytes,
            "printstring" | "printString" => Self::PrintString,
            "disconnect" => Self::Disconnect,
            "isConnected" => Self::IsConnected,
            _ => return None,
        };
        Some(method)
    }
}

/// Which listing a `printerType` argument asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PrinterQuery {
    /// Bonded Classic printers, or a BLE scan without a Classic adapter.
    Bluetooth,
    Transport(TransportKind),
}

fn string_argument<'a>(arguments: &'a Value, key: &str) -> Option<&'a str> {
    match arguments {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map.get(key).and_then(Value::as_str),
        _ => None,
    }
}

/// `connect` takes an address, or a `name#address` identity.
fn address_argument(arguments: &Value) -> BridgeResult<String> {
    let raw = string_argument(arguments, "address")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| BridgeError::InvalidArgument("Device address is required".to_string()))?;

    let address = Device::parse_identity(raw).map(|(_, address)| address).unwrap_or(raw);
    Ok(address.to_string())
}

/// `None` for a printer type no transport answers to.
fn printer_query(arguments: &Value) -> Option<PrinterQuery> {
    let Some(kind) = string_argument(arguments, "printerType") else {
        return Some(PrinterQuery::Bluetooth);
    };
    match kind.trim().to_ascii_lowercase().as_str() {
        "bluetooth" | "bluethoot" => Some(PrinterQuery::Bluetooth),
        other => TransportKind::parse(other).map(PrinterQuery::Transport),
    }
}

fn text_argument(arguments: &Value) -> BridgeResult<&str> {
    string_argument(arguments, "string")
        .or_else(|| string_argument(arguments, "text"))
        .ok_or_else(|| BridgeError::InvalidArgument("Expected a string to print".to_string()))
}

/// Integers from a bare array or `{"bytes": [...]}`.
fn byte_values(arguments: &Value) -> BridgeResult<Vec<i64>> {
    let list = match arguments {
        Value::Array(list) => list,
        Value::Object(map) => match map.get("bytes") {
            Some(Value::Array(list)) => list,
            _ => {
                return Err(BridgeError::InvalidArgument(
                    "Expected a list of bytes".to_string(),
                ))
            }
        },
        _ => {
            return Err(BridgeError::InvalidArgument(
                "Expected a list of bytes".to_string(),
            ))
        }
    };

    list.iter()
        .enumerate()
        .map(|(index, value)| {
            value.as_i64().ok_or_else(|| {
                BridgeError::InvalidArgument(format!(
                    "Byte value {} at index {} is not an integer",
                    value, index
                ))
            })
        })
        .collect()
}

fn records(devices: &[Device]) -> BridgeResult<Value> {
    let records: Vec<DeviceRecord> = devices.iter().map(Device::to_record).collect();
    serde_json::to_value(records).map_err(|e| BridgeError::InvalidArgument(e.to_string()))
}

#[derive(Clone)]
pub struct Dispatcher {
    service: Arc<PrinterService>,
}

impl Dispatcher {
    pub fn new(service: Arc<PrinterService>) -> Self {
        Self { service }
    }

    #[instrument(skip(self, request), fields(method = %request.method))]
    pub async fn dispatch(&self, request: Request) -> Response {
        let Some(method) = Method::parse(&request.method) else {
            warn!("Method {} not implemented", request.method);
            return Response::NotImplemented;
        };

        debug!("Dispatching {:?}", method);
        match self.call(method, &request.arguments).await {
            Ok(result) => Response::Success { result },
            Err(e) => {
                info!("{} failed: {} ({})", request.method, e, e.code());
                Response::error(&e)
            }
        }
    }

    async fn call(&self, method: Method, arguments: &Value) -> BridgeResult<Value> {
        let service = &self.service;
        match method {
            Method::PlatformVersion => Ok(json!(service.platform_version())),
            Method::CheckPermissions => Ok(json!(service.check_permissions().await?)),
            Method::IsBluetoothEnabled => Ok(json!(service.is_bluetooth_enabled().await)),
            Method::EnableBluetooth => Ok(json!(service.enable_bluetooth().await?)),
            Method::GetPrinters => {
                let devices = match printer_query(arguments) {
                    Some(PrinterQuery::Bluetooth) => service.list_bluetooth().await?,
                    Some(PrinterQuery::Transport(kind)) => service.list_devices(kind).await?,
                    None => {
                        warn!("Unknown printer type in {}, listing nothing", arguments);
                        Vec::new()
                    }
                };
                records(&devices)
            }
            Method::PairedBluetooths => records(&service.list_bluetooth().await?),
            Method::UsbPrinters => records(&service.list_devices(TransportKind::Usb).await?),
            Method::Connect => {
                let address = address_argument(arguments)?;
                Ok(json!(service.connect(&address).await?))
            }
            Method::WriteBytes => {
                let values = byte_values(arguments)?;
                let report = service.write_bytes(&values).await?;
                debug!(
                    "Wrote {} bytes in {} chunks ({:?})",
                    report.bytes, report.chunks, report.delivery
                );
                Ok(json!(true))
            }
            Method::PrintString => {
                let report = service.write_text(text_argument(arguments)?).await?;
                debug!("Printed {} bytes of text", report.bytes);
                Ok(json!(true))
            }
            Method::Disconnect => Ok(json!(service.disconnect().await)),
            Method::IsConnected => {
                let address = string_argument(arguments, "address");
                Ok(json!(service.is_connected(address).await))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::settings::Settings;
    use crate::infrastructure::bluetooth::service::Backends;
    use tokio::sync::mpsc;

    fn dispatcher() -> Dispatcher {
        let settings = Settings {
            default_transport: TransportKind::Classic,
            ..Settings::default()
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        Dispatcher::new(Arc::new(PrinterService::new(
            Backends::simulated(),
            &settings,
            tx,
        )))
    }

    async fn call(dispatcher: &Dispatcher, method: &str, arguments: Value) -> Value {
        let response = dispatcher.dispatch(Request::new(method, arguments)).await;
        serde_json::to_value(response).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_printer_scenario_over_the_wire() {
        let d = dispatcher();

        let printers = call(&d, "pairedbluetooths", Value::Null).await;
        assert_eq!(printers["status"], "success");
        let ids: Vec<&str> = printers["result"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["id"].as_str().unwrap())
            .collect();
        assert_eq!(
            ids,
            vec!["Printer-X#AA:BB:CC:DD:EE:FF", "Printer-Y#11:22:33:44:55:66"]
        );
        assert_eq!(printers["result"][0]["macAddress"], "AA:BB:CC:DD:EE:FF");
        assert_eq!(printers["result"][0]["type"], "bluetooth");

        assert_eq!(
            call(&d, "connect", json!("AA:BB:CC:DD:EE:FF")).await,
            json!({"status": "success", "result": true})
        );
        assert_eq!(call(&d, "isConnected", json!("AA:BB:CC:DD:EE:FF")).await["result"], true);
        assert_eq!(call(&d, "writeBytes", json!([27, 64])).await["result"], true);
        assert_eq!(call(&d, "disconnect", Value::Null).await["result"], true);
        assert_eq!(call(&d, "isConnected", Value::Null).await["result"], false);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_address_is_connection_error() {
        let d = dispatcher();
        let response = call(&d, "connect", json!({"address": "00:00:00:00:00:00"})).await;
        assert_eq!(response["status"], "error");
        assert_eq!(response["code"], "CONNECTION_ERROR");
    }

    #[tokio::test]
    async fn test_argument_validation() {
        let d = dispatcher();
        assert_eq!(call(&d, "connect", Value::Null).await["code"], "INVALID_ARGUMENT");
        assert_eq!(call(&d, "writebytes", json!([27, 256])).await["code"], "INVALID_ARGUMENT");
        assert_eq!(call(&d, "writebytes", json!([27, 1.5])).await["code"], "INVALID_ARGUMENT");
        assert_eq!(call(&d, "writebytes", json!("1b40")).await["code"], "INVALID_ARGUMENT");
        assert_eq!(call(&d, "printstring", json!([72, 105])).await["code"], "INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn test_unknown_printer_type_lists_nothing() {
        let d = dispatcher();
        assert_eq!(
            call(&d, "getPrinters", json!({"printerType": "serial"})).await,
            json!({"status": "success", "result": []})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_printstring_sends_text() {
        let d = dispatcher();
        assert_eq!(call(&d, "printstring", json!("Hello")).await["code"], "NOT_CONNECTED");

        call(&d, "connect", json!("AA:BB:CC:DD:EE:FF")).await;
        assert_eq!(
            call(&d, "printstring", json!("Hello\n")).await,
            json!({"status": "success", "result": true})
        );
        assert_eq!(
            call(&d, "printString", json!({"string": "Total: 4,20"})).await["result"],
            true
        );
    }

    #[tokio::test]
    async fn test_write_before_connect() {
        let d = dispatcher();
        let response = call(&d, "writebytes", json!({"bytes": [27, 64]})).await;
        assert_eq!(response["code"], "NOT_CONNECTED");
    }

    #[tokio::test]
    async fn test_unknown_method_is_not_implemented() {
        let d = dispatcher();
        assert_eq!(
            call(&d, "printImage", Value::Null).await,
            json!({"status": "notImplemented"})
        );
    }

    #[tokio::test]
    async fn test_usb_printers() {
        let d = dispatcher();
        let response = call(&d, "getPrinters", json!({"printerType": "usb"})).await;
        let printers = response["result"].as_array().unwrap();
        assert_eq!(printers.len(), 1);
        assert_eq!(printers[0]["usbAddress"], "001:004");
        assert_eq!(printers[0]["type"], "usb");
        assert_eq!(printers[0]["isConnected"], true);
        assert_eq!(call(&d, "usbprinters", Value::Null).await["result"], response["result"]);
    }

    #[test]
    fn test_connect_accepts_identity() {
        assert_eq!(
            address_argument(&json!("Printer-X#AA:BB:CC:DD:EE:FF")).unwrap(),
            "AA:BB:CC:DD:EE:FF"
        );
    }

    #[test]
    fn test_request_envelope_defaults_arguments() {
        let request: Request = serde_json::from_str(r#"{"method":"disconnect"}"#).unwrap();
        assert_eq!(request.arguments, Value::Null);
    }
}
