use anyhow::{Context, Result};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use thermal_printer_bridge::domain::models::{MessageSeverity, PrinterEvent};
use thermal_printer_bridge::domain::settings::{BackendKind, Settings, SettingsService};
use thermal_printer_bridge::infrastructure::bluetooth::{Backends, PrinterService};
use thermal_printer_bridge::infrastructure::logging::init_logger;
use thermal_printer_bridge::presentation::{BridgeClient, BridgeServer, Dispatcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const USAGE: &str = "\
Usage:
  thermal-printer-bridge [--settings <path>] [--simulated] [serve]
  thermal-printer-bridge [--settings <path>] call <method> [json-arguments]";

enum Command {
    Serve,
    Call { method: String, arguments: Value },
}

struct Options {
    settings_path: Option<PathBuf>,
    simulated: bool,
    command: Command,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Options> {
    let mut settings_path = None;
    let mut simulated = false;
    let mut positional = Vec::new();

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--settings" => {
                let path = args.next().context("--settings needs a path")?;
                settings_path = Some(PathBuf::from(path));
            }
            "--simulated" => simulated = true,
            "-h" | "--help" => anyhow::bail!("{}", USAGE),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        None | Some("serve") => Command::Serve,
        Some("call") => {
            let method = positional.next().context(USAGE)?;
            // Bare words are sent as strings: `call connect AA:BB:CC:DD:EE:FF`.
            let arguments = match positional.next() {
                Some(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
                None => Value::Null,
            };
            Command::Call { method, arguments }
        }
        Some(other) => anyhow::bail!("Unknown command {}\n{}", other, USAGE),
    };

    Ok(Options {
        settings_path,
        simulated,
        command,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let options = parse_args(std::env::args().skip(1))?;

    let mut settings_service = match options.settings_path {
        Some(path) => SettingsService::with_path(path),
        None => SettingsService::new()?,
    };
    if options.simulated {
        settings_service.get_mut().backend = BackendKind::Simulated;
    }
    let settings = settings_service.get().clone();

    let _logging_guard = init_logger(&settings.log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    match options.command {
        Command::Serve => serve(settings).await,
        Command::Call { method, arguments } => {
            let socket = settings.socket_name.clone();
            let response = tokio::task::spawn_blocking(move || {
                let mut client = BridgeClient::new(socket);
                client.call(&method, arguments)
            })
            .await??;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
    }
}

async fn serve(settings: Settings) -> Result<()> {
    info!("Starting Thermal Printer Bridge ({:?} backend)", settings.backend);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                PrinterEvent::ConnectionStatus(state) => info!("Connection state: {:?}", state),
                PrinterEvent::DeviceFound(device) => debug!("Found {}", device.identity()),
                PrinterEvent::LogMessage(message) => match message.severity {
                    MessageSeverity::Error => error!("{}", message.message),
                    MessageSeverity::Warning => warn!("{}", message.message),
                    _ => info!("{}", message.message),
                },
            }
        }
    });

    let service = Arc::new(PrinterService::new(
        Backends::for_settings(&settings),
        &settings,
        event_tx,
    ));
    let server = BridgeServer::new(Dispatcher::new(service.clone()), settings.socket_name.clone());
    let listener = server.spawn(tokio::runtime::Handle::current());

    tokio::select! {
        result = listener => result.context("Bridge server thread stopped")??,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    service.disconnect().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_command_is_serve() {
        let options = parse_args(args(&["--simulated"])).unwrap();
        assert!(options.simulated);
        assert!(matches!(options.command, Command::Serve));
    }

    #[test]
    fn test_call_arguments() {
        let options = parse_args(args(&["call", "writebytes", "[27,64]"])).unwrap();
        match options.command {
            Command::Call { method, arguments } => {
                assert_eq!(method, "writebytes");
                assert_eq!(arguments, serde_json::json!([27, 64]));
            }
            Command::Serve => panic!("expected call"),
        }

        let options = parse_args(args(&["call", "connect", "AA:BB:CC:DD:EE:FF"])).unwrap();
        assert!(matches!(
            options.command,
            Command::Call { arguments: Value::String(ref a), .. } if a == "AA:BB:CC:DD:EE:FF"
        ));
    }

    #[test]
    fn test_rejects_unknown_command() {
        assert!(parse_args(args(&["print"])).is_err());
        assert!(parse_args(args(&["call"])).is_err());
    }
}
