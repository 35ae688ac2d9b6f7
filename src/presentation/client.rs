use crate::presentation::dispatcher::{Request, Response};
use crate::presentation::server::socket_name;
use anyhow::{Context, Result};
use interprocess::local_socket::{traits::Stream, Stream as LocalStream};
use serde_json::Value;
use std::io::{BufRead, BufReader, Write};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Client side of the bridge socket, used by the `call` subcommand.
pub struct BridgeClient {
    socket: String,
    stream: Option<BufReader<LocalStream>>,
}

impl BridgeClient {
    pub fn new(socket: impl Into<String>) -> Self {
        Self {
            socket: socket.into(),
            stream: None,
        }
    }

    /// Try to connect to a running server. Returns Ok(false) when none is
    /// listening.
    pub fn try_connect(&mut self) -> Result<bool> {
        if self.stream.is_some() {
            return Ok(true);
        }

        let name = socket_name(&self.socket)?;
        match LocalStream::connect(name) {
            Ok(stream) => {
                info!("Connected to bridge on {}", self.socket);
                self.stream = Some(BufReader::new(stream));
                Ok(true)
            }
            Err(e) => {
                debug!("Bridge not reachable: {}", e);
                Ok(false)
            }
        }
    }

    /// Poll until the server accepts or `timeout_ms` elapses.
    pub fn wait_for_server(&mut self, timeout_ms: u64) -> Result<bool> {
        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(timeout_ms) {
            if self.try_connect()? {
                return Ok(true);
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        Ok(false)
    }

    pub fn send(&mut self, request: &Request) -> Result<Response> {
        if !self.try_connect()? {
            anyhow::bail!("No bridge listening on {}", self.socket);
        }
        let stream = self
            .stream
            .as_mut()
            .context("Bridge connection dropped")?;

        let line = serde_json::to_string(request)? + "\n";
        stream.get_mut().write_all(line.as_bytes())?;
        stream.get_mut().flush()?;

        let mut buffer = String::new();
        if stream.read_line(&mut buffer)? == 0 {
            self.stream = None;
            anyhow::bail!("Bridge closed the connection");
        }

        serde_json::from_str(&buffer).context("Malformed response from bridge")
    }

    pub fn call(&mut self, method: &str, arguments: Value) -> Result<Response> {
        self.send(&Request::new(method, arguments))
    }
}
