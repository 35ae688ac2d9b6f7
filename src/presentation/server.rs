//! Bridge server
//!
//! JSON-lines over an `interprocess` local socket: one [`Request`] per line
//! in, one [`Response`] per line out. Each client gets its own thread; the
//! printer service serializes the work.

use crate::presentation::dispatcher::{Dispatcher, Request, Response};
use anyhow::{Context, Result};
use interprocess::local_socket::{
    traits::ListenerExt, GenericFilePath, GenericNamespaced, ListenerOptions, Name, NameType,
    Stream as LocalStream, ToFsName, ToNsName,
};
use interprocess::TryClone;
use std::io::{BufRead, BufReader, Write};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Resolve the configured socket name: an abstract/namespaced name where the
/// platform has one, a file under the temp dir otherwise.
pub fn socket_name(name: &str) -> std::io::Result<Name<'static>> {
    if GenericNamespaced::is_supported() {
        name.to_string().to_ns_name::<GenericNamespaced>()
    } else {
        std::env::temp_dir().join(name).to_fs_name::<GenericFilePath>()
    }
}

pub struct BridgeServer {
    dispatcher: Dispatcher,
    socket: String,
}

impl BridgeServer {
    pub fn new(dispatcher: Dispatcher, socket: impl Into<String>) -> Self {
        Self {
            dispatcher,
            socket: socket.into(),
        }
    }

    /// Run the accept loop on a detached thread. The receiver yields the
    /// loop's outcome; shutting the runtime down never waits for it.
    pub fn spawn(self, runtime: Handle) -> oneshot::Receiver<Result<()>> {
        let (done_tx, done_rx) = oneshot::channel();
        std::thread::spawn(move || {
            let _ = done_tx.send(self.run(runtime));
        });
        done_rx
    }

    /// Accept clients until the listener fails. Blocking; pass the runtime
    /// the dispatcher lives on.
    pub fn run(&self, runtime: Handle) -> Result<()> {
        let name = socket_name(&self.socket)
            .with_context(|| format!("Invalid socket name {}", self.socket))?;
        let listener = ListenerOptions::new()
            .name(name)
            .create_sync()
            .with_context(|| format!("Failed to listen on {}", self.socket))?;

        info!("Bridge listening on {}", self.socket);

        for conn in listener.incoming().filter_map(|c| c.ok()) {
            info!("Client connected");
            let dispatcher = self.dispatcher.clone();
            let runtime = runtime.clone();
            std::thread::spawn(move || {
                if let Err(e) = handle_connection(conn, &dispatcher, &runtime) {
                    error!("Connection error: {}", e);
                }
                info!("Client disconnected");
            });
        }

        Ok(())
    }
}

fn handle_connection(stream: LocalStream, dispatcher: &Dispatcher, runtime: &Handle) -> Result<()> {
    let reader = BufReader::new(stream.try_clone()?);
    serve_lines(reader, stream, dispatcher, runtime)
}

/// Answer every request line on `reader` through `writer` until EOF.
fn serve_lines<R: BufRead, W: Write>(
    mut reader: R,
    mut writer: W,
    dispatcher: &Dispatcher,
    runtime: &Handle,
) -> Result<()> {
    let mut buffer = String::new();

    loop {
        buffer.clear();
        if reader.read_line(&mut buffer)? == 0 {
            break;
        }
        let line = buffer.trim();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(line) {
            Ok(request) => {
                debug!("Received request: {}", request.method);
                runtime.block_on(dispatcher.dispatch(request))
            }
            Err(e) => {
                warn!("Malformed request: {}", e);
                Response::Error {
                    code: "INVALID_ARGUMENT".to_string(),
                    message: format!("Malformed request: {}", e),
                }
            }
        };

        let json = serde_json::to_string(&response)? + "\n";
        writer.write_all(json.as_bytes())?;
        writer.flush()?;
    }

    Ok(())
}
