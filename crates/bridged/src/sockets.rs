//! Node sockets
//!
//! Each registered node is exposed as a Unix listening socket named after
//! the node, e.g. `tin48.sock`. A connection opens its own session on the
//! device behind the node; bytes from the socket go out the bulk-out
//! endpoint and bulk-in packets flow back. Transfers block, so each
//! direction runs them on the blocking pool and the socket side stays
//! async.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixListener as StdUnixListener;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use driver::{
    DriverError, MAX_PACKET_SIZE, MinorNumber, NodeOps, NodeRegistrar, NodeTable, RegistrarError,
    Session, TransportError,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::task;
use tracing::{debug, error, info, trace, warn};

struct ListenerEntry {
    path: PathBuf,
    task: task::JoinHandle<()>,
}

/// Node registrar that backs every node with a Unix socket
///
/// Wraps a [`NodeTable`] for minor allocation and open routing; on top of
/// that, each successful registration binds a listener in the socket
/// directory and each deregistration tears it down again.
pub struct SocketRegistrar {
    table: Arc<NodeTable>,
    socket_dir: PathBuf,
    runtime: tokio::runtime::Handle,
    listeners: Mutex<HashMap<u32, ListenerEntry>>,
}

impl SocketRegistrar {
    /// Create the registrar and its socket directory
    ///
    /// Captures the current tokio runtime for the accept tasks, so this
    /// must be called from within one.
    pub fn new(table: Arc<NodeTable>, socket_dir: PathBuf) -> Result<Arc<Self>> {
        fs::create_dir_all(&socket_dir).with_context(|| {
            format!("Failed to create socket directory: {}", socket_dir.display())
        })?;

        let runtime = tokio::runtime::Handle::try_current()
            .context("Socket registrar needs a running tokio runtime")?;

        Ok(Arc::new(Self {
            table,
            socket_dir,
            runtime,
            listeners: Mutex::new(HashMap::new()),
        }))
    }

    /// Directory the node sockets live in
    pub fn socket_dir(&self) -> &Path {
        &self.socket_dir
    }

    fn bind(&self, path: &Path) -> std::io::Result<UnixListener> {
        // A previous run may have left its socket file behind.
        match fs::remove_file(path) {
            Ok(()) => debug!("removed stale socket {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let listener = StdUnixListener::bind(path)?;
        listener.set_nonblocking(true)?;

        // Registration with the reactor needs the runtime context; the
        // caller may be on the USB watch thread.
        let _enter = self.runtime.enter();
        UnixListener::from_std(listener)
    }
}

impl NodeRegistrar for SocketRegistrar {
    fn register(&self, ops: Arc<dyn NodeOps>) -> std::result::Result<MinorNumber, RegistrarError> {
        let minor = self.table.register(ops)?;
        let name = self.table.node_name(minor);
        let path = self.socket_dir.join(format!("{}.sock", name));

        let listener = match self.bind(&path) {
            Ok(listener) => listener,
            Err(e) => {
                self.table.deregister(minor);
                return Err(RegistrarError::Io(e));
            }
        };

        let task = self
            .runtime
            .spawn(accept_loop(self.table.clone(), minor, listener, name.clone()));
        self.listeners
            .lock()
            .unwrap()
            .insert(minor.0, ListenerEntry { path: path.clone(), task });

        info!("node {} listening on {}", name, path.display());
        Ok(minor)
    }

    fn deregister(&self, minor: MinorNumber) {
        let entry = self.listeners.lock().unwrap().remove(&minor.0);
        match entry {
            Some(entry) => {
                entry.task.abort();
                match fs::remove_file(&entry.path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => warn!("could not remove {}: {}", entry.path.display(), e),
                }
                info!("node socket {} removed", entry.path.display());
            }
            None => warn!("deregister of minor {} with no listener", minor.0),
        }
        self.table.deregister(minor);
    }
}

async fn accept_loop(table: Arc<NodeTable>, minor: MinorNumber, listener: UnixListener, name: String) {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                // Each connection gets its own session; the open fails once
                // the device behind the node is detached.
                let session = match table.open(minor) {
                    Ok(session) => session,
                    Err(err) => {
                        warn!("refusing connection on {}: {}", name, err);
                        continue;
                    }
                };
                info!("client attached to {}", name);
                tokio::spawn(serve_client(stream, session, name.clone()));
            }
            Err(e) => {
                warn!("accept failed on {}: {}", name, e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn serve_client(stream: UnixStream, session: Session, name: String) {
    let session = Arc::new(session);
    let (read_half, write_half) = stream.into_split();

    let reader = tokio::spawn(pump_device_to_socket(session.clone(), write_half, name.clone()));

    pump_socket_to_device(session.clone(), read_half, &name).await;

    // The device side may sit in a transfer until the bulk timeout expires;
    // cancel the task and let any in-flight read finish on the blocking
    // pool, dropping the last session reference with it.
    reader.abort();
    info!("client detached from {}", name);
}

async fn pump_socket_to_device(session: Arc<Session>, mut reader: OwnedReadHalf, name: &str) {
    let mut buf = vec![0u8; MAX_PACKET_SIZE];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                debug!("client on {} closed the connection", name);
                break;
            }
            Ok(n) => n,
            Err(e) => {
                warn!("socket read failed on {}: {}", name, e);
                break;
            }
        };

        let chunk = buf[..n].to_vec();
        let sess = session.clone();
        match task::spawn_blocking(move || sess.write(&chunk)).await {
            Ok(Ok(sent)) => trace!("{} accepted {} byte(s)", name, sent),
            Ok(Err(DriverError::Transport(TransportError::NoDevice))) => {
                info!("device behind {} is gone", name);
                break;
            }
            Ok(Err(e)) => {
                warn!("write to {} failed: {}", name, e);
                break;
            }
            Err(e) => {
                error!("write task for {} failed: {}", name, e);
                break;
            }
        }
    }
}

async fn pump_device_to_socket(session: Arc<Session>, mut writer: OwnedWriteHalf, name: String) {
    let max_packet = session.device().bulk_in_max_packet();
    loop {
        let sess = session.clone();
        let result = task::spawn_blocking(move || {
            let mut packet = vec![0u8; max_packet];
            sess.read(&mut packet).map(|n| {
                packet.truncate(n);
                packet
            })
        })
        .await;

        let packet = match result {
            Ok(Ok(packet)) => packet,
            Ok(Err(DriverError::Transport(TransportError::Timeout))) => {
                // Nothing to say; the pause keeps a fast-failing transport
                // from spinning.
                tokio::time::sleep(Duration::from_millis(10)).await;
                continue;
            }
            Ok(Err(DriverError::Transport(TransportError::NoDevice))) => {
                info!("device behind {} is gone", name);
                break;
            }
            Ok(Err(e)) => {
                warn!("read from {} failed: {}", name, e);
                break;
            }
            Err(e) => {
                error!("read task for {} failed: {}", name, e);
                break;
            }
        };

        if packet.is_empty() {
            continue;
        }

        trace!("{} delivered {} byte(s)", name, packet.len());
        if let Err(e) = writer.write_all(&packet).await {
            debug!("client on {} stopped reading: {}", name, e);
            break;
        }
    }
}
