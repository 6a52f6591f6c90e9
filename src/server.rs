// src/server.rs
//!
//! Streaming server: forwards every newly published snapshot to its sinks on
//! a dedicated thread.
//!
//! - In-process subscribers receive `Arc<WorldSnapshot>` over bounded
//!   crossbeam channels; a full channel drops that frame for that subscriber.
//! - TCP clients (when `bind_address` is set) receive newline-delimited JSON.
//! - A sink that errors is dropped; the stepping thread is never involved.

use crate::context::ensure;
use crate::error::{Error, Result};
use crate::snapshot::{SnapshotChannel, Wait, WorldSnapshot};
use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

const CLIENT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP endpoint for JSON-lines clients; `None` serves in-process sinks only.
    pub bind_address: Option<SocketAddr>,
    /// Upper bound on how long the server waits before re-checking for new
    /// clients and shutdown.
    pub poll_interval_ms: u64,
    /// Frames buffered per in-process subscriber.
    pub subscriber_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_address: None, poll_interval_ms: 20, subscriber_capacity: 4 }
    }
}

// ============================================================================
// SINKS
// ============================================================================

/// Destination for snapshots. Returning `Err` removes the sink.
pub trait SnapshotSink: Send {
    fn send(&mut self, snapshot: &Arc<WorldSnapshot>) -> Result<()>;

    fn label(&self) -> &str {
        "sink"
    }
}

/// In-process subscriber.
pub struct ChannelSink {
    tx: Sender<Arc<WorldSnapshot>>,
}

impl ChannelSink {
    pub fn new(tx: Sender<Arc<WorldSnapshot>>) -> Self {
        Self { tx }
    }
}

impl SnapshotSink for ChannelSink {
    fn send(&mut self, snapshot: &Arc<WorldSnapshot>) -> Result<()> {
        match self.tx.try_send(Arc::clone(snapshot)) {
            Ok(()) | Err(TrySendError::Full(_)) => Ok(()),
            Err(TrySendError::Disconnected(_)) => Err(Error::msg("subscriber disconnected")),
        }
    }

    fn label(&self) -> &str {
        "subscriber"
    }
}

/// Newline-delimited JSON over any writer (TCP stream, file, buffer).
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
    label: String,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W, label: impl Into<String>) -> Self {
        Self { writer, label: label.into() }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> SnapshotSink for JsonLinesSink<W> {
    fn send(&mut self, snapshot: &Arc<WorldSnapshot>) -> Result<()> {
        let mut line = snapshot.to_json_line()?;
        line.push('\n');
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }

    fn label(&self) -> &str {
        &self.label
    }
}

// ============================================================================
// SERVER
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStats {
    pub snapshots_served: u64,
    pub last_step: u64,
    pub clients_accepted: u64,
    pub sinks_dropped: u64,
    pub active_sinks: usize,
}

type Sinks = Arc<Mutex<Vec<Box<dyn SnapshotSink>>>>;

pub struct SnapshotServer {
    sinks: Sinks,
    stats: Arc<Mutex<ServerStats>>,
    stop: Arc<AtomicBool>,
    local_addr: Option<SocketAddr>,
    config: ServerConfig,
    handle: Option<JoinHandle<()>>,
}

impl SnapshotServer {
    /// Bind (if configured) and start the server thread.
    pub fn launch(channel: Arc<SnapshotChannel>, config: ServerConfig) -> Result<Self> {
        ensure!(config.poll_interval_ms > 0, "poll interval must be positive");
        ensure!(config.subscriber_capacity > 0, "subscriber capacity must be positive");

        let listener = match config.bind_address {
            Some(addr) => {
                let listener = TcpListener::bind(addr)?;
                listener.set_nonblocking(true)?;
                Some(listener)
            }
            None => None,
        };
        let local_addr = listener.as_ref().map(TcpListener::local_addr).transpose()?;

        let sinks: Sinks = Arc::new(Mutex::new(Vec::new()));
        let stats = Arc::new(Mutex::new(ServerStats::default()));
        let stop = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            last_step: channel.latest().step,
            channel,
            listener,
            sinks: Arc::clone(&sinks),
            stats: Arc::clone(&stats),
            stop: Arc::clone(&stop),
            poll: Duration::from_millis(config.poll_interval_ms),
        };
        let handle = thread::Builder::new()
            .name("snapshot-server".into())
            .spawn(move || worker.run())?;

        info!(addr = ?local_addr, "snapshot server started");
        Ok(Self { sinks, stats, stop, local_addr, config, handle: Some(handle) })
    }

    /// New in-process subscriber.
    pub fn subscribe(&self) -> Receiver<Arc<WorldSnapshot>> {
        let (tx, rx) = bounded(self.config.subscriber_capacity);
        self.add_sink(Box::new(ChannelSink::new(tx)));
        rx
    }

    pub fn add_sink(&self, sink: Box<dyn SnapshotSink>) {
        let mut sinks = self.sinks.lock();
        sinks.push(sink);
        self.stats.lock().active_sinks = sinks.len();
    }

    /// Bound TCP address (resolves port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn stats(&self) -> ServerStats {
        *self.stats.lock()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop serving and join the thread. Does not touch the snapshot channel.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("snapshot server thread panicked");
            }
        }
    }
}

impl Drop for SnapshotServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    channel: Arc<SnapshotChannel>,
    /// Newest step already delivered (or present before launch).
    last_step: u64,
    listener: Option<TcpListener>,
    sinks: Sinks,
    stats: Arc<Mutex<ServerStats>>,
    stop: Arc<AtomicBool>,
    poll: Duration,
}

impl Worker {
    fn run(self) {
        let mut last_step = self.last_step;
        while !self.stop.load(Ordering::Acquire) {
            self.accept_clients();
            match self.channel.wait_newer(last_step, self.poll) {
                Wait::Snapshot(snapshot) => {
                    last_step = snapshot.step;
                    self.deliver(&snapshot);
                }
                Wait::TimedOut => {}
                Wait::Shutdown => break,
            }
        }
        info!(last_step, "snapshot server stopped");
    }

    fn accept_clients(&self) {
        let Some(listener) = &self.listener else {
            return;
        };
        loop {
            match listener.accept() {
                Ok((stream, peer)) => match prepare_client(&stream) {
                    Ok(()) => {
                        debug!(%peer, "stream client connected");
                        let mut sinks = self.sinks.lock();
                        sinks.push(Box::new(JsonLinesSink::new(stream, peer.to_string())));
                        let mut stats = self.stats.lock();
                        stats.clients_accepted += 1;
                        stats.active_sinks = sinks.len();
                    }
                    Err(e) => warn!(%peer, error = %e, "rejecting stream client"),
                },
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    /// Sends run without the sinks lock, so a slow client never blocks
    /// `subscribe` / `add_sink`. Sinks added meanwhile are kept.
    fn deliver(&self, snapshot: &Arc<WorldSnapshot>) {
        let mut sending = std::mem::take(&mut *self.sinks.lock());
        let before = sending.len();
        sending.retain_mut(|sink| match sink.send(snapshot) {
            Ok(()) => true,
            Err(e) => {
                warn!(sink = sink.label(), error = %e, "dropping snapshot sink");
                false
            }
        });
        let dropped = before - sending.len();

        let mut sinks = self.sinks.lock();
        let added = std::mem::replace(&mut *sinks, sending);
        sinks.extend(added);

        let mut stats = self.stats.lock();
        stats.snapshots_served += 1;
        stats.last_step = snapshot.step;
        stats.sinks_dropped += dropped as u64;
        stats.active_sinks = sinks.len();
    }
}

fn prepare_client(stream: &TcpStream) -> std::io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    stream.set_write_timeout(Some(CLIENT_WRITE_TIMEOUT))
}
