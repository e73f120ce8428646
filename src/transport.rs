//! The Link Adapter: a thin, polymorphic boundary over the
//! attached radio. The real transport library is treated as an opaque
//! dependency — this module defines the contract the rest of the gateway
//! consumes and one concrete (`SerialTransport`) plus one in-memory test
//! double (`MockTransport`) implementation of it.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::error::{MeshMiniError, Result};

/// A node-directory or packet-sender key as exposed verbatim by the radio.
/// Directory keys are heterogeneous by design; callers
/// canonicalize via [`crate::canon`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKey {
    Int(u32),
    Hex(String),
    Bang(String),
}

/// A single entry in the radio's node directory. Polymorphic payloads on
/// the wire are reduced here to the two fields callers need.
#[derive(Debug, Clone, Default)]
pub struct NodeEntry {
    pub short_name: Option<String>,
    pub long_name: Option<String>,
}

/// Outbound destination: a specific node, or the broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Node(String),
    Broadcast,
}

/// A raw inbound packet as delivered by the transport, before Packet Intake
/// canonicalizes the sender and extracts text.
#[derive(Debug, Clone, Default)]
pub struct RawPacket {
    pub from: Option<u32>,
    pub from_id: Option<String>,
    pub decoded_text: Option<String>,
    pub decoded_bytes: Option<Vec<u8>>,
    pub decoded_payload_text: Option<String>,
    pub decoded_payload_bytes: Option<Vec<u8>>,
    pub id: Option<u64>,
    pub rx_time: Option<i64>,
}

/// The Link Adapter contract. `send`/`recv_*` are non-blocking
/// from the caller's point of view; `send` internally serializes and
/// enforces the minimum inter-transmit gap.
pub trait Transport: Send + Sync {
    /// Best-effort send. Errors are logged and the frame is dropped —
    /// there is no user-visible effect besides the absence of a reply.
    fn send(&self, destination: &Destination, text: &str);

    /// Poll the direct-callback receive path.
    fn recv_callback(&self) -> Option<RawPacket>;

    /// Poll the publish/subscribe receive path. Returns `None` always when
    /// the underlying transport has no secondary path.
    fn recv_pubsub(&self) -> Option<RawPacket>;

    /// The radio's current view of observed nodes.
    fn nodes(&self) -> Vec<(NodeKey, NodeEntry)>;

    /// This gateway's own node identity and names, if the radio exposes one.
    fn my_node_info(&self) -> Option<NodeEntry> {
        None
    }

    fn close(&mut self);

    /// Closes and reopens the underlying connection (used by the watchdog).
    fn reopen(&mut self) -> Result<()>;

    /// Narrows a boxed trait object back to its concrete type for tests.
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Candidate serial device paths probed when `device == "auto"`.
const AUTO_CANDIDATES: &[&str] = &[
    "/dev/ttyUSB0",
    "/dev/ttyUSB1",
    "/dev/ttyACM0",
    "/dev/ttyACM1",
    "/dev/serial/by-id",
];

/// A serial-port transport. Frames are newline-delimited `from|text` pairs;
/// the actual Meshtastic wire protocol is a protobuf stream and out of
/// scope for this gateway: the transport library is treated as an opaque
/// external collaborator.
pub struct SerialTransport {
    device: String,
    port: Mutex<Option<Box<dyn serialport::SerialPort>>>,
    inbox: Arc<Mutex<VecDeque<RawPacket>>>,
    last_send: Mutex<Instant>,
    tx_gap: Duration,
    reader_handle: Mutex<Option<std::thread::JoinHandle<()>>>,
    stop: Arc<std::sync::atomic::AtomicBool>,
}

impl SerialTransport {
    pub fn open(device: &str, tx_gap: Duration) -> Result<Self> {
        let path = resolve_device_path(device)?;
        let port = serialport::new(&path, 115_200)
            .timeout(Duration::from_millis(200))
            .open()
            .map_err(|e| MeshMiniError::Transport(format!("cannot open {path}: {e}")))?;

        let inbox = Arc::new(Mutex::new(VecDeque::new()));
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let reader_port = port
            .try_clone()
            .map_err(|e| MeshMiniError::Transport(format!("cannot clone port handle: {e}")))?;
        let reader_handle = spawn_reader(reader_port, inbox.clone(), stop.clone());

        Ok(Self {
            device: path,
            port: Mutex::new(Some(port)),
            inbox,
            last_send: Mutex::new(Instant::now() - tx_gap),
            tx_gap,
            reader_handle: Mutex::new(Some(reader_handle)),
            stop,
        })
    }
}

fn resolve_device_path(device: &str) -> Result<String> {
    if device != "auto" {
        return Ok(device.to_string());
    }
    for candidate in AUTO_CANDIDATES {
        if Path::new(candidate).exists() {
            return Ok((*candidate).to_string());
        }
    }
    Err(MeshMiniError::Transport(
        "no candidate serial device found while probing 'auto'".to_string(),
    ))
}

fn spawn_reader(
    port: Box<dyn serialport::SerialPort>,
    inbox: Arc<Mutex<VecDeque<RawPacket>>>,
    stop: Arc<std::sync::atomic::AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut reader = BufReader::new(port);
        let mut line = String::new();
        while !stop.load(std::sync::atomic::Ordering::Relaxed) {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => std::thread::sleep(Duration::from_millis(50)),
                Ok(_) => {
                    if let Some(packet) = parse_line(line.trim_end()) {
                        inbox.lock().unwrap().push_back(packet);
                    }
                }
                Err(_) => std::thread::sleep(Duration::from_millis(50)),
            }
        }
    })
}

/// Parses a `from|text` wire frame. Malformed lines are dropped.
fn parse_line(line: &str) -> Option<RawPacket> {
    let (from, text) = line.split_once('|')?;
    Some(RawPacket {
        from_id: Some(from.to_string()),
        decoded_text: Some(text.to_string()),
        ..Default::default()
    })
}

impl Transport for SerialTransport {
    fn send(&self, destination: &Destination, text: &str) {
        let mut last = self.last_send.lock().unwrap();
        let elapsed = last.elapsed();
        if elapsed < self.tx_gap {
            std::thread::sleep(self.tx_gap - elapsed);
        }
        *last = Instant::now();
        drop(last);

        let addr = match destination {
            Destination::Node(id) => id.clone(),
            Destination::Broadcast => "^all".to_string(),
        };
        let mut guard = self.port.lock().unwrap();
        if let Some(port) = guard.as_mut() {
            let frame = format!("{addr}|{text}\n");
            if let Err(e) = port.write_all(frame.as_bytes()) {
                error!("send to {addr} failed: {e}");
            }
        } else {
            warn!("send to {addr} dropped: port closed");
        }
    }

    fn recv_callback(&self) -> Option<RawPacket> {
        self.inbox.lock().unwrap().pop_front()
    }

    fn recv_pubsub(&self) -> Option<RawPacket> {
        None
    }

    fn nodes(&self) -> Vec<(NodeKey, NodeEntry)> {
        Vec::new()
    }

    fn close(&mut self) {
        self.stop.store(true, std::sync::atomic::Ordering::Relaxed);
        *self.port.lock().unwrap() = None;
        if let Some(handle) = self.reader_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
        debug!("closed serial transport on {}", self.device);
    }

    fn reopen(&mut self) -> Result<()> {
        self.close();
        let reopened = SerialTransport::open(&self.device, self.tx_gap)?;
        *self = reopened;
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// An in-memory transport double for tests: both receive paths are driven
/// by explicit pushes, so dedup behavior and watchdog reconnects can be
/// asserted deterministically.
#[derive(Default)]
pub struct MockTransport {
    pub sent: Mutex<Vec<(Destination, String)>>,
    pub callback_queue: Mutex<VecDeque<RawPacket>>,
    pub pubsub_queue: Mutex<VecDeque<RawPacket>>,
    pub directory: Mutex<Vec<(NodeKey, NodeEntry)>>,
    pub open_count: Mutex<u32>,
    pub closed: std::sync::atomic::AtomicBool,
    pub my_info: Mutex<Option<NodeEntry>>,
}

impl MockTransport {
    pub fn new() -> Self {
        let s = Self::default();
        *s.open_count.lock().unwrap() = 1;
        s
    }

    pub fn push_callback(&self, packet: RawPacket) {
        self.callback_queue.lock().unwrap().push_back(packet);
    }

    pub fn push_pubsub(&self, packet: RawPacket) {
        self.pubsub_queue.lock().unwrap().push_back(packet);
    }

    pub fn set_directory(&self, dir: Vec<(NodeKey, NodeEntry)>) {
        *self.directory.lock().unwrap() = dir;
    }

    pub fn set_my_node_info(&self, entry: NodeEntry) {
        *self.my_info.lock().unwrap() = Some(entry);
    }
}

impl Transport for MockTransport {
    fn send(&self, destination: &Destination, text: &str) {
        self.sent
            .lock()
            .unwrap()
            .push((destination.clone(), text.to_string()));
    }

    fn recv_callback(&self) -> Option<RawPacket> {
        self.callback_queue.lock().unwrap().pop_front()
    }

    fn recv_pubsub(&self) -> Option<RawPacket> {
        self.pubsub_queue.lock().unwrap().pop_front()
    }

    fn nodes(&self) -> Vec<(NodeKey, NodeEntry)> {
        self.directory.lock().unwrap().clone()
    }

    fn my_node_info(&self) -> Option<NodeEntry> {
        self.my_info.lock().unwrap().clone()
    }

    fn close(&mut self) {
        self.closed.store(true, std::sync::atomic::Ordering::Relaxed);
    }

    fn reopen(&mut self) -> Result<()> {
        self.closed.store(false, std::sync::atomic::Ordering::Relaxed);
        *self.open_count.lock().unwrap() += 1;
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
