//! Top-level wiring: owns the Persistence Store, the Link Adapter, the
//! Dispatcher, and the three concurrent tasks that keep a running gateway
//! alive — the inbound consumer, the sync ticker, and the watchdog —
//! coordinating their shutdown via one `Arc<AtomicBool>` flag, the way
//! `apps/groupbot/src/main.rs`'s `run()` does.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::intake::Intake;
use crate::store::Storage;
use crate::supervisor;
use crate::transport::Transport;

/// Poll cadence for the inbound consumer task. Both receive paths are
/// non-blocking polls (the real transport's blocking serial read happens
/// on its own reader thread, queued ahead of this loop), so this is a
/// cheap busy-wait, not a send/receive round trip.
const INBOUND_POLL: Duration = Duration::from_millis(50);

pub struct Gateway {
    storage: Arc<Storage>,
    transport: Arc<AsyncMutex<Box<dyn Transport>>>,
    dispatcher: Arc<Dispatcher>,
    intake: Arc<Intake>,
    config: Config,
    shutdown: Arc<AtomicBool>,
}

impl Gateway {
    pub fn new(storage: Storage, transport: Box<dyn Transport>, config: Config, now: i64) -> Self {
        let storage = Arc::new(storage);
        for id in config.initial_admins() {
            if let Err(e) = storage.add_admin(&id) {
                tracing::warn!("failed to seed initial admin {id}: {e}");
            }
        }
        for id in config.initial_peers() {
            if let Err(e) = storage.add_peer(&id) {
                tracing::warn!("failed to seed initial peer {id}: {e}");
            }
        }
        let transport = Arc::new(AsyncMutex::new(transport));
        let sync_enabled = Arc::new(AtomicBool::new(config.sync));
        let dispatcher = Arc::new(Dispatcher::new(storage.clone(), transport.clone(), config.clone(), sync_enabled, now));
        Self {
            storage,
            transport,
            dispatcher,
            intake: Arc::new(Intake::new()),
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Runs the three task loops to completion (until `shutdown` is set),
    /// joining all of them before returning.
    pub async fn run(&self) {
        let inbound = self.run_inbound_consumer();
        let sync_ticker = supervisor::run_sync_ticker(
            self.storage.clone(),
            self.transport.clone(),
            self.dispatcher.sync_enabled.clone(),
            self.shutdown.clone(),
            Duration::from_secs(self.config.sync_period),
            self.config.sync_inv as i64,
        );
        let watchdog = supervisor::run_watchdog(
            self.transport.clone(),
            self.intake.clone(),
            self.shutdown.clone(),
            Duration::from_secs(self.config.watch_tick),
            self.config.rx_stale_sec as i64,
            now_unix,
        );
        let janitor = supervisor::run_janitor(
            self.storage.clone(),
            self.shutdown.clone(),
            Duration::from_secs(3600),
            self.config.dm_ttl_hours,
            now_unix,
        );
        tokio::join!(inbound, sync_ticker, watchdog, janitor);
    }

    async fn run_inbound_consumer(&self) {
        let mut ticker = tokio::time::interval(INBOUND_POLL);
        while !self.shutdown.load(Ordering::Relaxed) {
            ticker.tick().await;
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            let packet = {
                let guard = self.transport.lock().await;
                guard.recv_callback().or_else(|| guard.recv_pubsub())
            };
            let Some(packet) = packet else {
                continue;
            };
            let now = now_unix();
            let Some(msg) = self.intake.process(&packet, now) else {
                continue;
            };
            debug!("dispatching from {}: {:?}", msg.sender, msg.text);
            self.dispatcher.handle(&msg.sender, &msg.text, now).await;
        }
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Destination, MockTransport, RawPacket};

    fn test_config() -> Config {
        Config {
            db: "board.db".to_string(),
            device: "auto".to_string(),
            name: "MeshLink BBS".to_string(),
            admins: "!aaaaaaaa".to_string(),
            peers: String::new(),
            rate: 2,
            max_text: 140,
            tx_gap: 1.0,
            health_public: false,
            unknown_reply: true,
            sync: true,
            sync_inv: 15,
            sync_period: 3600,
            sync_chunk: 160,
            rx_stale_sec: 240,
            watch_tick: 3600,
            tz: "UTC".to_string(),
            dm_ttl_hours: 72,
        }
    }

    #[tokio::test]
    async fn inbound_packet_is_dispatched_through_to_a_reply() {
        let storage = Storage::open_in_memory().unwrap();
        let transport = MockTransport::new();
        transport.push_callback(RawPacket {
            from_id: Some("!aaaaaaaa".to_string()),
            decoded_text: Some("p hello from the mesh".to_string()),
            id: Some(1),
            ..Default::default()
        });

        let gateway = Gateway::new(storage, Box::new(transport), test_config(), 1000);
        let shutdown = gateway.shutdown_flag();

        let gw = Arc::new(gateway);
        let gw2 = gw.clone();
        let handle = tokio::spawn(async move { gw2.run().await });

        tokio::time::sleep(Duration::from_millis(150)).await;
        shutdown.store(true, Ordering::Relaxed);
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;

        assert_eq!(gw.storage.post_count().unwrap(), 1);
        let guard = gw.transport.lock().await;
        let sent = guard.as_any().downcast_ref::<MockTransport>().unwrap().sent.lock().unwrap();
        assert!(sent.iter().any(|(dest, text)| {
            *dest == Destination::Node("!aaaaaaaa".to_string()) && text.contains("posted #1")
        }));
    }
}
