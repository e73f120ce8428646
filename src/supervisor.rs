//! Link Supervisor (component I): the sync ticker and the RX watchdog.
//! Both run as independent periodic tasks against a shared [`Transport`]
//! and [`Storage`], coordinating shutdown via the gateway's `Arc<AtomicBool>`
//! flag the way `apps/groupbot/src/main.rs`'s task loops do.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::intake::Intake;
use crate::peer_sync;
use crate::store::Storage;
use crate::transport::Transport;

/// Broadcasts an inventory frame to each configured peer, if sync is
/// enabled. Runs on a fixed tick and also on-demand from `sync now`.
pub async fn run_sync_ticker(
    storage: Arc<Storage>,
    transport: Arc<AsyncMutex<Box<dyn Transport>>>,
    sync_enabled: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    period: Duration,
    sync_inv: i64,
) {
    let mut interval = tokio::time::interval(period);
    while !shutdown.load(Ordering::Relaxed) {
        interval.tick().await;
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        if !sync_enabled.load(Ordering::Relaxed) {
            continue;
        }
        let guard = transport.lock().await;
        broadcast_inventory(&storage, guard.as_ref(), sync_inv);
    }
}

pub fn broadcast_inventory(storage: &Storage, transport: &dyn Transport, sync_inv: i64) {
    let Some(inv) = peer_sync::render_inventory(storage, sync_inv) else {
        return;
    };
    let peers = match storage.list_peers() {
        Ok(p) => p,
        Err(e) => {
            warn!("failed to list peers for inventory broadcast: {e}");
            return;
        }
    };
    for peer in peers {
        transport.send(&crate::transport::Destination::Node(peer), &inv);
    }
}

/// Closes and reopens the Link Adapter whenever the RX clock has gone
/// stale, resetting it to the current wall time on reconnect.
pub async fn run_watchdog(
    transport: Arc<AsyncMutex<Box<dyn Transport>>>,
    intake: Arc<Intake>,
    shutdown: Arc<AtomicBool>,
    tick: Duration,
    rx_stale_sec: i64,
    now_fn: impl Fn() -> i64,
) {
    let mut interval = tokio::time::interval(tick);
    while !shutdown.load(Ordering::Relaxed) {
        interval.tick().await;
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        let last_rx = intake.last_rx();
        if last_rx == 0 {
            continue;
        }
        let now = now_fn();
        if now - last_rx > rx_stale_sec {
            warn!("RX stale for {}s, reconnecting link adapter", now - last_rx);
            let mut guard = transport.lock().await;
            if let Err(e) = guard.reopen() {
                warn!("watchdog reconnect failed: {e}");
            } else {
                intake.reset_last_rx(now);
                info!("link adapter reconnected");
            }
        }
    }
}

/// Reassembly buffers older than this that never completed are discarded.
pub const RXPARTS_TTL_SECS: i64 = 24 * 3600;

/// Periodically sweeps stale reassembly state and, when `dm_ttl_hours` is
/// nonzero, undelivered DMs older than that TTL.
pub async fn run_janitor(storage: Arc<Storage>, shutdown: Arc<AtomicBool>, tick: Duration, dm_ttl_hours: u64, now_fn: impl Fn() -> i64) {
    let mut interval = tokio::time::interval(tick);
    while !shutdown.load(Ordering::Relaxed) {
        interval.tick().await;
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        let now = now_fn();
        match storage.gc_stale_rxparts(now, RXPARTS_TTL_SECS) {
            Ok(0) => {}
            Ok(n) => info!("garbage-collected {n} stale reassembly buffer(s)"),
            Err(e) => warn!("failed to gc stale rxparts: {e}"),
        }
        if dm_ttl_hours > 0 {
            match storage.expire_undelivered_dms(now, dm_ttl_hours as i64 * 3600) {
                Ok(0) => {}
                Ok(n) => info!("expired {n} undelivered dm(s) past ttl"),
                Err(e) => warn!("failed to expire undelivered dms: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    #[test]
    fn broadcast_inventory_sends_to_each_peer() {
        let storage = Storage::open_in_memory().unwrap();
        storage.insert_post(0, "!aaaaaaaa", "hi", None).unwrap();
        storage.add_peer("!bbbbbbbb").unwrap();
        storage.add_peer("!cccccccc").unwrap();

        let transport = MockTransport::new();
        broadcast_inventory(&storage, &transport, 15);

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(_, text)| text.starts_with("#SYNC INV ids=")));
    }

    #[test]
    fn broadcast_inventory_is_noop_when_no_posts() {
        let storage = Storage::open_in_memory().unwrap();
        storage.add_peer("!bbbbbbbb").unwrap();
        let transport = MockTransport::new();
        broadcast_inventory(&storage, &transport, 15);
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn watchdog_reconnects_after_stale_rx() {
        let intake = Arc::new(Intake::new());
        intake.reset_last_rx(1);
        let transport: Box<dyn Transport> = Box::new(MockTransport::new());
        let transport = Arc::new(AsyncMutex::new(transport));
        let shutdown = Arc::new(AtomicBool::new(false));

        let t2 = transport.clone();
        let sd2 = shutdown.clone();
        let intake2 = intake.clone();
        let handle = tokio::spawn(async move {
            run_watchdog(t2, intake2, sd2, Duration::from_millis(5), 5, || 100).await;
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.store(true, Ordering::Relaxed);
        let _ = handle.await;

        assert_eq!(intake.last_rx(), 100);
    }

    #[tokio::test]
    async fn janitor_sweeps_stale_rxparts_and_expired_dms() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        storage.open_rxparts("abc1234567", 2, "!bbbbbbbb", 0).unwrap();
        storage.insert_dm("!bbbbbbbb", "hi", 0).unwrap();
        let shutdown = Arc::new(AtomicBool::new(false));

        let s2 = storage.clone();
        let sd2 = shutdown.clone();
        let handle = tokio::spawn(async move {
            run_janitor(s2, sd2, Duration::from_millis(5), 1, || RXPARTS_TTL_SECS + 3600).await;
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.store(true, Ordering::Relaxed);
        let _ = handle.await;

        assert!(storage.get_rxparts("abc1234567").unwrap().is_none());
        assert!(storage.undelivered_dms("!bbbbbbbb", 10).unwrap().is_empty());
    }
}
