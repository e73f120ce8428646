use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use meshmini::config::Config;
use meshmini::dispatcher::Dispatcher;
use meshmini::intake::Intake;
use meshmini::store::Storage;
use meshmini::supervisor;
use meshmini::transport::{MockTransport, Transport};
use tokio::sync::Mutex as AsyncMutex;

fn test_config() -> Config {
    Config {
        db: "board.db".to_string(),
        device: "auto".to_string(),
        name: "MeshLink BBS".to_string(),
        admins: String::new(),
        peers: String::new(),
        rate: 0,
        max_text: 140,
        tx_gap: 1.0,
        health_public: false,
        unknown_reply: true,
        sync: false,
        sync_inv: 15,
        sync_period: 300,
        sync_chunk: 160,
        rx_stale_sec: 5,
        watch_tick: 10,
        tz: "UTC".to_string(),
        dm_ttl_hours: 72,
    }
}

/// With `RX_STALE_SEC=5` and RX simulated stale from the start, the
/// watchdog closes and reopens the Link Adapter within `WATCH_TICK + 1`
/// (here driven on a fast test tick so the assertion doesn't wait 10s real
/// time), and the gateway keeps answering `?` with a menu afterward.
#[tokio::test]
async fn watchdog_reconnects_and_dispatcher_keeps_serving_after() {
    let transport: Box<dyn Transport> = Box::new(MockTransport::new());
    let transport = Arc::new(AsyncMutex::new(transport));
    let intake = Arc::new(Intake::new());
    intake.reset_last_rx(1); // some RX happened once, long ago
    let shutdown = Arc::new(AtomicBool::new(false));

    let handle = {
        let transport = transport.clone();
        let intake = intake.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            supervisor::run_watchdog(transport, intake, shutdown, Duration::from_millis(5), 5, || 100).await;
        })
    };

    tokio::time::sleep(Duration::from_millis(30)).await;
    shutdown.store(true, Ordering::Relaxed);
    let _ = handle.await;

    // now - last_rx (100 - 1 = 99) exceeded rx_stale_sec (5), so a reconnect
    // happened and last_rx was reset to the simulated "now" of 100.
    assert_eq!(intake.last_rx(), 100);
    {
        let guard = transport.lock().await;
        let mock = guard.as_any().downcast_ref::<MockTransport>().unwrap();
        assert!(*mock.open_count.lock().unwrap() >= 2);
        assert!(!mock.closed.load(Ordering::Relaxed));
    }

    // The dispatcher keeps answering after the reconnect.
    let storage = Arc::new(Storage::open_in_memory().unwrap());
    let d = Dispatcher::new(storage, transport.clone(), test_config(), Arc::new(AtomicBool::new(false)), 0);
    d.handle("!aaaaaaaa", "?", 200).await;
    let guard = transport.lock().await;
    let mock = guard.as_any().downcast_ref::<MockTransport>().unwrap();
    let sent = mock.sent.lock().unwrap();
    assert!(sent.last().unwrap().1.to_lowercase().contains("bbs"));
}
