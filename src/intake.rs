//! Packet Intake (component C): canonicalizes inbound packets, extracts
//! text, and deduplicates between the callback and pub/sub receive paths.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::canon::canon_sender;
use crate::ratelimit::DedupWindow;
use crate::transport::RawPacket;

/// A canonicalized, deduplicated inbound message ready for the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub sender: String,
    pub text: String,
}

const DEDUP_CAPACITY: usize = 256;

/// Owns the dual-path dedup FIFO and the last-RX wall clock. No external
/// component mutates this state.
pub struct Intake {
    dedup: DedupWindow,
    last_rx: AtomicI64,
}

impl Intake {
    pub fn new() -> Self {
        Self {
            dedup: DedupWindow::new(DEDUP_CAPACITY),
            last_rx: AtomicI64::new(0),
        }
    }

    pub fn last_rx(&self) -> i64 {
        self.last_rx.load(Ordering::Relaxed)
    }

    pub fn reset_last_rx(&self, now: i64) {
        self.last_rx.store(now, Ordering::Relaxed);
    }

    /// Processes one raw packet: updates the last-RX clock, canonicalizes
    /// the sender, extracts text, and drops duplicates. Returns `None` when
    /// the packet carries no usable text or is a dual-path repeat.
    pub fn process(&self, packet: &RawPacket, now: i64) -> Option<InboundMessage> {
        self.last_rx.store(now, Ordering::Relaxed);

        let sender = canon_sender(packet.from_id.as_deref(), packet.from)?;
        let text = extract_text(packet)?;

        let key = discriminator(packet, &sender, now);
        if self.dedup.seen_or_insert(key) {
            return None;
        }

        Some(InboundMessage { sender, text })
    }
}

impl Default for Intake {
    fn default() -> Self {
        Self::new()
    }
}

/// Prefers `decoded.text`; falls back to `decoded.payload` bytes/text.
/// Lossy UTF-8 decoding on byte payloads, per the intake contract.
fn extract_text(packet: &RawPacket) -> Option<String> {
    if let Some(t) = &packet.decoded_text {
        return Some(t.clone());
    }
    if let Some(b) = &packet.decoded_bytes {
        return Some(String::from_utf8_lossy(b).into_owned());
    }
    if let Some(t) = &packet.decoded_payload_text {
        return Some(t.clone());
    }
    if let Some(b) = &packet.decoded_payload_bytes {
        return Some(String::from_utf8_lossy(b).into_owned());
    }
    None
}

/// A packet id when present, else `(sender, rxTime)` — the fallback
/// discriminator for transports that never assign packet ids.
fn discriminator(packet: &RawPacket, sender: &str, now: i64) -> String {
    match packet.id {
        Some(id) => format!("id:{id}"),
        None => format!("rx:{sender}:{}", packet.rx_time.unwrap_or(now)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(from_id: &str, text: &str, id: Option<u64>) -> RawPacket {
        RawPacket {
            from_id: Some(from_id.to_string()),
            decoded_text: Some(text.to_string()),
            id,
            ..Default::default()
        }
    }

    #[test]
    fn processes_and_canonicalizes_sender() {
        let intake = Intake::new();
        let msg = intake.process(&packet("!DEADBEEF", "p hi", Some(1)), 100).unwrap();
        assert_eq!(msg.sender, "!deadbeef");
        assert_eq!(msg.text, "p hi");
        assert_eq!(intake.last_rx(), 100);
    }

    #[test]
    fn drops_duplicate_by_packet_id() {
        let intake = Intake::new();
        assert!(intake.process(&packet("!aaaaaaaa", "p hi", Some(7)), 1).is_some());
        assert!(intake.process(&packet("!aaaaaaaa", "p hi", Some(7)), 2).is_none());
    }

    #[test]
    fn falls_back_to_sender_and_rx_time_when_no_id() {
        let intake = Intake::new();
        let mut p1 = packet("!aaaaaaaa", "p hi", None);
        p1.rx_time = Some(42);
        let mut p2 = p1.clone();
        assert!(intake.process(&p1, 1).is_some());
        assert!(intake.process(&p2, 1).is_none());
        p2.rx_time = Some(43);
        assert!(intake.process(&p2, 1).is_some());
    }

    #[test]
    fn extracts_from_payload_when_text_absent() {
        let intake = Intake::new();
        let p = RawPacket {
            from_id: Some("!aaaaaaaa".to_string()),
            decoded_payload_bytes: Some(b"p hi".to_vec()),
            id: Some(1),
            ..Default::default()
        };
        let msg = intake.process(&p, 1).unwrap();
        assert_eq!(msg.text, "p hi");
    }

    #[test]
    fn drops_packet_with_no_usable_text() {
        let intake = Intake::new();
        let p = RawPacket {
            from_id: Some("!aaaaaaaa".to_string()),
            id: Some(1),
            ..Default::default()
        };
        assert!(intake.process(&p, 1).is_none());
    }

    #[test]
    fn updates_last_rx_even_on_drop() {
        let intake = Intake::new();
        let p = RawPacket {
            from_id: Some("!aaaaaaaa".to_string()),
            id: Some(1),
            ..Default::default()
        };
        intake.process(&p, 55);
        assert_eq!(intake.last_rx(), 55);
    }
}
