//! Command Dispatcher (component F): normalization, the fixed ordering of
//! checks described for every inbound text, tokenizing, and routing to the
//! `commands::user` / `commands::admin` handlers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use crate::commands::{admin, user, Context, Effect, Outcome, Reply};
use crate::config::Config;
use crate::dm_queue;
use crate::peer_sync::{self, SyncFrame};
use crate::ratelimit::{is_bypass, RateLimiter};
use crate::store::Storage;
use crate::transport::Transport;

/// Splits `text` into its leading command keyword (trimmed, lowercased for
/// matching) and the remainder (leading whitespace trimmed only — internal
/// spacing and case are preserved verbatim for body arguments).
fn split_command(text: &str) -> (String, String) {
    let trimmed = text.trim_start();
    match trimmed.find(char::is_whitespace) {
        Some(idx) => {
            let (first, rest) = trimmed.split_at(idx);
            (first.to_lowercase(), rest.trim_start().to_string())
        }
        None => (trimmed.trim_end().to_lowercase(), String::new()),
    }
}

/// If `rest` begins with the `set` sub-keyword, returns the remainder
/// (original case/spacing preserved) to pass to `info set`.
fn info_set_prefix(rest: &str) -> Option<&str> {
    let trimmed = rest.trim_start();
    if trimmed.len() < 3 || !trimmed[..3].eq_ignore_ascii_case("set") {
        return None;
    }
    let tail = &trimmed[3..];
    if tail.is_empty() || tail.starts_with(char::is_whitespace) {
        Some(tail.trim_start())
    } else {
        None
    }
}

pub struct Dispatcher {
    pub storage: Arc<Storage>,
    pub transport: Arc<AsyncMutex<Box<dyn Transport>>>,
    pub config: Config,
    pub rate_limiter: RateLimiter,
    pub sync_enabled: Arc<AtomicBool>,
    pub start_ts: i64,
    admins_bootstrap_warned: std::sync::atomic::AtomicBool,
}

impl Dispatcher {
    pub fn new(storage: Arc<Storage>, transport: Arc<AsyncMutex<Box<dyn Transport>>>, config: Config, sync_enabled: Arc<AtomicBool>, start_ts: i64) -> Self {
        let rate_limiter = RateLimiter::new(config.rate);
        Self {
            storage,
            transport,
            config,
            rate_limiter,
            sync_enabled,
            start_ts,
            admins_bootstrap_warned: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn is_admin(&self, sender: &str) -> bool {
        match self.storage.admin_count() {
            Ok(0) => {
                if !self.admins_bootstrap_warned.swap(true, Ordering::Relaxed) {
                    warn!("ADMINS is empty: bootstrap mode active, every sender is treated as admin");
                }
                true
            }
            Ok(_) => self.storage.is_admin_member(sender).unwrap_or(false),
            Err(e) => {
                warn!("admin lookup failed: {e}");
                false
            }
        }
    }

    /// Processes one inbound message from `sender`, per the fixed check
    /// order: DM flush, `#SYNC` sentinel, blacklist, bypass set, rate
    /// limit, then tokenize and route.
    pub async fn handle(&self, sender: &str, text: &str, now: i64) {
        {
            let guard = self.transport.lock().await;
            dm_queue::flush(&self.storage, guard.as_ref(), sender, now);
        }

        if let Some(body) = text.trim_start().strip_prefix(peer_sync::SENTINEL) {
            if self.storage.is_peer(sender).unwrap_or(false) {
                if let Some(frame) = peer_sync::parse_frame(&format!("{} {}", peer_sync::SENTINEL, body.trim_start())) {
                    self.handle_sync_frame(sender, frame, now).await;
                }
            }
            return;
        }

        if self.storage.is_blacklisted(sender).unwrap_or(false) {
            return;
        }

        let (cmd, rest) = split_command(text);

        if !is_bypass(&cmd) && !self.rate_limiter.allow(sender, now) {
            return;
        }

        if cmd == "?" || cmd == "menu" {
            self.handle_menu(sender, now).await;
            return;
        }

        let outcome = self.route(sender, &cmd, &rest, now).await;
        self.apply_effect(sender, &outcome, now).await;
        self.send_reply(sender, outcome.reply).await;
    }

    /// `?`/`menu`: sends the notice (if any) as its own page group, then
    /// the menu as a separate frame — two distinct sends, not one merged
    /// page, matching "notice page, then menu" exactly.
    async fn handle_menu(&self, sender: &str, now: i64) {
        let guard = self.transport.lock().await;
        let nodes = guard.nodes();
        let is_admin = self.is_admin(sender);
        let (notice_reply, menu_reply) = {
            let ctx = Context {
                storage: &self.storage,
                transport: guard.as_ref(),
                sender,
                nodes,
                now,
                is_admin,
                name: &self.config.name,
                max_text: self.config.max_text,
                tz: &self.config.tz,
                health_public: self.config.health_public,
                start_ts: self.start_ts,
            };
            let (notice, menu) = user::menu_with_notice(&ctx);
            (notice.map(|o| o.reply), menu.reply)
        };
        let dest = crate::transport::Destination::Node(sender.to_string());
        if let Some(notice_reply) = notice_reply {
            send_via(guard.as_ref(), &dest, notice_reply, self.config.max_text);
        }
        send_via(guard.as_ref(), &dest, menu_reply, self.config.max_text);
    }

    async fn handle_sync_frame(&self, sender: &str, frame: SyncFrame, now: i64) {
        let guard = self.transport.lock().await;
        peer_sync::handle_frame(&self.storage, guard.as_ref(), sender, frame, self.config.sync_chunk, now);
    }

    async fn route(&self, sender: &str, cmd: &str, rest: &str, now: i64) -> Outcome {
        let guard = self.transport.lock().await;
        let nodes = guard.nodes();
        let ctx = Context {
            storage: &self.storage,
            transport: guard.as_ref(),
            sender,
            nodes,
            now,
            is_admin: self.is_admin(sender),
            name: &self.config.name,
            max_text: self.config.max_text,
            tz: &self.config.tz,
            health_public: self.config.health_public,
            start_ts: self.start_ts,
        };

        match cmd {
            "r" => {
                if rest.is_empty() {
                    user::list_recent(&ctx)
                } else {
                    match rest.trim().parse::<i64>() {
                        Ok(id) => user::show_post(&ctx, id),
                        Err(_) => Reply::Text("usage: r <id>".to_string()).into(),
                    }
                }
            }
            "p" | "post" => user::post(&ctx, rest),
            "reply" => {
                let mut it = rest.splitn(2, ' ');
                match (it.next(), it.next()) {
                    (Some(id_s), Some(body)) if id_s.parse::<i64>().is_ok() => {
                        user::reply(&ctx, id_s.parse().unwrap(), body)
                    }
                    _ => Reply::Text("usage: reply <id> <text>".to_string()).into(),
                }
            }
            "info" if info_set_prefix(rest).is_some() => {
                admin::info_set(&ctx, info_set_prefix(rest).unwrap())
            }
            "info" => user::info(&ctx),
            "status" => user::status(&ctx),
            "whoami" => user::whoami(&ctx),
            "whois" => user::whois(&ctx, rest.trim()),
            "nodes" => user::nodes(&ctx),
            "dm" => {
                let mut it = rest.splitn(2, ' ');
                match (it.next(), it.next()) {
                    (Some(short), Some(body)) => user::dm(&ctx, short, body),
                    _ => Reply::Text("usage: dm <short> <text>".to_string()).into(),
                }
            }
            "??" | "help" => user::help(&ctx),
            "admins" => {
                let mut it = rest.splitn(2, ' ');
                let sub = it.next().unwrap_or("").to_lowercase();
                let arg = it.next();
                admin::admins(&ctx, &sub, arg)
            }
            "bl" => {
                let mut it = rest.splitn(2, ' ');
                let sub = it.next().unwrap_or("").to_lowercase();
                let arg = it.next();
                admin::blacklist(&ctx, &sub, arg)
            }
            "peer" => {
                let mut it = rest.splitn(2, ' ');
                let sub = it.next().unwrap_or("").to_lowercase();
                let arg = it.next();
                admin::peer(&ctx, &sub, arg)
            }
            "sync" => admin::sync(&ctx, &rest.trim().to_lowercase()),
            "health" => admin::health(&ctx, rest.trim().eq_ignore_ascii_case("full")),
            "" => Reply::Silent.into(),
            _ => {
                if self.config.unknown_reply {
                    Reply::Text("unknown. send ? for menu".to_string()).into()
                } else {
                    Reply::Silent.into()
                }
            }
        }
    }

    async fn apply_effect(&self, sender: &str, outcome: &Outcome, now: i64) {
        match &outcome.effect {
            Some(Effect::PostCreated(id)) => self.replicate_post(*id, now).await,
            Some(Effect::SyncNow) => {
                let guard = self.transport.lock().await;
                crate::supervisor::broadcast_inventory(&self.storage, guard.as_ref(), self.config.sync_inv as i64);
            }
            Some(Effect::SyncOn) => self.sync_enabled.store(true, Ordering::Relaxed),
            Some(Effect::SyncOff) => self.sync_enabled.store(false, Ordering::Relaxed),
            None => {}
        }
        let _ = sender;
    }

    async fn replicate_post(&self, post_id: i64, _now: i64) {
        if !self.config.sync {
            return;
        }
        let peers = self.storage.list_peers().unwrap_or_default();
        let guard = self.transport.lock().await;
        for peer in peers {
            peer_sync::push_post(&self.storage, guard.as_ref(), &peer, post_id, self.config.sync_chunk);
        }
    }

    async fn send_reply(&self, sender: &str, reply: Reply) {
        let dest = crate::transport::Destination::Node(sender.to_string());
        let guard = self.transport.lock().await;
        send_via(guard.as_ref(), &dest, reply, self.config.max_text);
    }
}

fn send_via(transport: &dyn Transport, dest: &crate::transport::Destination, reply: Reply, max_text: usize) {
    match reply {
        Reply::Silent => {}
        Reply::Text(text) => transport.send(dest, &text),
        Reply::Paged { title, lines } => {
            for page in crate::pager::paginate(&lines, title.as_deref(), max_text) {
                transport.send(dest, &page);
            }
        }
    }
}
