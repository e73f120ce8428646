//! Admin command handlers: `admins`, `bl`, `peer`, `sync`, `info set`,
//! `health`. Callers (the dispatcher) are responsible for checking
//! `ctx.is_admin` before routing here, except for `health` which is
//! public when `HEALTH_PUBLIC` is set.

use crate::commands::{Context, Effect, Outcome, Reply};

const ADMIN_ONLY: &str = "admin only";

fn require_admin(ctx: &Context) -> Option<Outcome> {
    if ctx.is_admin {
        None
    } else {
        Some(Reply::Text(ADMIN_ONLY.to_string()).into())
    }
}

/// `admins add|del|list <id>`
pub fn admins(ctx: &Context, sub: &str, arg: Option<&str>) -> Outcome {
    if let Some(deny) = require_admin(ctx) {
        return deny;
    }
    match sub {
        "list" => list_ids(ctx.storage.list_admins()),
        "add" => mutate(arg, |id| ctx.storage.add_admin(id)),
        "del" => mutate(arg, |id| ctx.storage.remove_admin(id)),
        _ => Reply::Text("usage: admins add|del|list <id>".to_string()).into(),
    }
}

/// `bl add|del|list <id>`
pub fn blacklist(ctx: &Context, sub: &str, arg: Option<&str>) -> Outcome {
    if let Some(deny) = require_admin(ctx) {
        return deny;
    }
    match sub {
        "list" => list_ids(ctx.storage.list_blacklist()),
        "add" => mutate(arg, |id| ctx.storage.add_blacklist(id)),
        "del" => mutate(arg, |id| ctx.storage.remove_blacklist(id)),
        _ => Reply::Text("usage: bl add|del|list <id>".to_string()).into(),
    }
}

/// `peer add|del|list <id>`
pub fn peer(ctx: &Context, sub: &str, arg: Option<&str>) -> Outcome {
    if let Some(deny) = require_admin(ctx) {
        return deny;
    }
    match sub {
        "list" => list_ids(ctx.storage.list_peers()),
        "add" => mutate(arg, |id| ctx.storage.add_peer(id)),
        "del" => mutate(arg, |id| ctx.storage.remove_peer(id)),
        _ => Reply::Text("usage: peer add|del|list <id>".to_string()).into(),
    }
}

/// `sync now|on|off`
pub fn sync(ctx: &Context, sub: &str) -> Outcome {
    if let Some(deny) = require_admin(ctx) {
        return deny;
    }
    match sub {
        "now" => Outcome { reply: Reply::Text("sync requested".to_string()), effect: Some(Effect::SyncNow) },
        "on" => Outcome { reply: Reply::Text("sync on".to_string()), effect: Some(Effect::SyncOn) },
        "off" => Outcome { reply: Reply::Text("sync off".to_string()), effect: Some(Effect::SyncOff) },
        _ => Reply::Text("usage: sync now|on|off".to_string()).into(),
    }
}

/// `info set [<hours>] <text>`
pub fn info_set(ctx: &Context, rest: &str) -> Outcome {
    if let Some(deny) = require_admin(ctx) {
        return deny;
    }
    let rest = rest.trim();
    if rest.is_empty() {
        if let Err(e) = ctx.storage.kv_delete("notice") {
            return Reply::Text(format!("store error: {e}")).into();
        }
        let _ = ctx.storage.kv_delete("notice_expires_ts");
        return Reply::Text("notice cleared".to_string()).into();
    }

    let (hours, text) = match rest.split_once(char::is_whitespace) {
        Some((maybe_hours, remainder)) if maybe_hours.parse::<u64>().is_ok() => {
            (maybe_hours.parse::<u64>().ok(), remainder)
        }
        _ => (None, rest),
    };

    if let Err(e) = ctx.storage.kv_set("notice", text) {
        return Reply::Text(format!("store error: {e}")).into();
    }
    if let Err(e) = ctx.storage.kv_set("notice_ts", &ctx.now.to_string()) {
        return Reply::Text(format!("store error: {e}")).into();
    }
    match hours {
        Some(h) => {
            let expires = ctx.now + (h as i64) * 3600;
            let _ = ctx.storage.kv_set("notice_expires_ts", &expires.to_string());
        }
        None => {
            let _ = ctx.storage.kv_delete("notice_expires_ts");
        }
    }
    Reply::Text("notice set".to_string()).into()
}

/// `health [full]`
pub fn health(ctx: &Context, full: bool) -> Outcome {
    if !ctx.health_public && !ctx.is_admin {
        return Reply::Text(ADMIN_ONLY.to_string()).into();
    }
    if !full {
        return Reply::Text(format!("{} ok", ctx.name)).into();
    }
    let posts = ctx.storage.post_count().unwrap_or(-1);
    let admins = ctx.storage.admin_count().unwrap_or(-1);
    let peers = ctx.storage.list_peers().map(|p| p.len() as i64).unwrap_or(-1);
    let blacklist = ctx.storage.list_blacklist().map(|p| p.len() as i64).unwrap_or(-1);
    let pending_dms = ctx.storage.pending_dm_count().unwrap_or(-1);
    let uptime = crate::time::format_uptime(ctx.now - ctx.start_ts);
    Reply::Paged {
        title: None,
        lines: vec![
            format!("{} health", ctx.name),
            format!("posts={posts} admins={admins} peers={peers} bl={blacklist}"),
            format!("pending_dms={pending_dms} up={uptime}"),
        ],
    }
    .into()
}

fn list_ids(result: crate::error::Result<Vec<String>>) -> Outcome {
    match result {
        Ok(ids) if ids.is_empty() => Reply::Text("(none)".to_string()).into(),
        Ok(ids) => Reply::Paged { title: None, lines: ids }.into(),
        Err(e) => Reply::Text(format!("store error: {e}")).into(),
    }
}

fn mutate(arg: Option<&str>, f: impl FnOnce(&str) -> crate::error::Result<()>) -> Outcome {
    let Some(id) = arg else {
        return Reply::Text("usage: <cmd> <id>".to_string()).into();
    };
    match f(id) {
        Ok(()) => Reply::Text("ok".to_string()).into(),
        Err(e) => Reply::Text(format!("store error: {e}")).into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Storage;
    use crate::transport::MockTransport;

    fn ctx<'a>(storage: &'a Storage, transport: &'a MockTransport, is_admin: bool) -> Context<'a> {
        Context {
            storage,
            transport,
            sender: "!aaaaaaaa",
            nodes: transport.nodes(),
            now: 1000,
            is_admin,
            name: "MeshLink BBS",
            max_text: 140,
            tz: "UTC",
            health_public: false,
            start_ts: 0,
        }
    }

    #[test]
    fn non_admin_is_rejected() {
        let s = Storage::open_in_memory().unwrap();
        let t = MockTransport::new();
        let c = ctx(&s, &t, false);
        assert_eq!(admins(&c, "list", None).reply, Reply::Text("admin only".to_string()));
    }

    #[test]
    fn admin_add_is_idempotent() {
        let s = Storage::open_in_memory().unwrap();
        let t = MockTransport::new();
        let c = ctx(&s, &t, true);
        admins(&c, "add", Some("!bbbbbbbb"));
        admins(&c, "add", Some("!bbbbbbbb"));
        assert_eq!(s.admin_count().unwrap(), 1);
    }

    #[test]
    fn info_set_with_hours_sets_expiry() {
        let s = Storage::open_in_memory().unwrap();
        let t = MockTransport::new();
        let c = ctx(&s, &t, true);
        info_set(&c, "3 back online soon");
        assert_eq!(s.kv_get("notice").unwrap().as_deref(), Some("back online soon"));
        assert_eq!(s.kv_get("notice_expires_ts").unwrap().as_deref(), Some("11800"));
    }

    #[test]
    fn info_set_without_hours_has_no_expiry() {
        let s = Storage::open_in_memory().unwrap();
        let t = MockTransport::new();
        let c = ctx(&s, &t, true);
        info_set(&c, "hello everyone");
        assert_eq!(s.kv_get("notice").unwrap().as_deref(), Some("hello everyone"));
        assert_eq!(s.kv_get("notice_expires_ts").unwrap(), None);
    }

    #[test]
    fn health_is_gated_unless_public() {
        let s = Storage::open_in_memory().unwrap();
        let t = MockTransport::new();
        let c = ctx(&s, &t, false);
        assert_eq!(health(&c, false).reply, Reply::Text("admin only".to_string()));
    }

    #[test]
    fn sync_now_emits_effect() {
        let s = Storage::open_in_memory().unwrap();
        let t = MockTransport::new();
        let c = ctx(&s, &t, true);
        let outcome = sync(&c, "now");
        assert_eq!(outcome.effect, Some(Effect::SyncNow));
    }
}
