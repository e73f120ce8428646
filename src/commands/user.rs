//! User-facing command handlers: `r`, `p`/`post`, `reply`, `info`, `status`,
//! `whoami`, `whois`, `nodes`, `dm`, `?`, `??`.

use crate::canon::{find_entry_by_canon, resolve_short_name};
use crate::commands::{Context, Effect, Outcome, Reply};
use crate::dm_queue;
use crate::pager::build_menu;
use crate::time::{format_notice_title, format_short, format_uptime};

const RECENT_LIMIT: i64 = 10;

/// `r` — newest-first list of the last 10 posts.
pub fn list_recent(ctx: &Context) -> Outcome {
    let posts = match ctx.storage.recent_posts(RECENT_LIMIT) {
        Ok(p) => p,
        Err(e) => return Reply::Text(format!("store error: {e}")).into(),
    };
    let lines: Vec<String> = posts
        .iter()
        .map(|p| format!("#{} {} {}: {}", p.id, format_short(p.ts, ctx.tz), p.author, p.body))
        .collect();
    if lines.is_empty() {
        return Reply::Text("(no posts yet)".to_string()).into();
    }
    Reply::Paged { title: None, lines }.into()
}

/// `r <id>` — post header, body, and replies ordered by id.
pub fn show_post(ctx: &Context, id: i64) -> Outcome {
    let post = match ctx.storage.get_post(id) {
        Ok(Some(p)) => p,
        Ok(None) => return Reply::Text(format!("no such post #{id}")).into(),
        Err(e) => return Reply::Text(format!("store error: {e}")).into(),
    };
    let mut lines = vec![format!("#{} {} {}: {}", post.id, format_short(post.ts, ctx.tz), post.author, post.body)];
    match ctx.storage.replies_to(id) {
        Ok(replies) => {
            for r in replies {
                lines.push(format!("\u{21b3} #{} {} {}: {}", r.id, format_short(r.ts, ctx.tz), r.author, r.body));
            }
        }
        Err(e) => lines.push(format!("(error loading replies: {e})")),
    }
    Reply::Paged { title: None, lines }.into()
}

/// `p <text>` / `post <text>` — create a top-level Post.
pub fn post(ctx: &Context, text: &str) -> Outcome {
    if text.trim().is_empty() {
        return Reply::Text("usage: p <text>".to_string()).into();
    }
    match ctx.storage.insert_post(ctx.now, ctx.sender, text.trim(), None) {
        Ok(id) => Outcome {
            reply: Reply::Text(format!("posted #{id}")),
            effect: Some(Effect::PostCreated(id)),
        },
        Err(e) => Reply::Text(format!("store error: {e}")).into(),
    }
}

/// `reply <id> <text>` — create a Post with `reply_to=<id>`.
pub fn reply(ctx: &Context, parent_id: i64, text: &str) -> Outcome {
    if text.trim().is_empty() {
        return Reply::Text("usage: reply <id> <text>".to_string()).into();
    }
    match ctx.storage.has_post(parent_id) {
        Ok(false) => return Reply::Text(format!("no such post #{parent_id}")).into(),
        Err(e) => return Reply::Text(format!("store error: {e}")).into(),
        Ok(true) => {}
    }
    match ctx.storage.insert_post(ctx.now, ctx.sender, text.trim(), Some(parent_id)) {
        Ok(id) => Outcome {
            reply: Reply::Text(format!("reply #{id} -> #{parent_id}")),
            effect: Some(Effect::PostCreated(id)),
        },
        Err(e) => Reply::Text(format!("store error: {e}")).into(),
    }
}

/// `info` — the standalone notice command (no menu).
pub fn info(ctx: &Context) -> Outcome {
    match notice_lines(ctx) {
        Some(lines) => Reply::Paged {
            title: Some(format_notice_title(notice_ts(ctx).unwrap_or(ctx.now), ctx.tz)),
            lines,
        }
        .into(),
        None => Reply::Text("(no notice)".to_string()).into(),
    }
}

/// `?` — notice (if any) followed by the menu. Returns both frames since a
/// single `Reply` carries one page family; the dispatcher sends the notice
/// first when present.
pub fn menu_with_notice(ctx: &Context) -> (Option<Outcome>, Outcome) {
    let notice = match notice_lines(ctx) {
        Some(lines) => Some(
            Reply::Paged {
                title: Some(format_notice_title(notice_ts(ctx).unwrap_or(ctx.now), ctx.tz)),
                lines,
            }
            .into(),
        ),
        None => None,
    };
    let menu = Reply::Text(build_menu(ctx.name, ctx.max_text)).into();
    (notice, menu)
}

fn notice_ts(ctx: &Context) -> Option<i64> {
    ctx.storage.kv_get("notice_ts").ok().flatten().and_then(|s| s.parse().ok())
}

fn notice_lines(ctx: &Context) -> Option<Vec<String>> {
    let body = ctx.storage.kv_get("notice").ok().flatten()?;
    if body.is_empty() {
        return None;
    }
    if let Ok(Some(expires)) = ctx.storage.kv_get("notice_expires_ts") {
        if let Ok(expires) = expires.parse::<i64>() {
            if ctx.now > expires {
                return None;
            }
        }
    }
    Some(body.lines().map(|l| l.to_string()).collect())
}

/// `??` — paged help listing the full command surface.
pub fn help(ctx: &Context) -> Outcome {
    let lines = vec![
        "r - last 10 posts".to_string(),
        "r <id> - post + replies".to_string(),
        "p <text> - new post".to_string(),
        "reply <id> <text> - reply to a post".to_string(),
        "info - show notice".to_string(),
        "status - gateway status".to_string(),
        "whoami - your node id".to_string(),
        "whois <short> - look up a node".to_string(),
        "nodes - list known nodes".to_string(),
        "dm <short> <text> - queue a direct message".to_string(),
        "? - notice + menu".to_string(),
        "?? - this help".to_string(),
    ];
    Reply::Paged { title: None, lines }.into()
}

/// `status` — this gateway's own long/short name plus uptime.
pub fn status(ctx: &Context) -> Outcome {
    let info = ctx.transport.my_node_info();
    let long = info.as_ref().and_then(|e| e.long_name.clone()).unwrap_or_else(|| ctx.name.to_string());
    let short = info.as_ref().and_then(|e| e.short_name.clone()).unwrap_or_default();
    let uptime = format_uptime(ctx.now - ctx.start_ts);
    Reply::Text(format!("{long} / {short} / up {uptime}")).into()
}

/// `whoami` — sender's canonical id and known short/long names.
pub fn whoami(ctx: &Context) -> Outcome {
    match find_entry_by_canon(&ctx.nodes, ctx.sender) {
        Some(entry) => Reply::Text(format!(
            "{} {}/{}",
            ctx.sender,
            entry.short_name.as_deref().unwrap_or("?"),
            entry.long_name.as_deref().unwrap_or("?")
        ))
        .into(),
        None => Reply::Text(ctx.sender.to_string()).into(),
    }
}

/// `whois <short>` — case-insensitive short-name lookup.
pub fn whois(ctx: &Context, short: &str) -> Outcome {
    match resolve_short_name(&ctx.nodes, short) {
        Some(id) => {
            let entry = find_entry_by_canon(&ctx.nodes, &id);
            let long = entry.and_then(|e| e.long_name.as_deref()).unwrap_or("?");
            Reply::Text(format!("{short} = {id} ({long})")).into()
        }
        None => Reply::Text(format!("no node with short '{short}'")).into(),
    }
}

/// `nodes` — paged listing sorted by short-name ascending.
pub fn nodes(ctx: &Context) -> Outcome {
    if ctx.nodes.is_empty() {
        return Reply::Text("(no nodes)".to_string()).into();
    }
    let mut rows: Vec<(String, String)> = ctx
        .nodes
        .iter()
        .map(|(key, entry)| {
            let id = crate::canon::canon_node_key(key);
            let short = entry.short_name.clone().unwrap_or_else(|| "?".to_string());
            (short, id)
        })
        .collect();
    rows.sort_by(|a, b| a.0.to_lowercase().cmp(&b.0.to_lowercase()));
    let lines = rows.into_iter().map(|(short, id)| format!("{short} {id}")).collect();
    Reply::Paged { title: None, lines }.into()
}

/// `dm <short> <text>` — resolve a short-name and queue a DM.
pub fn dm(ctx: &Context, short: &str, text: &str) -> Outcome {
    if text.trim().is_empty() {
        return Reply::Text("usage: dm <short> <text>".to_string()).into();
    }
    match dm_queue::enqueue(ctx.storage, &ctx.nodes, short, text.trim(), ctx.now) {
        Ok((_to_id, id)) => Reply::Text(format!("queued dm to {short} ({id})")).into(),
        Err(e) => Reply::Text(e).into(),
    }
}
