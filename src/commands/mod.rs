//! Command surface (component F, user+admin) — handlers grouped by
//! audience into per-concern modules rather than one giant match statement.

pub mod admin;
pub mod user;

use crate::store::Storage;
use crate::transport::{NodeEntry, NodeKey, Transport};

/// A handler's outcome. `Paged` is run through the Pager before sending;
/// `Text` is a single short frame sent as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Silent,
    Text(String),
    Paged { title: Option<String>, lines: Vec<String> },
}

/// Everything a handler needs: the store, the sender's identity, the live
/// node directory, and the ambient config values that shape presentation.
pub struct Context<'a> {
    pub storage: &'a Storage,
    pub transport: &'a dyn Transport,
    pub sender: &'a str,
    pub nodes: Vec<(NodeKey, NodeEntry)>,
    pub now: i64,
    pub is_admin: bool,
    pub name: &'a str,
    pub max_text: usize,
    pub tz: &'a str,
    pub health_public: bool,
    pub start_ts: i64,
}

/// A side effect the dispatcher must act on after the handler returns,
/// beyond sending `reply`. Handlers never touch peers/transport config
/// directly — replication and sync toggling are the dispatcher's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    PostCreated(i64),
    SyncNow,
    SyncOn,
    SyncOff,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Outcome {
    pub reply: Reply,
    pub effect: Option<Effect>,
}

impl Default for Reply {
    fn default() -> Self {
        Reply::Silent
    }
}

impl From<Reply> for Outcome {
    fn from(reply: Reply) -> Self {
        Outcome { reply, effect: None }
    }
}
