//! Persistence Store (component A). A single SQLite connection
//! behind a mutex, in the shape of a `merkle-tox-sqlite::Storage`:
//! open/open_in_memory constructors, a `schema::CREATE_TABLES` batch applied
//! once at open time, and one method per table operation using
//! `prepare_cached` on the hot paths and `INSERT OR IGNORE` / `ON CONFLICT`
//! for idempotent admin mutations.

mod schema;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: i64,
    pub ts: i64,
    pub author: String,
    pub body: String,
    pub reply_to: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmOut {
    pub id: i64,
    pub to_id: String,
    pub body: String,
    pub created_ts: i64,
    pub delivered_ts: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxParts {
    pub uid: String,
    pub total: i64,
    pub got: i64,
    pub data: String,
    pub from_id: String,
    pub created_ts: i64,
}

pub struct Storage {
    conn: Mutex<Connection>,
}

impl Storage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(schema::CREATE_TABLES)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(schema::CREATE_TABLES)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    // ---- Posts -----------------------------------------------------

    pub fn insert_post(&self, ts: i64, author: &str, body: &str, reply_to: Option<i64>) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO posts (ts, author, body, reply_to) VALUES (?1, ?2, ?3, ?4)",
            params![ts, author, body, reply_to],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_post(&self, id: i64) -> Result<Option<Post>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, ts, author, body, reply_to FROM posts WHERE id = ?1",
            params![id],
            row_to_post,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn replies_to(&self, parent_id: i64) -> Result<Vec<Post>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(
            "SELECT id, ts, author, body, reply_to FROM posts WHERE reply_to = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![parent_id], row_to_post)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Newest-first page of the most recent posts.
    pub fn recent_posts(&self, limit: i64) -> Result<Vec<Post>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(
            "SELECT id, ts, author, body, reply_to FROM posts ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], row_to_post)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Most recent post ids, ascending — the shape an inventory frame wants.
    pub fn recent_post_ids(&self, limit: i64) -> Result<Vec<i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached("SELECT id FROM posts ORDER BY id DESC LIMIT ?1")?;
        let rows = stmt.query_map(params![limit], |r| r.get::<_, i64>(0))?;
        let mut ids = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        ids.reverse();
        Ok(ids)
    }

    pub fn has_post(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached("SELECT 1 FROM posts WHERE id = ?1")?;
        Ok(stmt.exists(params![id])?)
    }

    // ---- KV / notice -------------------------------------------------

    pub fn kv_get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT v FROM kv WHERE k = ?1", params![key], |r| r.get(0))
            .optional()
            .map_err(Into::into)
    }

    pub fn kv_set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO kv (k, v) VALUES (?1, ?2) ON CONFLICT(k) DO UPDATE SET v = ?2",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn kv_delete(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM kv WHERE k = ?1", params![key])?;
        Ok(())
    }

    // ---- Admins / blacklist / peers ----------------------------------

    pub fn add_admin(&self, id: &str) -> Result<()> {
        self.insert_ignore("admins", id)
    }

    pub fn remove_admin(&self, id: &str) -> Result<()> {
        self.delete_by_id("admins", id)
    }

    pub fn list_admins(&self) -> Result<Vec<String>> {
        self.list_ids("admins")
    }

    pub fn is_admin_member(&self, id: &str) -> Result<bool> {
        self.contains_id("admins", id)
    }

    pub fn admin_count(&self) -> Result<i64> {
        self.count("admins")
    }

    pub fn add_blacklist(&self, id: &str) -> Result<()> {
        self.insert_ignore("blacklist", id)
    }

    pub fn remove_blacklist(&self, id: &str) -> Result<()> {
        self.delete_by_id("blacklist", id)
    }

    pub fn list_blacklist(&self) -> Result<Vec<String>> {
        self.list_ids("blacklist")
    }

    pub fn is_blacklisted(&self, id: &str) -> Result<bool> {
        self.contains_id("blacklist", id)
    }

    pub fn add_peer(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO peers (id, last_seen) VALUES (?1, NULL)",
            params![id],
        )?;
        Ok(())
    }

    pub fn remove_peer(&self, id: &str) -> Result<()> {
        self.delete_by_id("peers", id)
    }

    pub fn list_peers(&self) -> Result<Vec<String>> {
        self.list_ids("peers")
    }

    pub fn is_peer(&self, id: &str) -> Result<bool> {
        self.contains_id("peers", id)
    }

    pub fn touch_peer(&self, id: &str, ts: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE peers SET last_seen = ?2 WHERE id = ?1",
            params![id, ts],
        )?;
        Ok(())
    }

    fn insert_ignore(&self, table: &str, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!("INSERT OR IGNORE INTO {table} (id) VALUES (?1)"),
            params![id],
        )?;
        Ok(())
    }

    fn delete_by_id(&self, table: &str, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![id])?;
        Ok(())
    }

    fn list_ids(&self, table: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("SELECT id FROM {table} ORDER BY id ASC"))?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    fn contains_id(&self, table: &str, id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(&format!("SELECT 1 FROM {table} WHERE id = ?1"))?;
        Ok(stmt.exists(params![id])?)
    }

    fn count(&self, table: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(&format!("SELECT count(*) FROM {table}"), [], |r| r.get(0))
            .map_err(Into::into)
    }

    // ---- Seen / applied UIDs ------------------------------------------

    pub fn mark_seen_uid(&self, uid: &str, ts: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO seen_uids (uid, ts) VALUES (?1, ?2)",
            params![uid, ts],
        )?;
        Ok(())
    }

    pub fn is_applied_uid(&self, uid: &str) -> Result<bool> {
        self.contains_uid("applied_uids", uid)
    }

    pub fn mark_applied_uid(&self, uid: &str, ts: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO applied_uids (uid, ts) VALUES (?1, ?2)",
            params![uid, ts],
        )?;
        Ok(())
    }

    fn contains_uid(&self, table: &str, uid: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(&format!("SELECT 1 FROM {table} WHERE uid = ?1"))?;
        Ok(stmt.exists(params![uid])?)
    }

    // ---- Reassembly (RxParts) ------------------------------------------

    pub fn get_rxparts(&self, uid: &str) -> Result<Option<RxParts>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT uid, total, got, data, from_id, created_ts FROM rxparts WHERE uid = ?1",
            params![uid],
            row_to_rxparts,
        )
        .optional()
        .map_err(Into::into)
    }

    /// `POST` header: create the row if absent; ignored if it already exists.
    pub fn open_rxparts(&self, uid: &str, total: i64, from_id: &str, created_ts: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO rxparts (uid, total, got, data, from_id, created_ts)
             VALUES (?1, ?2, 0, '', ?3, ?4)",
            params![uid, total, from_id, created_ts],
        )?;
        Ok(())
    }

    /// `PART`: append a chunk in arrival order and bump `got`/`total`.
    /// Returns the row as it stands after the update, or `None` if no
    /// header (or lazily-created row) exists to append to.
    pub fn append_rxpart(&self, uid: &str, chunk: &str, total: i64) -> Result<Option<RxParts>> {
        let conn = self.conn.lock().unwrap();
        let existing: Option<(i64, i64, String)> = conn
            .query_row(
                "SELECT total, got, data FROM rxparts WHERE uid = ?1",
                params![uid],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;
        let Some((_old_total, got, mut data)) = existing else {
            return Ok(None);
        };
        data.push_str(chunk);
        let new_got = got + 1;
        conn.execute(
            "UPDATE rxparts SET data = ?2, got = ?3, total = ?4 WHERE uid = ?1",
            params![uid, data, new_got, total],
        )?;
        Ok(Some(RxParts {
            uid: uid.to_string(),
            total,
            got: new_got,
            data,
            from_id: conn.query_row(
                "SELECT from_id FROM rxparts WHERE uid = ?1",
                params![uid],
                |r| r.get(0),
            )?,
            created_ts: conn.query_row(
                "SELECT created_ts FROM rxparts WHERE uid = ?1",
                params![uid],
                |r| r.get(0),
            )?,
        }))
    }

    /// Lazily creates a row on the first PART when the header was lost.
    pub fn lazily_open_rxparts(&self, uid: &str, total: i64, from_id: &str, created_ts: i64) -> Result<()> {
        self.open_rxparts(uid, total, from_id, created_ts)
    }

    pub fn delete_rxparts(&self, uid: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM rxparts WHERE uid = ?1", params![uid])?;
        Ok(())
    }

    /// Garbage-collects reassembly buffers older than `ttl_secs` that never
    /// completed (`got < total`).
    pub fn gc_stale_rxparts(&self, now: i64, ttl_secs: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.execute(
            "DELETE FROM rxparts WHERE got < total AND created_ts < ?1",
            params![now - ttl_secs],
        )?)
    }

    // ---- DM queue ------------------------------------------------------

    pub fn insert_dm(&self, to_id: &str, body: &str, created_ts: i64) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO dm_out (to_id, body, created_ts, delivered_ts) VALUES (?1, ?2, ?3, NULL)",
            params![to_id, body, created_ts],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Up to `limit` undelivered rows for `to_id`, oldest first.
    pub fn undelivered_dms(&self, to_id: &str, limit: i64) -> Result<Vec<DmOut>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(
            "SELECT id, to_id, body, created_ts, delivered_ts FROM dm_out
             WHERE to_id = ?1 AND delivered_ts IS NULL ORDER BY id ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![to_id, limit], row_to_dm)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn mark_dm_delivered(&self, id: i64, ts: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE dm_out SET delivered_ts = ?2 WHERE id = ?1 AND delivered_ts IS NULL",
            params![id, ts],
        )?;
        Ok(())
    }

    /// Deletes undelivered DMs older than `ttl_secs`. TTL_HOURS expiry is
    /// an optional extension, disabled when `ttl_secs` is zero.
    pub fn expire_undelivered_dms(&self, now: i64, ttl_secs: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.execute(
            "DELETE FROM dm_out WHERE delivered_ts IS NULL AND created_ts < ?1",
            params![now - ttl_secs],
        )?)
    }

    pub fn pending_dm_count(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT count(*) FROM dm_out WHERE delivered_ts IS NULL",
            [],
            |r| r.get(0),
        )
        .map_err(Into::into)
    }

    pub fn post_count(&self) -> Result<i64> {
        self.count("posts")
    }
}

fn row_to_post(r: &rusqlite::Row) -> rusqlite::Result<Post> {
    Ok(Post {
        id: r.get(0)?,
        ts: r.get(1)?,
        author: r.get(2)?,
        body: r.get(3)?,
        reply_to: r.get(4)?,
    })
}

fn row_to_dm(r: &rusqlite::Row) -> rusqlite::Result<DmOut> {
    Ok(DmOut {
        id: r.get(0)?,
        to_id: r.get(1)?,
        body: r.get(2)?,
        created_ts: r.get(3)?,
        delivered_ts: r.get(4)?,
    })
}

fn row_to_rxparts(r: &rusqlite::Row) -> rusqlite::Result<RxParts> {
    Ok(RxParts {
        uid: r.get(0)?,
        total: r.get(1)?,
        got: r.get(2)?,
        data: r.get(3)?,
        from_id: r.get(4)?,
        created_ts: r.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_round_trip() {
        let s = Storage::open_in_memory().unwrap();
        let id = s.insert_post(100, "!aaaaaaaa", "hello", None).unwrap();
        assert_eq!(id, 1);
        let p = s.get_post(id).unwrap().unwrap();
        assert_eq!(p.body, "hello");
        assert_eq!(p.reply_to, None);
    }

    #[test]
    fn replies_ordered_by_id() {
        let s = Storage::open_in_memory().unwrap();
        let parent = s.insert_post(1, "!aaaaaaaa", "root", None).unwrap();
        s.insert_post(2, "!bbbbbbbb", "first", Some(parent)).unwrap();
        s.insert_post(3, "!cccccccc", "second", Some(parent)).unwrap();
        let replies = s.replies_to(parent).unwrap();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].body, "first");
        assert_eq!(replies[1].body, "second");
    }

    #[test]
    fn admin_mutations_are_idempotent() {
        let s = Storage::open_in_memory().unwrap();
        s.add_admin("!aaaaaaaa").unwrap();
        s.add_admin("!aaaaaaaa").unwrap();
        assert_eq!(s.admin_count().unwrap(), 1);
        s.remove_admin("!aaaaaaaa").unwrap();
        s.remove_admin("!aaaaaaaa").unwrap();
        assert_eq!(s.admin_count().unwrap(), 0);
    }

    #[test]
    fn applied_uid_gates_reapplication() {
        let s = Storage::open_in_memory().unwrap();
        assert!(!s.is_applied_uid("abc").unwrap());
        s.mark_applied_uid("abc", 1).unwrap();
        s.mark_applied_uid("abc", 2).unwrap();
        assert!(s.is_applied_uid("abc").unwrap());
    }

    #[test]
    fn rxparts_accumulate_in_arrival_order() {
        let s = Storage::open_in_memory().unwrap();
        s.open_rxparts("u1", 2, "!aaaaaaaa", 0).unwrap();
        let r = s.append_rxpart("u1", "world", 2).unwrap().unwrap();
        assert_eq!(r.data, "world");
        let r = s.append_rxpart("u1", "hello", 2).unwrap().unwrap();
        assert_eq!(r.data, "worldhello");
        assert_eq!(r.got, 2);
    }

    #[test]
    fn dm_delivered_rows_are_immutable() {
        let s = Storage::open_in_memory().unwrap();
        let id = s.insert_dm("!aaaaaaaa", "hi", 0).unwrap();
        s.mark_dm_delivered(id, 5).unwrap();
        s.mark_dm_delivered(id, 9).unwrap();
        let undelivered = s.undelivered_dms("!aaaaaaaa", 10).unwrap();
        assert!(undelivered.is_empty());
    }
}
