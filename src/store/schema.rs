pub const CREATE_TABLES: &str = "
    CREATE TABLE IF NOT EXISTS posts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ts INTEGER NOT NULL,
        author TEXT NOT NULL,
        body TEXT NOT NULL,
        reply_to INTEGER
    );

    CREATE INDEX IF NOT EXISTS idx_posts_reply_to ON posts(reply_to);

    CREATE TABLE IF NOT EXISTS kv (
        k TEXT PRIMARY KEY,
        v TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS admins (
        id TEXT PRIMARY KEY
    );

    CREATE TABLE IF NOT EXISTS blacklist (
        id TEXT PRIMARY KEY
    );

    CREATE TABLE IF NOT EXISTS peers (
        id TEXT PRIMARY KEY,
        last_seen INTEGER
    );

    CREATE TABLE IF NOT EXISTS seen_uids (
        uid TEXT PRIMARY KEY,
        ts INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS applied_uids (
        uid TEXT PRIMARY KEY,
        ts INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS rxparts (
        uid TEXT PRIMARY KEY,
        total INTEGER NOT NULL,
        got INTEGER NOT NULL,
        data TEXT NOT NULL,
        from_id TEXT NOT NULL,
        created_ts INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS dm_out (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        to_id TEXT NOT NULL,
        body TEXT NOT NULL,
        created_ts INTEGER NOT NULL,
        delivered_ts INTEGER
    );

    CREATE INDEX IF NOT EXISTS idx_dm_out_to_id ON dm_out(to_id, id);
";
