use anyhow::Result;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS locks (
    key TEXT PRIMARY KEY,
    instance_id TEXT NOT NULL,
    acquired_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);

-- Users: raw JSON with generated lookup columns
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    updated_at INTEGER DEFAULT (unixepoch()),
    name TEXT GENERATED ALWAYS AS (json_extract(data, '$.name')) VIRTUAL,
    display_name TEXT GENERATED ALWAYS AS (json_extract(data, '$.profile.display_name')) VIRTUAL,
    real_name TEXT GENERATED ALWAYS AS (json_extract(data, '$.profile.real_name')) VIRTUAL,
    email TEXT GENERATED ALWAYS AS (json_extract(data, '$.profile.email')) VIRTUAL,
    is_bot INTEGER GENERATED ALWAYS AS (json_extract(data, '$.is_bot')) VIRTUAL,
    deleted INTEGER GENERATED ALWAYS AS (json_extract(data, '$.deleted')) VIRTUAL
);

CREATE VIRTUAL TABLE IF NOT EXISTS users_fts USING fts5(
    name, display_name, real_name, email
);

CREATE TRIGGER IF NOT EXISTS users_ai AFTER INSERT ON users BEGIN
    INSERT INTO users_fts(rowid, name, display_name, real_name, email)
    VALUES (
        new.rowid,
        json_extract(new.data, '$.name'),
        json_extract(new.data, '$.profile.display_name'),
        json_extract(new.data, '$.profile.real_name'),
        json_extract(new.data, '$.profile.email')
    );
END;

CREATE TRIGGER IF NOT EXISTS users_ad AFTER DELETE ON users BEGIN
    DELETE FROM users_fts WHERE rowid = old.rowid;
END;

-- Forum channels only
CREATE TABLE IF NOT EXISTS channels (
    id TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    updated_at INTEGER DEFAULT (unixepoch()),
    name TEXT GENERATED ALWAYS AS (json_extract(data, '$.name')) VIRTUAL,
    is_archived INTEGER GENERATED ALWAYS AS (json_extract(data, '$.is_archived')) VIRTUAL,
    is_private INTEGER GENERATED ALWAYS AS (json_extract(data, '$.is_private')) VIRTUAL
);

CREATE VIRTUAL TABLE IF NOT EXISTS channels_fts USING fts5(
    name, topic, purpose
);

CREATE TRIGGER IF NOT EXISTS channels_ai AFTER INSERT ON channels BEGIN
    INSERT INTO channels_fts(rowid, name, topic, purpose)
    VALUES (
        new.rowid,
        json_extract(new.data, '$.name'),
        json_extract(new.data, '$.topic.value'),
        json_extract(new.data, '$.purpose.value')
    );
END;

CREATE TRIGGER IF NOT EXISTS channels_ad AFTER DELETE ON channels BEGIN
    DELETE FROM channels_fts WHERE rowid = old.rowid;
END;

-- Indexed forum messages, thread replies included
CREATE TABLE IF NOT EXISTS messages (
    channel_id TEXT NOT NULL,
    ts TEXT NOT NULL,
    thread_ts TEXT,
    user_id TEXT,
    text TEXT NOT NULL,
    reply_count INTEGER NOT NULL DEFAULT 0,
    reaction_count INTEGER NOT NULL DEFAULT 0,
    is_bot INTEGER NOT NULL DEFAULT 0,
    ts_epoch REAL NOT NULL,
    indexed_at INTEGER DEFAULT (unixepoch()),
    PRIMARY KEY (channel_id, ts)
);

CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(channel_id, thread_ts);
CREATE INDEX IF NOT EXISTS idx_messages_epoch ON messages(ts_epoch);
CREATE INDEX IF NOT EXISTS idx_messages_user ON messages(user_id);

CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts USING fts5(
    text,
    tokenize = 'porter unicode61'
);

CREATE TRIGGER IF NOT EXISTS messages_ai AFTER INSERT ON messages BEGIN
    INSERT INTO messages_fts(rowid, text) VALUES (new.rowid, new.text);
END;

CREATE TRIGGER IF NOT EXISTS messages_ad AFTER DELETE ON messages BEGIN
    DELETE FROM messages_fts WHERE rowid = old.rowid;
END;

CREATE TRIGGER IF NOT EXISTS messages_au AFTER UPDATE OF text ON messages BEGIN
    DELETE FROM messages_fts WHERE rowid = old.rowid;
    INSERT INTO messages_fts(rowid, text) VALUES (new.rowid, new.text);
END;

CREATE TABLE IF NOT EXISTS channel_sync (
    channel_id TEXT PRIMARY KEY,
    latest_ts TEXT NOT NULL,
    synced_at INTEGER DEFAULT (unixepoch())
);

-- History left unread when paging hit its per-round limit
CREATE TABLE IF NOT EXISTS channel_backfill (
    channel_id TEXT PRIMARY KEY,
    oldest_ts TEXT NOT NULL,
    latest_ts TEXT NOT NULL
);

-- External documentation
CREATE TABLE IF NOT EXISTS docs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    title TEXT NOT NULL,
    url TEXT NOT NULL,
    content TEXT NOT NULL,
    fetched_at INTEGER DEFAULT (unixepoch())
);

CREATE INDEX IF NOT EXISTS idx_docs_source ON docs(source);

CREATE VIRTUAL TABLE IF NOT EXISTS docs_fts USING fts5(
    title, content,
    tokenize = 'porter unicode61'
);

CREATE TRIGGER IF NOT EXISTS docs_ai AFTER INSERT ON docs BEGIN
    INSERT INTO docs_fts(rowid, title, content) VALUES (new.rowid, new.title, new.content);
END;

CREATE TRIGGER IF NOT EXISTS docs_ad AFTER DELETE ON docs BEGIN
    DELETE FROM docs_fts WHERE rowid = old.rowid;
END;

-- Analytics
CREATE TABLE IF NOT EXISTS tool_calls (
    id TEXT PRIMARY KEY,
    tool TEXT NOT NULL,
    query TEXT,
    success INTEGER NOT NULL,
    result_count INTEGER,
    latency_ms INTEGER NOT NULL,
    error TEXT,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tool_calls_created ON tool_calls(created_at);

CREATE TABLE IF NOT EXISTS feedback (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    call_id TEXT NOT NULL REFERENCES tool_calls(id) ON DELETE CASCADE,
    helpful INTEGER NOT NULL,
    comment TEXT,
    created_at INTEGER NOT NULL
);
"#;

pub(super) async fn initialize_schema(pool: &Pool<SqliteConnectionManager>) -> Result<()> {
    let conn = pool.get()?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
}
