/// Schema for the engine's SQLite tables.
pub const SCHEMA: &str = r#"
-- Transactional record store backend
CREATE TABLE IF NOT EXISTS cache_records (
    cache_key TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    size_bytes INTEGER NOT NULL,
    checksum TEXT NOT NULL,
    cache_type TEXT NOT NULL,
    date_from TEXT,
    date_to TEXT,
    created_at TEXT NOT NULL
);

-- Flat key/value store written by older releases (read/cleanup only)
CREATE TABLE IF NOT EXISTS legacy_kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Per-tenant download checkpoints
CREATE TABLE IF NOT EXISTS download_progress (
    progress_key TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Interruptions the user chose not to resume
CREATE TABLE IF NOT EXISTS dismissed_interruptions (
    tenant TEXT NOT NULL,
    current_chunk INTEGER NOT NULL,
    total_chunks INTEGER NOT NULL,
    dismissed_at TEXT NOT NULL,
    PRIMARY KEY (tenant, current_chunk, total_chunks)
);

-- Watermark of the last completed sync per tenant
CREATE TABLE IF NOT EXISTS sync_state (
    tenant TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;
