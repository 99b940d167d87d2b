//! SQLite schema for the auxiliary store.
//!
//! Applied on every start; all statements are idempotent.

/// Tables, indexes and triggers.
pub const SQLITE_SCHEMA: &str = r"
-- Oracle connection vault
CREATE TABLE IF NOT EXISTS oracle_connections (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    host TEXT NOT NULL,
    port INTEGER NOT NULL CHECK (port BETWEEN 1 AND 65535),
    service_name TEXT,
    sid TEXT,
    username TEXT NOT NULL,
    encrypted_password TEXT NOT NULL,
    connection_type TEXT NOT NULL CHECK (connection_type IN ('SERVICE_NAME', 'SID')),
    privilege TEXT,
    is_active BOOLEAN NOT NULL DEFAULT 1,
    is_default BOOLEAN NOT NULL DEFAULT 0,
    last_health_check_at TEXT,
    last_health_status TEXT,
    last_health_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK (
        (connection_type = 'SERVICE_NAME' AND service_name IS NOT NULL AND sid IS NULL)
        OR (connection_type = 'SID' AND sid IS NOT NULL AND service_name IS NULL)
    )
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_oracle_connections_target
    ON oracle_connections(host, port, COALESCE(service_name, ''), COALESCE(sid, ''), username);
CREATE UNIQUE INDEX IF NOT EXISTS idx_oracle_connections_default
    ON oracle_connections(is_default) WHERE is_default = 1;

-- Collection history (append-only)
CREATE TABLE IF NOT EXISTS history_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    connection_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    collected_at TEXT NOT NULL,
    row_count INTEGER NOT NULL DEFAULT 0,
    payload TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_history_connection
    ON history_records(connection_id, kind, collected_at DESC);

CREATE TRIGGER IF NOT EXISTS trg_history_no_update
    BEFORE UPDATE ON history_records
    BEGIN SELECT RAISE(ABORT, 'history_records is append-only'); END;
CREATE TRIGGER IF NOT EXISTS trg_history_no_delete
    BEFORE DELETE ON history_records
    BEGIN SELECT RAISE(ABORT, 'history_records is append-only'); END;

-- SQL plan baselines
CREATE TABLE IF NOT EXISTS plan_baselines (
    id TEXT PRIMARY KEY,
    oracle_connection_id TEXT NOT NULL,
    sql_id TEXT NOT NULL,
    plan_hash_value INTEGER NOT NULL,
    sql_handle TEXT,
    plan_name TEXT,
    sql_text TEXT,
    origin TEXT,
    is_enabled BOOLEAN NOT NULL DEFAULT 1,
    is_accepted BOOLEAN NOT NULL DEFAULT 1,
    is_fixed BOOLEAN NOT NULL DEFAULT 0,
    optimizer_cost INTEGER,
    executions INTEGER,
    elapsed_time INTEGER,
    cpu_time INTEGER,
    buffer_gets INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_plan_baselines_connection
    ON plan_baselines(oracle_connection_id, created_at DESC);

-- Dashboard users
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE COLLATE NOCASE,
    name TEXT NOT NULL,
    password_hash TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    last_login_at TEXT
);

CREATE TABLE IF NOT EXISTS user_sessions (
    token TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_user_sessions_user ON user_sessions(user_id);
CREATE INDEX IF NOT EXISTS idx_user_sessions_expiry ON user_sessions(expires_at);
";
