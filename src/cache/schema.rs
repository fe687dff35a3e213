//! Cache table definitions, from `spec.md` §6.2. Bumping
//! `CACHE_VERSION` forces a full drop+rebuild on next open.

pub const CACHE_VERSION: &str = "1";

pub const CREATE_CACHE_META: &str = "CREATE TABLE IF NOT EXISTS cache_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)";

pub const CREATE_TICKETS: &str = "CREATE TABLE IF NOT EXISTS tickets (
    id TEXT PRIMARY KEY,
    type TEXT NOT NULL,
    status INTEGER NOT NULL,
    name TEXT NOT NULL,
    spec TEXT,
    notes TEXT,
    accept TEXT,
    priority INTEGER NOT NULL DEFAULT 0,
    parent TEXT,
    created_from TEXT,
    supersedes TEXT,
    supersedes_reason TEXT,
    kill_reason TEXT NOT NULL DEFAULT '',
    kill_log TEXT,
    author TEXT,
    done_at TEXT,
    branch TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    resolved_at INTEGER NOT NULL DEFAULT 0,
    compacted_at INTEGER,
    created_from_name TEXT,
    supersedes_name TEXT
)";

pub const CREATE_TOMBSTONES: &str = "CREATE TABLE IF NOT EXISTS tombstones (
    id TEXT NOT NULL,
    done_at TEXT NOT NULL,
    reason TEXT,
    name TEXT NOT NULL,
    is_accept INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    PRIMARY KEY (id, done_at)
)";

pub const CREATE_TICKET_DEPS: &str = "CREATE TABLE IF NOT EXISTS ticket_deps (
    ticket_id TEXT NOT NULL,
    dep_id TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    PRIMARY KEY (ticket_id, dep_id)
)";

pub const CREATE_TICKET_LABELS: &str = "CREATE TABLE IF NOT EXISTS ticket_labels (
    ticket_id TEXT NOT NULL,
    label TEXT NOT NULL,
    PRIMARY KEY (ticket_id, label)
)";

pub const CREATE_TICKET_META: &str = "CREATE TABLE IF NOT EXISTS ticket_meta (
    ticket_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value_num REAL,
    value_text TEXT,
    PRIMARY KEY (ticket_id, key)
)";

pub const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_tickets_status ON tickets(status)",
    "CREATE INDEX IF NOT EXISTS idx_tickets_type ON tickets(type)",
    "CREATE INDEX IF NOT EXISTS idx_tickets_priority ON tickets(priority)",
    "CREATE INDEX IF NOT EXISTS idx_tickets_kill_reason ON tickets(kill_reason)",
    "CREATE INDEX IF NOT EXISTS idx_ticket_deps_dep ON ticket_deps(dep_id)",
    "CREATE INDEX IF NOT EXISTS idx_ticket_meta_key ON ticket_meta(key)",
];

pub const ALL_TABLES: &[&str] = &[
    CREATE_CACHE_META,
    CREATE_TICKETS,
    CREATE_TOMBSTONES,
    CREATE_TICKET_DEPS,
    CREATE_TICKET_LABELS,
    CREATE_TICKET_META,
];
