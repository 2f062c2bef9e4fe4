pub const PRAGMAS: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA foreign_keys = ON;
";

pub const CREATE_HISTORY_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        content_type TEXT NOT NULL,
        raw_content TEXT NOT NULL CHECK (length(raw_content) > 0),
        fingerprint TEXT NOT NULL,
        category TEXT,
        is_permanent INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    )
";

pub const CREATE_GROUPS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS groups (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE COLLATE NOCASE
    )
";

pub const CREATE_ITEM_GROUPS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS item_groups (
        item_id INTEGER NOT NULL,
        group_id INTEGER NOT NULL,
        PRIMARY KEY (item_id, group_id),
        FOREIGN KEY (item_id) REFERENCES history(id) ON DELETE CASCADE,
        FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE
    )
";

/// Single row shared by every process on the database: the fingerprint of
/// the engine's latest clipboard write and the entry it came from.
pub const CREATE_CLIPBOARD_STATE_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS clipboard_state (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        echo_fingerprint TEXT,
        last_written_id INTEGER
    )
";

pub const SEED_CLIPBOARD_STATE: &str = "INSERT OR IGNORE INTO clipboard_state (id) VALUES (1)";

pub const CREATE_INDEX_CREATED_AT: &str =
    "CREATE INDEX IF NOT EXISTS idx_history_created_at ON history(created_at DESC, id DESC)";

pub const CREATE_INDEX_PERMANENT: &str =
    "CREATE INDEX IF NOT EXISTS idx_history_permanent ON history(is_permanent, created_at)";

pub const CREATE_INDEX_GROUP_ID: &str =
    "CREATE INDEX IF NOT EXISTS idx_item_groups_group_id ON item_groups(group_id)";

/// Legacy single-label categories that never made it into the registry.
pub const MIGRATE_CATEGORIES_TO_GROUPS: &str = "
    INSERT OR IGNORE INTO groups (name)
    SELECT DISTINCT category FROM history
    WHERE category IS NOT NULL AND length(trim(category)) > 0
";

pub const MIGRATE_CATEGORY_MEMBERSHIP: &str = "
    INSERT OR IGNORE INTO item_groups (item_id, group_id)
    SELECT h.id, g.id FROM history h
    JOIN groups g ON g.name = h.category
    WHERE h.category IS NOT NULL
";
