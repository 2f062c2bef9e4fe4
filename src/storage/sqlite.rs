use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use rusqlite::{
    Connection, OptionalExtension, Params, Row, TransactionBehavior, params, params_from_iter,
};
use tracing::{debug, info};

use super::ClipStorage;
use super::groups::{ensure_group, validate_group_name};
use super::models::{
    CaptureResult, ClipEntry, ContentType, EntryFilter, GroupFilter, NewEntry, Scope,
    StorageStats,
};
use super::schema;
use crate::errors::{ClipError, Result};

pub(super) const ENTRY_COLUMNS: &str = "
    history.id, history.content_type, history.raw_content, history.category,
    history.is_permanent, history.created_at
";

const NEWEST_FIRST: &str = "ORDER BY history.created_at DESC, history.id DESC";

/// Groups are loaded in batches of this many item ids.
const GROUP_LOOKUP_CHUNK: usize = 500;

const SIMILAR_MIN_CHARS: usize = 5;

/// Single SQLite connection behind a mutex: every read and write is
/// serialized through it, so there is exactly one writer at a time.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

fn row_to_entry(row: &Row) -> rusqlite::Result<ClipEntry> {
    let type_str: String = row.get(1)?;
    let permanent: i64 = row.get(4)?;
    Ok(ClipEntry {
        id: row.get(0)?,
        content_type: ContentType::parse(&type_str),
        raw_content: row.get(2)?,
        category: row.get(3)?,
        groups: Vec::new(),
        is_permanent: permanent != 0,
        created_at: row.get(5)?,
    })
}

/// Entries without their `groups` populated.
pub(super) fn query_entries<P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<ClipEntry>> {
    let mut stmt = conn.prepare(sql)?;
    let entries = stmt
        .query_map(params, row_to_entry)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(entries)
}

/// Fills `groups` on each entry, in membership insertion order.
pub(super) fn attach_groups(conn: &Connection, entries: &mut [ClipEntry]) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }
    let mut by_item: HashMap<i64, Vec<String>> = HashMap::new();
    for chunk in entries.chunks(GROUP_LOOKUP_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(",");
        let sql = format!(
            "SELECT ig.item_id, g.name FROM item_groups ig
             JOIN groups g ON g.id = ig.group_id
             WHERE ig.item_id IN ({})
             ORDER BY ig.rowid",
            placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(chunk.iter().map(|e| e.id)), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (item_id, name) = row?;
            by_item.entry(item_id).or_default().push(name);
        }
    }
    for entry in entries.iter_mut() {
        if let Some(groups) = by_item.remove(&entry.id) {
            entry.groups = groups;
        }
    }
    Ok(())
}

pub(super) fn get_entry(conn: &Connection, id: i64) -> Result<Option<ClipEntry>> {
    let sql = format!("SELECT {} FROM history WHERE history.id = ?1", ENTRY_COLUMNS);
    let entry = conn.query_row(&sql, params![id], row_to_entry).optional()?;
    match entry {
        Some(entry) => {
            let mut one = [entry];
            attach_groups(conn, &mut one)?;
            let [entry] = one;
            Ok(Some(entry))
        }
        None => Ok(None),
    }
}

pub(super) fn entry_exists(conn: &Connection, id: i64) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM history WHERE id = ?1)",
        params![id],
        |row| row.get(0),
    )?;
    Ok(exists)
}

pub(super) fn not_found(id: i64) -> ClipError {
    ClipError::NotFound(format!("Entry with id {} not found", id))
}

/// Now, or one microsecond past the newest stored timestamp if the clock
/// has not moved beyond it. Keeps newest-first ordering total.
pub(super) fn next_capture_time(conn: &Connection) -> Result<DateTime<Utc>> {
    let now = Utc::now();
    let newest: Option<DateTime<Utc>> =
        conn.query_row("SELECT MAX(created_at) FROM history", [], |row| row.get(0))?;
    Ok(match newest {
        Some(newest) if newest >= now => newest + Duration::microseconds(1),
        _ => now,
    })
}

pub(super) fn insert_row(conn: &Connection, entry: &NewEntry) -> Result<i64> {
    if entry.raw_content.is_empty() {
        return Err(ClipError::Invalid("raw_content must not be empty".into()));
    }
    let created_at = match entry.created_at {
        Some(ts) => ts,
        None => next_capture_time(conn)?,
    };
    conn.execute(
        "INSERT INTO history (content_type, raw_content, fingerprint, category, is_permanent, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.content_type.as_str(),
            entry.raw_content,
            entry.fingerprint,
            entry.category,
            entry.is_permanent as i32,
            created_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

impl SqliteStorage {
    pub fn new(conn: Connection) -> Result<Self> {
        conn.execute_batch(schema::PRAGMAS)?;
        conn.execute(schema::CREATE_HISTORY_TABLE, [])?;
        conn.execute(schema::CREATE_GROUPS_TABLE, [])?;
        conn.execute(schema::CREATE_ITEM_GROUPS_TABLE, [])?;
        conn.execute(schema::CREATE_CLIPBOARD_STATE_TABLE, [])?;
        conn.execute(schema::SEED_CLIPBOARD_STATE, [])?;
        conn.execute(schema::CREATE_INDEX_CREATED_AT, [])?;
        conn.execute(schema::CREATE_INDEX_PERMANENT, [])?;
        conn.execute(schema::CREATE_INDEX_GROUP_ID, [])?;

        let registered = conn.execute(schema::MIGRATE_CATEGORIES_TO_GROUPS, [])?;
        let attached = conn.execute(schema::MIGRATE_CATEGORY_MEMBERSHIP, [])?;
        if registered > 0 || attached > 0 {
            info!(registered, attached, "migrated legacy categories into groups");
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open(path: &std::path::Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::new(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::new(conn)
    }

    pub(super) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| ClipError::LockPoisoned)
    }

    fn delete_selected(&self, select_sql: &str, args: impl Params) -> Result<Vec<ClipEntry>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let victims = delete_matching(&tx, select_sql, args)?;
        tx.commit()?;
        Ok(victims)
    }

    /// Category of the newest labelled entry whose first word matches
    /// `text`'s first word. Short snippets are never matched.
    pub fn find_similar_category(&self, text: &str) -> Result<Option<String>> {
        let text = text.trim_start();
        if text.chars().count() < SIMILAR_MIN_CHARS {
            return Ok(None);
        }
        let Some(first_word) = text.split_whitespace().next() else {
            return Ok(None);
        };
        let conn = self.conn()?;
        let category: Option<String> = conn
            .query_row(
                "SELECT category FROM history
                 WHERE category IS NOT NULL
                   AND (ltrim(raw_content) = ?1
                        OR substr(ltrim(raw_content), 1, ?2) IN (?1 || ' ', ?1 || char(9), ?1 || char(10)))
                 ORDER BY created_at DESC, id DESC
                 LIMIT 1",
                params![first_word, first_word.chars().count() as i64 + 1],
                |row| row.get(0),
            )
            .optional()?;
        Ok(category)
    }
}

/// Selects rows with `select_sql` and deletes them, returning them with
/// their groups.
fn delete_matching(conn: &Connection, select_sql: &str, args: impl Params) -> Result<Vec<ClipEntry>> {
    let mut victims = query_entries(conn, select_sql, args)?;
    attach_groups(conn, &mut victims)?;
    for victim in &victims {
        conn.execute("DELETE FROM history WHERE id = ?1", params![victim.id])?;
    }
    Ok(victims)
}

/// Points `id`'s category at `label`'s group, registering it if needed.
/// The registry's spelling is stored so category and groups agree.
fn link_category(conn: &Connection, id: i64, label: &str) -> Result<()> {
    let group_id = ensure_group(conn, label)?;
    let stored: String =
        conn.query_row("SELECT name FROM groups WHERE id = ?1", params![group_id], |row| {
            row.get(0)
        })?;
    conn.execute(
        "UPDATE history SET category = ?1 WHERE id = ?2",
        params![stored, id],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO item_groups (item_id, group_id) VALUES (?1, ?2)",
        params![id, group_id],
    )?;
    Ok(())
}

impl ClipStorage for SqliteStorage {
    fn insert(&self, entry: NewEntry) -> Result<ClipEntry> {
        let conn = self.conn()?;
        let id = insert_row(&conn, &entry)?;
        get_entry(&conn, id)?.ok_or_else(|| not_found(id))
    }

    fn capture(&self, mut entry: NewEntry) -> Result<CaptureResult> {
        let label = entry.category.take();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let latest: Option<(i64, String)> = tx
            .query_row(
                "SELECT id, fingerprint FROM history WHERE is_permanent = 0
                 ORDER BY created_at DESC, id DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let result = match latest {
            Some((id, fingerprint)) if fingerprint == entry.fingerprint => {
                let now = next_capture_time(&tx)?;
                tx.execute(
                    "UPDATE history SET created_at = ?1 WHERE id = ?2",
                    params![now, id],
                )?;
                CaptureResult::Bumped(id)
            }
            _ => {
                let id = insert_row(&tx, &entry)?;
                if let Some(label) = label.as_deref().and_then(|l| validate_group_name(l).ok()) {
                    link_category(&tx, id, label)?;
                }
                CaptureResult::Inserted(id)
            }
        };
        tx.commit()?;
        Ok(result)
    }

    fn get(&self, id: i64) -> Result<Option<ClipEntry>> {
        let conn = self.conn()?;
        get_entry(&conn, id)
    }

    fn delete(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let changes = conn.execute("DELETE FROM history WHERE id = ?1", params![id])?;
        Ok(changes > 0)
    }

    fn set_pinned(&self, id: i64, pinned: bool) -> Result<()> {
        let conn = self.conn()?;
        let changes = conn.execute(
            "UPDATE history SET is_permanent = ?1 WHERE id = ?2",
            params![pinned as i32, id],
        )?;
        if changes == 0 {
            return Err(not_found(id));
        }
        Ok(())
    }

    fn toggle_pinned(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let pinned: Option<i64> = conn
            .query_row(
                "UPDATE history SET is_permanent = 1 - is_permanent WHERE id = ?1
                 RETURNING is_permanent",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        pinned.map(|p| p != 0).ok_or_else(|| not_found(id))
    }

    fn set_category(&self, id: i64, label: &str) -> Result<()> {
        let label = validate_group_name(label)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        if !entry_exists(&tx, id)? {
            return Err(not_found(id));
        }
        link_category(&tx, id, label)?;
        tx.commit()?;
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<ClipEntry>> {
        self.find(&EntryFilter::default())
    }

    fn find(&self, filter: &EntryFilter) -> Result<Vec<ClipEntry>> {
        let (clause, args): (String, Vec<String>) = match &filter.scope {
            Scope::All => (format!("SELECT {} FROM history", ENTRY_COLUMNS), Vec::new()),
            Scope::Group(GroupFilter::Smart(smart)) => (
                format!("SELECT {} FROM history WHERE history.content_type = ?1", ENTRY_COLUMNS),
                vec![smart.content_type().as_str().to_string()],
            ),
            Scope::Group(GroupFilter::Persisted(name)) => (
                format!(
                    "SELECT DISTINCT {} FROM history
                     JOIN item_groups ig ON ig.item_id = history.id
                     JOIN groups g ON g.id = ig.group_id
                     WHERE g.name = ?1",
                    ENTRY_COLUMNS
                ),
                vec![name.clone()],
            ),
            Scope::Category {
                label,
                smart: Some(smart),
            } => (
                format!(
                    "SELECT {} FROM history
                     WHERE history.category = ?1 COLLATE NOCASE OR history.content_type = ?2",
                    ENTRY_COLUMNS
                ),
                vec![label.clone(), smart.content_type().as_str().to_string()],
            ),
            Scope::Category { label, smart: None } => (
                format!(
                    "SELECT {} FROM history WHERE history.category = ?1 COLLATE NOCASE",
                    ENTRY_COLUMNS
                ),
                vec![label.clone()],
            ),
        };
        let sql = format!("{} {}", clause, NEWEST_FIRST);

        let conn = self.conn()?;
        let mut entries = query_entries(&conn, &sql, params_from_iter(args.iter()))?;

        let needle = filter.text.trim().to_lowercase();
        if !needle.is_empty() {
            entries.retain(|e| e.raw_content.to_lowercase().contains(&needle));
        }
        attach_groups(&conn, &mut entries)?;
        Ok(entries)
    }

    fn count(&self) -> Result<i64> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM history", [], |row| row.get(0))?)
    }

    fn prune(&self, max_entries: i64) -> Result<Vec<ClipEntry>> {
        let max_entries = max_entries.max(0);
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let total: i64 = tx.query_row("SELECT COUNT(*) FROM history", [], |row| row.get(0))?;
        let overflow = total - max_entries;
        if overflow <= 0 {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM history
             WHERE history.is_permanent = 0
               AND history.id != (SELECT id FROM history ORDER BY created_at DESC, id DESC LIMIT 1)
             ORDER BY history.created_at ASC, history.id ASC LIMIT ?1",
            ENTRY_COLUMNS
        );
        let pruned = delete_matching(&tx, &sql, params![overflow])?;
        tx.commit()?;
        if !pruned.is_empty() {
            debug!(count = pruned.len(), max_entries, "pruned history");
        }
        Ok(pruned)
    }

    fn clear_older_than(&self, before: DateTime<Utc>) -> Result<Vec<ClipEntry>> {
        let sql = format!(
            "SELECT {} FROM history WHERE history.is_permanent = 0 AND history.created_at < ?1",
            ENTRY_COLUMNS
        );
        self.delete_selected(&sql, params![before])
    }

    fn stats(&self) -> Result<StorageStats> {
        let conn = self.conn()?;
        let groups: i64 = conn.query_row("SELECT COUNT(*) FROM groups", [], |row| row.get(0))?;
        conn.query_row(
            "SELECT
                COUNT(*),
                COUNT(CASE WHEN is_permanent = 1 THEN 1 END),
                COUNT(CASE WHEN content_type = 'text' THEN 1 END),
                COUNT(CASE WHEN content_type = 'url' THEN 1 END),
                COUNT(CASE WHEN content_type = 'image' THEN 1 END),
                COUNT(CASE WHEN content_type = 'dev' THEN 1 END),
                MIN(created_at),
                MAX(created_at)
             FROM history",
            [],
            |row| {
                Ok(StorageStats {
                    total: row.get(0)?,
                    permanent: row.get(1)?,
                    text: row.get(2)?,
                    url: row.get(3)?,
                    image: row.get(4)?,
                    dev: row.get(5)?,
                    groups,
                    oldest: row.get(6)?,
                    newest: row.get(7)?,
                })
            },
        )
        .map_err(ClipError::Storage)
    }
}
