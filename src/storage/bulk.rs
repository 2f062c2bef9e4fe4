use rusqlite::{params, params_from_iter};
use tracing::info;

use super::groups::ensure_group;
use super::models::{ClipEntry, ContentType, ImportMode, ImportOutcome, ImportRecord};
use super::sqlite::{ENTRY_COLUMNS, SqliteStorage, attach_groups, insert_row, query_entries};
use crate::errors::Result;

impl SqliteStorage {
    /// Loads `records` (oldest first) and registers `groups`, all in one
    /// transaction. `Replace` empties history and the registry first; any
    /// failure leaves the store as it was.
    pub fn import_records(
        &self,
        records: &[ImportRecord],
        groups: &[String],
        mode: ImportMode,
    ) -> Result<ImportOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let mut displaced_images = Vec::new();
        if mode == ImportMode::Replace {
            let sql = format!(
                "SELECT {} FROM history WHERE history.content_type = ?1",
                ENTRY_COLUMNS
            );
            displaced_images = query_entries(&tx, &sql, params![ContentType::Image.as_str()])?;
            tx.execute("DELETE FROM item_groups", [])?;
            tx.execute("DELETE FROM history", [])?;
            tx.execute("DELETE FROM groups", [])?;
        }

        for name in groups.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
            ensure_group(&tx, name)?;
        }

        for record in records {
            let item_id = insert_row(&tx, &record.entry)?;
            let labels = record
                .groups
                .iter()
                .map(String::as_str)
                .chain(record.entry.category.as_deref())
                .map(str::trim)
                .filter(|n| !n.is_empty());
            for name in labels {
                let group_id = ensure_group(&tx, name)?;
                tx.execute(
                    "INSERT OR IGNORE INTO item_groups (item_id, group_id) VALUES (?1, ?2)",
                    params![item_id, group_id],
                )?;
            }
        }

        // A restored row may point at the same file as a replaced one.
        displaced_images.retain(|old| {
            !records
                .iter()
                .any(|r| r.entry.content_type == ContentType::Image && r.entry.raw_content == old.raw_content)
        });

        tx.commit()?;
        info!(
            entries = records.len(),
            groups = groups.len(),
            displaced_images = displaced_images.len(),
            ?mode,
            "import committed"
        );
        Ok(ImportOutcome {
            imported: records.len(),
            displaced_images,
        })
    }

    /// Entries in at least one of `names` (case-insensitive), newest first.
    pub fn entries_in_groups(&self, names: &[String]) -> Result<Vec<ClipEntry>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; names.len()].join(",");
        let sql = format!(
            "SELECT DISTINCT {} FROM history
             JOIN item_groups ig ON ig.item_id = history.id
             JOIN groups g ON g.id = ig.group_id
             WHERE g.name IN ({})
             ORDER BY history.created_at DESC, history.id DESC",
            ENTRY_COLUMNS, placeholders
        );
        let conn = self.conn()?;
        let mut entries = query_entries(
            &conn,
            &sql,
            params_from_iter(names.iter().map(|n| n.trim())),
        )?;
        attach_groups(&conn, &mut entries)?;
        Ok(entries)
    }
}
