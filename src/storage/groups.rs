use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use super::GroupStorage;
use super::models::is_reserved_group_name;
use super::sqlite::{SqliteStorage, entry_exists, not_found};
use crate::errors::{ClipError, Result};

/// Trimmed name, or `Invalid` for empty and reserved smart-group names.
pub(super) fn validate_group_name(name: &str) -> Result<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ClipError::Invalid("group name must not be empty".into()));
    }
    if is_reserved_group_name(trimmed) {
        return Err(ClipError::Invalid(format!(
            "'{}' is a reserved smart group",
            trimmed
        )));
    }
    Ok(trimmed)
}

/// Registry id for `name`, creating the row if absent.
pub(super) fn ensure_group(conn: &Connection, name: &str) -> Result<i64> {
    conn.execute(
        "INSERT OR IGNORE INTO groups (name) VALUES (?1)",
        params![name],
    )?;
    Ok(conn.query_row(
        "SELECT id FROM groups WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )?)
}

fn lookup_group(conn: &Connection, name: &str) -> Result<Option<(i64, String)>> {
    Ok(conn
        .query_row(
            "SELECT id, name FROM groups WHERE name = ?1",
            params![name.trim()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?)
}

fn group_not_found(name: &str) -> ClipError {
    ClipError::NotFound(format!("Group '{}' not found", name.trim()))
}

impl GroupStorage for SqliteStorage {
    fn create_group(&self, name: &str) -> Result<()> {
        let name = validate_group_name(name)?;
        let conn = self.conn()?;
        let created = conn.execute(
            "INSERT OR IGNORE INTO groups (name) VALUES (?1)",
            params![name],
        )?;
        if created > 0 {
            debug!(group = name, "created group");
        }
        Ok(())
    }

    fn delete_group(&self, name: &str) -> Result<()> {
        let name = validate_group_name(name)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let (group_id, stored) = lookup_group(&tx, name)?.ok_or_else(|| group_not_found(name))?;
        tx.execute(
            "UPDATE history SET category = NULL WHERE category = ?1 COLLATE NOCASE",
            params![stored],
        )?;
        // Memberships go with the row via ON DELETE CASCADE.
        tx.execute("DELETE FROM groups WHERE id = ?1", params![group_id])?;
        tx.commit()?;
        debug!(group = %stored, "deleted group");
        Ok(())
    }

    fn rename_group(&self, old_name: &str, new_name: &str) -> Result<()> {
        let old_name = validate_group_name(old_name)?;
        let new_name = validate_group_name(new_name)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let (group_id, stored) =
            lookup_group(&tx, old_name)?.ok_or_else(|| group_not_found(old_name))?;
        if let Some((other_id, other)) = lookup_group(&tx, new_name)?
            && other_id != group_id
        {
            return Err(ClipError::Conflict(format!(
                "Group '{}' already exists",
                other
            )));
        }

        tx.execute(
            "UPDATE groups SET name = ?1 WHERE id = ?2",
            params![new_name, group_id],
        )?;
        tx.execute(
            "UPDATE history SET category = ?1 WHERE category = ?2 COLLATE NOCASE",
            params![new_name, stored],
        )?;
        tx.commit()?;
        debug!(from = %stored, to = new_name, "renamed group");
        Ok(())
    }

    fn add_to_group(&self, item_id: i64, name: &str) -> Result<()> {
        let name = validate_group_name(name)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        if !entry_exists(&tx, item_id)? {
            return Err(not_found(item_id));
        }
        let group_id = ensure_group(&tx, name)?;
        tx.execute(
            "INSERT OR IGNORE INTO item_groups (item_id, group_id) VALUES (?1, ?2)",
            params![item_id, group_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn remove_from_group(&self, item_id: i64, name: &str) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        if !entry_exists(&tx, item_id)? {
            return Err(not_found(item_id));
        }
        let (group_id, stored) = lookup_group(&tx, name)?.ok_or_else(|| group_not_found(name))?;
        tx.execute(
            "DELETE FROM item_groups WHERE item_id = ?1 AND group_id = ?2",
            params![item_id, group_id],
        )?;
        // Otherwise the legacy label would re-attach it on next open.
        tx.execute(
            "UPDATE history SET category = NULL WHERE id = ?1 AND category = ?2 COLLATE NOCASE",
            params![item_id, stored],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn list_groups(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT name FROM groups ORDER BY name COLLATE NOCASE ASC")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }

    fn find_group(&self, name: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        Ok(lookup_group(&conn, name)?.map(|(_, stored)| stored))
    }
}
