//! Clipboard bookkeeping that has to outlive a single process: a `ck copy`
//! and the watcher run in different processes but share this database.

use rusqlite::{OptionalExtension, TransactionBehavior, params};

use super::sqlite::SqliteStorage;
use crate::errors::Result;

impl SqliteStorage {
    /// Publishes the fingerprint about to be written to the clipboard.
    pub fn set_echo_guard(&self, fingerprint: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE clipboard_state SET echo_fingerprint = ?1 WHERE id = 1",
            params![fingerprint],
        )?;
        Ok(())
    }

    /// Withdraws `fingerprint` if it is still the published one.
    pub fn clear_echo_guard(&self, fingerprint: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE clipboard_state SET echo_fingerprint = NULL
             WHERE id = 1 AND echo_fingerprint = ?1",
            params![fingerprint],
        )?;
        Ok(())
    }

    /// Returns the published fingerprint and clears it. A guard is good for
    /// one clipboard change.
    pub fn take_echo_guard(&self) -> Result<Option<String>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let guard: Option<String> = tx
            .query_row(
                "SELECT echo_fingerprint FROM clipboard_state WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        if guard.is_some() {
            tx.execute(
                "UPDATE clipboard_state SET echo_fingerprint = NULL WHERE id = 1",
                [],
            )?;
        }
        tx.commit()?;
        Ok(guard)
    }

    pub fn record_last_written(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE clipboard_state SET last_written_id = ?1 WHERE id = 1",
            params![id],
        )?;
        Ok(())
    }

    /// Id of the entry most recently written to the clipboard by any process.
    /// It may since have been deleted.
    pub fn last_written(&self) -> Result<Option<i64>> {
        let conn = self.conn()?;
        let id: Option<i64> = conn
            .query_row(
                "SELECT last_written_id FROM clipboard_state WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(id)
    }
}
