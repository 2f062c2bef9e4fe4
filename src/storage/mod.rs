pub mod bulk;
pub mod groups;
pub mod models;
pub mod schema;
pub mod sqlite;
pub mod state;

use chrono::{DateTime, Utc};

use crate::errors::Result;
use models::{CaptureResult, ClipEntry, EntryFilter, NewEntry, StorageStats};

/// History store: persisted clipboard entries.
///
/// `set_pinned`, `toggle_pinned` and `set_category` fail with `NotFound`
/// for an unknown id; `delete` reports it through its return value.
pub trait ClipStorage {
    fn insert(&self, entry: NewEntry) -> Result<ClipEntry>;
    /// Insert, or bump the newest non-permanent entry when its fingerprint
    /// matches.
    fn capture(&self, entry: NewEntry) -> Result<CaptureResult>;
    fn get(&self, id: i64) -> Result<Option<ClipEntry>>;
    fn delete(&self, id: i64) -> Result<bool>;
    fn set_pinned(&self, id: i64, pinned: bool) -> Result<()>;
    fn toggle_pinned(&self, id: i64) -> Result<bool>;
    fn set_category(&self, id: i64, label: &str) -> Result<()>;
    fn list_all(&self) -> Result<Vec<ClipEntry>>;
    fn find(&self, filter: &EntryFilter) -> Result<Vec<ClipEntry>>;
    fn count(&self) -> Result<i64>;
    /// Deletes oldest non-permanent entries until at most `max_entries`
    /// rows remain or none are left to delete. Returns what was removed.
    fn prune(&self, max_entries: i64) -> Result<Vec<ClipEntry>>;
    fn clear_older_than(&self, before: DateTime<Utc>) -> Result<Vec<ClipEntry>>;
    fn stats(&self) -> Result<StorageStats>;
}

/// Group registry and item membership.
pub trait GroupStorage {
    fn create_group(&self, name: &str) -> Result<()>;
    fn delete_group(&self, name: &str) -> Result<()>;
    fn rename_group(&self, old_name: &str, new_name: &str) -> Result<()>;
    fn add_to_group(&self, item_id: i64, name: &str) -> Result<()>;
    fn remove_from_group(&self, item_id: i64, name: &str) -> Result<()>;
    fn list_groups(&self) -> Result<Vec<String>>;
    /// Stored spelling of `name`, if a group matches case-insensitively.
    fn find_group(&self, name: &str) -> Result<Option<String>>;
}
