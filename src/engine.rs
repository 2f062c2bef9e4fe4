//! The command surface shared by the CLI and any presentation layer.

use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;

use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::backup;
use crate::clipboard::{ClipboardBackend, SystemClipboard, remove_image_file};
use crate::config::{AppPaths, Settings};
use crate::errors::{ClipError, Result};
use crate::events::{ClipboardEvent, EventBus};
use crate::monitor::{ClipboardMonitor, FingerprintSlot};
use crate::paste::{CancelToken, PasteInjector, PasteOutcome, SystemActivator, WindowActivator};
use crate::query;
use crate::storage::models::{ClipEntry, ImportMode, StorageStats};
use crate::storage::sqlite::SqliteStorage;
use crate::storage::{ClipStorage, GroupStorage};

pub struct Engine {
    paths: AppPaths,
    settings: Settings,
    storage: Arc<SqliteStorage>,
    backend: Arc<dyn ClipboardBackend>,
    slot: FingerprintSlot,
    events: Arc<EventBus>,
    injector: PasteInjector,
}

impl Engine {
    /// Opens the on-disk store with the OS clipboard.
    pub fn open(paths: AppPaths, settings: Settings) -> Result<Self> {
        paths.ensure_dirs()?;
        let storage = SqliteStorage::open(&paths.db_path)?;
        Ok(Self::with_parts(
            paths,
            settings,
            storage,
            Arc::new(SystemClipboard),
            Arc::new(SystemActivator),
        ))
    }

    pub fn with_parts(
        paths: AppPaths,
        settings: Settings,
        storage: SqliteStorage,
        backend: Arc<dyn ClipboardBackend>,
        activator: Arc<dyn WindowActivator>,
    ) -> Self {
        let storage = Arc::new(storage);
        let slot = FingerprintSlot::shared(storage.clone());
        let injector = PasteInjector::new(
            backend.clone(),
            activator,
            slot.clone(),
            settings.paste_delay(),
            settings.paste_timeout(),
        );
        Self {
            paths,
            settings,
            storage,
            backend,
            slot,
            events: Arc::new(EventBus::new()),
            injector,
        }
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn subscribe(&self) -> std::sync::mpsc::Receiver<ClipboardEvent> {
        self.events.subscribe()
    }

    /// A monitor sharing this engine's store, clipboard and echo slot.
    pub fn monitor(&self) -> ClipboardMonitor {
        ClipboardMonitor::new(
            self.storage.clone(),
            self.backend.clone(),
            self.slot.clone(),
            self.events.clone(),
            self.settings.clone(),
            self.paths.images_dir.clone(),
        )
    }

    pub fn start_monitor(&self, running: Arc<AtomicBool>) -> JoinHandle<()> {
        Arc::new(self.monitor()).spawn(running)
    }

    // --- Query ---

    pub fn get_history(&self, search: Option<&str>) -> Result<Vec<ClipEntry>> {
        query::search(self.storage.as_ref(), search)
    }

    pub fn get_entry(&self, id: i64) -> Result<ClipEntry> {
        self.storage
            .get(id)?
            .ok_or_else(|| ClipError::NotFound(format!("Entry with id {} not found", id)))
    }

    /// Persisted group names only.
    pub fn get_categories(&self) -> Result<Vec<String>> {
        self.storage.list_groups()
    }

    // --- Mutation ---

    pub fn toggle_permanent(&self, id: i64) -> Result<bool> {
        self.storage.toggle_pinned(id)
    }

    pub fn delete_entry(&self, id: i64) -> Result<()> {
        let entry = self.get_entry(id)?;
        if !self.storage.delete(id)? {
            return Err(ClipError::NotFound(format!("Entry with id {} not found", id)));
        }
        if let Err(e) = remove_image_file(&entry, &self.paths.images_dir) {
            warn!(id, error = %e, "Failed to remove image file");
        }
        Ok(())
    }

    pub fn set_category(&self, id: i64, category: &str) -> Result<()> {
        self.storage.set_category(id, category)
    }

    pub fn add_to_group(&self, item_id: i64, group: &str) -> Result<()> {
        self.storage.add_to_group(item_id, group)
    }

    pub fn remove_from_group(&self, item_id: i64, group: &str) -> Result<()> {
        self.storage.remove_from_group(item_id, group)
    }

    pub fn create_group(&self, name: &str) -> Result<()> {
        self.storage.create_group(name)
    }

    pub fn rename_group(&self, old_name: &str, new_name: &str) -> Result<()> {
        self.storage.rename_group(old_name, new_name)
    }

    pub fn delete_group(&self, name: &str) -> Result<()> {
        self.storage.delete_group(name)
    }

    // --- Bulk I/O ---

    pub fn backup_data(&self, path: &Path, groups: &[String]) -> Result<usize> {
        backup::write_backup(&self.storage, path, groups)
    }

    /// `mode` is `"merge"` or `"replace"`.
    pub fn restore_data(&self, path: &Path, mode: &str) -> Result<usize> {
        let mode = ImportMode::parse(mode).ok_or_else(|| {
            ClipError::Invalid(format!("unknown restore mode '{}', expected merge or replace", mode))
        })?;
        let outcome = backup::restore_file(&self.storage, path, mode)?;
        for entry in &outcome.displaced_images {
            if let Err(e) = remove_image_file(entry, &self.paths.images_dir) {
                warn!(id = entry.id, error = %e, "Failed to remove image file");
            }
        }
        Ok(outcome.imported)
    }

    pub fn export_group(&self, name: &str, path: &Path) -> Result<()> {
        let text = backup::export_group_as_text(&self.storage, name)?;
        fs::write(path, text)?;
        info!(group = name, path = %path.display(), "group exported");
        Ok(())
    }

    pub fn export_all_txt(&self, path: &Path) -> Result<()> {
        let text = backup::export_all_as_text(&self.storage)?;
        fs::write(path, text)?;
        info!(path = %path.display(), "history exported");
        Ok(())
    }

    pub fn import_group(&self, name: &str, path: &Path) -> Result<usize> {
        backup::import_legacy_file(&self.storage, name, path)
    }

    // --- Paste ---

    /// Puts an entry back on the clipboard without sending a keystroke.
    pub fn copy_entry(&self, id: i64) -> Result<()> {
        let entry = self.get_entry(id)?;
        if let PasteOutcome::Delivered { .. } = self.injector.copy(&entry, &CancelToken::new())? {
            self.remember_written(entry.id);
        }
        Ok(())
    }

    /// Pastes the entry last written to the clipboard by any clipkeep
    /// process, or the newest one.
    pub fn paste_item(&self) -> Result<PasteOutcome> {
        self.paste_with(&CancelToken::new())
    }

    pub fn paste_with(&self, cancel: &CancelToken) -> Result<PasteOutcome> {
        let entry = self.paste_target()?;
        let outcome = self.injector.paste(&entry, cancel)?;
        if let PasteOutcome::Delivered { .. } = outcome {
            self.remember_written(entry.id);
        }
        Ok(outcome)
    }

    pub fn close_window(&self, label: Option<&str>) -> Result<()> {
        self.injector.activator().close_window(label)
    }

    /// Recorded in the store so a later `paste_item` from another process
    /// targets the same entry.
    fn remember_written(&self, id: i64) {
        if let Err(e) = self.storage.record_last_written(id) {
            warn!(id, error = %e, "Failed to record last written entry");
        }
    }

    fn paste_target(&self) -> Result<ClipEntry> {
        if let Some(id) = self.storage.last_written()?
            && let Some(entry) = self.storage.get(id)?
        {
            return Ok(entry);
        }
        self.storage
            .list_all()?
            .into_iter()
            .next()
            .ok_or_else(|| ClipError::NotFound("history is empty".into()))
    }

    // --- Maintenance ---

    pub fn stats(&self) -> Result<StorageStats> {
        self.storage.stats()
    }

    /// Removes non-permanent entries older than `days` days.
    pub fn clear_older_than(&self, days: i64) -> Result<usize> {
        if days < 0 {
            return Err(ClipError::Invalid("days must not be negative".into()));
        }
        let cutoff = Utc::now() - Duration::days(days);
        let removed = self.storage.clear_older_than(cutoff)?;
        for entry in &removed {
            if let Err(e) = remove_image_file(entry, &self.paths.images_dir) {
                warn!(id = entry.id, error = %e, "Failed to remove image file");
            }
        }
        info!(days, removed = removed.len(), "cleared old entries");
        Ok(removed.len())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::clipboard::ClipboardPayload;
    use crate::clipboard::testing::MemoryClipboard;
    use crate::hash::text_fingerprint;
    use crate::monitor::TickOutcome;
    use crate::paste::testing::RecordingActivator;
    use crate::storage::models::{ContentType, NewEntry};
    use tempfile::TempDir;

    struct Fixture {
        engine: Engine,
        clipboard: Arc<MemoryClipboard>,
        activator: Arc<RecordingActivator>,
        dir: TempDir,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let paths = AppPaths::from_base(dir.path().to_path_buf());
        paths.ensure_dirs().unwrap();
        let clipboard = Arc::new(MemoryClipboard::default());
        let activator = Arc::new(RecordingActivator::default());
        let settings = Settings {
            paste_delay_ms: 0,
            ..Settings::default()
        };
        let engine = Engine::with_parts(
            paths,
            settings,
            SqliteStorage::in_memory().unwrap(),
            clipboard.clone(),
            activator.clone(),
        );
        Fixture {
            engine,
            clipboard,
            activator,
            dir,
        }
    }

    fn capture(f: &Fixture, text: &str) -> i64 {
        f.clipboard.set_text(text);
        match f.engine.monitor().tick().unwrap() {
            TickOutcome::Captured(result) => result.id(),
            other => panic!("expected capture, got {:?}", other),
        }
    }

    fn contents(entries: &[ClipEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.raw_content.as_str()).collect()
    }

    #[test]
    fn test_rename_scenario() {
        let f = fixture();
        capture(&f, "A");
        capture(&f, "B");
        let c = capture(&f, "C");
        f.engine.create_group("Work").unwrap();
        f.engine.add_to_group(c, "Work").unwrap();
        f.engine.rename_group("Work", "Projects").unwrap();

        assert_eq!(f.engine.get_categories().unwrap(), vec!["Projects"]);
        let hits = f.engine.get_history(Some("group:Projects")).unwrap();
        assert_eq!(contents(&hits), vec!["C"]);
    }

    #[test]
    fn test_monitor_emits_clipboard_updated() {
        let f = fixture();
        let rx = f.engine.subscribe();
        let id = capture(&f, "event me");
        assert_eq!(rx.try_recv().unwrap(), ClipboardEvent::Inserted(id));
    }

    #[test]
    fn test_paste_is_not_recaptured() {
        let f = fixture();
        let monitor = f.engine.monitor();
        let a = capture(&f, "first");
        capture(&f, "second");

        f.engine.copy_entry(a).unwrap();
        let outcome = f.engine.paste_item().unwrap();

        assert_eq!(outcome, PasteOutcome::Delivered { keystroke: true });
        assert_eq!(f.clipboard.current(), Some(ClipboardPayload::Text("first".into())));
        assert_eq!(monitor.tick().unwrap(), TickOutcome::Unchanged);
        assert_eq!(f.engine.storage().count().unwrap(), 2);
        assert_eq!(f.activator.calls(), vec!["restore_focus", "keystroke"]);
    }

    fn open_on(dir: &Path, clipboard: Arc<MemoryClipboard>) -> Engine {
        let paths = AppPaths::from_base(dir.to_path_buf());
        paths.ensure_dirs().unwrap();
        let storage = SqliteStorage::open(&paths.db_path).unwrap();
        let settings = Settings {
            paste_delay_ms: 0,
            ..Settings::default()
        };
        Engine::with_parts(
            paths,
            settings,
            storage,
            clipboard,
            Arc::new(RecordingActivator::default()),
        )
    }

    fn tick_id(engine: &Engine) -> i64 {
        match engine.monitor().tick().unwrap() {
            TickOutcome::Captured(result) => result.id(),
            other => panic!("expected capture, got {:?}", other),
        }
    }

    #[test]
    fn test_copy_from_another_engine_is_not_recaptured() {
        let dir = TempDir::new().unwrap();
        let clipboard = Arc::new(MemoryClipboard::default());
        let watcher = open_on(dir.path(), clipboard.clone());
        let cli = open_on(dir.path(), clipboard.clone());
        let monitor = watcher.monitor();

        clipboard.set_text("old entry");
        let old = tick_id(&watcher);
        clipboard.set_text("newer entry");
        tick_id(&watcher);

        cli.copy_entry(old).unwrap();
        assert_eq!(monitor.tick().unwrap(), TickOutcome::Unchanged);
        assert_eq!(watcher.storage().count().unwrap(), 2);

        // The guard covers one change only.
        clipboard.set_text("typed by hand");
        assert!(matches!(monitor.tick().unwrap(), TickOutcome::Captured(_)));
        clipboard.set_text("old entry");
        assert!(matches!(monitor.tick().unwrap(), TickOutcome::Captured(_)));
        assert_eq!(watcher.storage().count().unwrap(), 4);
    }

    #[test]
    fn test_paste_item_follows_copy_across_engines() {
        let dir = TempDir::new().unwrap();
        let clipboard = Arc::new(MemoryClipboard::default());
        let wanted = {
            let first = open_on(dir.path(), clipboard.clone());
            clipboard.set_text("wanted");
            let wanted = tick_id(&first);
            clipboard.set_text("newest");
            tick_id(&first);
            wanted
        };

        open_on(dir.path(), clipboard.clone()).copy_entry(wanted).unwrap();
        clipboard.set_text("unrelated");

        let later = open_on(dir.path(), clipboard.clone());
        assert_eq!(
            later.paste_item().unwrap(),
            PasteOutcome::Delivered { keystroke: true }
        );
        assert_eq!(clipboard.current(), Some(ClipboardPayload::Text("wanted".into())));
    }

    #[test]
    fn test_failed_copy_withdraws_echo_guard() {
        let f = fixture();
        let id = capture(&f, "entry");
        f.clipboard.fail_writes.store(true, Ordering::SeqCst);
        assert!(f.engine.copy_entry(id).is_err());
        assert_eq!(f.engine.storage().take_echo_guard().unwrap(), None);
        assert_eq!(f.engine.storage().last_written().unwrap(), None);
    }

    #[test]
    fn test_paste_item_defaults_to_newest() {
        let f = fixture();
        capture(&f, "old");
        capture(&f, "new");
        f.clipboard.set_text("something else");

        f.engine.paste_item().unwrap();
        assert_eq!(f.clipboard.current(), Some(ClipboardPayload::Text("new".into())));
    }

    #[test]
    fn test_paste_item_on_empty_history() {
        let f = fixture();
        assert!(matches!(f.engine.paste_item(), Err(ClipError::NotFound(_))));
        assert_eq!(f.clipboard.writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancelled_paste_leaves_clipboard() {
        let f = fixture();
        capture(&f, "entry");
        f.clipboard.set_text("user content");
        let cancel = CancelToken::new();
        cancel.cancel();

        assert_eq!(f.engine.paste_with(&cancel).unwrap(), PasteOutcome::Cancelled);
        assert_eq!(
            f.clipboard.current(),
            Some(ClipboardPayload::Text("user content".into()))
        );
    }

    #[test]
    fn test_delete_entry() {
        let f = fixture();
        let id = capture(&f, "gone");
        f.engine.delete_entry(id).unwrap();
        assert!(matches!(f.engine.delete_entry(id), Err(ClipError::NotFound(_))));
        assert!(matches!(f.engine.toggle_permanent(id), Err(ClipError::NotFound(_))));
    }

    #[test]
    fn test_delete_image_entry_removes_file() {
        let f = fixture();
        f.clipboard.set(ClipboardPayload::Image {
            width: 1,
            height: 1,
            bytes: vec![1, 2, 3, 255],
        });
        let TickOutcome::Captured(result) = f.engine.monitor().tick().unwrap() else {
            panic!("expected capture");
        };
        let path = std::path::PathBuf::from(f.engine.get_entry(result.id()).unwrap().raw_content);
        assert!(path.starts_with(f.dir.path()));
        assert!(path.exists());

        f.engine.delete_entry(result.id()).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_backup_restore_files() {
        let f = fixture();
        let id = capture(&f, "keep");
        f.engine.toggle_permanent(id).unwrap();
        f.engine.add_to_group(id, "Work").unwrap();
        let path = f.dir.path().join("backup.json");
        assert_eq!(f.engine.backup_data(&path, &[]).unwrap(), 1);

        capture(&f, "scratch");
        assert_eq!(f.engine.restore_data(&path, "replace").unwrap(), 1);
        let all = f.engine.get_history(None).unwrap();
        assert_eq!(contents(&all), vec!["keep"]);
        assert!(all[0].is_permanent);
        assert_eq!(all[0].groups, vec!["Work"]);
    }

    fn capture_image(f: &Fixture, bytes: Vec<u8>) -> std::path::PathBuf {
        f.clipboard.set(ClipboardPayload::Image {
            width: 1,
            height: 1,
            bytes,
        });
        let TickOutcome::Captured(result) = f.engine.monitor().tick().unwrap() else {
            panic!("expected capture");
        };
        std::path::PathBuf::from(f.engine.get_entry(result.id()).unwrap().raw_content)
    }

    #[test]
    fn test_replace_restore_removes_orphaned_images() {
        let f = fixture();
        let kept = capture_image(&f, vec![1, 2, 3, 255]);
        let path = f.dir.path().join("backup.json");
        f.engine.backup_data(&path, &[]).unwrap();

        let orphan = capture_image(&f, vec![9, 8, 7, 255]);
        assert!(orphan.exists());

        assert_eq!(f.engine.restore_data(&path, "replace").unwrap(), 1);
        assert!(!orphan.exists());
        assert!(kept.exists());
        assert_eq!(f.engine.get_history(None).unwrap().len(), 1);
    }

    #[test]
    fn test_restore_rejects_unknown_mode() {
        let f = fixture();
        let path = f.dir.path().join("unused.json");
        assert!(matches!(
            f.engine.restore_data(&path, "overwrite"),
            Err(ClipError::Invalid(_))
        ));
    }

    #[test]
    fn test_text_export_and_import() {
        let f = fixture();
        let a = capture(&f, "git status");
        let b = capture(&f, "notes for later");
        f.engine.add_to_group(a, "Snips").unwrap();
        f.engine.add_to_group(b, "Snips").unwrap();

        let group_file = f.dir.path().join("snips.txt");
        f.engine.export_group("Snips", &group_file).unwrap();
        assert_eq!(
            fs::read_to_string(&group_file).unwrap(),
            "notes for later\n---\ngit status"
        );

        let all_file = f.dir.path().join("all.txt");
        f.engine.export_all_txt(&all_file).unwrap();
        assert!(all_file.exists());

        assert_eq!(f.engine.import_group("Copied", &group_file).unwrap(), 2);
        let copied = f.engine.get_history(Some("group:Copied")).unwrap();
        assert_eq!(contents(&copied), vec!["notes for later", "git status"]);
        assert_eq!(copied[1].content_type, ContentType::Dev);
    }

    #[test]
    fn test_clear_older_than_days() {
        let f = fixture();
        let old = Utc::now() - Duration::days(10);
        for (text, pinned) in [("old loose", false), ("old pinned", true)] {
            f.engine
                .storage()
                .insert(NewEntry {
                    is_permanent: pinned,
                    created_at: Some(old),
                    ..NewEntry::captured(ContentType::Text, text.into(), text_fingerprint(text))
                })
                .unwrap();
        }
        capture(&f, "fresh");

        assert_eq!(f.engine.clear_older_than(5).unwrap(), 1);
        assert_eq!(contents(&f.engine.get_history(None).unwrap()), vec!["fresh", "old pinned"]);
        assert!(matches!(f.engine.clear_older_than(-1), Err(ClipError::Invalid(_))));
    }

    #[test]
    fn test_close_window_is_delegated() {
        let f = fixture();
        f.engine.close_window(Some("main")).unwrap();
        f.engine.close_window(None).unwrap();
        assert_eq!(f.activator.calls(), vec!["close:main", "close:popup"]);
    }

    #[test]
    fn test_start_monitor_thread_stops() {
        let f = fixture();
        let running = Arc::new(AtomicBool::new(false));
        let handle = f.engine.start_monitor(running);
        handle.join().unwrap();
        assert!(f.engine.get_categories().unwrap().is_empty());
    }
}
