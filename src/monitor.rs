//! Clipboard monitor
//!
//! Polls the clipboard backend, turns each genuinely new payload into a
//! stored entry and notifies listeners. The fingerprint slot is shared with
//! the paste protocol so the engine's own writes are never re-captured.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, trace, warn};

use crate::classify::{classify, sub_category};
use crate::clipboard::{ClipboardBackend, ClipboardPayload, remove_image_file, save_image_to_file};
use crate::config::Settings;
use crate::errors::{ClipError, Result};
use crate::events::{ClipboardEvent, EventBus};
use crate::storage::ClipStorage;
use crate::storage::models::{CaptureResult, ContentType, NewEntry};
use crate::storage::sqlite::SqliteStorage;

/// Last fingerprint seen on, or written to, the clipboard.
///
/// A slot backed by the store also publishes registered fingerprints to
/// every other process on the same database, so a write made by `ck copy`
/// is not captured by a watcher running elsewhere.
#[derive(Clone, Default)]
pub struct FingerprintSlot {
    local: Arc<Mutex<Option<String>>>,
    shared: Option<Arc<SqliteStorage>>,
}

impl FingerprintSlot {
    /// Process-local slot.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(storage: Arc<SqliteStorage>) -> Self {
        Self {
            local: Arc::default(),
            shared: Some(storage),
        }
    }

    pub fn get(&self) -> Option<String> {
        self.local.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Marks `fingerprint` as already seen. Call before writing it to the
    /// clipboard. Returns the previous local value.
    pub fn register(&self, fingerprint: String) -> Result<Option<String>> {
        if let Some(storage) = &self.shared {
            storage.set_echo_guard(&fingerprint)?;
        }
        Ok(self.swap(Some(fingerprint)))
    }

    /// Undoes `register` after the clipboard write failed.
    pub fn unregister(&self, fingerprint: &str, previous: Option<String>) {
        self.swap(previous);
        if let Some(storage) = &self.shared
            && let Err(e) = storage.clear_echo_guard(fingerprint)
        {
            warn!(error = %e, "Failed to withdraw echo guard");
        }
    }

    fn swap(&self, value: Option<String>) -> Option<String> {
        let mut slot = self.local.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, value)
    }

    /// Stores `fingerprint`; true when it differs from what was there and
    /// was not published by another process's write.
    pub fn observe(&self, fingerprint: &str) -> bool {
        {
            let mut slot = self.local.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.as_deref() == Some(fingerprint) {
                return false;
            }
            *slot = Some(fingerprint.to_string());
        }

        let Some(storage) = &self.shared else {
            return true;
        };
        match storage.take_echo_guard() {
            Ok(Some(guard)) if guard == fingerprint => {
                debug!("clipboard change was written by clipkeep");
                false
            }
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Failed to read echo guard");
                true
            }
        }
    }
}

const EXPIRY_CHECK_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Same fingerprint as last time.
    Unchanged,
    /// Nothing readable on the clipboard.
    Empty,
    /// New but not worth keeping (blank or oversized).
    Skipped,
    Captured(CaptureResult),
}

pub struct ClipboardMonitor {
    storage: Arc<SqliteStorage>,
    backend: Arc<dyn ClipboardBackend>,
    slot: FingerprintSlot,
    events: Arc<EventBus>,
    settings: Settings,
    images_dir: PathBuf,
}

impl ClipboardMonitor {
    pub fn new(
        storage: Arc<SqliteStorage>,
        backend: Arc<dyn ClipboardBackend>,
        slot: FingerprintSlot,
        events: Arc<EventBus>,
        settings: Settings,
        images_dir: PathBuf,
    ) -> Self {
        Self {
            storage,
            backend,
            slot,
            events,
            settings,
            images_dir,
        }
    }

    /// One poll. Read failures are treated as an empty clipboard.
    pub fn tick(&self) -> Result<TickOutcome> {
        let payload = match self.backend.read() {
            Ok(Some(payload)) => payload,
            Ok(None) => return Ok(TickOutcome::Empty),
            Err(e) if e.is_transient() => {
                trace!(error = %e, "clipboard read skipped");
                return Ok(TickOutcome::Empty);
            }
            Err(e) => return Err(e),
        };

        let fingerprint = payload.fingerprint();
        if !self.slot.observe(&fingerprint) {
            return Ok(TickOutcome::Unchanged);
        }

        if payload.is_blank() {
            debug!(format = payload.format(), "ignoring blank clipboard payload");
            return Ok(TickOutcome::Skipped);
        }
        if payload.size_bytes() > self.settings.max_clip_bytes {
            warn!(
                size = payload.size_bytes(),
                max = self.settings.max_clip_bytes,
                "Skipping oversized clipboard payload"
            );
            return Ok(TickOutcome::Skipped);
        }

        let content_type = classify(&payload);
        let category = match &payload {
            ClipboardPayload::Text(text) if self.settings.auto_label => {
                self.label_for(text, &content_type)
            }
            _ => None,
        };
        let (raw_content, image_file) = match &payload {
            ClipboardPayload::Text(text) => (text.clone(), None),
            ClipboardPayload::Image {
                width,
                height,
                bytes,
            } => {
                let path = self.image_path(&fingerprint);
                let w = u32::try_from(*width).map_err(|_| ClipError::Image("image too wide".into()))?;
                let h = u32::try_from(*height).map_err(|_| ClipError::Image("image too tall".into()))?;
                save_image_to_file(bytes, w, h, &path)?;
                (path.to_string_lossy().into_owned(), Some(path))
            }
        };

        let entry = NewEntry {
            category,
            ..NewEntry::captured(content_type, raw_content, fingerprint)
        };
        let result = match self.storage.capture(entry) {
            Ok(result) => result,
            Err(e) => {
                if let Some(path) = &image_file {
                    let _ = std::fs::remove_file(path);
                }
                return Err(e);
            }
        };

        match result {
            CaptureResult::Inserted(id) => {
                debug!(id, "captured clipboard entry");
                let pruned = self.prune();
                if pruned.contains(&id) {
                    warn!(id, "new entry was pruned immediately");
                } else {
                    self.events.emit(ClipboardEvent::Inserted(id));
                }
            }
            CaptureResult::Bumped(id) => {
                // The existing row keeps its own file.
                if let Some(path) = &image_file {
                    let _ = std::fs::remove_file(path);
                }
                debug!(id, "bumped clipboard entry");
                self.events.emit(ClipboardEvent::Bumped(id));
            }
        }
        Ok(TickOutcome::Captured(result))
    }

    /// Tool label for command lines, else the category of an earlier entry
    /// starting with the same word.
    fn label_for(&self, text: &str, content_type: &ContentType) -> Option<String> {
        if let Some(label) = sub_category(text) {
            return Some(label.to_string());
        }
        if *content_type != ContentType::Dev {
            return None;
        }
        match self.storage.find_similar_category(text) {
            Ok(label) => label,
            Err(e) => {
                warn!(error = %e, "Similar-category lookup failed");
                None
            }
        }
    }

    /// Drops non-permanent entries older than the configured age. Returns
    /// how many were removed; 0 when expiry is disabled.
    pub fn expire(&self) -> Result<usize> {
        let Some(max_age) = self.settings.expire_after() else {
            return Ok(0);
        };
        let removed = self.storage.clear_older_than(Utc::now() - max_age)?;
        for entry in &removed {
            if let Err(e) = remove_image_file(entry, &self.images_dir) {
                warn!(id = entry.id, error = %e, "Failed to remove expired image");
            }
        }
        if !removed.is_empty() {
            info!(removed = removed.len(), "expired old entries");
        }
        Ok(removed.len())
    }

    /// Polls until `running` is cleared. A failing tick is logged and the
    /// loop carries on.
    pub fn run(&self, running: &AtomicBool) {
        let interval = self.settings.poll_interval();
        info!(
            poll_interval_ms = interval.as_millis() as u64,
            max_history = self.settings.max_history,
            "Clipboard monitor started"
        );

        let mut last_expiry: Option<Instant> = None;
        while running.load(Ordering::Relaxed) {
            let start = Instant::now();
            if last_expiry.is_none_or(|at| at.elapsed() >= EXPIRY_CHECK_INTERVAL) {
                if let Err(e) = self.expire() {
                    warn!(error = %e, "Expiry failed");
                }
                last_expiry = Some(start);
            }
            if let Err(e) = self.tick() {
                warn!(error = %e, "Clipboard tick failed");
            }
            let elapsed = start.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }

        info!("Clipboard monitor stopped");
    }

    pub fn spawn(self: Arc<Self>, running: Arc<AtomicBool>) -> thread::JoinHandle<()> {
        thread::spawn(move || self.run(&running))
    }

    fn image_path(&self, fingerprint: &str) -> PathBuf {
        let stem = fingerprint.get(..16).unwrap_or(fingerprint);
        self.images_dir
            .join(format!("{}-{}.png", stem, Utc::now().timestamp_micros()))
    }

    /// Ids of the pruned rows. Failures here are retried implicitly on the
    /// next insert.
    fn prune(&self) -> Vec<i64> {
        match self.storage.prune(self.settings.max_history) {
            Ok(removed) => {
                for entry in &removed {
                    if let Err(e) = remove_image_file(entry, &self.images_dir) {
                        warn!(id = entry.id, error = %e, "Failed to remove pruned image");
                    }
                }
                removed.iter().map(|e| e.id).collect()
            }
            Err(e) => {
                warn!(error = %e, "Pruning failed, will retry after next insert");
                Vec::new()
            }
        }
    }
}
