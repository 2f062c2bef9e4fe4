//! Paste injection: put a stored entry on the clipboard, hand focus back to
//! the previous application and send it a paste keystroke.
//!
//! `Idle -> Arming -> Injected -> Idle`. Only the clipboard write can fail
//! the operation; everything after it is best-effort, since the content is
//! already available for a manual paste.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::clipboard::{ClipboardBackend, payload_for_entry};
use crate::errors::{ClipError, Result};
use crate::monitor::FingerprintSlot;
use crate::storage::models::ClipEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasteState {
    Idle,
    Arming,
    Injected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasteOutcome {
    /// Aborted before the clipboard was touched.
    Cancelled,
    /// Written to the clipboard. `keystroke` is false when focus handoff or
    /// the synthetic paste failed or timed out.
    Delivered { keystroke: bool },
}

/// Window-side collaborator. Implementations must be callable from a
/// worker thread.
pub trait WindowActivator: Send + Sync {
    /// Hide our own window, if any, so the previous app regains focus.
    fn restore_focus(&self) -> Result<()>;
    fn send_paste_keystroke(&self) -> Result<()>;
    fn close_window(&self, label: Option<&str>) -> Result<()>;
}

/// Headless activator: there is no window to hide, the keystroke goes
/// through System Events on macOS.
#[derive(Debug, Default)]
pub struct SystemActivator;

impl WindowActivator for SystemActivator {
    fn restore_focus(&self) -> Result<()> {
        Ok(())
    }

    #[cfg(target_os = "macos")]
    fn send_paste_keystroke(&self) -> Result<()> {
        let status = std::process::Command::new("osascript")
            .arg("-e")
            .arg("tell application \"System Events\" to keystroke \"v\" using {command down}")
            .status()?;
        if !status.success() {
            return Err(ClipError::Clipboard(format!("osascript exited with {}", status)));
        }
        Ok(())
    }

    #[cfg(not(target_os = "macos"))]
    fn send_paste_keystroke(&self) -> Result<()> {
        Err(ClipError::Invalid(
            "synthetic paste is only supported on macOS".into(),
        ))
    }

    fn close_window(&self, label: Option<&str>) -> Result<()> {
        debug!(label = label.unwrap_or("popup"), "no window to close");
        Ok(())
    }
}

/// Set before the clipboard write to abandon a paste.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct PasteInjector {
    backend: Arc<dyn ClipboardBackend>,
    activator: Arc<dyn WindowActivator>,
    slot: FingerprintSlot,
    state: Mutex<PasteState>,
    delay: Duration,
    timeout: Duration,
}

impl PasteInjector {
    pub fn new(
        backend: Arc<dyn ClipboardBackend>,
        activator: Arc<dyn WindowActivator>,
        slot: FingerprintSlot,
        delay: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            activator,
            slot,
            state: Mutex::new(PasteState::Idle),
            delay,
            timeout,
        }
    }

    pub fn state(&self) -> PasteState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: PasteState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn activator(&self) -> &dyn WindowActivator {
        self.activator.as_ref()
    }

    /// Clipboard write only, with echo suppression.
    pub fn copy(&self, entry: &ClipEntry, cancel: &CancelToken) -> Result<PasteOutcome> {
        let outcome = self.arm(entry, cancel);
        self.set_state(PasteState::Idle);
        outcome
    }

    pub fn paste(&self, entry: &ClipEntry, cancel: &CancelToken) -> Result<PasteOutcome> {
        match self.arm(entry, cancel) {
            Ok(PasteOutcome::Delivered { .. }) => {}
            other => {
                self.set_state(PasteState::Idle);
                return other;
            }
        }

        self.set_state(PasteState::Injected);
        let keystroke = self.inject();
        self.set_state(PasteState::Idle);
        Ok(PasteOutcome::Delivered { keystroke })
    }

    fn arm(&self, entry: &ClipEntry, cancel: &CancelToken) -> Result<PasteOutcome> {
        if cancel.is_cancelled() {
            return Ok(PasteOutcome::Cancelled);
        }
        self.set_state(PasteState::Arming);

        let payload = payload_for_entry(entry)?;
        if cancel.is_cancelled() {
            return Ok(PasteOutcome::Cancelled);
        }

        let fingerprint = payload.fingerprint();
        let previous = self.slot.register(fingerprint.clone())?;
        if let Err(e) = self.backend.write(&payload) {
            self.slot.unregister(&fingerprint, previous);
            return Err(e);
        }
        debug!(id = entry.id, "entry written to clipboard");
        Ok(PasteOutcome::Delivered { keystroke: false })
    }

    /// Focus handoff plus keystroke on a worker thread, bounded by the
    /// configured timeout.
    fn inject(&self) -> bool {
        let (tx, rx) = mpsc::channel();
        let activator = Arc::clone(&self.activator);
        let delay = self.delay;
        thread::spawn(move || {
            let result = activator.restore_focus().and_then(|()| {
                thread::sleep(delay);
                activator.send_paste_keystroke()
            });
            let _ = tx.send(result);
        });

        match rx.recv_timeout(self.delay + self.timeout) {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "Paste keystroke failed; content is on the clipboard");
                false
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Paste keystroke timed out; content is on the clipboard"
                );
                false
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use std::time::Instant;

    use chrono::Utc;

    use super::testing::RecordingActivator;
    use super::*;
    use crate::clipboard::ClipboardPayload;
    use crate::clipboard::testing::MemoryClipboard;
    use crate::storage::models::ContentType;

    fn entry(text: &str) -> ClipEntry {
        ClipEntry {
            id: 1,
            content_type: ContentType::Text,
            raw_content: text.to_string(),
            category: None,
            groups: Vec::new(),
            is_permanent: false,
            created_at: Utc::now(),
        }
    }

    fn injector(
        activator: RecordingActivator,
        timeout: Duration,
    ) -> (PasteInjector, Arc<MemoryClipboard>, Arc<RecordingActivator>, FingerprintSlot) {
        let clipboard = Arc::new(MemoryClipboard::default());
        let activator = Arc::new(activator);
        let slot = FingerprintSlot::new();
        let injector = PasteInjector::new(
            clipboard.clone(),
            activator.clone(),
            slot.clone(),
            Duration::ZERO,
            timeout,
        );
        (injector, clipboard, activator, slot)
    }

    #[test]
    fn test_paste_writes_then_injects() {
        let (inj, clipboard, activator, slot) =
            injector(RecordingActivator::default(), Duration::from_secs(2));
        let outcome = inj.paste(&entry("hello"), &CancelToken::new()).unwrap();

        assert_eq!(outcome, PasteOutcome::Delivered { keystroke: true });
        assert_eq!(clipboard.current(), Some(ClipboardPayload::Text("hello".into())));
        assert_eq!(activator.calls(), vec!["restore_focus", "keystroke"]);
        assert_eq!(slot.get(), Some(ClipboardPayload::Text("hello".into()).fingerprint()));
        assert_eq!(inj.state(), PasteState::Idle);
    }

    #[test]
    fn test_cancel_before_write_changes_nothing() {
        let (inj, clipboard, activator, slot) =
            injector(RecordingActivator::default(), Duration::from_secs(2));
        let cancel = CancelToken::new();
        cancel.cancel();

        assert_eq!(inj.paste(&entry("x"), &cancel).unwrap(), PasteOutcome::Cancelled);
        assert_eq!(clipboard.writes.load(Ordering::SeqCst), 0);
        assert!(activator.calls().is_empty());
        assert!(slot.get().is_none());
        assert_eq!(inj.state(), PasteState::Idle);
    }

    #[test]
    fn test_write_failure_restores_slot() {
        let (inj, clipboard, activator, slot) =
            injector(RecordingActivator::default(), Duration::from_secs(2));
        slot.register("previous".into()).unwrap();
        clipboard.fail_writes.store(true, Ordering::SeqCst);

        assert!(inj.paste(&entry("x"), &CancelToken::new()).is_err());
        assert_eq!(slot.get().as_deref(), Some("previous"));
        assert!(activator.calls().is_empty());
        assert_eq!(inj.state(), PasteState::Idle);
    }

    #[test]
    fn test_keystroke_failure_is_not_fatal() {
        let activator = RecordingActivator::default();
        activator.fail.store(true, Ordering::SeqCst);
        let (inj, clipboard, _, _) = injector(activator, Duration::from_secs(2));

        let outcome = inj.paste(&entry("still here"), &CancelToken::new()).unwrap();
        assert_eq!(outcome, PasteOutcome::Delivered { keystroke: false });
        assert_eq!(clipboard.current(), Some(ClipboardPayload::Text("still here".into())));
    }

    #[test]
    fn test_stalled_activator_times_out() {
        let activator = RecordingActivator {
            stall: Some(Duration::from_millis(500)),
            ..Default::default()
        };
        let (inj, _, _, _) = injector(activator, Duration::from_millis(50));

        let start = Instant::now();
        let outcome = inj.paste(&entry("x"), &CancelToken::new()).unwrap();
        assert_eq!(outcome, PasteOutcome::Delivered { keystroke: false });
        assert!(start.elapsed() < Duration::from_millis(450));
        assert_eq!(inj.state(), PasteState::Idle);
    }

    #[test]
    fn test_copy_skips_injection() {
        let (inj, clipboard, activator, _) =
            injector(RecordingActivator::default(), Duration::from_secs(2));
        inj.copy(&entry("copied"), &CancelToken::new()).unwrap();
        assert_eq!(clipboard.writes.load(Ordering::SeqCst), 1);
        assert!(activator.calls().is_empty());
    }
}
