use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, Sender};

use tracing::trace;

/// Event name presentation layers listen for.
pub const CLIPBOARD_UPDATED: &str = "clipboard-updated";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipboardEvent {
    Inserted(i64),
    Bumped(i64),
}

impl ClipboardEvent {
    pub fn name(&self) -> &'static str {
        CLIPBOARD_UPDATED
    }

    pub fn id(&self) -> i64 {
        match self {
            ClipboardEvent::Inserted(id) | ClipboardEvent::Bumped(id) => *id,
        }
    }
}

/// Fan-out to any number of subscribers. Sends never block; a subscriber
/// whose receiver is gone is dropped on the next emit.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<ClipboardEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<ClipboardEvent> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }
        rx
    }

    pub fn emit(&self, event: ClipboardEvent) {
        let Ok(mut subs) = self.subscribers.lock() else {
            return;
        };
        subs.retain(|tx| tx.send(event).is_ok());
        trace!(event = event.name(), id = event.id(), listeners = subs.len(), "emitted");
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_subscriber_receives() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.emit(ClipboardEvent::Inserted(7));
        assert_eq!(a.try_recv().unwrap(), ClipboardEvent::Inserted(7));
        assert_eq!(b.try_recv().unwrap(), ClipboardEvent::Inserted(7));
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let bus = EventBus::new();
        let keep = bus.subscribe();
        drop(bus.subscribe());
        bus.emit(ClipboardEvent::Bumped(1));
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(keep.try_recv().unwrap().id(), 1);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new();
        bus.emit(ClipboardEvent::Inserted(1));
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(ClipboardEvent::Inserted(1).name(), CLIPBOARD_UPDATED);
    }
}
