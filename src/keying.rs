use std::sync::{Arc, Mutex};

/// Called with `true` when the key closes and `false` when it opens
pub type KeyingCallback = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Default)]
struct KeyingState {
    closed: bool,
    callback: Option<KeyingCallback>,
}

/// Tracks the logical key state and reports edges only.
///
/// The callback runs outside the internal lock, possibly on the clock
/// thread, and must not block.
#[derive(Default)]
pub struct KeyingNotifier {
    state: Mutex<KeyingState>,
}

impl KeyingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_callback(&self, callback: Option<KeyingCallback>) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .callback = callback;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).closed
    }

    /// Record a key state, notifying only if it differs from the last one.
    /// Returns true on an edge.
    pub fn set(&self, closed: bool) -> bool {
        let callback = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.closed == closed {
                return false;
            }
            state.closed = closed;
            state.callback.clone()
        };

        log::trace!("Key {}", if closed { "closed" } else { "open" });
        if let Some(callback) = callback {
            callback(closed);
        }
        true
    }
}
