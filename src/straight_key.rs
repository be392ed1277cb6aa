//! Straight key: key down sounds a continuous tone, key up silences it.

use crate::error::{CwError, Result};
use crate::generator::{lock, Generator, Shared, TickSource};

/// Interval at which a held key re-sends its tone to the sink
pub const KEEP_ALIVE_USECS: i32 = 500_000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StraightKey {
    down: bool,
}

impl StraightKey {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_down(&self) -> bool {
        self.down
    }

    /// Returns true if the state changed
    pub fn set(&mut self, down: bool) -> bool {
        if self.down == down {
            return false;
        }
        self.down = down;
        true
    }
}

impl Shared {
    pub(crate) fn straight_key_tick(&self) {
        if self.take_due(TickSource::StraightKey) && lock(&self.straight_key).is_down() {
            self.play(self.frequency());
            self.arm(TickSource::StraightKey, KEEP_ALIVE_USECS);
        }
    }
}

impl Generator {
    /// Report a key transition; `true` is key down
    pub fn notify_straight_key_event(&self, down: bool) -> Result<()> {
        {
            let _claim = self.shared.claim_sink();
            if lock(&self.shared.straight_key).is_down() == down {
                return Ok(());
            }
            if self.shared.queue.is_busy() || lock(&self.shared.keyer).is_busy() {
                return Err(CwError::Busy);
            }
            lock(&self.shared.straight_key).set(down);
        }

        log::debug!("Straight key {}", if down { "down" } else { "up" });
        if down {
            self.shared.cancel_finalization();
            self.shared.keying.set(true);
            self.shared.play(self.shared.frequency());
            self.shared.arm(TickSource::StraightKey, KEEP_ALIVE_USECS);
        } else {
            self.shared.keying.set(false);
            self.shared.play(0);
            self.shared.schedule_finalization();
        }
        Ok(())
    }

    pub fn straight_key_state(&self) -> bool {
        lock(&self.shared.straight_key).is_down()
    }

    pub fn is_straight_key_busy(&self) -> bool {
        self.straight_key_state()
    }

    pub fn reset_straight_key(&self) {
        // Only a key that was down owns the sink
        if lock(&self.shared.straight_key).set(false) {
            self.shared.keying.set(false);
            self.shared.play(0);
            self.shared.schedule_finalization();
        }
    }
}
