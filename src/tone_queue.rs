//! Bounded FIFO of pending tones between producers and the clock tick.
//!
//! The ring holds `TONE_QUEUE_CAPACITY` slots; one always stays free so that
//! `head == tail` can mean empty. `head` is the slot last handed out, queued
//! tones live in `head + 1 ..= tail`.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{CwError, Result};

pub const TONE_QUEUE_CAPACITY: usize = 3000;
/// Senders refuse new characters at or above this length
pub const TONE_QUEUE_HIGH_WATER_MARK: usize = 2900;
/// Smallest unit of time the queue plays
pub const QUANTUM_USECS: i32 = 100;
/// Duration marking a tone that repeats until something else is queued
pub const FOREVER_USECS: i32 = -QUANTUM_USECS;

pub type LowWaterCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tone {
    pub usecs: i32,
    /// Hz, 0 for silence
    pub frequency: i32,
}

impl Tone {
    pub fn new(usecs: i32, frequency: i32) -> Self {
        Self { usecs, frequency }
    }

    pub fn silence(usecs: i32) -> Self {
        Self::new(usecs, 0)
    }

    pub fn forever(frequency: i32) -> Self {
        Self::new(FOREVER_USECS, frequency)
    }

    pub fn is_forever(&self) -> bool {
        self.usecs == FOREVER_USECS
    }

    /// How long the tone occupies the output once dequeued
    pub fn play_usecs(&self) -> i32 {
        if self.is_forever() {
            QUANTUM_USECS
        } else {
            self.usecs
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueState {
    /// No drain cycle scheduled
    Idle,
    /// The clock is draining the queue
    Busy,
}

/// Result of one drain step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dequeue {
    /// Nothing was playing and nothing is queued
    StillEmpty,
    /// The last tone finished; the queue went idle
    JustEmptied,
    /// This tone should play now
    NonEmpty(Tone),
}

struct Ring {
    slots: Vec<Tone>,
    head: usize,
    tail: usize,
    state: QueueState,
    low_water_mark: usize,
    low_water_callback: Option<LowWaterCallback>,
}

impl Ring {
    fn next(index: usize) -> usize {
        (index + 1) % TONE_QUEUE_CAPACITY
    }

    fn prev(index: usize) -> usize {
        (index + TONE_QUEUE_CAPACITY - 1) % TONE_QUEUE_CAPACITY
    }

    fn len(&self) -> usize {
        (self.tail + TONE_QUEUE_CAPACITY - self.head) % TONE_QUEUE_CAPACITY
    }
}

pub struct ToneQueue {
    ring: Mutex<Ring>,
}

impl Default for ToneQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ToneQueue {
    pub fn new() -> Self {
        Self {
            ring: Mutex::new(Ring {
                slots: vec![Tone::default(); TONE_QUEUE_CAPACITY],
                head: 0,
                tail: 0,
                state: QueueState::Idle,
                low_water_mark: 0,
                low_water_callback: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Usable slots
    pub fn capacity(&self) -> usize {
        TONE_QUEUE_CAPACITY - 1
    }

    pub fn length(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    pub fn is_full(&self) -> bool {
        let ring = self.lock();
        Ring::next(ring.tail) == ring.head
    }

    pub fn state(&self) -> QueueState {
        self.lock().state
    }

    /// True while a drain cycle is in flight
    pub fn is_busy(&self) -> bool {
        self.state() == QueueState::Busy
    }

    /// Append a tone. Returns true when the queue was idle and has just
    /// become busy, in which case the caller must arm the clock.
    pub fn enqueue(&self, tone: Tone) -> Result<bool> {
        let mut ring = self.lock();
        let tail = Ring::next(ring.tail);
        if tail == ring.head {
            return Err(CwError::QueueFull);
        }
        ring.slots[tail] = tone;
        ring.tail = tail;

        log::trace!(
            "Enqueued {} us at {} Hz, length {}",
            tone.usecs,
            tone.frequency,
            ring.len()
        );

        if ring.state == QueueState::Idle {
            ring.state = QueueState::Busy;
            return Ok(true);
        }
        Ok(false)
    }

    /// One drain step, called from the clock tick.
    ///
    /// Zero-length tones in front of the next real tone are skipped. A
    /// forever tone that is the only queued entry is handed out but left in
    /// place. The low-water callback fires, outside the lock, when this step
    /// takes the length from above the mark to at or below it.
    pub fn dequeue(&self) -> Dequeue {
        let (tone, callback) = {
            let mut ring = self.lock();
            match ring.state {
                QueueState::Idle => return Dequeue::StillEmpty,
                QueueState::Busy if ring.head == ring.tail => {
                    ring.state = QueueState::Idle;
                    log::trace!("Tone queue just emptied");
                    return Dequeue::JustEmptied;
                }
                QueueState::Busy => {}
            }

            let length_before = ring.len();
            let mut index = ring.head;
            loop {
                index = Ring::next(index);
                if index == ring.tail || ring.slots[index].usecs != 0 {
                    break;
                }
            }

            let tone = ring.slots[index];
            let held = tone.is_forever() && length_before == 1;
            ring.head = if held { Ring::prev(index) } else { index };

            let crossed = length_before > ring.low_water_mark
                && ring.len() <= ring.low_water_mark
                && !held;
            let callback = if crossed {
                ring.low_water_callback.clone()
            } else {
                None
            };
            (tone, callback)
        };

        if let Some(callback) = callback {
            callback();
        }
        Dequeue::NonEmpty(tone)
    }

    /// Drop every pending tone; whatever is playing finishes
    pub fn discard_pending(&self) {
        let mut ring = self.lock();
        ring.head = ring.tail;
    }

    /// Drop pending tones, force idle and forget the low-water callback
    pub fn reset(&self) {
        let mut ring = self.lock();
        ring.head = ring.tail;
        ring.state = QueueState::Idle;
        ring.low_water_mark = 0;
        ring.low_water_callback = None;
    }

    /// Position of the head, changes once per dequeued tone
    pub fn head_position(&self) -> usize {
        self.lock().head
    }

    pub fn register_low_water_callback(
        &self,
        level: usize,
        callback: Option<LowWaterCallback>,
    ) -> Result<()> {
        if level >= TONE_QUEUE_CAPACITY - 1 {
            return Err(CwError::invalid(format!(
                "low water level {} must be below {}",
                level,
                TONE_QUEUE_CAPACITY - 1
            )));
        }
        let mut ring = self.lock();
        ring.low_water_mark = level;
        ring.low_water_callback = callback;
        Ok(())
    }
}
