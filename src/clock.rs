//! One-shot timer multiplexed onto a table of tick handlers.
//!
//! A [`Clock`] holds a set of pending deadlines. When the earliest one
//! expires every registered handler runs once, in registration order, on the
//! dispatching thread. Handlers re-arm the clock with [`Clock::run_once`] when
//! they need another tick. Arming never replaces another deadline, so a
//! handler must keep its own due time and ignore ticks that come early.
//!
//! Two drivers are available. [`Clock::realtime`] spawns a thread that sleeps
//! until the earliest deadline. [`Clock::manual`] keeps virtual time that only moves
//! when the owner calls [`Clock::advance`] or [`Clock::step`], which makes
//! timing deterministic under test.

use std::cell::Cell;
use std::collections::BTreeSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::error::{CwError, Result};

/// Size of the handler table
pub const MAX_TICK_HANDLERS: usize = 32;

/// Longest a realtime waiter sleeps before rechecking its condition
const TICK_WAIT_TIMEOUT: Duration = Duration::from_millis(100);

pub type TickHandler = Box<dyn FnMut() + Send>;

thread_local! {
    static IN_TICK: Cell<bool> = const { Cell::new(false) };
    static BLOCK_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// True while the current thread is running tick handlers
pub fn in_tick() -> bool {
    IN_TICK.with(|t| t.get())
}

/// Commands from clock handles to the realtime driver thread
enum DriverCommand {
    Rearm,
    Shutdown,
}

enum Driver {
    Realtime {
        commands: Sender<DriverCommand>,
        epoch: Instant,
    },
    Manual,
}

#[derive(Default)]
struct ClockState {
    /// Absolute deadlines in clock microseconds
    deadlines: BTreeSet<u64>,
    /// Virtual time, manual driver only
    now: u64,
    ticks: u64,
    /// Number of live block guards, on any thread
    blocked: usize,
}

struct ClockInner {
    driver: Driver,
    state: Mutex<ClockState>,
    ticked: Condvar,
    /// Held for the whole dispatch, so handlers never run concurrently
    handlers: Mutex<Vec<TickHandler>>,
}

enum Due {
    Now,
    In(Duration),
    Never,
}

#[derive(Clone)]
pub struct Clock {
    inner: Arc<ClockInner>,
}

impl Clock {
    /// Clock driven by a background thread in wall-clock time
    pub fn realtime() -> Result<Self> {
        let (commands, command_rx) = crossbeam_channel::unbounded();
        let inner = Arc::new(ClockInner {
            driver: Driver::Realtime {
                commands,
                epoch: Instant::now(),
            },
            state: Mutex::new(ClockState::default()),
            ticked: Condvar::new(),
            handlers: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&inner);
        thread::Builder::new()
            .name("cw-clock".to_string())
            .spawn(move || drive(weak, command_rx))
            .map_err(|e| CwError::System(format!("failed to start clock thread: {}", e)))?;

        log::debug!("Realtime clock started");
        Ok(Self { inner })
    }

    /// Clock with virtual time, advanced explicitly by its owner
    pub fn manual() -> Self {
        Self {
            inner: Arc::new(ClockInner {
                driver: Driver::Manual,
                state: Mutex::new(ClockState::default()),
                ticked: Condvar::new(),
                handlers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn is_manual(&self) -> bool {
        matches!(self.inner.driver, Driver::Manual)
    }

    /// Current clock time in microseconds
    pub fn now_usecs(&self) -> u64 {
        match &self.inner.driver {
            Driver::Realtime { epoch, .. } => epoch.elapsed().as_micros() as u64,
            Driver::Manual => self.inner.lock_state().now,
        }
    }

    /// Number of dispatches so far
    pub fn tick_count(&self) -> u64 {
        self.inner.lock_state().ticks
    }

    /// Add a handler to the tick table permanently.
    ///
    /// Fails with `Deadlock` from inside a tick, where the table is in use.
    pub fn register_handler(&self, handler: TickHandler) -> Result<()> {
        if in_tick() {
            return Err(CwError::Deadlock);
        }
        let mut handlers = self
            .inner
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if handlers.len() >= MAX_TICK_HANDLERS {
            return Err(CwError::System(format!(
                "tick handler table full ({} entries)",
                MAX_TICK_HANDLERS
            )));
        }
        handlers.push(handler);
        Ok(())
    }

    /// Arm the clock to tick after `after_usecs`, or as soon as possible when
    /// it is zero or negative. An optional handler is registered first.
    pub fn run_once(&self, after_usecs: i32, handler: Option<TickHandler>) -> Result<()> {
        if let Some(handler) = handler {
            self.register_handler(handler)?;
        }

        self.run_at(self.now_usecs() + after_usecs.max(0) as u64);
        Ok(())
    }

    /// Arm the clock to tick at `deadline` clock microseconds. A deadline
    /// already in the past ticks as soon as possible.
    pub fn run_at(&self, deadline: u64) {
        self.inner.lock_state().deadlines.insert(deadline);
        self.inner.wake_driver();
    }

    pub fn has_pending_tick(&self) -> bool {
        !self.inner.lock_state().deadlines.is_empty()
    }

    /// Defer ticks until the returned guard is dropped.
    ///
    /// Waits on the same thread fail with `Deadlock` while the guard lives.
    pub fn block(&self) -> ClockBlock<'_> {
        self.inner.lock_state().blocked += 1;
        BLOCK_DEPTH.with(|d| d.set(d.get() + 1));
        ClockBlock { clock: self }
    }

    /// True if the calling thread currently holds a block guard
    pub fn is_blocked_here(&self) -> bool {
        BLOCK_DEPTH.with(|d| d.get() > 0)
    }

    /// Suspend until the next tick has been dispatched.
    ///
    /// On a manual clock this fires the pending deadline itself. A realtime
    /// waiter may also return after a short timeout; callers loop on their
    /// own condition either way.
    pub fn wait_for_tick(&self) -> Result<()> {
        if in_tick() || self.is_blocked_here() {
            return Err(CwError::Deadlock);
        }

        match self.inner.driver {
            Driver::Manual => {
                if self.step() {
                    Ok(())
                } else {
                    Err(CwError::Deadlock)
                }
            }
            Driver::Realtime { .. } => {
                let state = self.inner.lock_state();
                let seen = state.ticks;
                let _unused = self
                    .inner
                    .ticked
                    .wait_timeout_while(state, TICK_WAIT_TIMEOUT, |s| s.ticks == seen)
                    .unwrap_or_else(|e| e.into_inner());
                Ok(())
            }
        }
    }

    /// Manual clock: jump to the earliest deadline and dispatch it.
    /// Returns false when nothing is scheduled or ticks are blocked.
    pub fn step(&self) -> bool {
        if !self.is_manual() {
            return false;
        }
        {
            let mut state = self.inner.lock_state();
            if state.blocked > 0 {
                return false;
            }
            match state.deadlines.pop_first() {
                Some(deadline) => state.now = state.now.max(deadline),
                None => return false,
            }
        }
        self.inner.dispatch();
        true
    }

    /// Manual clock: move time forward by `usecs`, dispatching every
    /// deadline that falls inside the interval at its own time
    pub fn advance(&self, usecs: u64) {
        if !self.is_manual() {
            return;
        }
        let target = self.inner.lock_state().now + usecs;
        loop {
            {
                let mut state = self.inner.lock_state();
                let due = match state.deadlines.first() {
                    Some(&deadline) if deadline <= target && state.blocked == 0 => deadline,
                    _ => {
                        state.now = state.now.max(target);
                        return;
                    }
                };
                state.deadlines.remove(&due);
                state.now = state.now.max(due);
            }
            self.inner.dispatch();
        }
    }

    /// Manual clock: keep stepping until nothing is scheduled, up to
    /// `max_ticks` dispatches. Returns the number of dispatches.
    pub fn run_until_idle(&self, max_ticks: usize) -> usize {
        let mut count = 0;
        while count < max_ticks && self.step() {
            count += 1;
        }
        count
    }
}

/// Guard returned by [`Clock::block`]
pub struct ClockBlock<'a> {
    clock: &'a Clock,
}

impl Drop for ClockBlock<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.clock.inner.lock_state();
            state.blocked = state.blocked.saturating_sub(1);
        }
        BLOCK_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
        self.clock.inner.wake_driver();
    }
}

impl ClockInner {
    fn lock_state(&self) -> MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wake_driver(&self) {
        if let Driver::Realtime { commands, .. } = &self.driver {
            let _ = commands.send(DriverCommand::Rearm);
        }
    }

    fn due(&self) -> Due {
        let now = match &self.driver {
            Driver::Realtime { epoch, .. } => epoch.elapsed().as_micros() as u64,
            Driver::Manual => return Due::Never,
        };
        let mut state = self.lock_state();
        if state.blocked > 0 {
            return Due::Never;
        }
        match state.deadlines.first() {
            Some(&deadline) if deadline <= now => {
                // One dispatch serves every deadline already passed
                state.deadlines = state.deadlines.split_off(&(now + 1));
                Due::Now
            }
            Some(&deadline) => Due::In(Duration::from_micros(deadline - now)),
            None => Due::Never,
        }
    }

    fn dispatch(&self) {
        let mut handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        IN_TICK.with(|t| t.set(true));
        for handler in handlers.iter_mut() {
            handler();
        }
        IN_TICK.with(|t| t.set(false));
        drop(handlers);

        let mut state = self.lock_state();
        state.ticks += 1;
        log::trace!("Tick {} dispatched", state.ticks);
        drop(state);
        self.ticked.notify_all();
    }
}

impl Drop for ClockInner {
    fn drop(&mut self) {
        if let Driver::Realtime { commands, .. } = &self.driver {
            let _ = commands.send(DriverCommand::Shutdown);
        }
    }
}

fn drive(clock: Weak<ClockInner>, commands: Receiver<DriverCommand>) {
    loop {
        let due = match clock.upgrade() {
            Some(inner) => match inner.due() {
                Due::Now => {
                    inner.dispatch();
                    continue;
                }
                due => due,
            },
            None => break,
        };

        let command = match due {
            Due::In(timeout) => match commands.recv_timeout(timeout) {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            _ => match commands.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
        };

        if let DriverCommand::Shutdown = command {
            break;
        }
    }
    log::debug!("Realtime clock stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler(counter: &Arc<AtomicUsize>) -> TickHandler {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_manual_deadline_fires_at_time() {
        let clock = Clock::manual();
        let count = Arc::new(AtomicUsize::new(0));
        clock
            .run_once(1000, Some(counting_handler(&count)))
            .unwrap();

        clock.advance(999);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        clock.advance(1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(clock.now_usecs(), 1000);
        assert!(!clock.has_pending_tick());
    }

    #[test]
    fn test_deadlines_accumulate() {
        let clock = Clock::manual();
        let count = Arc::new(AtomicUsize::new(0));
        clock.register_handler(counting_handler(&count)).unwrap();
        clock.run_once(5000, None).unwrap();
        clock.run_once(100, None).unwrap();
        clock.run_once(100, None).unwrap();

        clock.advance(1000);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(clock.has_pending_tick());
        clock.advance(9000);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(clock.now_usecs(), 10_000);
        assert!(!clock.has_pending_tick());
    }

    #[test]
    fn test_register_inside_tick_is_refused() {
        let clock = Clock::manual();
        let outcome = Arc::new(Mutex::new(None));
        let inner = clock.clone();
        let seen = Arc::clone(&outcome);
        clock
            .register_handler(Box::new(move || {
                let result = inner.register_handler(Box::new(|| {}));
                let extra: TickHandler = Box::new(|| {});
                let rearm = inner.run_once(10, Some(extra));
                *seen.lock().unwrap() = Some((result, rearm));
            }))
            .unwrap();
        clock.run_once(0, None).unwrap();
        assert!(clock.step());

        let (result, rearm) = outcome.lock().unwrap().take().unwrap();
        assert!(matches!(result, Err(CwError::Deadlock)));
        assert!(matches!(rearm, Err(CwError::Deadlock)));
        // Registration still works outside a tick
        clock.register_handler(Box::new(|| {})).unwrap();
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let clock = Clock::manual();
        let order = Arc::new(Mutex::new(Vec::new()));
        for id in 0..3 {
            let order = Arc::clone(&order);
            clock
                .register_handler(Box::new(move || order.lock().unwrap().push(id)))
                .unwrap();
        }
        clock.run_once(0, None).unwrap();
        assert!(clock.step());
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_handler_table_is_bounded() {
        let clock = Clock::manual();
        for _ in 0..MAX_TICK_HANDLERS {
            clock.register_handler(Box::new(|| {})).unwrap();
        }
        assert!(matches!(
            clock.register_handler(Box::new(|| {})),
            Err(CwError::System(_))
        ));
    }

    #[test]
    fn test_block_defers_and_refuses_waits() {
        let clock = Clock::manual();
        let count = Arc::new(AtomicUsize::new(0));
        clock.run_once(0, Some(counting_handler(&count))).unwrap();
        {
            let _block = clock.block();
            clock.advance(100);
            assert_eq!(count.load(Ordering::SeqCst), 0);
            assert!(matches!(clock.wait_for_tick(), Err(CwError::Deadlock)));
        }
        clock.advance(0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_manual_wait_without_deadline_is_deadlock() {
        let clock = Clock::manual();
        assert!(matches!(clock.wait_for_tick(), Err(CwError::Deadlock)));
    }

    #[test]
    fn test_self_rearming_handler() {
        let clock = Clock::manual();
        let count = Arc::new(AtomicUsize::new(0));
        let rearm = clock.clone();
        let seen = Arc::clone(&count);
        clock
            .register_handler(Box::new(move || {
                if seen.fetch_add(1, Ordering::SeqCst) < 4 {
                    let _ = rearm.run_once(250, None);
                }
            }))
            .unwrap();
        clock.run_once(0, None).unwrap();
        assert_eq!(clock.run_until_idle(100), 5);
        assert_eq!(clock.now_usecs(), 1000);
    }

    #[test]
    fn test_realtime_clock_ticks() {
        let clock = Clock::realtime().unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        clock.run_once(1000, Some(counting_handler(&count))).unwrap();
        let started = Instant::now();
        while count.load(Ordering::SeqCst) == 0 && started.elapsed() < Duration::from_secs(2) {
            clock.wait_for_tick().unwrap();
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
