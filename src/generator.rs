//! The generator session: one audio sink, one tone queue, one clock.
//!
//! A [`Generator`] owns every piece of sending state. Sending, the iambic
//! keyer and the straight key all drive the same sink and are mutually
//! exclusive; each refuses with `Busy` while another one holds the sink.
//!
//! Four tick handlers are registered on the clock, in this order: the tone
//! queue drain, the iambic keyer, the straight key keep-alive and the idle
//! finalizer. They hold weak references so dropping the generator stops them.
//! Each keeps its own due time and ignores ticks armed by anything else, so
//! several generators can share one clock.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::audio::AudioSink;
use crate::clock::{self, Clock};
use crate::error::{CwError, Result};
use crate::keyer::IambicKeyer;
use crate::keying::{KeyingCallback, KeyingNotifier};
use crate::morse::timing::{Parameter, TimingParameters};
use crate::receiver::Receiver;
use crate::straight_key::StraightKey;
use crate::tone_queue::{Dequeue, LowWaterCallback, Tone, ToneQueue};

pub type SharedTiming = Arc<Mutex<TimingParameters>>;

/// Interval between idle checks before the sink is released
const FINALIZATION_DELAY_USECS: i32 = 1_000_000;
/// Idle checks before the sink is released
const FINALIZATION_COUNTDOWN: u32 = 10;

struct Output {
    sink: Box<dyn AudioSink>,
    device: Option<String>,
    open: bool,
}

/// Parts of the generator that arm the clock
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TickSource {
    ToneQueue,
    Keyer,
    StraightKey,
    Finalization,
}

const TICK_SOURCES: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Finalization {
    None,
    Pending(u32),
}

pub(crate) struct Shared {
    pub(crate) timing: SharedTiming,
    pub(crate) queue: ToneQueue,
    pub(crate) keyer: Mutex<IambicKeyer>,
    pub(crate) straight_key: Mutex<StraightKey>,
    pub(crate) receiver: Mutex<Receiver>,
    pub(crate) keying: KeyingNotifier,
    pub(crate) clock: Clock,
    output: Mutex<Output>,
    finalization: Mutex<Finalization>,
    /// Clock time each tick source next wants to run
    due: Mutex<[Option<u64>; TICK_SOURCES]>,
    /// Held across the busy check and the state change of whichever
    /// source takes the sink
    sink_claim: Mutex<()>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct Generator {
    pub(crate) shared: Arc<Shared>,
}

impl Generator {
    pub fn new(sink: Box<dyn AudioSink>, clock: Clock) -> Result<Self> {
        Self::with_device(sink, clock, None)
    }

    pub fn with_device(
        sink: Box<dyn AudioSink>,
        clock: Clock,
        device: Option<String>,
    ) -> Result<Self> {
        let timing: SharedTiming = Arc::new(Mutex::new(TimingParameters::new()));
        let shared = Arc::new(Shared {
            receiver: Mutex::new(Receiver::with_timing(Arc::clone(&timing))),
            timing,
            queue: ToneQueue::new(),
            keyer: Mutex::new(IambicKeyer::new()),
            straight_key: Mutex::new(StraightKey::new()),
            keying: KeyingNotifier::new(),
            clock: clock.clone(),
            output: Mutex::new(Output {
                sink,
                device,
                open: false,
            }),
            finalization: Mutex::new(Finalization::None),
            due: Mutex::new([None; TICK_SOURCES]),
            sink_claim: Mutex::new(()),
        });

        let handlers: [fn(&Shared); 4] = [
            Shared::tone_queue_tick,
            Shared::keyer_tick,
            Shared::straight_key_tick,
            Shared::finalization_tick,
        ];
        for handler in handlers {
            let weak: Weak<Shared> = Arc::downgrade(&shared);
            clock.register_handler(Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    handler(&shared);
                }
            }))?;
        }

        Ok(Self { shared })
    }

    /// Open the sink. Tones also open it on demand.
    pub fn start(&self) -> Result<()> {
        self.shared.open_output()?;
        log::info!("Generator started on {} sink", self.sink_name());
        Ok(())
    }

    /// Flush, silence and release the sink
    pub fn stop(&self) -> Result<()> {
        self.flush_tone_queue()?;
        self.shared.queue.reset();
        self.shared.play(0);
        self.shared.cancel_finalization();
        self.shared.close_output();
        log::info!("Generator stopped");
        Ok(())
    }

    pub fn sink_name(&self) -> String {
        lock(&self.shared.output).sink.name().to_string()
    }

    pub fn is_sink_open(&self) -> bool {
        lock(&self.shared.output).open
    }

    pub fn clock(&self) -> &Clock {
        &self.shared.clock
    }

    /// Shared handle to the timing parameters
    pub fn timing(&self) -> SharedTiming {
        Arc::clone(&self.shared.timing)
    }

    /// The receiver bound to this generator's timing parameters
    pub fn receiver(&self) -> MutexGuard<'_, Receiver> {
        lock(&self.shared.receiver)
    }

    pub fn register_keying_callback(&self, callback: Option<KeyingCallback>) {
        self.shared.keying.register_callback(callback);
    }

    pub fn is_key_closed(&self) -> bool {
        self.shared.keying.is_closed()
    }

    pub fn set_parameter(&self, parameter: Parameter, value: i32) -> Result<()> {
        lock(&self.shared.timing).set(parameter, value)?;
        if parameter == Parameter::Volume {
            lock(&self.shared.output).sink.set_volume(value);
        }
        Ok(())
    }

    pub fn parameter(&self, parameter: Parameter) -> i32 {
        lock(&self.shared.timing).get(parameter)
    }

    pub fn set_send_speed(&self, wpm: i32) -> Result<()> {
        self.set_parameter(Parameter::SendSpeed, wpm)
    }

    pub fn set_receive_speed(&self, wpm: i32) -> Result<()> {
        self.set_parameter(Parameter::ReceiveSpeed, wpm)
    }

    pub fn set_frequency(&self, hz: i32) -> Result<()> {
        self.set_parameter(Parameter::Frequency, hz)
    }

    pub fn set_volume(&self, percent: i32) -> Result<()> {
        self.set_parameter(Parameter::Volume, percent)
    }

    pub fn set_gap(&self, units: i32) -> Result<()> {
        self.set_parameter(Parameter::Gap, units)
    }

    pub fn set_tolerance(&self, percent: i32) -> Result<()> {
        self.set_parameter(Parameter::Tolerance, percent)
    }

    pub fn set_weighting(&self, percent: i32) -> Result<()> {
        self.set_parameter(Parameter::Weighting, percent)
    }

    pub fn send_speed(&self) -> i32 {
        self.parameter(Parameter::SendSpeed)
    }

    pub fn receive_speed(&self) -> i32 {
        self.parameter(Parameter::ReceiveSpeed)
    }

    pub fn frequency(&self) -> i32 {
        self.parameter(Parameter::Frequency)
    }

    pub fn volume(&self) -> i32 {
        self.parameter(Parameter::Volume)
    }

    pub fn gap(&self) -> i32 {
        self.parameter(Parameter::Gap)
    }

    pub fn tolerance(&self) -> i32 {
        self.parameter(Parameter::Tolerance)
    }

    pub fn weighting(&self) -> i32 {
        self.parameter(Parameter::Weighting)
    }

    /// Reset every sub-state and restore default parameters
    pub fn complete_reset(&self) {
        self.reset_tone_queue();
        self.reset_keyer();
        self.reset_straight_key();
        self.receiver().reset();
        *lock(&self.shared.timing) = TimingParameters::new();
        let volume = self.volume();
        lock(&self.shared.output).sink.set_volume(volume);
        log::debug!("Generator reset to defaults");
    }

    // Tone queue

    /// Queue a tone of `usecs` at `frequency`; 0 Hz is silence
    pub fn queue_tone(&self, usecs: i32, frequency: i32) -> Result<()> {
        if usecs < 0 {
            return Err(CwError::invalid(format!("tone length {} is negative", usecs)));
        }
        let (min, max) = Parameter::Frequency.limits();
        if frequency < min || frequency > max {
            return Err(CwError::invalid(format!(
                "frequency {} outside {}..={}",
                frequency, min, max
            )));
        }
        self.shared.enqueue(Tone::new(usecs, frequency))
    }

    /// Queue a tone that keeps sounding until another tone is queued
    pub fn queue_forever_tone(&self, frequency: i32) -> Result<()> {
        let (min, max) = Parameter::Frequency.limits();
        if frequency < min || frequency > max {
            return Err(CwError::invalid(format!(
                "frequency {} outside {}..={}",
                frequency, min, max
            )));
        }
        self.shared.enqueue(Tone::forever(frequency))
    }

    /// Run one drain step by hand. The clock normally does this.
    pub fn dequeue_and_play(&self) -> Dequeue {
        self.shared.dequeue_and_play()
    }

    pub fn is_tone_busy(&self) -> bool {
        self.shared.queue.is_busy()
    }

    pub fn tone_queue_length(&self) -> usize {
        self.shared.queue.length()
    }

    pub fn tone_queue_capacity(&self) -> usize {
        self.shared.queue.capacity()
    }

    pub fn is_tone_queue_full(&self) -> bool {
        self.shared.queue.is_full()
    }

    /// Call `callback` when a dequeue takes the queue length from above
    /// `level` to `level` or below
    pub fn register_tone_queue_low_callback(
        &self,
        level: usize,
        callback: Option<LowWaterCallback>,
    ) -> Result<()> {
        self.shared.queue.register_low_water_callback(level, callback)
    }

    /// Wait until the tone playing now has finished
    pub fn wait_for_tone(&self) -> Result<()> {
        self.shared.check_can_wait()?;
        let start = self.shared.queue.head_position();
        while self.shared.queue.head_position() == start && self.shared.queue.is_busy() {
            self.shared.clock.wait_for_tick()?;
        }
        Ok(())
    }

    /// Wait until the queue has drained and gone idle
    pub fn wait_for_tone_queue(&self) -> Result<()> {
        self.shared.check_can_wait()?;
        while self.shared.queue.is_busy() {
            self.shared.clock.wait_for_tick()?;
        }
        Ok(())
    }

    /// Wait until no more than `level` tones are queued
    pub fn wait_for_tone_queue_level(&self, level: usize) -> Result<()> {
        self.shared.check_can_wait()?;
        while self.shared.queue.length() > level {
            self.shared.clock.wait_for_tick()?;
        }
        Ok(())
    }

    /// Drop pending tones and return to silence.
    ///
    /// When waiting is possible this returns only once the tone in progress
    /// has finished. With ticks blocked on this thread, or from inside a
    /// tick, it empties the queue and silences without waiting.
    pub fn flush_tone_queue(&self) -> Result<()> {
        if !self.shared.queue.is_busy() {
            return Ok(());
        }
        self.shared.queue.discard_pending();
        if self.shared.check_can_wait().is_ok() {
            while self.shared.queue.is_busy() {
                if let Err(e) = self.shared.clock.wait_for_tick() {
                    log::debug!("Flush stopped waiting: {}", e);
                    break;
                }
            }
        }
        self.shared.play(0);
        Ok(())
    }

    /// Empty the queue, force it idle, forget the low-water callback
    pub fn reset_tone_queue(&self) {
        let was_busy = self.shared.queue.is_busy();
        self.shared.queue.reset();
        // An idle queue does not own the sink
        if was_busy {
            self.shared.keying.set(false);
            self.shared.play(0);
            self.shared.schedule_finalization();
        }
    }
}

impl Drop for Generator {
    fn drop(&mut self) {
        self.shared.queue.reset();
        self.shared.close_output();
    }
}

impl Shared {
    /// Sending from the queue is refused while a key drives the sink
    pub(crate) fn enqueue(&self, tone: Tone) -> Result<()> {
        let started = {
            let _claim = lock(&self.sink_claim);
            if lock(&self.keyer).is_busy() || lock(&self.straight_key).is_down() {
                return Err(CwError::Busy);
            }
            self.queue.enqueue(tone)?
        };
        if started {
            self.cancel_finalization();
            self.arm(TickSource::ToneQueue, 0);
        }
        Ok(())
    }

    pub(crate) fn claim_sink(&self) -> MutexGuard<'_, ()> {
        lock(&self.sink_claim)
    }

    pub(crate) fn check_can_wait(&self) -> Result<()> {
        if clock::in_tick() || self.clock.is_blocked_here() {
            return Err(CwError::Deadlock);
        }
        Ok(())
    }

    pub(crate) fn dequeue_and_play(&self) -> Dequeue {
        let result = self.queue.dequeue();
        match result {
            Dequeue::StillEmpty => {}
            Dequeue::JustEmptied => {
                self.keying.set(false);
                self.play(0);
                self.schedule_finalization();
            }
            Dequeue::NonEmpty(tone) => {
                self.play(tone.frequency);
                self.keying.set(tone.frequency != 0);
                self.arm(TickSource::ToneQueue, tone.play_usecs());
            }
        }
        result
    }

    fn tone_queue_tick(&self) {
        if self.take_due(TickSource::ToneQueue) {
            self.dequeue_and_play();
        }
    }

    fn finalization_tick(&self) {
        if !self.take_due(TickSource::Finalization) {
            return;
        }
        let mut finalization = lock(&self.finalization);
        let Finalization::Pending(remaining) = *finalization else {
            return;
        };

        let idle = !self.queue.is_busy()
            && !lock(&self.keyer).is_busy()
            && !lock(&self.straight_key).is_down();
        if !idle {
            *finalization = Finalization::None;
            return;
        }

        if remaining <= 1 {
            *finalization = Finalization::None;
            drop(finalization);
            self.close_output();
            log::debug!("Sink released after idle period");
        } else {
            *finalization = Finalization::Pending(remaining - 1);
            drop(finalization);
            self.arm(TickSource::Finalization, FINALIZATION_DELAY_USECS);
        }
    }

    pub(crate) fn schedule_finalization(&self) {
        let mut finalization = lock(&self.finalization);
        if *finalization == Finalization::None {
            *finalization = Finalization::Pending(FINALIZATION_COUNTDOWN);
            drop(finalization);
            self.arm(TickSource::Finalization, FINALIZATION_DELAY_USECS);
        }
    }

    pub(crate) fn cancel_finalization(&self) {
        *lock(&self.finalization) = Finalization::None;
        self.disarm(TickSource::Finalization);
    }

    /// Ask for a tick of `source` after `usecs`, replacing its earlier due time
    pub(crate) fn arm(&self, source: TickSource, usecs: i32) {
        let due = self.clock.now_usecs() + usecs.max(0) as u64;
        lock(&self.due)[source as usize] = Some(due);
        self.clock.run_at(due);
    }

    pub(crate) fn disarm(&self, source: TickSource) {
        lock(&self.due)[source as usize] = None;
    }

    /// True, once, when a tick reaches the due time of `source`
    pub(crate) fn take_due(&self, source: TickSource) -> bool {
        let now = self.clock.now_usecs();
        let mut due = lock(&self.due);
        match due[source as usize] {
            Some(at) if at <= now => {
                due[source as usize] = None;
                true
            }
            _ => false,
        }
    }

    fn open_output(&self) -> Result<()> {
        let mut output = lock(&self.output);
        self.open_locked(&mut output)
    }

    fn open_locked(&self, output: &mut Output) -> Result<()> {
        if !output.open {
            let device = output.device.clone();
            output.sink.open(device.as_deref())?;
            let volume = lock(&self.timing).volume();
            output.sink.set_volume(volume);
            output.open = true;
        }
        Ok(())
    }

    fn close_output(&self) {
        let mut output = lock(&self.output);
        if output.open {
            output.sink.close();
            output.open = false;
        }
    }

    /// Send a frequency to the sink, reopening it if it was released.
    /// A released sink is already silent and stays closed for 0 Hz.
    /// Failures are logged; this runs in tick context.
    pub(crate) fn play(&self, frequency: i32) {
        let mut output = lock(&self.output);
        if !output.open {
            if frequency == 0 {
                return;
            }
            if let Err(e) = self.open_locked(&mut output) {
                log::warn!("Failed to open sink: {}", e);
                return;
            }
        }
        if let Err(e) = output.sink.play(frequency) {
            log::warn!("Sink failed to play {} Hz: {}", frequency, e);
        }
    }

    pub(crate) fn frequency(&self) -> i32 {
        lock(&self.timing).frequency()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{Recording, RecordingSink};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manual_generator() -> (Generator, Recording) {
        let clock = Clock::manual();
        let sink = RecordingSink::new(clock.clone());
        let recording = sink.recording();
        let generator = Generator::new(Box::new(sink), clock).unwrap();
        (generator, recording)
    }

    #[test]
    fn test_queue_tone_plays_in_order() {
        let (generator, recording) = manual_generator();
        generator.queue_tone(1000, 800).unwrap();
        generator.queue_tone(2000, 0).unwrap();
        generator.queue_tone(500, 600).unwrap();
        assert!(generator.is_tone_busy());
        generator.wait_for_tone_queue().unwrap();

        assert_eq!(recording.segments(), vec![(800, 1000), (0, 2000), (600, 500)]);
        assert!(!generator.is_tone_busy());
        assert!(!generator.is_key_closed());
    }

    #[test]
    fn test_queue_tone_validation() {
        let (generator, _) = manual_generator();
        assert!(generator.queue_tone(-1, 800).is_err());
        assert!(generator.queue_tone(100, 4001).is_err());
        assert!(generator.queue_tone(100, -1).is_err());
        assert!(generator.queue_tone(0, 4000).is_ok());
    }

    #[test]
    fn test_keying_edges_from_queue() {
        let (generator, _) = manual_generator();
        let edges = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&edges);
        generator.register_keying_callback(Some(Arc::new(move |closed| {
            seen.lock().unwrap().push(closed)
        })));

        generator.queue_tone(100, 800).unwrap();
        generator.queue_tone(100, 800).unwrap();
        generator.queue_tone(100, 0).unwrap();
        generator.queue_tone(100, 700).unwrap();
        generator.wait_for_tone_queue().unwrap();

        assert_eq!(*edges.lock().unwrap(), vec![true, false, true, false]);
    }

    #[test]
    fn test_flush_empty_queue_is_noop() {
        let (generator, _) = manual_generator();
        generator.flush_tone_queue().unwrap();
        generator.flush_tone_queue().unwrap();
        assert!(!generator.is_tone_busy());
    }

    #[test]
    fn test_flush_discards_pending() {
        let (generator, recording) = manual_generator();
        for _ in 0..10 {
            generator.queue_tone(1000, 800).unwrap();
        }
        generator.clock().step();
        generator.flush_tone_queue().unwrap();
        assert!(!generator.is_tone_busy());
        assert_eq!(generator.tone_queue_length(), 0);
        let played: Vec<_> = recording.events().iter().map(|e| e.frequency).collect();
        assert_eq!(played.first(), Some(&800));
        assert_eq!(played.last(), Some(&0));
        assert!(played.len() <= 4);
    }

    #[test]
    fn test_waits_refuse_when_blocked() {
        let (generator, _) = manual_generator();
        generator.queue_tone(1000, 800).unwrap();
        let clock = generator.clock().clone();
        {
            let _block = clock.block();
            assert!(matches!(
                generator.wait_for_tone_queue(),
                Err(CwError::Deadlock)
            ));
            assert!(matches!(generator.wait_for_tone(), Err(CwError::Deadlock)));
            generator.flush_tone_queue().unwrap();
        }
        assert_eq!(generator.tone_queue_length(), 0);
    }

    #[test]
    fn test_forever_tone_holds_until_replaced() {
        let (generator, recording) = manual_generator();
        generator.queue_forever_tone(900).unwrap();
        generator.clock().advance(50_000);
        assert!(generator.is_tone_busy());
        assert_eq!(generator.tone_queue_length(), 1);
        assert!(generator.is_key_closed());

        generator.queue_tone(1000, 0).unwrap();
        generator.wait_for_tone_queue().unwrap();
        let segments = recording.segments();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].0, 900);
        assert!(segments[0].1 >= 50_000);
        let last = *recording.events().last().unwrap();
        assert_eq!(last.frequency, 0);
        assert_eq!(last.at - segments[0].1, 1000);
    }

    #[test]
    fn test_low_water_callback_refills() {
        let (generator, recording) = manual_generator();
        let generator = Arc::new(generator);
        let refills = Arc::new(AtomicUsize::new(0));
        let weak = Arc::downgrade(&generator);
        let count = Arc::clone(&refills);
        generator
            .register_tone_queue_low_callback(
                1,
                Some(Arc::new(move || {
                    if count.fetch_add(1, Ordering::SeqCst) < 2 {
                        if let Some(generator) = weak.upgrade() {
                            generator.queue_tone(100, 500).unwrap();
                            generator.queue_tone(100, 0).unwrap();
                        }
                    }
                })),
            )
            .unwrap();

        generator.queue_tone(100, 800).unwrap();
        generator.queue_tone(100, 0).unwrap();
        generator.queue_tone(100, 800).unwrap();
        generator.wait_for_tone_queue().unwrap();

        assert_eq!(refills.load(Ordering::SeqCst), 3);
        let tones = recording
            .segments()
            .iter()
            .filter(|(f, _)| *f != 0)
            .count();
        assert_eq!(tones, 4);
    }

    #[test]
    fn test_sink_released_after_idle_and_reopened() {
        let (generator, recording) = manual_generator();
        generator.queue_tone(1000, 800).unwrap();
        generator.wait_for_tone_queue().unwrap();
        assert!(generator.is_sink_open());
        assert_eq!(recording.opens(), 1);

        generator.clock().advance(5_000_000);
        assert!(generator.is_sink_open());
        generator.clock().advance(6_000_000);
        assert!(!generator.is_sink_open());
        assert_eq!(recording.closes(), 1);

        generator.queue_tone(1000, 800).unwrap();
        generator.clock().step();
        assert!(generator.is_sink_open());
        assert_eq!(recording.opens(), 2);
    }

    #[test]
    fn test_parameters_and_reset() {
        let (generator, _) = manual_generator();
        generator.set_send_speed(30).unwrap();
        generator.set_frequency(650).unwrap();
        assert!(generator.set_volume(101).is_err());
        assert_eq!(generator.send_speed(), 30);
        generator.queue_tone(1000, 800).unwrap();
        generator.complete_reset();
        assert_eq!(generator.send_speed(), 12);
        assert_eq!(generator.frequency(), 800);
        assert_eq!(generator.tone_queue_length(), 0);
        assert!(!generator.is_tone_busy());
    }

    #[test]
    fn test_stop_releases_sink() {
        let (generator, recording) = manual_generator();
        generator.start().unwrap();
        generator.queue_tone(1000, 800).unwrap();
        generator.stop().unwrap();
        assert!(!generator.is_sink_open());
        assert_eq!(recording.closes(), 1);
    }

    #[test]
    fn test_idle_resets_leave_playing_tone_alone() {
        let (generator, recording) = manual_generator();
        generator.queue_tone(50_000, 800).unwrap();
        generator.queue_tone(50_000, 0).unwrap();
        generator.queue_tone(1000, 600).unwrap();
        generator.clock().step();
        generator.reset_keyer();
        generator.reset_straight_key();
        generator.wait_for_tone_queue().unwrap();
        assert_eq!(
            recording.segments(),
            vec![(800, 50_000), (0, 50_000), (600, 1000)]
        );

        let (generator, recording) = manual_generator();
        generator.notify_keyer_dot_paddle_event(true).unwrap();
        generator.clock().step();
        generator.reset_tone_queue();
        generator.flush_tone_queue().unwrap();
        generator.notify_keyer_dot_paddle_event(false).unwrap();
        generator.wait_for_keyer().unwrap();
        assert_eq!(recording.segments(), vec![(800, 100_000)]);
    }

    #[test]
    fn test_generators_share_a_clock() {
        let clock = Clock::manual();
        let first_sink = RecordingSink::new(clock.clone());
        let first = first_sink.recording();
        let second_sink = RecordingSink::new(clock.clone());
        let second = second_sink.recording();
        let a = Generator::new(Box::new(first_sink), clock.clone()).unwrap();
        let b = Generator::new(Box::new(second_sink), clock.clone()).unwrap();

        a.queue_tone(300_000, 800).unwrap();
        b.queue_tone(100_000, 600).unwrap();
        b.queue_tone(100_000, 0).unwrap();
        b.queue_tone(50_000, 600).unwrap();
        clock.advance(2_000_000);

        assert_eq!(first.segments(), vec![(800, 300_000)]);
        assert_eq!(
            second.segments(),
            vec![(600, 100_000), (0, 100_000), (600, 50_000)]
        );
        assert!(!a.is_tone_busy());
        assert!(!b.is_tone_busy());
    }

    #[test]
    fn test_sink_claimed_by_one_source_at_a_time() {
        let (generator, _) = manual_generator();
        for _ in 0..200 {
            let barrier = std::sync::Barrier::new(2);
            let (queued, keyed) = std::thread::scope(|scope| {
                let sender = scope.spawn(|| {
                    barrier.wait();
                    generator.queue_tone(1000, 800).is_ok()
                });
                let key = scope.spawn(|| {
                    barrier.wait();
                    generator.notify_straight_key_event(true).is_ok()
                });
                (sender.join().unwrap(), key.join().unwrap())
            });
            assert_ne!(queued, keyed);
            generator.reset_tone_queue();
            generator.reset_straight_key();
        }
    }

    #[test]
    fn test_silencing_does_not_open_sink() {
        let (generator, recording) = manual_generator();
        generator.complete_reset();
        generator.flush_tone_queue().unwrap();
        generator.stop().unwrap();
        assert_eq!(recording.opens(), 0);
        assert!(recording.events().is_empty());

        generator.queue_tone(1000, 800).unwrap();
        generator.wait_for_tone_queue().unwrap();
        generator.clock().advance(11_000_000);
        assert!(!generator.is_sink_open());
        let events = recording.events().len();
        generator.complete_reset();
        generator.stop().unwrap();
        assert_eq!(recording.opens(), 1);
        assert_eq!(recording.events().len(), events);
    }
}
