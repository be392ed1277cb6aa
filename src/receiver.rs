//! Receive state machine: key-down/key-up timestamps in, characters out.
//!
//! Tone lengths are classified as dots or dashes against the receive ranges
//! of the shared [`TimingParameters`](crate::morse::TimingParameters). The
//! gap since the last tone ended decides whether a character or a word has
//! finished, so a caller discovers boundaries by polling.

use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::error::{CwError, Result};
use crate::generator::{lock, SharedTiming};
use crate::morse::timing::TimingParameters;
use crate::morse::{self, Element, ReceiveParameters};
use crate::stats::{ReceiveStatistics, StatKind, TimingStatistics};

/// Representation buffer size; one slot is never filled
pub const RECEIVE_CAPACITY: usize = 256;

const AVERAGE_SAMPLES: usize = 4;

/// A point in time with microsecond resolution
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    secs: i64,
    usecs: i64,
}

impl Timestamp {
    pub fn new(secs: i64, usecs: i64) -> Result<Self> {
        if secs < 0 || !(0..1_000_000).contains(&usecs) {
            return Err(CwError::invalid(format!(
                "timestamp {}s {}us out of range",
                secs, usecs
            )));
        }
        Ok(Self { secs, usecs })
    }

    pub fn from_micros(micros: u64) -> Self {
        Self {
            secs: (micros / 1_000_000) as i64,
            usecs: (micros % 1_000_000) as i64,
        }
    }

    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            secs: now.timestamp().max(0),
            usecs: i64::from(now.timestamp_subsec_micros() % 1_000_000),
        }
    }

    pub fn secs(&self) -> i64 {
        self.secs
    }

    pub fn usecs(&self) -> i64 {
        self.usecs
    }

    /// Microseconds from `earlier` to `self`, saturated to the i32 range
    pub fn usecs_since(&self, earlier: Timestamp) -> i32 {
        let delta = (self.secs - earlier.secs)
            .saturating_mul(1_000_000)
            .saturating_add(self.usecs - earlier.usecs);
        delta.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiveState {
    Idle,
    InTone,
    AfterTone,
    EndChar,
    EndWord,
    ErrChar,
    ErrWord,
}

/// A finished (or error-terminated) representation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Representation {
    pub representation: String,
    pub is_end_of_word: bool,
    pub is_error: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Received {
    pub character: char,
    pub is_end_of_word: bool,
    pub is_error: bool,
}

/// Moving average over the last few element lengths
#[derive(Clone, Copy, Debug)]
struct AdaptiveAverage {
    samples: [i32; AVERAGE_SAMPLES],
    cursor: usize,
    sum: i64,
}

impl AdaptiveAverage {
    fn new(initial: i32) -> Self {
        Self {
            samples: [initial; AVERAGE_SAMPLES],
            cursor: 0,
            sum: i64::from(initial) * AVERAGE_SAMPLES as i64,
        }
    }

    fn reset(&mut self, initial: i32) {
        *self = Self::new(initial);
    }

    fn push(&mut self, usecs: i32) {
        self.sum += i64::from(usecs) - i64::from(self.samples[self.cursor]);
        self.samples[self.cursor] = usecs;
        self.cursor = (self.cursor + 1) % AVERAGE_SAMPLES;
    }

    fn average(&self) -> i32 {
        (self.sum / AVERAGE_SAMPLES as i64) as i32
    }
}

pub struct Receiver {
    timing: SharedTiming,
    state: ReceiveState,
    buffer: String,
    tone_start: Timestamp,
    tone_end: Timestamp,
    dot_average: AdaptiveAverage,
    dash_average: AdaptiveAverage,
    statistics: TimingStatistics,
}

impl Default for Receiver {
    fn default() -> Self {
        Self::new()
    }
}

impl Receiver {
    /// A receiver with its own timing parameters
    pub fn new() -> Self {
        Self::with_timing(Arc::new(Mutex::new(TimingParameters::new())))
    }

    pub fn with_timing(timing: SharedTiming) -> Self {
        let receive = lock(&timing).receive_parameters();
        Self {
            timing,
            state: ReceiveState::Idle,
            buffer: String::with_capacity(RECEIVE_CAPACITY),
            tone_start: Timestamp::default(),
            tone_end: Timestamp::default(),
            dot_average: AdaptiveAverage::new(receive.dot_length),
            dash_average: AdaptiveAverage::new(receive.dash_length),
            statistics: TimingStatistics::new(),
        }
    }

    pub fn timing(&self) -> SharedTiming {
        Arc::clone(&self.timing)
    }

    pub fn state(&self) -> ReceiveState {
        self.state
    }

    // Parameters

    /// Fails with `StateError` while adaptive receive is on
    pub fn set_receive_speed(&self, wpm: i32) -> Result<()> {
        lock(&self.timing).set_receive_speed(wpm)
    }

    pub fn receive_speed(&self) -> i32 {
        let mut timing = lock(&self.timing);
        timing.sync();
        timing.receive_speed()
    }

    pub fn set_tolerance(&self, percent: i32) -> Result<()> {
        lock(&self.timing).set_tolerance(percent)
    }

    pub fn tolerance(&self) -> i32 {
        lock(&self.timing).tolerance()
    }

    pub fn set_noise_spike_threshold(&self, usecs: i32) -> Result<()> {
        lock(&self.timing).set_noise_spike_threshold(usecs)
    }

    pub fn noise_spike_threshold(&self) -> i32 {
        lock(&self.timing).noise_spike_threshold()
    }

    /// Turn on speed tracking. The averages restart from the current
    /// nominal dot and dash lengths.
    pub fn enable_adaptive(&mut self) {
        let mut timing = lock(&self.timing);
        if timing.is_adaptive() {
            return;
        }
        let receive = timing.receive_parameters();
        self.dot_average.reset(receive.dot_length);
        self.dash_average.reset(receive.dash_length);
        timing.set_adaptive(true);
    }

    pub fn disable_adaptive(&mut self) {
        lock(&self.timing).set_adaptive(false);
    }

    pub fn is_adaptive(&self) -> bool {
        lock(&self.timing).is_adaptive()
    }

    pub fn receive_parameters(&self) -> ReceiveParameters {
        lock(&self.timing).receive_parameters()
    }

    // Tone events

    /// Key down at `timestamp`, or now
    pub fn start_tone(&mut self, timestamp: Option<Timestamp>) -> Result<()> {
        if !matches!(self.state, ReceiveState::Idle | ReceiveState::AfterTone) {
            return Err(CwError::StateError);
        }
        let timestamp = timestamp.unwrap_or_else(Timestamp::now);

        if self.state == ReceiveState::AfterTone {
            let gap = timestamp.usecs_since(self.tone_end);
            let ideal = lock(&self.timing).receive_parameters().eoe_range_ideal;
            self.statistics.add(StatKind::EndElement, gap, ideal);
        }

        self.tone_start = timestamp;
        self.state = ReceiveState::InTone;
        log::trace!("Receive tone start at {:?}", timestamp);
        Ok(())
    }

    /// Key up at `timestamp`, or now. Classifies the tone just ended.
    pub fn end_tone(&mut self, timestamp: Option<Timestamp>) -> Result<()> {
        if self.state != ReceiveState::InTone {
            return Err(CwError::StateError);
        }
        let previous_end = self.tone_end;
        self.tone_end = timestamp.unwrap_or_else(Timestamp::now);
        let length = self.tone_end.usecs_since(self.tone_start);

        let mut timing = lock(&self.timing);
        let threshold = timing.noise_spike_threshold();
        if threshold > 0 && length <= threshold {
            self.state = if self.buffer.is_empty() {
                ReceiveState::Idle
            } else {
                ReceiveState::AfterTone
            };
            self.tone_end = previous_end;
            log::trace!("Receive tone of {}us ignored as noise", length);
            return Err(CwError::TooShort);
        }

        let mut receive = timing.receive_parameters();
        let element = match identify(length, &receive) {
            Some(element) => element,
            None => {
                self.state = if length > receive.eoc_range_maximum {
                    ReceiveState::ErrWord
                } else {
                    ReceiveState::ErrChar
                };
                log::debug!("Receive tone of {}us not recognized", length);
                return Err(CwError::NotRecognized);
            }
        };

        if timing.is_adaptive() {
            match element {
                Element::Dot => self.dot_average.push(length),
                Element::Dash => self.dash_average.push(length),
            }
            let dot = self.dot_average.average();
            let dash = self.dash_average.average();
            timing.set_adaptive_threshold((dash - dot) / 2 + dot);
            receive = timing.receive_parameters();
        }
        drop(timing);

        let (kind, ideal) = match element {
            Element::Dot => (StatKind::Dot, receive.dot_length),
            Element::Dash => (StatKind::Dash, receive.dash_length),
        };
        self.statistics.add(kind, length, ideal);

        self.push_element(element)
    }

    /// Add an element classified elsewhere, as if its tone ended at `timestamp`
    pub fn buffer_element(&mut self, timestamp: Option<Timestamp>, element: Element) -> Result<()> {
        if !matches!(self.state, ReceiveState::Idle | ReceiveState::AfterTone) {
            return Err(CwError::StateError);
        }
        self.tone_end = timestamp.unwrap_or_else(Timestamp::now);
        self.push_element(element)
    }

    pub fn buffer_dot(&mut self, timestamp: Option<Timestamp>) -> Result<()> {
        self.buffer_element(timestamp, Element::Dot)
    }

    pub fn buffer_dash(&mut self, timestamp: Option<Timestamp>) -> Result<()> {
        self.buffer_element(timestamp, Element::Dash)
    }

    fn push_element(&mut self, element: Element) -> Result<()> {
        self.buffer.push(element.symbol());
        if self.buffer.len() == RECEIVE_CAPACITY - 1 {
            self.state = ReceiveState::ErrChar;
            return Err(CwError::BufferFull);
        }
        self.state = ReceiveState::AfterTone;
        Ok(())
    }

    // Polling

    /// Check whether the current representation is finished, judging the
    /// gap since the last tone against `timestamp` (or now).
    ///
    /// Returns `RetryLater` while the gap is still too short to tell.
    pub fn poll_representation(&mut self, timestamp: Option<Timestamp>) -> Result<Representation> {
        match self.state {
            ReceiveState::EndWord | ReceiveState::ErrWord => {
                return Ok(self.representation(true));
            }
            ReceiveState::AfterTone | ReceiveState::EndChar | ReceiveState::ErrChar => {}
            ReceiveState::Idle | ReceiveState::InTone => return Err(CwError::StateError),
        }

        let now = timestamp.unwrap_or_else(Timestamp::now);
        let gap = now.usecs_since(self.tone_end);
        let receive = lock(&self.timing).receive_parameters();

        if gap >= receive.eoc_range_minimum && gap <= receive.eoc_range_maximum {
            if self.state == ReceiveState::AfterTone {
                self.statistics
                    .add(StatKind::EndCharacter, gap, receive.eoc_range_ideal);
                self.state = ReceiveState::EndChar;
            }
            return Ok(self.representation(false));
        }

        if gap > receive.eoc_range_maximum {
            self.state = if self.state == ReceiveState::ErrChar {
                ReceiveState::ErrWord
            } else {
                ReceiveState::EndWord
            };
            return Ok(self.representation(true));
        }

        Err(CwError::RetryLater)
    }

    /// As [`Receiver::poll_representation`], decoded through the Morse table
    pub fn poll_character(&mut self, timestamp: Option<Timestamp>) -> Result<Received> {
        let polled = self.poll_representation(timestamp)?;
        let character = morse::representation_to_character(&polled.representation)
            .map_err(|_| CwError::NotFound)?;
        Ok(Received {
            character,
            is_end_of_word: polled.is_end_of_word,
            is_error: polled.is_error,
        })
    }

    fn representation(&self, is_end_of_word: bool) -> Representation {
        let is_error = matches!(self.state, ReceiveState::ErrChar | ReceiveState::ErrWord);
        if is_end_of_word {
            log::debug!("Received word end after {:?}", self.buffer);
        }
        Representation {
            representation: self.buffer.clone(),
            is_end_of_word,
            is_error,
        }
    }

    /// Empty the representation and return to idle; call after every poll
    /// that produced a result
    pub fn clear_buffer(&mut self) {
        self.buffer.clear();
        self.state = ReceiveState::Idle;
    }

    pub fn buffer_length(&self) -> usize {
        self.buffer.len()
    }

    /// Symbols the buffer can hold before reporting `BufferFull`
    pub fn buffer_capacity(&self) -> usize {
        RECEIVE_CAPACITY
    }

    // Statistics

    pub fn statistics(&self) -> ReceiveStatistics {
        self.statistics.summary()
    }

    pub fn reset_statistics(&mut self) {
        self.statistics.reset();
    }

    /// Clear buffer, state and statistics. Parameters are kept.
    pub fn reset(&mut self) {
        self.clear_buffer();
        self.reset_statistics();
        let receive = lock(&self.timing).receive_parameters();
        self.dot_average.reset(receive.dot_length);
        self.dash_average.reset(receive.dash_length);
        log::debug!("Receiver reset");
    }
}

fn identify(length: i32, receive: &ReceiveParameters) -> Option<Element> {
    if length >= receive.dot_range_minimum && length <= receive.dot_range_maximum {
        Some(Element::Dot)
    } else if length >= receive.dash_range_minimum && length <= receive.dash_range_maximum {
        Some(Element::Dash)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn at(micros: u64) -> Option<Timestamp> {
        Some(Timestamp::from_micros(micros))
    }

    /// Key `elements` starting at `start` with one-unit gaps; returns the
    /// time the last tone ended
    fn key(receiver: &mut Receiver, start: u64, unit: u64, elements: &str) -> u64 {
        let mut t = start;
        for symbol in elements.chars() {
            let length = if symbol == '.' { unit } else { 3 * unit };
            receiver.start_tone(at(t)).unwrap();
            receiver.end_tone(at(t + length)).unwrap();
            t += length + unit;
        }
        t - unit
    }

    #[test]
    fn test_timestamp_validation() {
        assert!(Timestamp::new(-1, 0).is_err());
        assert!(Timestamp::new(0, 1_000_000).is_err());
        assert!(Timestamp::new(0, -1).is_err());
        let ts = Timestamp::new(5, 999_999).unwrap();
        assert_eq!(ts.secs(), 5);
        assert_eq!(Timestamp::from_micros(6_000_000).usecs_since(ts), 1);
    }

    #[test]
    fn test_timestamp_delta_saturates() {
        let early = Timestamp::from_micros(0);
        let late = Timestamp::new(10_000, 0).unwrap();
        assert_eq!(late.usecs_since(early), i32::MAX);
        assert_eq!(early.usecs_since(late), i32::MIN);
    }

    #[test]
    fn test_receive_letter_s() {
        let mut receiver = Receiver::new();
        let end = key(&mut receiver, 1_000_000, 100_000, "...");
        assert_eq!(end, 1_500_000);
        assert_eq!(receiver.state(), ReceiveState::AfterTone);

        assert!(matches!(
            receiver.poll_character(at(end + 200_000)),
            Err(CwError::RetryLater)
        ));
        let received = receiver.poll_character(at(end + 300_000)).unwrap();
        assert_eq!(
            received,
            Received {
                character: 'S',
                is_end_of_word: false,
                is_error: false
            }
        );
        assert_eq!(receiver.state(), ReceiveState::EndChar);

        let received = receiver.poll_character(at(end + 400_000)).unwrap();
        assert!(received.is_end_of_word);
        assert_eq!(receiver.state(), ReceiveState::EndWord);
        // Once at end of word the answer is repeated without a timestamp check
        assert!(receiver.poll_character(at(end)).unwrap().is_end_of_word);
    }

    #[test]
    fn test_noise_spike_restores_previous_end() {
        let mut receiver = Receiver::new();
        receiver.start_tone(at(1_000_000)).unwrap();
        assert!(matches!(
            receiver.end_tone(at(1_005_000)),
            Err(CwError::TooShort)
        ));
        assert_eq!(receiver.state(), ReceiveState::Idle);

        let end = key(&mut receiver, 2_000_000, 100_000, ".");
        receiver.start_tone(at(end + 150_000)).unwrap();
        assert!(matches!(
            receiver.end_tone(at(end + 160_000)),
            Err(CwError::TooShort)
        ));
        assert_eq!(receiver.state(), ReceiveState::AfterTone);
        // The gap is still measured from the real dot
        let polled = receiver.poll_representation(at(end + 300_000)).unwrap();
        assert_eq!(polled.representation, ".");
        assert!(!polled.is_end_of_word);
    }

    #[test]
    fn test_noise_filter_disabled() {
        let mut receiver = Receiver::new();
        receiver.set_noise_spike_threshold(0).unwrap();
        receiver.start_tone(at(1_000_000)).unwrap();
        assert!(matches!(
            receiver.end_tone(at(1_005_000)),
            Err(CwError::NotRecognized)
        ));
    }

    #[test]
    fn test_unrecognized_lengths() {
        let mut receiver = Receiver::new();
        receiver.start_tone(at(1_000_000)).unwrap();
        assert!(matches!(
            receiver.end_tone(at(1_200_000)),
            Err(CwError::NotRecognized)
        ));
        assert_eq!(receiver.state(), ReceiveState::ErrChar);
        let polled = receiver.poll_representation(at(1_500_000)).unwrap();
        assert!(polled.is_error);
        assert!(!polled.is_end_of_word);
        let polled = receiver.poll_representation(at(1_600_000)).unwrap();
        assert!(polled.is_error);
        assert!(polled.is_end_of_word);
        assert_eq!(receiver.state(), ReceiveState::ErrWord);

        receiver.clear_buffer();
        receiver.start_tone(at(2_000_000)).unwrap();
        assert!(receiver.end_tone(at(2_500_000)).is_err());
        assert_eq!(receiver.state(), ReceiveState::ErrWord);
    }

    #[test]
    fn test_illegal_states() {
        let mut receiver = Receiver::new();
        assert!(matches!(receiver.end_tone(None), Err(CwError::StateError)));
        assert!(matches!(
            receiver.poll_representation(None),
            Err(CwError::StateError)
        ));
        receiver.start_tone(at(1_000_000)).unwrap();
        assert!(matches!(
            receiver.start_tone(at(1_050_000)),
            Err(CwError::StateError)
        ));
        assert!(matches!(
            receiver.buffer_dot(at(1_050_000)),
            Err(CwError::StateError)
        ));
        assert!(matches!(
            receiver.poll_representation(at(1_050_000)),
            Err(CwError::StateError)
        ));
    }

    #[test]
    fn test_buffer_element_and_unknown_representation() {
        let mut receiver = Receiver::new();
        receiver.buffer_dash(at(1_000_000)).unwrap();
        receiver.buffer_dot(at(1_200_000)).unwrap();
        let received = receiver.poll_character(at(1_500_000)).unwrap();
        assert_eq!(received.character, 'N');
        receiver.clear_buffer();

        for i in 0..8 {
            receiver.buffer_dot(at(2_000_000 + i * 200_000)).unwrap();
        }
        assert!(matches!(
            receiver.poll_character(at(3_700_000)),
            Err(CwError::NotFound)
        ));
    }

    #[test]
    fn test_buffer_full() {
        let mut receiver = Receiver::new();
        for _ in 0..RECEIVE_CAPACITY - 2 {
            receiver.buffer_dot(at(1_000_000)).unwrap();
        }
        assert!(matches!(
            receiver.buffer_dot(at(1_000_000)),
            Err(CwError::BufferFull)
        ));
        assert_eq!(receiver.state(), ReceiveState::ErrChar);
        assert_eq!(receiver.buffer_length(), RECEIVE_CAPACITY - 1);
    }

    #[test]
    fn test_clear_buffer_is_idempotent() {
        let mut receiver = Receiver::new();
        key(&mut receiver, 1_000_000, 100_000, ".-");
        receiver.clear_buffer();
        receiver.clear_buffer();
        assert_eq!(receiver.state(), ReceiveState::Idle);
        assert_eq!(receiver.buffer_length(), 0);
        assert_eq!(receiver.buffer_capacity(), RECEIVE_CAPACITY);
    }

    #[test]
    fn test_statistics() {
        let mut receiver = Receiver::new();
        receiver.start_tone(at(1_000_000)).unwrap();
        receiver.end_tone(at(1_103_000)).unwrap();
        receiver.start_tone(at(1_213_000)).unwrap();
        receiver.end_tone(at(1_310_000)).unwrap();
        receiver.poll_representation(at(1_610_000)).unwrap();

        let stats = receiver.statistics();
        assert!((stats.dot_sd - 3000.0).abs() < 1e-9);
        assert_eq!(stats.dash_sd, 0.0);
        assert!((stats.element_end_sd - 10_000.0).abs() < 1e-9);
        assert_eq!(stats.character_end_sd, 0.0);

        receiver.reset();
        assert_eq!(receiver.statistics(), ReceiveStatistics::default());
        assert_eq!(receiver.state(), ReceiveState::Idle);
    }

    #[test]
    fn test_fixed_speed_follows_parameters() {
        let mut receiver = Receiver::new();
        receiver.set_receive_speed(20).unwrap();
        let end = key(&mut receiver, 1_000_000, 60_000, "-.-.");
        let received = receiver.poll_character(at(end + 180_000)).unwrap();
        assert_eq!(received.character, 'C');
    }

    fn key_jittered(
        receiver: &mut Receiver,
        rng: &mut SmallRng,
        start: u64,
        unit: u64,
        text: &str,
    ) -> (String, u64) {
        let mut decoded = String::new();
        let mut t = start;
        for c in text.chars() {
            let representation = morse::character_to_representation(c).unwrap();
            for symbol in representation.chars() {
                let nominal = if symbol == '.' { unit } else { 3 * unit };
                let length = (nominal as f64 * rng.gen_range(0.95..1.05)) as u64;
                receiver.start_tone(at(t)).unwrap();
                receiver.end_tone(at(t + length)).unwrap();
                t += length + unit;
            }
            t += 2 * unit;
            let received = receiver.poll_character(at(t)).unwrap();
            decoded.push(received.character);
            receiver.clear_buffer();
        }
        (decoded, t)
    }

    #[test]
    fn test_adaptive_tracks_faster_sender() {
        let mut receiver = Receiver::new();
        receiver.enable_adaptive();
        assert!(matches!(
            receiver.set_receive_speed(20),
            Err(CwError::StateError)
        ));

        let mut rng = SmallRng::seed_from_u64(7);
        let mut t = 1_000_000;
        for _ in 0..4 {
            let (decoded, next) = key_jittered(&mut receiver, &mut rng, t, 80_000, "PARIS");
            assert_eq!(decoded, "PARIS");
            t = next + 1_000_000;
        }
        assert!((14..=16).contains(&receiver.receive_speed()));
    }

    #[test]
    fn test_adaptive_tracks_slower_sender() {
        let mut receiver = Receiver::new();
        receiver.enable_adaptive();
        let mut rng = SmallRng::seed_from_u64(11);
        let mut t = 1_000_000;
        for _ in 0..4 {
            let (decoded, next) = key_jittered(&mut receiver, &mut rng, t, 150_000, "PARIS");
            assert_eq!(decoded, "PARIS");
            t = next + 2_000_000;
        }
        assert!((7..=9).contains(&receiver.receive_speed()));

        receiver.disable_adaptive();
        receiver.set_receive_speed(12).unwrap();
    }
}
