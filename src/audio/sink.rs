use std::sync::{Arc, Mutex};

use crate::clock::Clock;
use crate::error::{CwError, Result};

/// Output that turns "tone at frequency F" or "silence" into sound.
///
/// `play(0)` means silence. Any other frequency starts or continues a
/// continuous tone; repeated calls with the same frequency are allowed.
pub trait AudioSink: Send {
    fn open(&mut self, device: Option<&str>) -> Result<()>;

    fn close(&mut self);

    fn play(&mut self, frequency: i32) -> Result<()>;

    /// Volume in percent, 0..=100
    fn set_volume(&mut self, _percent: i32) {}

    fn name(&self) -> &str;
}

/// Sink that only logs
#[derive(Default)]
pub struct NullSink {
    open: bool,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioSink for NullSink {
    fn open(&mut self, device: Option<&str>) -> Result<()> {
        log::debug!("Null sink opened (device {:?})", device);
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        log::debug!("Null sink closed");
        self.open = false;
    }

    fn play(&mut self, frequency: i32) -> Result<()> {
        if !self.open {
            return Err(CwError::System("null sink is not open".to_string()));
        }
        log::trace!("Null sink play {} Hz", frequency);
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// One `play` call seen by a [`RecordingSink`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlayEvent {
    /// Clock time in microseconds
    pub at: u64,
    pub frequency: i32,
}

#[derive(Default)]
struct RecordingLog {
    events: Vec<PlayEvent>,
    opens: usize,
    closes: usize,
}

/// Shared view of everything a [`RecordingSink`] has been asked to do
#[derive(Clone, Default)]
pub struct Recording {
    log: Arc<Mutex<RecordingLog>>,
}

impl Recording {
    pub fn events(&self) -> Vec<PlayEvent> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).events.clone()
    }

    pub fn opens(&self) -> usize {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).opens
    }

    pub fn closes(&self) -> usize {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).closes
    }

    pub fn clear(&self) {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .events
            .clear();
    }

    /// Collapse the event log into (frequency, duration) runs. Repeated plays
    /// of the same frequency extend the current run; the final run has no
    /// known end and is left out.
    pub fn segments(&self) -> Vec<(i32, u64)> {
        let events = self.events();
        let mut segments = Vec::new();
        let mut current: Option<PlayEvent> = None;
        for event in events {
            match current {
                Some(start) if start.frequency == event.frequency => {}
                Some(start) => {
                    segments.push((start.frequency, event.at - start.at));
                    current = Some(event);
                }
                None => current = Some(event),
            }
        }
        segments
    }
}

/// Sink that records each `play` with the clock time it happened at
pub struct RecordingSink {
    clock: Clock,
    recording: Recording,
}

impl RecordingSink {
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            recording: Recording::default(),
        }
    }

    pub fn recording(&self) -> Recording {
        self.recording.clone()
    }
}

impl AudioSink for RecordingSink {
    fn open(&mut self, _device: Option<&str>) -> Result<()> {
        self.recording
            .log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .opens += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.recording
            .log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .closes += 1;
    }

    fn play(&mut self, frequency: i32) -> Result<()> {
        let event = PlayEvent {
            at: self.clock.now_usecs(),
            frequency,
        };
        self.recording
            .log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .events
            .push(event);
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sink_requires_open() {
        let mut sink = NullSink::new();
        assert!(sink.play(800).is_err());
        sink.open(None).unwrap();
        assert!(sink.play(800).is_ok());
        sink.close();
        assert!(sink.play(0).is_err());
    }

    #[test]
    fn test_recording_segments() {
        let clock = Clock::manual();
        let mut sink = RecordingSink::new(clock.clone());
        let recording = sink.recording();

        sink.play(800).unwrap();
        clock.advance(100);
        sink.play(800).unwrap();
        clock.advance(50);
        sink.play(0).unwrap();
        clock.advance(300);
        sink.play(600).unwrap();

        assert_eq!(recording.events().len(), 4);
        assert_eq!(recording.segments(), vec![(800, 150), (0, 300)]);
    }
}
