//! Receive timing statistics.
//!
//! A fixed ring of recent timing deltas, each tagged with what kind of
//! interval it measured. Deltas are stored relative to the ideal length for
//! that kind, so the root mean square of the deltas is the deviation from
//! perfect timing.

pub const STATISTICS_CAPACITY: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatKind {
    Dot,
    Dash,
    /// Gap between elements of one character
    EndElement,
    /// Gap between characters
    EndCharacter,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Sample {
    kind: StatKind,
    delta: i32,
}

/// Standard deviations from ideal timing, in microseconds
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ReceiveStatistics {
    pub dot_sd: f64,
    pub dash_sd: f64,
    pub element_end_sd: f64,
    pub character_end_sd: f64,
}

#[derive(Clone, Debug)]
pub struct TimingStatistics {
    samples: [Option<Sample>; STATISTICS_CAPACITY],
    cursor: usize,
}

impl Default for TimingStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl TimingStatistics {
    pub fn new() -> Self {
        Self {
            samples: [None; STATISTICS_CAPACITY],
            cursor: 0,
        }
    }

    /// Record `usecs` measured against the ideal length `ideal`
    pub fn add(&mut self, kind: StatKind, usecs: i32, ideal: i32) {
        self.samples[self.cursor] = Some(Sample {
            kind,
            delta: usecs.saturating_sub(ideal),
        });
        self.cursor = (self.cursor + 1) % STATISTICS_CAPACITY;
    }

    /// Root mean square of the deltas of one kind, 0.0 when there are none
    pub fn standard_deviation(&self, kind: StatKind) -> f64 {
        let mut sum_of_squares = 0.0;
        let mut count = 0usize;
        // The ring fills from slot zero, so the first empty slot ends the data.
        for sample in self.samples.iter().map_while(|s| *s) {
            if sample.kind == kind {
                sum_of_squares += f64::from(sample.delta) * f64::from(sample.delta);
                count += 1;
            }
        }

        if count > 0 {
            (sum_of_squares / count as f64).sqrt()
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> ReceiveStatistics {
        ReceiveStatistics {
            dot_sd: self.standard_deviation(StatKind::Dot),
            dash_sd: self.standard_deviation(StatKind::Dash),
            element_end_sd: self.standard_deviation(StatKind::EndElement),
            character_end_sd: self.standard_deviation(StatKind::EndCharacter),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.iter().take_while(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.samples[0].is_none()
    }

    pub fn reset(&mut self) {
        self.samples = [None; STATISTICS_CAPACITY];
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_statistics() {
        let stats = TimingStatistics::new();
        assert!(stats.is_empty());
        assert_eq!(stats.summary(), ReceiveStatistics::default());
    }

    #[test]
    fn test_standard_deviation_per_kind() {
        let mut stats = TimingStatistics::new();
        stats.add(StatKind::Dot, 103, 100);
        stats.add(StatKind::Dot, 96, 100);
        stats.add(StatKind::Dash, 300, 300);
        stats.add(StatKind::EndElement, 110, 100);

        let summary = stats.summary();
        assert!((summary.dot_sd - (12.5f64).sqrt()).abs() < 1e-9);
        assert_eq!(summary.dash_sd, 0.0);
        assert_eq!(summary.element_end_sd, 10.0);
        assert_eq!(summary.character_end_sd, 0.0);
        assert_eq!(stats.len(), 4);
    }

    #[test]
    fn test_ring_wraps() {
        let mut stats = TimingStatistics::new();
        for _ in 0..STATISTICS_CAPACITY {
            stats.add(StatKind::Dash, 310, 300);
        }
        stats.add(StatKind::Dash, 300, 300);
        assert_eq!(stats.len(), STATISTICS_CAPACITY);
        let expected = ((255.0 * 100.0) / 256.0f64).sqrt();
        assert!((stats.standard_deviation(StatKind::Dash) - expected).abs() < 1e-9);

        stats.reset();
        assert!(stats.is_empty());
    }
}
