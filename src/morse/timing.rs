//! Derivation of microsecond timings from speed, gap, weighting and tolerance.
//!
//! Inputs are stored as given; derived send and receive lengths are cached and
//! recomputed by [`TimingParameters::sync`] only after an input has changed.
//! All arithmetic is integer microseconds.

use crate::error::{CwError, Result};

/// Microseconds in a dot at 1 WPM (PARIS: 50 units per word)
pub const DOT_CALIBRATION: i32 = 1_200_000;

pub const SPEED_MIN: i32 = 4;
pub const SPEED_MAX: i32 = 60;
pub const SPEED_INITIAL: i32 = 12;
pub const FREQUENCY_MIN: i32 = 0;
pub const FREQUENCY_MAX: i32 = 4000;
pub const FREQUENCY_INITIAL: i32 = 800;
pub const VOLUME_MIN: i32 = 0;
pub const VOLUME_MAX: i32 = 100;
pub const VOLUME_INITIAL: i32 = 70;
pub const GAP_MIN: i32 = 0;
pub const GAP_MAX: i32 = 60;
pub const GAP_INITIAL: i32 = 0;
pub const WEIGHTING_MIN: i32 = 20;
pub const WEIGHTING_MAX: i32 = 80;
pub const WEIGHTING_INITIAL: i32 = 50;
pub const TOLERANCE_MIN: i32 = 0;
pub const TOLERANCE_MAX: i32 = 90;
pub const TOLERANCE_INITIAL: i32 = 50;
/// Half the length of a dot at the maximum speed
pub const NOISE_SPIKE_THRESHOLD_INITIAL: i32 = (DOT_CALIBRATION / SPEED_MAX) / 2;
pub const ADAPTIVE_INITIAL: bool = false;

/// A settable integer parameter with a documented range
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parameter {
    SendSpeed,
    ReceiveSpeed,
    Frequency,
    Volume,
    Gap,
    Tolerance,
    Weighting,
}

impl Parameter {
    pub const ALL: [Parameter; 7] = [
        Parameter::SendSpeed,
        Parameter::ReceiveSpeed,
        Parameter::Frequency,
        Parameter::Volume,
        Parameter::Gap,
        Parameter::Tolerance,
        Parameter::Weighting,
    ];

    /// Inclusive (min, max)
    pub fn limits(&self) -> (i32, i32) {
        match self {
            Parameter::SendSpeed | Parameter::ReceiveSpeed => (SPEED_MIN, SPEED_MAX),
            Parameter::Frequency => (FREQUENCY_MIN, FREQUENCY_MAX),
            Parameter::Volume => (VOLUME_MIN, VOLUME_MAX),
            Parameter::Gap => (GAP_MIN, GAP_MAX),
            Parameter::Tolerance => (TOLERANCE_MIN, TOLERANCE_MAX),
            Parameter::Weighting => (WEIGHTING_MIN, WEIGHTING_MAX),
        }
    }

    pub fn initial(&self) -> i32 {
        match self {
            Parameter::SendSpeed | Parameter::ReceiveSpeed => SPEED_INITIAL,
            Parameter::Frequency => FREQUENCY_INITIAL,
            Parameter::Volume => VOLUME_INITIAL,
            Parameter::Gap => GAP_INITIAL,
            Parameter::Tolerance => TOLERANCE_INITIAL,
            Parameter::Weighting => WEIGHTING_INITIAL,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Parameter::SendSpeed => "send speed",
            Parameter::ReceiveSpeed => "receive speed",
            Parameter::Frequency => "frequency",
            Parameter::Volume => "volume",
            Parameter::Gap => "gap",
            Parameter::Tolerance => "tolerance",
            Parameter::Weighting => "weighting",
        }
    }

    /// Whether a change invalidates derived timings
    fn affects_timing(&self) -> bool {
        !matches!(self, Parameter::Frequency | Parameter::Volume)
    }

    fn validate(&self, value: i32) -> Result<()> {
        let (min, max) = self.limits();
        if value < min || value > max {
            return Err(CwError::invalid(format!(
                "{} {} outside {}..={}",
                self.name(),
                value,
                min,
                max
            )));
        }
        Ok(())
    }
}

/// Derived sending timings, in microseconds
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SendParameters {
    pub dot_length: i32,
    pub dash_length: i32,
    pub end_of_element_delay: i32,
    pub end_of_character_delay: i32,
    pub end_of_word_delay: i32,
    /// Farnsworth inter-character addition
    pub additional_delay: i32,
    /// Farnsworth inter-word addition
    pub adjustment_delay: i32,
}

/// Derived receiving timings, in microseconds
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReceiveParameters {
    pub dot_length: i32,
    pub dash_length: i32,
    pub dot_range_minimum: i32,
    pub dot_range_maximum: i32,
    pub dash_range_minimum: i32,
    pub dash_range_maximum: i32,
    pub eoe_range_minimum: i32,
    pub eoe_range_maximum: i32,
    pub eoe_range_ideal: i32,
    pub eoc_range_minimum: i32,
    pub eoc_range_maximum: i32,
    pub eoc_range_ideal: i32,
    pub adaptive_threshold: i32,
}

#[derive(Clone, Debug)]
pub struct TimingParameters {
    send_speed: i32,
    receive_speed: i32,
    frequency: i32,
    volume: i32,
    gap: i32,
    tolerance: i32,
    weighting: i32,
    noise_spike_threshold: i32,
    adaptive: bool,
    adaptive_threshold: i32,

    in_sync: bool,
    send: SendParameters,
    receive: ReceiveParameters,
}

impl Default for TimingParameters {
    fn default() -> Self {
        Self {
            send_speed: SPEED_INITIAL,
            receive_speed: SPEED_INITIAL,
            frequency: FREQUENCY_INITIAL,
            volume: VOLUME_INITIAL,
            gap: GAP_INITIAL,
            tolerance: TOLERANCE_INITIAL,
            weighting: WEIGHTING_INITIAL,
            noise_spike_threshold: NOISE_SPIKE_THRESHOLD_INITIAL,
            adaptive: ADAPTIVE_INITIAL,
            adaptive_threshold: 2 * (DOT_CALIBRATION / SPEED_INITIAL),
            in_sync: false,
            send: SendParameters::default(),
            receive: ReceiveParameters::default(),
        }
    }
}

impl TimingParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_in_sync(&self) -> bool {
        self.in_sync
    }

    /// Recompute derived timings if any input changed since the last sync
    pub fn sync(&mut self) {
        if self.in_sync {
            return;
        }

        let unit = DOT_CALIBRATION / self.send_speed;
        let weighting_length = (2 * (self.weighting - 50) * unit) / 100;
        let dot_length = unit + weighting_length;
        let end_of_element_delay = unit - (28 * weighting_length) / 22;
        let end_of_character_delay = 3 * unit - end_of_element_delay;
        let additional_delay = self.gap * unit;
        self.send = SendParameters {
            dot_length,
            dash_length: 3 * dot_length,
            end_of_element_delay,
            end_of_character_delay,
            end_of_word_delay: 7 * unit - end_of_character_delay,
            additional_delay,
            adjustment_delay: (7 * additional_delay) / 3,
        };

        if self.adaptive {
            // The threshold sits at two dots; speed follows it but stays in range.
            let half = (self.adaptive_threshold / 2).max(1);
            let speed = DOT_CALIBRATION / half;
            if speed < SPEED_MIN || speed > SPEED_MAX {
                self.receive_speed = speed.clamp(SPEED_MIN, SPEED_MAX);
                self.adaptive_threshold = 2 * (DOT_CALIBRATION / self.receive_speed);
                log::debug!(
                    "Adaptive receive speed {} clamped to {}",
                    speed,
                    self.receive_speed
                );
            } else {
                self.receive_speed = speed;
            }
        }

        let unit = DOT_CALIBRATION / self.receive_speed;
        if !self.adaptive {
            self.adaptive_threshold = 2 * unit;
        }

        let dot_length = unit;
        let dash_length = 3 * unit;
        let mut receive = ReceiveParameters {
            dot_length,
            dash_length,
            eoe_range_ideal: unit,
            eoc_range_ideal: 3 * unit,
            adaptive_threshold: self.adaptive_threshold,
            ..ReceiveParameters::default()
        };

        if self.adaptive {
            receive.dot_range_minimum = 0;
            receive.dot_range_maximum = 2 * dot_length;
            receive.dash_range_minimum = receive.dot_range_maximum;
            receive.dash_range_maximum = i32::MAX;

            receive.eoe_range_minimum = receive.dot_range_minimum;
            receive.eoe_range_maximum = receive.dot_range_maximum;
            receive.eoc_range_minimum = receive.eoe_range_maximum;
            receive.eoc_range_maximum = 5 * dot_length;
        } else {
            let tolerance = (dot_length * self.tolerance) / 100;
            receive.dot_range_minimum = dot_length - tolerance;
            receive.dot_range_maximum = dot_length + tolerance;
            receive.dash_range_minimum = dash_length - tolerance;
            receive.dash_range_maximum = dash_length + tolerance;

            receive.eoe_range_minimum = receive.dot_range_minimum;
            receive.eoe_range_maximum = receive.dot_range_maximum;
            receive.eoc_range_minimum = receive.dash_range_minimum;
            receive.eoc_range_maximum =
                receive.dash_range_maximum + self.send.additional_delay + self.send.adjustment_delay;
        }
        self.receive = receive;
        self.in_sync = true;

        log::debug!(
            "Send timings at {} WPM: {:?}; receive timings at {} WPM: {:?}",
            self.send_speed,
            self.send,
            self.receive_speed,
            self.receive
        );
    }

    pub fn send_parameters(&mut self) -> SendParameters {
        self.sync();
        self.send
    }

    pub fn receive_parameters(&mut self) -> ReceiveParameters {
        self.sync();
        self.receive
    }

    /// Set any ranged parameter. Unchanged values leave the cache intact.
    pub fn set(&mut self, parameter: Parameter, value: i32) -> Result<()> {
        parameter.validate(value)?;
        if parameter == Parameter::ReceiveSpeed && self.adaptive {
            return Err(CwError::StateError);
        }

        let slot = match parameter {
            Parameter::SendSpeed => &mut self.send_speed,
            Parameter::ReceiveSpeed => &mut self.receive_speed,
            Parameter::Frequency => &mut self.frequency,
            Parameter::Volume => &mut self.volume,
            Parameter::Gap => &mut self.gap,
            Parameter::Tolerance => &mut self.tolerance,
            Parameter::Weighting => &mut self.weighting,
        };
        if *slot != value {
            *slot = value;
            if parameter.affects_timing() {
                self.in_sync = false;
            }
            log::debug!("{} set to {}", parameter.name(), value);
        }
        Ok(())
    }

    pub fn get(&self, parameter: Parameter) -> i32 {
        match parameter {
            Parameter::SendSpeed => self.send_speed,
            Parameter::ReceiveSpeed => self.receive_speed,
            Parameter::Frequency => self.frequency,
            Parameter::Volume => self.volume,
            Parameter::Gap => self.gap,
            Parameter::Tolerance => self.tolerance,
            Parameter::Weighting => self.weighting,
        }
    }

    pub fn set_send_speed(&mut self, wpm: i32) -> Result<()> {
        self.set(Parameter::SendSpeed, wpm)
    }

    /// Fails with `StateError` while adaptive receive is on
    pub fn set_receive_speed(&mut self, wpm: i32) -> Result<()> {
        self.set(Parameter::ReceiveSpeed, wpm)
    }

    pub fn set_frequency(&mut self, hz: i32) -> Result<()> {
        self.set(Parameter::Frequency, hz)
    }

    pub fn set_volume(&mut self, percent: i32) -> Result<()> {
        self.set(Parameter::Volume, percent)
    }

    pub fn set_gap(&mut self, units: i32) -> Result<()> {
        self.set(Parameter::Gap, units)
    }

    pub fn set_tolerance(&mut self, percent: i32) -> Result<()> {
        self.set(Parameter::Tolerance, percent)
    }

    pub fn set_weighting(&mut self, percent: i32) -> Result<()> {
        self.set(Parameter::Weighting, percent)
    }

    pub fn send_speed(&self) -> i32 {
        self.send_speed
    }

    /// In adaptive mode this is the speed tracked at the last sync
    pub fn receive_speed(&self) -> i32 {
        self.receive_speed
    }

    pub fn frequency(&self) -> i32 {
        self.frequency
    }

    pub fn volume(&self) -> i32 {
        self.volume
    }

    pub fn gap(&self) -> i32 {
        self.gap
    }

    pub fn tolerance(&self) -> i32 {
        self.tolerance
    }

    pub fn weighting(&self) -> i32 {
        self.weighting
    }

    /// Tones at or below this length are discarded by the receiver; 0 disables
    pub fn set_noise_spike_threshold(&mut self, usecs: i32) -> Result<()> {
        if usecs < 0 {
            return Err(CwError::invalid(format!(
                "noise spike threshold {} is negative",
                usecs
            )));
        }
        self.noise_spike_threshold = usecs;
        Ok(())
    }

    pub fn noise_spike_threshold(&self) -> i32 {
        self.noise_spike_threshold
    }

    pub fn is_adaptive(&self) -> bool {
        self.adaptive
    }

    pub fn set_adaptive(&mut self, adaptive: bool) {
        if self.adaptive != adaptive {
            self.adaptive = adaptive;
            self.in_sync = false;
            log::debug!("Adaptive receive {}", if adaptive { "on" } else { "off" });
        }
    }

    /// Move the adaptive dot/dash threshold and resync immediately, so the
    /// tracked receive speed is current
    pub fn set_adaptive_threshold(&mut self, usecs: i32) {
        self.adaptive_threshold = usecs;
        self.in_sync = false;
        self.sync();
    }

    pub fn adaptive_threshold(&mut self) -> i32 {
        self.sync();
        self.adaptive_threshold
    }
}
