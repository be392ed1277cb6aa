use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
/// Length of the attack and release slopes
pub const DEFAULT_SLOPE_USECS: u32 = 5_000;

/// Envelope shape used when a tone starts or stops
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlopeShape {
    Linear,
    #[default]
    RaisedCosine,
    Sine,
    /// Hard keying, no slope at all
    Rectangular,
}

impl SlopeShape {
    /// Gain at `position` samples into a slope of `length` samples
    pub fn gain(&self, position: usize, length: usize) -> f32 {
        if length == 0 || *self == SlopeShape::Rectangular {
            return if position > 0 || length == 0 { 1.0 } else { 0.0 };
        }
        let x = position.min(length) as f32 / length as f32;
        match self {
            SlopeShape::Linear => x,
            SlopeShape::RaisedCosine => 0.5 * (1.0 - (std::f32::consts::PI * x).cos()),
            SlopeShape::Sine => (std::f32::consts::FRAC_PI_2 * x).sin(),
            SlopeShape::Rectangular => 1.0,
        }
    }
}

/// Turns the sink's "play frequency F" requests into PCM samples.
///
/// A change from silence to tone (or back) walks the envelope over the slope
/// instead of switching instantly, which keeps keying free of clicks. Phase
/// is carried across frequency changes.
pub struct SampleRenderer {
    sample_rate: u32,
    frequency: i32,
    sounding_frequency: i32,
    phase: f64,
    volume: f32,
    slope_shape: SlopeShape,
    slope_usecs: u32,
    slope_samples: usize,
    envelope_position: usize,
    dither: bool,
    rng: SmallRng,
}

impl SampleRenderer {
    pub fn new(sample_rate: u32) -> Self {
        let mut renderer = Self {
            sample_rate,
            frequency: 0,
            sounding_frequency: 0,
            phase: 0.0,
            volume: 0.7,
            slope_shape: SlopeShape::default(),
            slope_usecs: DEFAULT_SLOPE_USECS,
            slope_samples: 0,
            envelope_position: 0,
            dither: true,
            rng: SmallRng::from_entropy(),
        };
        renderer.update_slope_samples();
        renderer
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The device decides the rate, so it may change after construction
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate.max(1);
        self.update_slope_samples();
    }

    pub fn set_slope(&mut self, shape: SlopeShape, usecs: u32) {
        self.slope_shape = shape;
        self.slope_usecs = usecs;
        self.update_slope_samples();
    }

    pub fn slope_shape(&self) -> SlopeShape {
        self.slope_shape
    }

    pub fn slope_samples(&self) -> usize {
        self.slope_samples
    }

    fn update_slope_samples(&mut self) {
        self.slope_samples = if self.slope_shape == SlopeShape::Rectangular {
            0
        } else {
            ((u64::from(self.sample_rate) * u64::from(self.slope_usecs)) / 1_000_000) as usize
        };
        self.envelope_position = self.envelope_position.min(self.slope_samples);
    }

    /// 0 Hz releases the tone
    pub fn set_frequency(&mut self, frequency: i32) {
        self.frequency = frequency.max(0);
        if self.frequency > 0 {
            self.sounding_frequency = self.frequency;
        }
    }

    pub fn frequency(&self) -> i32 {
        self.frequency
    }

    /// Volume in percent, clamped to 0..=100
    pub fn set_volume(&mut self, percent: i32) {
        self.volume = percent.clamp(0, 100) as f32 / 100.0;
    }

    pub fn volume(&self) -> i32 {
        (self.volume * 100.0).round() as i32
    }

    pub fn set_dither(&mut self, dither: bool) {
        self.dither = dither;
    }

    /// True once a released tone has fully decayed
    pub fn is_silent(&self) -> bool {
        self.frequency == 0 && self.envelope_position == 0
    }

    fn envelope(&mut self) -> f32 {
        if self.slope_samples == 0 {
            return if self.frequency > 0 { 1.0 } else { 0.0 };
        }
        if self.frequency > 0 {
            if self.envelope_position < self.slope_samples {
                self.envelope_position += 1;
            }
        } else if self.envelope_position > 0 {
            self.envelope_position -= 1;
        }
        self.slope_shape
            .gain(self.envelope_position, self.slope_samples)
    }

    pub fn next_sample(&mut self) -> f32 {
        let gain = self.envelope();
        if gain == 0.0 {
            return 0.0;
        }

        let sample = (self.phase * 2.0 * std::f64::consts::PI).sin() as f32;
        self.phase += f64::from(self.sounding_frequency) / f64::from(self.sample_rate);
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        sample * gain * self.volume
    }

    /// Fill a mono buffer
    pub fn fill_buffer(&mut self, buffer: &mut [f32]) {
        for sample in buffer.iter_mut() {
            *sample = self.next_sample();
        }

        for sample in buffer.iter_mut() {
            if self.dither {
                *sample += (self.rng.gen::<f32>() - 0.5) * 0.001;
            }
            // Soft clipping
            if sample.abs() > 0.8 {
                *sample = sample.signum() * (0.8 + 0.2 * ((*sample).abs() - 0.8).tanh());
            }
        }
    }
}
