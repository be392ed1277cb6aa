//! Morse code (CW) engine: timed tone generation from text, iambic and
//! straight key handling, and decoding of key timings back into text.
//!
//! A [`Generator`] owns a tone queue drained by a [`Clock`] into an
//! [`AudioSink`]. The [`Receiver`] is independent of the generator's queue
//! but can share its timing parameters.

pub mod audio;
pub mod clock;
pub mod config;
pub mod error;
pub mod generator;
pub mod keyer;
pub mod keying;
pub mod morse;
pub mod receiver;
pub mod sender;
pub mod stats;
pub mod straight_key;
pub mod tone_queue;

pub use audio::{AudioSink, NullSink, RecordingSink};
pub use clock::Clock;
pub use config::EngineSettings;
pub use error::{CwError, Result};
pub use generator::Generator;
pub use keyer::KeyerState;
pub use morse::timing::Parameter;
pub use morse::Element;
pub use receiver::{ReceiveState, Received, Receiver, Representation, Timestamp};
pub use stats::ReceiveStatistics;
