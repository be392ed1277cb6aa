pub mod renderer;
pub mod sink;

#[cfg(feature = "audio")]
pub mod engine;

pub use renderer::{SampleRenderer, SlopeShape};
pub use sink::{AudioSink, NullSink, PlayEvent, Recording, RecordingSink};

#[cfg(feature = "audio")]
pub use engine::CpalSink;
