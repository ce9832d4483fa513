//! Export engine: the sampling, encoding and rendering stages

pub mod audio;
pub mod progress;
pub mod sampler;
pub mod video;

pub use audio::{AudioBlocks, AudioRenderStage, RenderedAudio};
pub use progress::{
    FnProgressCallback, JsonProgressCallback, NoOpProgressCallback, ProgressCallback,
    ProgressTracker,
};
pub use sampler::{FrameSampler, ReadySignal, SampleOutcome, SampledFrame};
pub use video::VideoEncodeStage;
