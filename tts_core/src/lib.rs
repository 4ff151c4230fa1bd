pub mod catalog;
pub mod conditioning;
pub mod engine;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod lifecycle;
pub mod metrics;
pub mod paths;
pub mod reference_cache;
pub mod service;
pub mod stream;
pub mod voices;
pub mod wav;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use engine::{
    AudioSegment, ConditioningContext, GenerationRequest, LoadedModel, ReferenceClip,
    SegmentStream, SynthesisEngine,
};
pub use error::{Result, TtsError};
pub use events::{ChunkEvent, EventSink, NullSink};
pub use reference_cache::{AudioConverter, FfmpegConverter, ReferenceCacheConfig};
pub use service::{GenerateParams, GenerationOutcome, ServiceConfig, VoiceService};
