//! Seam between the worker and the numerical inference engine.
//!
//! The engine itself lives outside this crate; it is reached only through
//! [`SynthesisEngine`] (load a model folder) and [`LoadedModel`] (prepare
//! conditioning, generate audio segments).

use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A block of mono samples produced by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSegment {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Set by the engine on the last segment of a stream.
    pub is_final: bool,
}

impl AudioSegment {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            is_final: false,
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Reference clip handed to the engine when no prepared conditioning is used.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceClip {
    pub audio: PathBuf,
    pub transcript: Option<String>,
}

/// Everything the engine needs to synthesize one utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub text: String,
    pub voice: Option<String>,
    pub instruct: Option<String>,
    pub speed: Option<f32>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub reference: Option<ReferenceClip>,
    /// Seconds of audio per streamed segment; `None` asks for a single pass.
    pub streaming_interval: Option<f32>,
}

impl GenerationRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice: None,
            instruct: None,
            speed: None,
            temperature: 0.6,
            max_tokens: None,
            reference: None,
            streaming_interval: None,
        }
    }
}

/// Opaque, cheaply clonable conditioning state produced by a loaded model.
///
/// Only meaningful to the model instance that produced it.
#[derive(Clone)]
pub struct ConditioningContext(Arc<dyn Any + Send + Sync>);

impl ConditioningContext {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Whether both handles point at the same prepared state.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ConditioningContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConditioningContext")
            .field(&"<opaque>")
            .finish()
    }
}

/// Lazily produced audio segments.
pub type SegmentStream<'a> = Box<dyn Iterator<Item = anyhow::Result<AudioSegment>> + 'a>;

/// A model resident in memory.
pub trait LoadedModel: Send {
    /// Output sample rate of the model.
    fn sample_rate(&self) -> u32;

    /// Whether [`LoadedModel::prepare_conditioning`] is available.
    fn supports_prepared_conditioning(&self) -> bool {
        false
    }

    /// Precompute reference-dependent state from a canonical WAV and its transcript.
    fn prepare_conditioning(
        &self,
        reference_wav: &Path,
        transcript: &str,
    ) -> anyhow::Result<ConditioningContext> {
        let _ = (reference_wav, transcript);
        anyhow::bail!("model does not support prepared conditioning")
    }

    /// Generate audio, optionally reusing prepared conditioning.
    fn generate<'a>(
        &'a self,
        request: &'a GenerationRequest,
        conditioning: Option<&'a ConditioningContext>,
    ) -> anyhow::Result<SegmentStream<'a>>;

    /// Drop transient allocator caches. Called after a request when the
    /// aggressive cache-clear policy is on.
    fn release_scratch_memory(&self) {}
}

/// Factory for [`LoadedModel`]s; attached to the worker once at startup.
pub trait SynthesisEngine: Send {
    fn load(&self, model_path: &Path) -> anyhow::Result<Box<dyn LoadedModel>>;
}
