//! Chunked and single-pass generation into the final output file.
//!
//! Both paths publish the final WAV the same way: the assembled audio is
//! written to a hidden sibling and renamed onto the resolved path, so a
//! reader never sees a partial file there. Streaming additionally writes
//! every segment to `{stem}__chunk_{index:03}.wav` and announces it before
//! moving on to the next one.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::engine::{AudioSegment, ConditioningContext, GenerationRequest, LoadedModel};
use crate::error::{Result, TtsError};
use crate::events::{ChunkEvent, EventSink};
use crate::paths::GenerationPaths;
use crate::wav;

/// What a finished generation left on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutput {
    pub final_path: PathBuf,
    /// Empty for single-pass generation.
    pub chunk_paths: Vec<PathBuf>,
    pub duration_seconds: f64,
    pub generation_time: Duration,
    pub write_time: Duration,
}

/// State of one streaming request. Lives only as long as the request.
#[derive(Debug)]
pub struct GenerationSession {
    final_path: PathBuf,
    paths: GenerationPaths,
    chunk_paths: Vec<PathBuf>,
    accumulated: Vec<f32>,
    completed: bool,
}

impl GenerationSession {
    pub fn new(final_path: &Path, default_dir: &Path) -> Result<Self> {
        Ok(Self {
            final_path: final_path.to_path_buf(),
            paths: GenerationPaths::derive(final_path, default_dir)?,
            chunk_paths: Vec::new(),
            accumulated: Vec::new(),
            completed: false,
        })
    }

    pub fn chunk_paths(&self) -> &[PathBuf] {
        &self.chunk_paths
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Write `segment` as the next chunk file, announce it, and keep its
    /// samples for final assembly.
    pub fn push_chunk(
        &mut self,
        segment: &AudioSegment,
        events: &mut dyn EventSink,
    ) -> Result<ChunkEvent> {
        let index = self.chunk_paths.len();
        let chunk_path = self.paths.chunk_path(index);
        wav::write_wav_atomic(&chunk_path, &segment.samples, segment.sample_rate)?;

        let event = ChunkEvent {
            chunk_index: index,
            chunk_path: chunk_path.clone(),
            is_final: segment.is_final,
        };
        events.chunk(&event);
        debug!("Wrote chunk {} to {}", index, chunk_path.display());

        self.chunk_paths.push(chunk_path);
        self.accumulated.extend_from_slice(&segment.samples);
        Ok(event)
    }

    /// Concatenate every chunk into the final file.
    pub fn finish(&mut self, sample_rate: u32) -> Result<f64> {
        if self.chunk_paths.is_empty() {
            return Err(TtsError::NoAudioProduced);
        }
        wav::write_wav_atomic(&self.final_path, &self.accumulated, sample_rate)?;
        self.completed = true;
        Ok(self.accumulated.len() as f64 / sample_rate.max(1) as f64)
    }
}

/// Stream `request` through `model`, one chunk file and notification per
/// segment, then assemble the final file at `final_path`.
pub fn run_streaming(
    model: &dyn LoadedModel,
    request: &GenerationRequest,
    conditioning: Option<&ConditioningContext>,
    final_path: &Path,
    default_dir: &Path,
    events: &mut dyn EventSink,
) -> Result<GenerationOutput> {
    let mut session = GenerationSession::new(final_path, default_dir)?;

    let started = Instant::now();
    for segment in model.generate(request, conditioning)? {
        session.push_chunk(&segment?, events)?;
    }
    let generation_time = started.elapsed();

    events.progress(80, "Saving audio...");
    let started = Instant::now();
    let duration_seconds = session.finish(model.sample_rate())?;
    let write_time = started.elapsed();

    Ok(GenerationOutput {
        final_path: session.final_path,
        chunk_paths: session.chunk_paths,
        duration_seconds,
        generation_time,
        write_time,
    })
}

/// Generate without chunk files: collect every segment, then write once.
pub fn run_single(
    model: &dyn LoadedModel,
    request: &GenerationRequest,
    conditioning: Option<&ConditioningContext>,
    final_path: &Path,
    events: &mut dyn EventSink,
) -> Result<GenerationOutput> {
    let started = Instant::now();
    let mut samples = Vec::new();
    let mut segments = 0usize;
    for segment in model.generate(request, conditioning)? {
        samples.extend(segment?.samples);
        segments += 1;
    }
    let generation_time = started.elapsed();

    if segments == 0 {
        return Err(TtsError::NoAudioProduced);
    }

    events.progress(80, "Saving audio...");
    let sample_rate = model.sample_rate();
    let started = Instant::now();
    wav::write_wav_atomic(final_path, &samples, sample_rate)?;
    let write_time = started.elapsed();

    Ok(GenerationOutput {
        final_path: final_path.to_path_buf(),
        chunk_paths: Vec::new(),
        duration_seconds: samples.len() as f64 / sample_rate.max(1) as f64,
        generation_time,
        write_time,
    })
}
