//! Scripted engine and converter for exercising the caches and lifecycle
//! without a real inference backend.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::engine::{
    AudioSegment, ConditioningContext, GenerationRequest, LoadedModel, SegmentStream,
    SynthesisEngine,
};
use crate::error::{Result, TtsError};
use crate::events::{ChunkEvent, EventSink};
use crate::reference_cache::AudioConverter;

/// Write `seconds` of a quiet constant tone as 16-bit mono PCM.
pub fn write_test_wav(path: &Path, seconds: f64, sample_rate: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let frames = (seconds * sample_rate as f64).round() as usize;
    let mut writer = hound::WavWriter::create(path, spec).expect("create test wav");
    for _ in 0..frames {
        writer.write_sample(1000i16).expect("write test sample");
    }
    writer.finalize().expect("finalize test wav");
}

/// Records every event in order.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    pub progress: Vec<(u8, String)>,
    pub chunks: Vec<ChunkEvent>,
}

impl EventSink for RecordingSink {
    fn progress(&mut self, percent: u8, message: &str) {
        self.progress.push((percent, message.to_string()));
    }

    fn chunk(&mut self, event: &ChunkEvent) {
        self.chunks.push(event.clone());
    }
}

/// Call counters shared between an engine and the models it loaded.
#[derive(Debug, Default)]
pub struct EngineStats {
    loads: AtomicUsize,
    preparations: AtomicUsize,
    generations: AtomicUsize,
    scratch_releases: AtomicUsize,
    last_request: std::sync::Mutex<Option<(GenerationRequest, bool)>>,
}

impl EngineStats {
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn preparations(&self) -> usize {
        self.preparations.load(Ordering::SeqCst)
    }

    pub fn generations(&self) -> usize {
        self.generations.load(Ordering::SeqCst)
    }

    pub fn scratch_releases(&self) -> usize {
        self.scratch_releases.load(Ordering::SeqCst)
    }

    /// The last generation request and whether conditioning was supplied.
    pub fn last_request(&self) -> Option<(GenerationRequest, bool)> {
        self.last_request.lock().ok().and_then(|g| g.clone())
    }
}

/// Engine whose models emit `chunks` segments of `chunk_seconds` each.
#[derive(Debug, Clone)]
pub struct ScriptedEngine {
    stats: Arc<EngineStats>,
    sample_rate: u32,
    chunks: usize,
    chunk_seconds: f64,
    prepare_delay: Duration,
    conditioning: bool,
    fail_next_load: Arc<AtomicBool>,
    panic_next_load: Arc<AtomicBool>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            stats: Arc::new(EngineStats::default()),
            sample_rate: 24_000,
            chunks: 1,
            chunk_seconds: 0.25,
            prepare_delay: Duration::ZERO,
            conditioning: true,
            fail_next_load: Arc::new(AtomicBool::new(false)),
            panic_next_load: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_chunks(mut self, chunks: usize) -> Self {
        self.chunks = chunks;
        self
    }

    pub fn with_chunk_seconds(mut self, seconds: f64) -> Self {
        self.chunk_seconds = seconds;
        self
    }

    pub fn with_prepare_delay(mut self, delay: Duration) -> Self {
        self.prepare_delay = delay;
        self
    }

    pub fn without_conditioning(mut self) -> Self {
        self.conditioning = false;
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn fail_next_load(&self) {
        self.fail_next_load.store(true, Ordering::SeqCst);
    }

    pub fn panic_next_load(&self) {
        self.panic_next_load.store(true, Ordering::SeqCst);
    }

    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.stats)
    }
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SynthesisEngine for ScriptedEngine {
    fn load(&self, model_path: &Path) -> anyhow::Result<Box<dyn LoadedModel>> {
        if self.panic_next_load.swap(false, Ordering::SeqCst) {
            panic!("scripted load panic for {}", model_path.display());
        }
        if self.fail_next_load.swap(false, Ordering::SeqCst) {
            anyhow::bail!("scripted load failure for {}", model_path.display());
        }
        self.stats.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedModel {
            engine: self.clone(),
            path: model_path.to_path_buf(),
        }))
    }
}

struct ScriptedModel {
    engine: ScriptedEngine,
    path: PathBuf,
}

impl LoadedModel for ScriptedModel {
    fn sample_rate(&self) -> u32 {
        self.engine.sample_rate
    }

    fn supports_prepared_conditioning(&self) -> bool {
        self.engine.conditioning
    }

    fn prepare_conditioning(
        &self,
        reference_wav: &Path,
        transcript: &str,
    ) -> anyhow::Result<ConditioningContext> {
        if !self.engine.prepare_delay.is_zero() {
            std::thread::sleep(self.engine.prepare_delay);
        }
        self.engine.stats.preparations.fetch_add(1, Ordering::SeqCst);
        Ok(ConditioningContext::new((
            self.path.clone(),
            reference_wav.to_path_buf(),
            transcript.to_string(),
        )))
    }

    fn generate<'a>(
        &'a self,
        request: &'a GenerationRequest,
        conditioning: Option<&'a ConditioningContext>,
    ) -> anyhow::Result<SegmentStream<'a>> {
        if request.text.contains("[fail]") {
            anyhow::bail!("scripted generation failure");
        }
        self.engine.stats.generations.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.engine.stats.last_request.lock() {
            *last = Some((request.clone(), conditioning.is_some()));
        }

        let chunks = if request.text.contains("[silent]") {
            0
        } else {
            self.engine.chunks
        };
        let rate = self.engine.sample_rate;
        let frames = (self.engine.chunk_seconds * rate as f64).round() as usize;

        Ok(Box::new((0..chunks).map(move |index| {
            Ok(AudioSegment {
                samples: vec![0.05 * (index + 1) as f32; frames],
                sample_rate: rate,
                is_final: index + 1 == chunks,
            })
        })))
    }

    fn release_scratch_memory(&self) {
        self.engine
            .stats
            .scratch_releases
            .fetch_add(1, Ordering::SeqCst);
    }
}

/// Converter that writes a short canonical WAV and counts its invocations.
#[derive(Debug, Clone, Default)]
pub struct CountingConverter {
    calls: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
}

impl CountingConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl AudioConverter for CountingConverter {
    fn convert(&self, input: &Path, output: &Path, sample_rate: u32) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            // Leave a truncated file behind like a crashed converter would.
            let _ = std::fs::write(output, b"RIFF");
            return Err(TtsError::ConversionFailed(format!(
                "scripted failure converting {}",
                input.display()
            )));
        }
        if !input.exists() {
            return Err(TtsError::ConversionFailed(format!(
                "{} does not exist",
                input.display()
            )));
        }
        write_test_wav(output, 0.5, sample_rate);
        Ok(())
    }
}
