//! The worker's single service context.
//!
//! [`VoiceService`] owns every piece of mutable state: the storage layout,
//! the persistent reference cache, the resident model together with its
//! conditioning cache, and the voice store. Requests are served one at a time
//! through `&mut self`, so no locking is needed.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info};

use crate::catalog::{self, ModelInfo};
use crate::conditioning::DEFAULT_CONDITIONING_CAPACITY;
use crate::engine::{GenerationRequest, ReferenceClip, SynthesisEngine};
use crate::error::{Result, TtsError};
use crate::events::EventSink;
use crate::lifecycle::{resolve_model_path, LoadOutcome, ModelLifecycle};
use crate::metrics::{timed, BenchmarkReport, StageTimings};
use crate::paths::{resolve_final_output_path, GenerationMode, StoragePaths};
use crate::reference_cache::{
    AudioConverter, ReferenceAudioCache, ReferenceCacheConfig, TemporaryFile,
};
use crate::stream;
use crate::voices::{VoiceEntry, VoiceStore};
use crate::wav;

pub const DEFAULT_STREAMING_INTERVAL: f32 = 2.0;
pub const DEFAULT_TEMPERATURE: f32 = 0.6;

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub base_dir: PathBuf,
    pub reference_cache: ReferenceCacheConfig,
    pub conditioning_capacity: usize,
    /// Drop conditioning and engine scratch memory after every request.
    pub aggressive_cache_clear: bool,
    pub streaming_interval: f32,
}

impl ServiceConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            reference_cache: ReferenceCacheConfig::default(),
            conditioning_capacity: DEFAULT_CONDITIONING_CAPACITY,
            aggressive_cache_clear: false,
            streaming_interval: DEFAULT_STREAMING_INTERVAL,
        }
    }
}

/// Parameters of one `generate` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateParams {
    pub text: String,
    pub output_path: Option<PathBuf>,
    pub voice: Option<String>,
    pub instruct: Option<String>,
    pub speed: Option<f32>,
    pub ref_audio: Option<PathBuf>,
    pub ref_text: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stream: bool,
    pub streaming_interval: Option<f32>,
    pub benchmark: bool,
    pub benchmark_label: Option<String>,
}

impl GenerateParams {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutcome {
    pub audio_path: PathBuf,
    /// Rounded to two decimals.
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub benchmark: Option<BenchmarkReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitOutcome {
    pub status: &'static str,
    pub models_dir: PathBuf,
    pub outputs_dir: PathBuf,
    pub voices_dir: PathBuf,
    pub cache_dir: PathBuf,
}

/// Transcript stored next to a reference clip as `<stem>.txt`.
fn read_sidecar_transcript(audio: &Path) -> Option<String> {
    let text = fs::read_to_string(audio.with_extension("txt")).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub struct VoiceService {
    config: ServiceConfig,
    paths: StoragePaths,
    references: ReferenceAudioCache,
    lifecycle: ModelLifecycle,
    voices: VoiceStore,
}

impl VoiceService {
    /// Construct without touching the filesystem and without an engine.
    pub fn new(config: ServiceConfig, converter: Box<dyn AudioConverter>) -> Self {
        let paths = StoragePaths::new(&config.base_dir);
        Self {
            references: ReferenceAudioCache::new(
                &paths.reference_cache_dir,
                config.reference_cache.clone(),
                converter,
            ),
            lifecycle: ModelLifecycle::new(config.conditioning_capacity),
            voices: VoiceStore::new(&paths.voices_dir),
            paths,
            config,
        }
    }

    pub fn attach_engine(&mut self, engine: Box<dyn SynthesisEngine>) {
        info!("Inference engine attached");
        self.lifecycle.attach_engine(engine);
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    pub fn lifecycle(&self) -> &ModelLifecycle {
        &self.lifecycle
    }

    pub fn references(&self) -> &ReferenceAudioCache {
        &self.references
    }

    /// Create the storage layout, optionally rebasing it, and prune the
    /// reference cache.
    pub fn init(&mut self, base_dir: Option<&Path>) -> Result<InitOutcome> {
        if let Some(base) = base_dir {
            self.paths = StoragePaths::new(base);
            self.references.set_dir(&self.paths.reference_cache_dir);
            self.voices.set_dir(&self.paths.voices_dir);
        }
        self.paths.ensure()?;

        let report = self.references.prune();
        info!(
            "Storage ready at {} ({} expired, {} surplus cached references pruned)",
            self.paths.base_dir.display(),
            report.expired,
            report.over_capacity
        );

        Ok(InitOutcome {
            status: "ok",
            models_dir: self.paths.models_dir.clone(),
            outputs_dir: self.paths.outputs_dir.clone(),
            voices_dir: self.paths.voices_dir.clone(),
            cache_dir: self.paths.reference_cache_dir.clone(),
        })
    }

    pub fn load_model(
        &mut self,
        model_id: Option<&str>,
        model_path: Option<&Path>,
        events: &mut dyn EventSink,
    ) -> Result<LoadOutcome> {
        let path = resolve_model_path(&self.paths.models_dir, model_id, model_path)?;
        self.lifecycle.load(&path, events)
    }

    pub fn unload_model(&mut self) {
        self.lifecycle.unload();
    }

    pub fn generate(
        &mut self,
        params: &GenerateParams,
        events: &mut dyn EventSink,
    ) -> Result<GenerationOutcome> {
        if self.lifecycle.current().is_none() {
            return Err(TtsError::NoModelLoaded);
        }
        let text = params.text.trim();
        if text.is_empty() {
            return Err(TtsError::invalid("Missing required param: text"));
        }

        let started = Instant::now();
        let mut timings = StageTimings::default();
        let voice = non_empty(params.voice.as_deref());
        let instruct = non_empty(params.instruct.as_deref());
        let mode = GenerationMode::infer(voice, params.ref_audio.is_some());
        let final_path = resolve_final_output_path(
            params.output_path.as_deref(),
            &self.paths.outputs_dir,
            mode,
            text,
        )?;

        events.progress(20, "Generating audio...");

        let mut request = GenerationRequest::new(text);
        request.temperature = params.temperature.unwrap_or(DEFAULT_TEMPERATURE);
        request.max_tokens = params.max_tokens;
        request.voice = voice.map(str::to_string);
        request.instruct = instruct.map(str::to_string);
        if voice.is_some() {
            request.speed = params.speed;
        }

        // Lives until the end of the request so the temporary file is removed
        // on every exit path.
        let mut _temporary_reference = None;
        let mut used_temp_reference = false;
        let mut prepared = None;

        if let Some(ref_audio) = params.ref_audio.as_deref() {
            let (normalized, elapsed) = timed(|| self.references.normalize(ref_audio));
            timings.normalize_reference = elapsed;
            let normalized = normalized?;
            if normalized.is_temporary {
                used_temp_reference = true;
                _temporary_reference = Some(TemporaryFile::new(normalized.path.clone()));
            }

            let transcript = non_empty(params.ref_text.as_deref())
                .map(str::to_string)
                .or_else(|| read_sidecar_transcript(&normalized.path))
                .or_else(|| read_sidecar_transcript(ref_audio));

            let (result, elapsed) = timed(|| {
                self.lifecycle.prepare_conditioning(
                    &normalized.path,
                    transcript.as_deref(),
                    !normalized.is_temporary,
                )
            });
            timings.prepare_clone_context = elapsed;
            prepared = result?;

            if prepared.is_none() {
                request.reference = Some(ReferenceClip {
                    audio: normalized.path.clone(),
                    transcript,
                });
            }
        }

        let streaming = params.stream && events.accepts_chunks();
        if streaming {
            request.streaming_interval = Some(
                params
                    .streaming_interval
                    .unwrap_or(self.config.streaming_interval),
            );
        }

        let handle = self.lifecycle.current().ok_or(TtsError::NoModelLoaded)?;
        let model = handle.model();
        let context = prepared.as_ref().map(|p| &p.context);

        let output = if streaming {
            events.progress(40, "Streaming audio...");
            stream::run_streaming(
                model,
                &request,
                context,
                &final_path,
                &self.paths.outputs_dir,
                events,
            )?
        } else {
            stream::run_single(model, &request, context, &final_path, events)?
        };
        timings.generation = output.generation_time;
        timings.write_output = output.write_time;

        if !output.final_path.is_file() {
            return Err(TtsError::NoAudioProduced);
        }
        let duration = wav::duration_seconds(&output.final_path);
        timings.total_backend = started.elapsed();

        events.progress(100, "Done");
        debug!(
            "Generated {:.2}s of audio in {:?} ({} mode)",
            duration,
            timings.total_backend,
            mode.as_str()
        );

        let benchmark = params.benchmark.then(|| BenchmarkReport {
            label: params
                .benchmark_label
                .clone()
                .unwrap_or_else(|| mode.as_str().to_string()),
            mode,
            prepared_clone_used: prepared.is_some(),
            clone_cache_hit: prepared.as_ref().map(|p| p.cache_hit),
            used_temp_reference,
            streaming_used: streaming,
            timings_ms: timings.as_millis(),
        });

        Ok(GenerationOutcome {
            audio_path: output.final_path,
            duration_seconds: (duration * 100.0).round() / 100.0,
            benchmark,
        })
    }

    /// Canonical WAV for `input`: unchanged when already a WAV, otherwise
    /// converted to `output` or to a timestamped file under `outputs/`.
    pub fn convert_audio(&mut self, input: &Path, output: Option<&Path>) -> Result<PathBuf> {
        if !input.exists() {
            return Err(TtsError::not_found(format!(
                "Audio file not found: {}",
                input.display()
            )));
        }
        if wav::is_readable_wav(input) {
            return Ok(input.to_path_buf());
        }

        let target = match output {
            Some(path) => path.to_path_buf(),
            None => {
                let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S-%6f");
                self.paths
                    .outputs_dir
                    .join(format!("temp_convert_{stamp}.wav"))
            }
        };
        self.references.convert_to(input, &target)?;
        Ok(target)
    }

    pub fn list_voices(&self) -> Result<Vec<VoiceEntry>> {
        self.voices.list()
    }

    pub fn enroll_voice(
        &mut self,
        name: &str,
        audio: &Path,
        transcript: Option<&str>,
    ) -> Result<VoiceEntry> {
        let normalized = self.references.normalize(audio)?;
        let _temporary = normalized
            .is_temporary
            .then(|| TemporaryFile::new(normalized.path.clone()));
        self.voices.enroll(name, &normalized.path, transcript)
    }

    pub fn delete_voice(&mut self, name: &str) -> Result<bool> {
        self.voices.delete(name)
    }

    pub fn model_info(&self) -> Vec<ModelInfo> {
        catalog::model_info(&self.paths.models_dir)
    }

    /// Runs after every request, successful or not.
    pub fn after_request(&mut self) {
        if !self.config.aggressive_cache_clear {
            return;
        }
        self.lifecycle.clear_conditioning();
        if let Some(handle) = self.lifecycle.current() {
            handle.model().release_scratch_memory();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullSink;
    use crate::testing::{write_test_wav, CountingConverter, RecordingSink, ScriptedEngine};
    use std::time::Duration;

    struct Fixture {
        _dir: tempfile::TempDir,
        service: VoiceService,
        engine: ScriptedEngine,
        converter: CountingConverter,
    }

    fn fixture_with(engine: ScriptedEngine, configure: impl FnOnce(&mut ServiceConfig)) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServiceConfig::new(dir.path());
        configure(&mut config);
        let converter = CountingConverter::new();
        let mut service = VoiceService::new(config, Box::new(converter.clone()));
        service.attach_engine(Box::new(engine.clone()));
        service.init(None).unwrap();

        let model_dir = service.paths().models_dir.join("Qwen3-TTS-12Hz-1.7B-Base-8bit");
        fs::create_dir_all(&model_dir).unwrap();
        service
            .load_model(Some("pro_clone"), None, &mut NullSink)
            .unwrap();

        Fixture {
            _dir: dir,
            service,
            engine,
            converter,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(ScriptedEngine::new(), |_| {})
    }

    fn reference_mp3(fx: &Fixture) -> PathBuf {
        let path = fx.service.paths().base_dir.join("speaker.mp3");
        fs::write(&path, b"not really an mp3").unwrap();
        path
    }

    #[test]
    fn test_generate_requires_model() {
        let dir = tempfile::tempdir().unwrap();
        let mut service = VoiceService::new(
            ServiceConfig::new(dir.path()),
            Box::new(CountingConverter::new()),
        );
        service.init(None).unwrap();

        let err = service
            .generate(&GenerateParams::new("hello"), &mut NullSink)
            .unwrap_err();
        assert_eq!(err.to_string(), "No model loaded. Call load_model first.");
    }

    #[test]
    fn test_generate_rejects_blank_text() {
        let mut fx = fixture();
        let err = fx
            .service
            .generate(&GenerateParams::new("   "), &mut NullSink)
            .unwrap_err();
        assert_eq!(err.to_string(), "Missing required param: text");
        assert_eq!(fx.engine.stats().generations(), 0);
    }

    #[test]
    fn test_instruct_only_goes_to_voice_design() {
        let mut fx = fixture();
        let params = GenerateParams {
            instruct: Some("a calm, low voice".to_string()),
            ..GenerateParams::new("Hello there")
        };
        let mut events = RecordingSink::default();

        let outcome = fx.service.generate(&params, &mut events).unwrap();

        let design_dir = fx.service.paths().outputs_dir.join("VoiceDesign");
        assert_eq!(outcome.audio_path.parent(), Some(design_dir.as_path()));
        assert!(outcome.audio_path.is_file());
        assert_eq!(outcome.duration_seconds, 0.25);
        let percents: Vec<u8> = events.progress.iter().map(|p| p.0).collect();
        assert_eq!(percents, vec![20, 80, 100]);
    }

    #[test]
    fn test_named_voice_goes_to_custom_voice() {
        let mut fx = fixture();
        let params = GenerateParams {
            voice: Some("ryan".to_string()),
            speed: Some(1.2),
            ..GenerateParams::new("Hi")
        };

        let outcome = fx.service.generate(&params, &mut NullSink).unwrap();

        assert!(outcome.audio_path.starts_with(fx.service.paths().outputs_dir.join("CustomVoice")));
        let (request, conditioned) = fx.engine.stats().last_request().unwrap();
        assert_eq!(request.speed, Some(1.2));
        assert!(!conditioned);
    }

    #[test]
    fn test_clone_reuses_prepared_conditioning() {
        let engine = ScriptedEngine::new().with_prepare_delay(Duration::from_millis(40));
        let mut fx = fixture_with(engine, |_| {});
        let reference = reference_mp3(&fx);
        let params = GenerateParams {
            ref_audio: Some(reference),
            ref_text: Some("the reference words".to_string()),
            benchmark: true,
            ..GenerateParams::new("Clone me")
        };

        let first = fx.service.generate(&params, &mut NullSink).unwrap();
        let second = fx.service.generate(&params, &mut NullSink).unwrap();

        let first = first.benchmark.unwrap();
        let second = second.benchmark.unwrap();
        assert_eq!(first.clone_cache_hit, Some(false));
        assert_eq!(second.clone_cache_hit, Some(true));
        assert!(second.prepared_clone_used);
        assert!(
            second.timings_ms.prepare_clone_context < first.timings_ms.prepare_clone_context
        );
        assert_eq!(fx.converter.calls(), 1);
        assert_eq!(fx.engine.stats().preparations(), 1);
        assert_eq!(first.label, "clone");
    }

    #[test]
    fn test_clone_reads_sidecar_transcript() {
        let mut fx = fixture();
        let reference = fx.service.paths().base_dir.join("ref.wav");
        write_test_wav(&reference, 0.2, 24_000);
        fs::write(reference.with_extension("txt"), "  words from the sidecar \n").unwrap();
        let params = GenerateParams {
            ref_audio: Some(reference),
            ..GenerateParams::new("Clone me")
        };

        let outcome = fx.service.generate(&params, &mut NullSink).unwrap();

        assert!(outcome.audio_path.starts_with(fx.service.paths().outputs_dir.join("Clones")));
        assert_eq!(fx.engine.stats().preparations(), 1);
        assert_eq!(fx.service.lifecycle().conditioning().len(), 1);
        let key = fx.service.lifecycle().conditioning().keys().next().unwrap().clone();
        assert_eq!(key.transcript, "words from the sidecar");
    }

    #[test]
    fn test_clone_without_transcript_passes_reference() {
        let mut fx = fixture();
        let reference = reference_mp3(&fx);
        let params = GenerateParams {
            ref_audio: Some(reference),
            benchmark: true,
            ..GenerateParams::new("Clone me")
        };

        let outcome = fx.service.generate(&params, &mut NullSink).unwrap();

        let report = outcome.benchmark.unwrap();
        assert!(!report.prepared_clone_used);
        assert_eq!(report.clone_cache_hit, None);
        let (request, conditioned) = fx.engine.stats().last_request().unwrap();
        assert!(!conditioned);
        assert!(request.reference.is_some());
    }

    #[test]
    fn test_temporary_reference_is_removed_and_not_cached() {
        let mut fx = fixture_with(ScriptedEngine::new(), |config| {
            config.reference_cache.persist = false;
        });
        let reference = reference_mp3(&fx);
        let params = GenerateParams {
            ref_audio: Some(reference),
            ref_text: Some("words".to_string()),
            benchmark: true,
            ..GenerateParams::new("Clone me")
        };

        let outcome = fx.service.generate(&params, &mut NullSink).unwrap();

        let report = outcome.benchmark.unwrap();
        assert!(report.used_temp_reference);
        assert!(fx.service.lifecycle().conditioning().is_empty());
        assert!(fx.service.references().entries().is_empty());
        let (request, _) = fx.engine.stats().last_request().unwrap();
        assert!(request.reference.is_none());
    }

    #[test]
    fn test_temporary_reference_removed_when_generation_fails() {
        let mut fx = fixture_with(ScriptedEngine::new().without_conditioning(), |config| {
            config.reference_cache.persist = false;
        });
        let reference = reference_mp3(&fx);
        let params = GenerateParams {
            ref_audio: Some(reference),
            ..GenerateParams::new("[silent]")
        };

        let err = fx.service.generate(&params, &mut NullSink).unwrap_err();

        assert!(matches!(err, TtsError::NoAudioProduced));
        let (request, _) = fx.engine.stats().last_request().unwrap();
        let clip = request.reference.unwrap();
        assert!(clip.audio.starts_with(std::env::temp_dir()));
        assert!(!clip.audio.exists());
    }

    #[test]
    fn test_streaming_emits_chunks_then_final_file() {
        let engine = ScriptedEngine::new().with_chunks(3);
        let mut fx = fixture_with(engine, |_| {});
        let output = fx.service.paths().outputs_dir.join("mine/take.wav");
        let params = GenerateParams {
            voice: Some("aiden".to_string()),
            output_path: Some(output.clone()),
            stream: true,
            streaming_interval: Some(0.5),
            benchmark: true,
            ..GenerateParams::new("Stream this")
        };
        let mut events = RecordingSink::default();

        let outcome = fx.service.generate(&params, &mut events).unwrap();

        assert_eq!(outcome.audio_path, output);
        assert_eq!(outcome.duration_seconds, 0.75);
        let indices: Vec<usize> = events.chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(outcome.benchmark.unwrap().streaming_used);
        let (request, _) = fx.engine.stats().last_request().unwrap();
        assert_eq!(request.streaming_interval, Some(0.5));
        let percents: Vec<u8> = events.progress.iter().map(|p| p.0).collect();
        assert_eq!(percents, vec![20, 40, 80, 100]);
    }

    #[test]
    fn test_stream_flag_without_chunk_sink_falls_back() {
        let engine = ScriptedEngine::new().with_chunks(2);
        let mut fx = fixture_with(engine, |_| {});
        let params = GenerateParams {
            stream: true,
            ..GenerateParams::new("No id")
        };

        let outcome = fx.service.generate(&params, &mut NullSink).unwrap();

        let siblings = fs::read_dir(outcome.audio_path.parent().unwrap()).unwrap().count();
        assert_eq!(siblings, 1);
        let (request, _) = fx.engine.stats().last_request().unwrap();
        assert_eq!(request.streaming_interval, None);
    }

    #[test]
    fn test_enroll_and_list_voices() {
        let mut fx = fixture();
        let audio = reference_mp3(&fx);

        let entry = fx
            .service
            .enroll_voice("Test Voice!", &audio, Some("hello there"))
            .unwrap();

        assert_eq!(entry.name, "Test_Voice");
        let txt = fx.service.paths().voices_dir.join("Test_Voice.txt");
        assert_eq!(fs::read_to_string(txt).unwrap(), "hello there");
        let voices = fx.service.list_voices().unwrap();
        assert_eq!(voices.len(), 1);
        assert!(voices[0].has_transcript);
        assert!(fx.service.delete_voice("Test Voice!").unwrap());
    }

    #[test]
    fn test_convert_audio() {
        let mut fx = fixture();
        let wav_in = fx.service.paths().base_dir.join("in.wav");
        write_test_wav(&wav_in, 0.1, 16_000);
        assert_eq!(fx.service.convert_audio(&wav_in, None).unwrap(), wav_in);

        let mp3 = reference_mp3(&fx);
        let converted = fx.service.convert_audio(&mp3, None).unwrap();
        assert!(converted.starts_with(&fx.service.paths().outputs_dir));
        assert!(wav::is_readable_wav(&converted));

        let explicit = fx.service.paths().base_dir.join("out/clean.wav");
        assert_eq!(fx.service.convert_audio(&mp3, Some(&explicit)).unwrap(), explicit);
        assert!(explicit.is_file());

        let missing = fx.service.paths().base_dir.join("missing.flac");
        assert!(matches!(
            fx.service.convert_audio(&missing, None),
            Err(TtsError::NotFound(_))
        ));
    }

    #[test]
    fn test_init_rebases_storage() {
        let mut fx = fixture();
        let other = tempfile::tempdir().unwrap();

        let outcome = fx.service.init(Some(other.path())).unwrap();

        assert_eq!(outcome.models_dir, other.path().join("models"));
        assert!(other.path().join("cache/normalized_clone_refs").is_dir());
        assert_eq!(fx.service.references().dir(), outcome.cache_dir.as_path());
    }

    #[test]
    fn test_aggressive_clear_after_request() {
        let engine = ScriptedEngine::new();
        let mut fx = fixture_with(engine, |config| config.aggressive_cache_clear = true);
        let reference = reference_mp3(&fx);
        let params = GenerateParams {
            ref_audio: Some(reference),
            ref_text: Some("words".to_string()),
            ..GenerateParams::new("Clone me")
        };

        fx.service.generate(&params, &mut NullSink).unwrap();
        assert_eq!(fx.service.lifecycle().conditioning().len(), 1);
        fx.service.after_request();

        assert!(fx.service.lifecycle().conditioning().is_empty());
        assert_eq!(fx.engine.stats().scratch_releases(), 1);
    }
}
