// Per-request benchmark timings

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::paths::GenerationMode;

/// Milliseconds rounded to microsecond precision.
pub fn millis(duration: Duration) -> f64 {
    (duration.as_secs_f64() * 1_000_000.0).round() / 1_000.0
}

/// Run `f` and return its result alongside the elapsed time.
pub fn timed<T>(f: impl FnOnce() -> T) -> (T, Duration) {
    let started = Instant::now();
    let value = f();
    (value, started.elapsed())
}

/// Elapsed time of each stage of one `generate` call.
///
/// Stages that did not run stay at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageTimings {
    pub normalize_reference: Duration,
    pub prepare_clone_context: Duration,
    pub generation: Duration,
    pub write_output: Duration,
    pub total_backend: Duration,
}

impl StageTimings {
    pub fn as_millis(&self) -> TimingsMs {
        TimingsMs {
            normalize_reference: millis(self.normalize_reference),
            prepare_clone_context: millis(self.prepare_clone_context),
            generation: millis(self.generation),
            write_output: millis(self.write_output),
            total_backend: millis(self.total_backend),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TimingsMs {
    pub normalize_reference: f64,
    pub prepare_clone_context: f64,
    pub generation: f64,
    pub write_output: f64,
    pub total_backend: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkReport {
    pub label: String,
    pub mode: GenerationMode,
    pub prepared_clone_used: bool,
    /// `None` when no reference clip was involved.
    pub clone_cache_hit: Option<bool>,
    pub used_temp_reference: bool,
    pub streaming_used: bool,
    pub timings_ms: TimingsMs,
}
