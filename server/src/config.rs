// Configuration for the worker process

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tts_core::conditioning::DEFAULT_CONDITIONING_CAPACITY;
use tts_core::reference_cache::{
    CANONICAL_SAMPLE_RATE, DEFAULT_REFERENCE_CACHE_LIMIT, DEFAULT_REFERENCE_MAX_AGE,
};
use tts_core::service::DEFAULT_STREAMING_INTERVAL;
use tts_core::{ReferenceCacheConfig, ServiceConfig};

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    pub base_dir: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub ref_cache_limit: usize,
    pub ref_cache_max_age_secs: u64,
    pub ref_cache_persist: bool,
    pub conditioning_cache_capacity: usize,
    pub aggressive_cache_clear: bool,
    pub streaming_interval_secs: f32,
    pub sample_rate: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("tts-worker-data"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ref_cache_limit: DEFAULT_REFERENCE_CACHE_LIMIT,
            ref_cache_max_age_secs: DEFAULT_REFERENCE_MAX_AGE.as_secs(),
            ref_cache_persist: true,
            conditioning_cache_capacity: DEFAULT_CONDITIONING_CAPACITY,
            aggressive_cache_clear: false,
            streaming_interval_secs: DEFAULT_STREAMING_INTERVAL,
            sample_rate: CANONICAL_SAMPLE_RATE,
        }
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn parse_flag(raw: Option<String>, default: bool) -> bool {
    match raw.as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

fn default_base_dir(home: Option<String>) -> PathBuf {
    match home.filter(|h| !h.is_empty()) {
        Some(home) => PathBuf::from(home).join(".local/share/tts-worker"),
        None => PathBuf::from("tts-worker-data"),
    }
}

/// An explicit path wins, then an `ffmpeg` bundled next to the executable,
/// then whatever `ffmpeg` resolves to on `PATH`.
fn resolve_ffmpeg(explicit: Option<String>) -> PathBuf {
    if let Some(path) = explicit.filter(|p| !p.trim().is_empty()) {
        return PathBuf::from(path);
    }

    let bundled = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("ffmpeg")))
        .filter(|candidate| candidate.is_file());

    bundled.unwrap_or_else(|| PathBuf::from("ffmpeg"))
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let base_dir = lookup("TTS_APP_SUPPORT_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| default_base_dir(lookup("HOME")));

        let ffmpeg_path = resolve_ffmpeg(lookup("TTS_FFMPEG_PATH"));

        let ref_cache_limit =
            parse_or(lookup("TTS_REF_CACHE_LIMIT"), defaults.ref_cache_limit).max(1);

        let ref_cache_max_age_secs = parse_or(
            lookup("TTS_REF_CACHE_MAX_AGE_SECS"),
            defaults.ref_cache_max_age_secs,
        );

        let ref_cache_persist =
            parse_flag(lookup("TTS_REF_CACHE_PERSIST"), defaults.ref_cache_persist);

        let conditioning_cache_capacity = parse_or(
            lookup("TTS_CONDITIONING_CACHE_CAPACITY"),
            defaults.conditioning_cache_capacity,
        )
        .max(1);

        let aggressive_cache_clear = parse_flag(
            lookup("TTS_AGGRESSIVE_CACHE_CLEAR"),
            defaults.aggressive_cache_clear,
        );

        let streaming_interval_secs = parse_or(
            lookup("TTS_STREAMING_INTERVAL_SECS"),
            defaults.streaming_interval_secs,
        );
        let streaming_interval_secs =
            if streaming_interval_secs.is_finite() && streaming_interval_secs > 0.0 {
                streaming_interval_secs
            } else {
                defaults.streaming_interval_secs
            };

        let sample_rate = parse_or(lookup("TTS_SAMPLE_RATE"), defaults.sample_rate);

        Self {
            base_dir,
            ffmpeg_path,
            ref_cache_limit,
            ref_cache_max_age_secs,
            ref_cache_persist,
            conditioning_cache_capacity,
            aggressive_cache_clear,
            streaming_interval_secs,
            sample_rate,
        }
    }

    pub fn ref_cache_max_age(&self) -> Duration {
        Duration::from_secs(self.ref_cache_max_age_secs)
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            base_dir: self.base_dir.clone(),
            reference_cache: ReferenceCacheConfig {
                max_entries: self.ref_cache_limit,
                max_age: self.ref_cache_max_age(),
                sample_rate: self.sample_rate,
                persist: self.ref_cache_persist,
            },
            conditioning_capacity: self.conditioning_cache_capacity,
            aggressive_cache_clear: self.aggressive_cache_clear,
            streaming_interval: self.streaming_interval_secs,
        }
    }
}
