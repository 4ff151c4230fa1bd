//! Persistent cache of reference clips normalized to canonical WAV.
//!
//! Non-WAV reference audio is converted once per source identity (see
//! [`crate::fingerprint`]) and reused on later requests. The cache directory
//! is bounded by entry count and by age; pruning is the only deletion path
//! besides [`ReferenceAudioCache::clear`].
//!
//! A cached file's *access* time is its recency. Its modification time is
//! left alone so that conditioning keys derived from the normalized file stay
//! stable across hits.

use std::fs::{self, File, FileTimes};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use crate::error::{Result, TtsError};
use crate::fingerprint::FileIdentity;
use crate::paths::sanitize_name;
use crate::wav;

pub const CANONICAL_SAMPLE_RATE: u32 = 24_000;
pub const DEFAULT_REFERENCE_CACHE_LIMIT: usize = 32;
pub const DEFAULT_REFERENCE_MAX_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Converts arbitrary audio into canonical mono 16-bit PCM WAV.
pub trait AudioConverter: Send {
    fn convert(&self, input: &Path, output: &Path, sample_rate: u32) -> Result<()>;
}

/// Shells out to `ffmpeg`.
#[derive(Debug, Clone)]
pub struct FfmpegConverter {
    binary: PathBuf,
}

impl FfmpegConverter {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

impl Default for FfmpegConverter {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl AudioConverter for FfmpegConverter {
    fn convert(&self, input: &Path, output: &Path, sample_rate: u32) -> Result<()> {
        let result = Command::new(&self.binary)
            .arg("-y")
            .arg("-v")
            .arg("error")
            .arg("-i")
            .arg(input)
            .arg("-ar")
            .arg(sample_rate.to_string())
            .arg("-ac")
            .arg("1")
            .arg("-c:a")
            .arg("pcm_s16le")
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .output();

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                warn!("Failed to run {}: {e}", self.binary.display());
                return Err(TtsError::ConversionFailed(format!(
                    "failed to run {}: {e}",
                    self.binary.display()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("ffmpeg failed on {}: {}", input.display(), stderr.trim());
            return Err(TtsError::ConversionFailed(format!(
                "ffmpeg exited with {}",
                output.status
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceCacheConfig {
    pub max_entries: usize,
    pub max_age: Duration,
    pub sample_rate: u32,
    /// When off, conversions go to request-scoped temporary files instead.
    pub persist: bool,
}

impl Default for ReferenceCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_REFERENCE_CACHE_LIMIT,
            max_age: DEFAULT_REFERENCE_MAX_AGE,
            sample_rate: CANONICAL_SAMPLE_RATE,
            persist: true,
        }
    }
}

/// A canonical WAV ready for the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedReference {
    pub path: PathBuf,
    /// Identity of the source file; `None` when the source was already canonical.
    pub source: Option<FileIdentity>,
    pub cache_hit: bool,
    /// The file is request-scoped and must be removed when the request ends.
    pub is_temporary: bool,
}

/// A file currently held by the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub last_access: SystemTime,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub expired: usize,
    pub over_capacity: usize,
}

/// Deletes a request-scoped file when dropped, on every exit path.
#[derive(Debug)]
pub struct TemporaryFile(PathBuf);

impl TemporaryFile {
    pub fn new(path: PathBuf) -> Self {
        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TemporaryFile {
    fn drop(&mut self) {
        if self.0.exists() {
            if let Err(e) = fs::remove_file(&self.0) {
                debug!("Could not remove temporary file {}: {e}", self.0.display());
            }
        }
    }
}

fn touch_access_time(path: &Path) {
    let result = File::options()
        .write(true)
        .open(path)
        .and_then(|f| f.set_times(FileTimes::new().set_accessed(SystemTime::now())));
    if let Err(e) = result {
        debug!("Could not refresh access time of {}: {e}", path.display());
    }
}

fn last_access(meta: &fs::Metadata) -> Option<SystemTime> {
    meta.accessed().or_else(|_| meta.modified()).ok()
}

pub struct ReferenceAudioCache {
    dir: PathBuf,
    config: ReferenceCacheConfig,
    converter: Box<dyn AudioConverter>,
}

impl ReferenceAudioCache {
    /// A `max_entries` of zero is treated as one.
    pub fn new(
        dir: impl Into<PathBuf>,
        mut config: ReferenceCacheConfig,
        converter: Box<dyn AudioConverter>,
    ) -> Self {
        config.max_entries = config.max_entries.max(1);
        Self {
            dir: dir.into(),
            config,
            converter,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn set_dir(&mut self, dir: impl Into<PathBuf>) {
        self.dir = dir.into();
    }

    pub fn config(&self) -> &ReferenceCacheConfig {
        &self.config
    }

    /// `<sanitized stem>_<short fingerprint>.wav` inside the cache directory.
    pub fn cache_path_for(&self, identity: &FileIdentity) -> PathBuf {
        let stem = identity
            .resolved_path
            .file_stem()
            .map(|s| sanitize_name(&s.to_string_lossy()))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "reference".to_string());
        self.dir
            .join(format!("{}_{}.wav", stem, identity.short_fingerprint()))
    }

    /// Convert `source` to canonical WAV at `target`. The conversion is written
    /// to a hidden sibling and only renamed onto `target` once it succeeded.
    pub fn convert_to(&self, source: &Path, target: &Path) -> Result<()> {
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let partial = wav::partial_sibling(target);
        if let Err(err) = self
            .converter
            .convert(source, &partial, self.config.sample_rate)
        {
            let _ = fs::remove_file(&partial);
            return Err(err);
        }
        wav::publish(&partial, target)
    }

    /// Return a canonical WAV for `source`.
    ///
    /// Readable WAV files are returned unchanged and never cached. Anything
    /// else is looked up by fingerprint, converting on a miss.
    pub fn normalize(&self, source: &Path) -> Result<NormalizedReference> {
        if !source.exists() {
            return Err(TtsError::not_found(format!(
                "Reference audio not found: {}",
                source.display()
            )));
        }

        if wav::is_readable_wav(source) {
            return Ok(NormalizedReference {
                path: source.to_path_buf(),
                source: None,
                cache_hit: false,
                is_temporary: false,
            });
        }

        let identity = FileIdentity::of(source)?;

        if !self.config.persist {
            let temp = std::env::temp_dir().join(format!(
                "tts-ref-{}.wav",
                uuid::Uuid::new_v4().simple()
            ));
            self.convert_to(source, &temp)?;
            return Ok(NormalizedReference {
                path: temp,
                source: Some(identity),
                cache_hit: false,
                is_temporary: true,
            });
        }

        let cached = self.cache_path_for(&identity);
        if cached.is_file() {
            debug!("Reference cache hit: {}", cached.display());
            touch_access_time(&cached);
            return Ok(NormalizedReference {
                path: cached,
                source: Some(identity),
                cache_hit: true,
                is_temporary: false,
            });
        }

        info!("Normalizing {} -> {}", source.display(), cached.display());
        self.convert_to(source, &cached)?;
        let report = self.prune_except(Some(&cached));
        if report.expired + report.over_capacity > 0 {
            debug!(
                "Pruned {} expired and {} surplus reference entries",
                report.expired, report.over_capacity
            );
        }

        Ok(NormalizedReference {
            path: cached,
            source: Some(identity),
            cache_hit: false,
            is_temporary: false,
        })
    }

    /// All `.wav` files in the cache directory, most recently accessed first.
    pub fn entries(&self) -> Vec<CacheEntry> {
        let Ok(read_dir) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };

        let mut entries: Vec<CacheEntry> = read_dir
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.extension()
                    .map(|ext| ext.eq_ignore_ascii_case("wav"))
                    .unwrap_or(false)
            })
            .filter_map(|path| {
                let meta = fs::metadata(&path).ok()?;
                if !meta.is_file() {
                    return None;
                }
                Some(CacheEntry {
                    last_access: last_access(&meta)?,
                    size_bytes: meta.len(),
                    path,
                })
            })
            .collect();

        entries.sort_by(|a, b| b.last_access.cmp(&a.last_access));
        entries
    }

    /// Drop entries older than the maximum age, then the least recently
    /// accessed entries beyond capacity. Best effort: deletion failures are
    /// ignored.
    pub fn prune(&self) -> PruneReport {
        self.prune_except(None)
    }

    /// Like [`Self::prune`], but never deletes `keep`; it still counts
    /// towards capacity.
    fn prune_except(&self, keep: Option<&Path>) -> PruneReport {
        let mut report = PruneReport::default();
        let now = SystemTime::now();
        let kept = |entry: &CacheEntry| keep == Some(entry.path.as_path());

        for entry in self.entries() {
            if kept(&entry) {
                continue;
            }
            let age = now.duration_since(entry.last_access).unwrap_or_default();
            if age > self.config.max_age && fs::remove_file(&entry.path).is_ok() {
                debug!("Removed expired reference {}", entry.path.display());
                report.expired += 1;
            }
        }

        let mut remaining = self.entries();
        // the protected entry sorts first so it always fits in the budget
        remaining.sort_by_key(|entry| !kept(entry));
        if remaining.len() > self.config.max_entries {
            for entry in &remaining[self.config.max_entries..] {
                if fs::remove_file(&entry.path).is_ok() {
                    debug!("Evicted reference {}", entry.path.display());
                    report.over_capacity += 1;
                }
            }
        }

        report
    }

    /// Remove every cached file. Returns how many were deleted.
    pub fn clear(&self) -> usize {
        self.entries()
            .into_iter()
            .filter(|entry| fs::remove_file(&entry.path).is_ok())
            .count()
    }
}
