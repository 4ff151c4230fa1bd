//! WAV helpers: validity probing, duration, and atomic 16-bit PCM writes.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// True when `path` has a `.wav` extension and opens as a WAV container with
/// at least one channel. Any read failure counts as "not a WAV".
pub fn is_readable_wav(path: &Path) -> bool {
    let has_wav_ext = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("wav"))
        .unwrap_or(false);
    if !has_wav_ext {
        return false;
    }

    hound::WavReader::open(path)
        .map(|reader| reader.spec().channels > 0)
        .unwrap_or(false)
}

/// Duration in seconds, or 0.0 if the file can't be read.
pub fn duration_seconds(path: &Path) -> f64 {
    match hound::WavReader::open(path) {
        Ok(reader) => {
            let rate = reader.spec().sample_rate;
            if rate == 0 {
                0.0
            } else {
                reader.duration() as f64 / rate as f64
            }
        }
        Err(_) => 0.0,
    }
}

/// Hidden sibling of `path` that never collides with a real lookup. Keeps the
/// extension so tools that sniff it still pick the right container.
pub fn partial_sibling(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tmp".to_string());
    parent.join(format!(
        ".{}.{}.partial.{}",
        stem,
        uuid::Uuid::new_v4().simple(),
        ext
    ))
}

/// Move a fully written temporary file into place, removing it on failure.
pub fn publish(temp: &Path, target: &Path) -> Result<()> {
    if let Err(err) = fs::rename(temp, target) {
        let _ = fs::remove_file(temp);
        return Err(err.into());
    }
    Ok(())
}

fn write_pcm16(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    const I16_MAX_F32: f32 = i16::MAX as f32;

    let mut writer = hound::WavWriter::create(path, spec)?;
    for &s in samples {
        // Clamp and convert f32 [-1.0, 1.0] -> i16
        writer.write_sample((s.clamp(-1.0, 1.0) * I16_MAX_F32) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Write mono 16-bit PCM to `path`. The data goes to a hidden sibling first and
/// is renamed into place, so `path` only ever holds a complete file.
pub fn write_wav_atomic(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let temp = partial_sibling(path);
    if let Err(err) = write_pcm16(&temp, samples, sample_rate) {
        let _ = fs::remove_file(&temp);
        return Err(err);
    }
    publish(&temp, path)
}

/// Copy `source` to `target` through a partial sibling.
pub fn copy_atomic(source: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let temp = partial_sibling(target);
    if let Err(err) = fs::copy(source, &temp) {
        let _ = fs::remove_file(&temp);
        return Err(err.into());
    }
    publish(&temp, target)
}
