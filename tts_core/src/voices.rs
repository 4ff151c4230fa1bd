//! Enrolled voices: `<name>.wav` plus an optional `<name>.txt` transcript.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::error::{Result, TtsError};
use crate::paths::sanitize_name;
use crate::wav;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoiceEntry {
    pub name: String,
    pub has_transcript: bool,
    pub wav_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct VoiceStore {
    dir: PathBuf,
}

fn safe_voice_name(name: &str) -> Result<String> {
    let safe = sanitize_name(name);
    if safe.is_empty() {
        return Err(TtsError::invalid("Invalid voice name"));
    }
    Ok(safe)
}

impl VoiceStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn set_dir(&mut self, dir: impl Into<PathBuf>) {
        self.dir = dir.into();
    }

    fn wav_path(&self, safe_name: &str) -> PathBuf {
        self.dir.join(format!("{safe_name}.wav"))
    }

    fn transcript_path(&self, safe_name: &str) -> PathBuf {
        self.dir.join(format!("{safe_name}.txt"))
    }

    /// Voices sorted by name. A missing directory lists as empty.
    pub fn list(&self) -> Result<Vec<VoiceEntry>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut voices: Vec<VoiceEntry> = fs::read_dir(&self.dir)?
            .filter_map(|e| e.ok())
            .filter_map(|entry| {
                let file_name = entry.file_name().to_string_lossy().into_owned();
                let name = file_name.strip_suffix(".wav")?;
                if name.starts_with('.') {
                    return None;
                }
                Some(VoiceEntry {
                    has_transcript: self.transcript_path(name).exists(),
                    wav_path: entry.path(),
                    name: name.to_string(),
                })
            })
            .collect();

        voices.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(voices)
    }

    /// Store a copy of the canonical WAV at `audio` under the sanitized
    /// `name`. Without a transcript any existing sidecar is removed so it
    /// can't describe the new audio.
    pub fn enroll(&self, name: &str, audio: &Path, transcript: Option<&str>) -> Result<VoiceEntry> {
        let safe = safe_voice_name(name)?;
        fs::create_dir_all(&self.dir)?;

        let wav_path = self.wav_path(&safe);
        wav::copy_atomic(audio, &wav_path)?;

        let txt_path = self.transcript_path(&safe);
        let has_transcript = match transcript.filter(|t| !t.is_empty()) {
            Some(text) => {
                fs::write(&txt_path, text)?;
                true
            }
            None => {
                if txt_path.exists() {
                    fs::remove_file(&txt_path)?;
                }
                false
            }
        };

        info!("Enrolled voice {safe}");
        Ok(VoiceEntry {
            name: safe,
            has_transcript,
            wav_path,
        })
    }

    /// Remove a voice and its transcript. Returns whether the audio existed.
    pub fn delete(&self, name: &str) -> Result<bool> {
        let safe = safe_voice_name(name)?;

        let wav_path = self.wav_path(&safe);
        let existed = wav_path.exists();
        if existed {
            fs::remove_file(&wav_path)?;
        }
        let txt_path = self.transcript_path(&safe);
        if txt_path.exists() {
            fs::remove_file(&txt_path)?;
        }

        if existed {
            info!("Deleted voice {safe}");
        }
        Ok(existed)
    }
}
