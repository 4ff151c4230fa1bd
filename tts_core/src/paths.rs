//! On-disk layout and output-path contracts.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::Result;

/// Maximum number of characters of input text used in auto-generated names.
pub const FILENAME_MAX_LEN: usize = 20;

/// Directory tree rooted at the worker's base directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoragePaths {
    pub base_dir: PathBuf,
    pub models_dir: PathBuf,
    pub outputs_dir: PathBuf,
    pub voices_dir: PathBuf,
    pub reference_cache_dir: PathBuf,
}

impl StoragePaths {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            models_dir: base_dir.join("models"),
            outputs_dir: base_dir.join("outputs"),
            voices_dir: base_dir.join("voices"),
            reference_cache_dir: base_dir.join("cache").join("normalized_clone_refs"),
            base_dir,
        }
    }

    /// Create every directory of the layout.
    pub fn ensure(&self) -> Result<()> {
        for dir in [
            &self.models_dir,
            &self.outputs_dir,
            &self.voices_dir,
            &self.reference_cache_dir,
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Which flavour of synthesis a request asks for; picks the output subfolder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    Custom,
    Design,
    Clone,
}

impl GenerationMode {
    /// A reference clip means cloning; otherwise a named voice means custom
    /// voice, and no voice at all means the voice is designed from `instruct`.
    pub fn infer(voice: Option<&str>, has_reference: bool) -> Self {
        if has_reference {
            GenerationMode::Clone
        } else if voice.map_or(true, str::is_empty) {
            GenerationMode::Design
        } else {
            GenerationMode::Custom
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GenerationMode::Custom => "custom",
            GenerationMode::Design => "design",
            GenerationMode::Clone => "clone",
        }
    }

    pub fn output_subfolder(self) -> &'static str {
        match self {
            GenerationMode::Custom => "CustomVoice",
            GenerationMode::Design => "VoiceDesign",
            GenerationMode::Clone => "Clones",
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Keep word characters, whitespace and `-`, trim, and turn spaces into `_`.
///
/// `"Test Voice!"` becomes `"Test_Voice"`. May return an empty string.
pub fn sanitize_name(raw: &str) -> String {
    let kept: String = raw
        .chars()
        .filter(|&c| is_word_char(c) || c.is_whitespace() || c == '-')
        .collect();
    kept.trim().replace(' ', "_")
}

/// Short filesystem-safe snippet of the input text, `"audio"` if nothing survives.
fn text_snippet(text: &str) -> String {
    let kept: String = text
        .chars()
        .filter(|&c| is_word_char(c) || c.is_whitespace() || c == '-')
        .take(FILENAME_MAX_LEN)
        .collect();
    let snippet = kept.trim().replace(' ', "_");
    if snippet.is_empty() {
        "audio".to_string()
    } else {
        snippet
    }
}

/// `outputs/<Subfolder>/<HH-MM-SS-micros>_<snippet>.wav`, creating the subfolder.
pub fn auto_output_path(outputs_dir: &Path, mode: GenerationMode, text: &str) -> Result<PathBuf> {
    let save_dir = outputs_dir.join(mode.output_subfolder());
    fs::create_dir_all(&save_dir)?;

    let timestamp = chrono::Local::now().format("%H-%M-%S-%6f");
    Ok(save_dir.join(format!("{}_{}.wav", timestamp, text_snippet(text))))
}

/// Final output path for a generation: the explicit path when given (its
/// parent is created), otherwise an auto-generated one for `mode`.
pub fn resolve_final_output_path(
    explicit: Option<&Path>,
    outputs_dir: &Path,
    mode: GenerationMode,
    text: &str,
) -> Result<PathBuf> {
    match explicit {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            Ok(path.to_path_buf())
        }
        None => auto_output_path(outputs_dir, mode, text),
    }
}

/// Working directory and file stem derived from a final output path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationPaths {
    pub target_dir: PathBuf,
    pub stem: String,
}

impl GenerationPaths {
    /// Falls back to `default_dir` when `final_path` has no parent and to
    /// `"audio"` when it has no stem.
    pub fn derive(final_path: &Path, default_dir: &Path) -> Result<Self> {
        let target_dir = final_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(default_dir)
            .to_path_buf();
        fs::create_dir_all(&target_dir)?;

        let stem = final_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "audio".to_string());

        Ok(Self { target_dir, stem })
    }

    /// `{stem}__chunk_{index:03}.wav` under the working directory.
    pub fn chunk_path(&self, index: usize) -> PathBuf {
        self.target_dir
            .join(format!("{}__chunk_{:03}.wav", self.stem, index))
    }
}
