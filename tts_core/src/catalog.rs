//! Static catalog of known models and speakers, plus on-disk resolution.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::paths::GenerationMode;

/// A model the worker knows how to find under `models/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSpec {
    pub id: &'static str,
    pub name: &'static str,
    pub folder: &'static str,
    pub mode: GenerationMode,
    pub tier: &'static str,
}

pub const MODEL_CATALOG: &[ModelSpec] = &[
    ModelSpec {
        id: "pro_custom",
        name: "Custom Voice (Pro)",
        folder: "Qwen3-TTS-12Hz-1.7B-CustomVoice-8bit",
        mode: GenerationMode::Custom,
        tier: "pro",
    },
    ModelSpec {
        id: "pro_design",
        name: "Voice Design (Pro)",
        folder: "Qwen3-TTS-12Hz-1.7B-VoiceDesign-8bit",
        mode: GenerationMode::Design,
        tier: "pro",
    },
    ModelSpec {
        id: "pro_clone",
        name: "Voice Cloning (Pro)",
        folder: "Qwen3-TTS-12Hz-1.7B-Base-8bit",
        mode: GenerationMode::Clone,
        tier: "pro",
    },
];

/// Built-in speakers by language.
const SPEAKERS: &[(&str, &[&str])] = &[("English", &["ryan", "aiden", "serena", "vivian"])];

pub fn find_model(id: &str) -> Option<&'static ModelSpec> {
    MODEL_CATALOG.iter().find(|spec| spec.id == id)
}

pub fn speaker_map() -> BTreeMap<String, Vec<String>> {
    SPEAKERS
        .iter()
        .map(|(lang, names)| {
            (
                lang.to_string(),
                names.iter().map(|n| n.to_string()).collect(),
            )
        })
        .collect()
}

/// Locate a model folder, descending into a Hugging Face style
/// `snapshots/<revision>` wrapper when one is present.
///
/// Returns `None` when the folder doesn't exist.
pub fn resolve_model_dir(root: &Path) -> Option<PathBuf> {
    if !root.exists() {
        return None;
    }

    let snapshots = root.join("snapshots");
    if snapshots.is_dir() {
        if let Ok(entries) = fs::read_dir(&snapshots) {
            let mut revisions: Vec<PathBuf> = entries
                .filter_map(|e| e.ok())
                .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
                .filter(|e| e.path().is_dir())
                .map(|e| e.path())
                .collect();
            revisions.sort();
            if let Some(first) = revisions.into_iter().next() {
                return Some(first);
            }
        }
    }

    Some(root.to_path_buf())
}

/// Total size in bytes of all files under `dir`. Unreadable entries count as 0.
///
/// File symlinks are followed, so a snapshot whose weights link into
/// `blobs/` reports the size of the blobs. Only real directories are
/// descended into.
pub fn directory_size(dir: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };

    entries
        .filter_map(|e| e.ok())
        .map(|entry| match entry.file_type() {
            Ok(ft) if ft.is_dir() => directory_size(&entry.path()),
            Ok(_) => fs::metadata(entry.path())
                .ok()
                .filter(|m| m.is_file())
                .map(|m| m.len())
                .unwrap_or(0),
            Err(_) => 0,
        })
        .sum()
}

/// Availability report for one catalog entry.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub folder: String,
    pub mode: GenerationMode,
    pub tier: String,
    pub downloaded: bool,
    pub size_bytes: u64,
}

pub fn model_info(models_dir: &Path) -> Vec<ModelInfo> {
    MODEL_CATALOG
        .iter()
        .map(|spec| {
            let path = resolve_model_dir(&models_dir.join(spec.folder));
            ModelInfo {
                id: spec.id.to_string(),
                name: spec.name.to_string(),
                folder: spec.folder.to_string(),
                mode: spec.mode,
                tier: spec.tier.to_string(),
                downloaded: path.is_some(),
                size_bytes: path.as_deref().map(directory_size).unwrap_or(0),
            }
        })
        .collect()
}
