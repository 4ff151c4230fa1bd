//! Ownership of the single resident model.
//!
//! State machine: `Unloaded -> Loading -> Loaded -> Unloaded`, re-entrant as
//! `Loaded -> Loading -> Loaded` when a different model is requested. Any
//! change of the resident model clears the conditioning cache in the same
//! transition, so no cached conditioning can outlive the model that made it.

use std::fmt;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use anyhow::anyhow;

use serde::Serialize;
use tracing::{info, warn};

use crate::catalog;
use crate::conditioning::{ConditioningCache, PreparedConditioning};
use crate::engine::{LoadedModel, SynthesisEngine};
use crate::error::{Result, TtsError};
use crate::events::EventSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Unloaded,
    Loading,
    Loaded,
}

/// The loaded model and the resolved path it came from.
pub struct ModelHandle {
    model: Box<dyn LoadedModel>,
    path: PathBuf,
}

impl ModelHandle {
    pub fn new(model: Box<dyn LoadedModel>, path: PathBuf) -> Self {
        Self { model, path }
    }

    pub fn model(&self) -> &dyn LoadedModel {
        self.model.as_ref()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("model", &"<LoadedModel>")
            .field("path", &self.path)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadOutcome {
    pub model_path: PathBuf,
    /// The requested model was already resident; nothing was reloaded.
    pub cached: bool,
}

/// Map a catalog id or an explicit path to an existing model folder.
///
/// An explicit path wins over `model_id`.
pub fn resolve_model_path(
    models_dir: &Path,
    model_id: Option<&str>,
    model_path: Option<&Path>,
) -> Result<PathBuf> {
    if let Some(path) = model_path {
        return catalog::resolve_model_dir(path).ok_or_else(|| {
            TtsError::not_found(format!("Model not found on disk: {}", path.display()))
        });
    }

    let Some(id) = model_id else {
        return Err(TtsError::invalid("Must provide model_id or model_path"));
    };
    let spec = catalog::find_model(id)
        .ok_or_else(|| TtsError::invalid(format!("Unknown model_id: {id}")))?;

    catalog::resolve_model_dir(&models_dir.join(spec.folder))
        .ok_or_else(|| TtsError::not_found(format!("Model not found on disk: {}", spec.folder)))
}

pub struct ModelLifecycle {
    engine: Option<Box<dyn SynthesisEngine>>,
    current: Option<ModelHandle>,
    state: LifecycleState,
    conditioning: ConditioningCache,
}

impl ModelLifecycle {
    pub fn new(conditioning_capacity: usize) -> Self {
        Self {
            engine: None,
            current: None,
            state: LifecycleState::Unloaded,
            conditioning: ConditioningCache::new(conditioning_capacity),
        }
    }

    /// Second initialization phase: make an engine available for loads.
    pub fn attach_engine(&mut self, engine: Box<dyn SynthesisEngine>) {
        self.engine = Some(engine);
    }

    pub fn has_engine(&self) -> bool {
        self.engine.is_some()
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn current(&self) -> Option<&ModelHandle> {
        self.current.as_ref()
    }

    pub fn loaded_path(&self) -> Option<&Path> {
        self.current.as_ref().map(ModelHandle::path)
    }

    pub fn conditioning(&self) -> &ConditioningCache {
        &self.conditioning
    }

    /// Load the model at `path`.
    ///
    /// If exactly this model is already resident, returns `cached: true`
    /// without touching the engine or the conditioning cache. Otherwise the
    /// resident model is released first (clearing the conditioning cache) to
    /// keep peak memory at one model.
    pub fn load(&mut self, path: &Path, events: &mut dyn EventSink) -> Result<LoadOutcome> {
        let resolved = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

        if self.loaded_path() == Some(resolved.as_path()) {
            info!("Model already loaded from {}", resolved.display());
            return Ok(LoadOutcome {
                model_path: resolved,
                cached: true,
            });
        }

        let Some(engine) = self.engine.as_ref() else {
            return Err(TtsError::EngineUnavailable);
        };

        if let Some(previous) = self.current.take() {
            info!("Releasing model {}", previous.path().display());
            self.conditioning.clear();
        }

        self.state = LifecycleState::Loading;
        events.progress(10, "Loading model...");
        info!("Loading model from {}", resolved.display());

        let loaded = panic::catch_unwind(AssertUnwindSafe(|| engine.load(&resolved)))
            .unwrap_or_else(|_| Err(anyhow!("engine panicked while loading")));
        let model = match loaded {
            Ok(model) => model,
            Err(err) => {
                warn!("Model load failed for {}: {err:#}", resolved.display());
                self.state = LifecycleState::Unloaded;
                return Err(TtsError::Engine(err));
            }
        };

        self.current = Some(ModelHandle::new(model, resolved.clone()));
        self.state = LifecycleState::Loaded;
        events.progress(100, "Model loaded");

        Ok(LoadOutcome {
            model_path: resolved,
            cached: false,
        })
    }

    /// Release the resident model, if any. Always clears the conditioning cache.
    pub fn unload(&mut self) {
        if let Some(previous) = self.current.take() {
            info!("Unloaded model {}", previous.path().display());
        }
        self.conditioning.clear();
        self.state = LifecycleState::Unloaded;
    }

    /// Prepared conditioning for the resident model; see
    /// [`ConditioningCache::get_or_prepare`].
    pub fn prepare_conditioning(
        &mut self,
        reference_wav: &Path,
        transcript: Option<&str>,
        allow_persist: bool,
    ) -> Result<Option<PreparedConditioning>> {
        self.conditioning.get_or_prepare(
            self.current.as_ref(),
            reference_wav,
            transcript,
            allow_persist,
        )
    }

    pub fn clear_conditioning(&mut self) {
        self.conditioning.clear();
    }
}

impl fmt::Debug for ModelLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelLifecycle")
            .field("engine_attached", &self.engine.is_some())
            .field("current", &self.current)
            .field("state", &self.state)
            .field("conditioning_entries", &self.conditioning.len())
            .finish()
    }
}
