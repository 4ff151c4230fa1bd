//! Bounded LRU cache of prepared conditioning state.
//!
//! Entries are keyed by the loaded model's path plus the stat identity of
//! the normalized reference and the trimmed transcript. They are only valid
//! for the model instance that produced them, so the lifecycle manager clears
//! the whole cache whenever the resident model changes.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use lru::LruCache;
use tracing::debug;

use crate::engine::ConditioningContext;
use crate::error::Result;
use crate::fingerprint::FileIdentity;
use crate::lifecycle::ModelHandle;

pub const DEFAULT_CONDITIONING_CAPACITY: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConditioningKey {
    pub model_path: PathBuf,
    pub reference: FileIdentity,
    pub transcript: String,
}

impl ConditioningKey {
    pub fn new(model_path: &Path, reference_wav: &Path, transcript: &str) -> Result<Self> {
        Ok(Self {
            model_path: model_path.to_path_buf(),
            reference: FileIdentity::of(reference_wav)?,
            transcript: transcript.trim().to_string(),
        })
    }
}

/// Result of a successful lookup-or-prepare.
#[derive(Debug, Clone)]
pub struct PreparedConditioning {
    pub context: ConditioningContext,
    pub cache_hit: bool,
}

#[derive(Debug)]
pub struct ConditioningCache {
    entries: LruCache<ConditioningKey, ConditioningContext>,
}

impl ConditioningCache {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            debug!("Clearing {} cached conditioning entries", self.entries.len());
        }
        self.entries.clear();
    }

    /// Look up `key`, promoting it to most-recently-used on a hit.
    pub fn get(&mut self, key: &ConditioningKey) -> Option<ConditioningContext> {
        self.entries.get(key).cloned()
    }

    /// Insert or replace `key` as most-recently-used. Returns the key evicted
    /// to stay within capacity, if any.
    pub fn insert(
        &mut self,
        key: ConditioningKey,
        context: ConditioningContext,
    ) -> Option<ConditioningKey> {
        match self.entries.push(key.clone(), context) {
            Some((old_key, _)) if old_key != key => Some(old_key),
            _ => None,
        }
    }

    /// Keys from most- to least-recently-used.
    pub fn keys(&self) -> impl Iterator<Item = &ConditioningKey> {
        self.entries.iter().map(|(k, _)| k)
    }

    /// Fetch cached conditioning for `reference_wav` + `transcript`, or prepare
    /// it with the loaded model.
    ///
    /// Returns `Ok(None)` when prepared conditioning doesn't apply: no model,
    /// a model without support for it, or an empty transcript. Fresh results
    /// are only stored when `allow_persist` is set; a reference that lives in
    /// a request-scoped temporary file can never be looked up again.
    pub fn get_or_prepare(
        &mut self,
        model: Option<&ModelHandle>,
        reference_wav: &Path,
        transcript: Option<&str>,
        allow_persist: bool,
    ) -> Result<Option<PreparedConditioning>> {
        let Some(handle) = model else {
            return Ok(None);
        };
        if !handle.model().supports_prepared_conditioning() {
            return Ok(None);
        }
        let transcript = match transcript.map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => return Ok(None),
        };

        let key = ConditioningKey::new(handle.path(), reference_wav, transcript)?;
        if let Some(context) = self.get(&key) {
            debug!("Conditioning cache hit for {}", reference_wav.display());
            return Ok(Some(PreparedConditioning {
                context,
                cache_hit: true,
            }));
        }

        debug!("Conditioning cache miss for {}", reference_wav.display());
        let context = handle
            .model()
            .prepare_conditioning(reference_wav, transcript)?;
        if allow_persist {
            if let Some(evicted) = self.insert(key, context.clone()) {
                debug!(
                    "Evicted conditioning for {}",
                    evicted.reference.resolved_path.display()
                );
            }
        }

        Ok(Some(PreparedConditioning {
            context,
            cache_hit: false,
        }))
    }
}

impl Default for ConditioningCache {
    fn default() -> Self {
        Self::new(DEFAULT_CONDITIONING_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{write_test_wav, ScriptedEngine};
    use crate::engine::SynthesisEngine;
    use std::fs;

    fn key(dir: &Path, name: &str) -> ConditioningKey {
        let path = dir.join(name);
        if !path.exists() {
            fs::write(&path, name.as_bytes()).unwrap();
        }
        ConditioningKey::new(Path::new("/models/a"), &path, "hello").unwrap()
    }

    fn handle(engine: &ScriptedEngine, path: &str) -> ModelHandle {
        ModelHandle::new(engine.load(Path::new(path)).unwrap(), PathBuf::from(path))
    }

    #[test]
    fn test_capacity_is_never_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ConditioningCache::new(3);

        for i in 0..10 {
            cache.insert(key(dir.path(), &format!("r{i}")), ConditioningContext::new(i));
            assert!(cache.len() <= 3);
        }
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_insert_beyond_capacity_evicts_lru() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ConditioningCache::new(2);
        let a = key(dir.path(), "a");
        let b = key(dir.path(), "b");
        let c = key(dir.path(), "c");

        assert!(cache.insert(a.clone(), ConditioningContext::new(1)).is_none());
        assert!(cache.insert(b.clone(), ConditioningContext::new(2)).is_none());
        assert_eq!(cache.insert(c.clone(), ConditioningContext::new(3)), Some(a.clone()));

        assert!(cache.get(&a).is_none());
        assert!(cache.get(&b).is_some());
        assert!(cache.get(&c).is_some());
    }

    #[test]
    fn test_get_promotes_without_changing_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ConditioningCache::new(2);
        let a = key(dir.path(), "a");
        let b = key(dir.path(), "b");
        let c = key(dir.path(), "c");
        cache.insert(a.clone(), ConditioningContext::new(1));
        cache.insert(b.clone(), ConditioningContext::new(2));

        assert!(cache.get(&a).is_some());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.keys().next(), Some(&a));

        // b is now least recently used
        assert_eq!(cache.insert(c, ConditioningContext::new(3)), Some(b));
    }

    #[test]
    fn test_reinsert_replaces_value_and_refreshes() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ConditioningCache::new(2);
        let a = key(dir.path(), "a");
        let b = key(dir.path(), "b");
        cache.insert(a.clone(), ConditioningContext::new(1));
        cache.insert(b.clone(), ConditioningContext::new(2));

        assert!(cache.insert(a.clone(), ConditioningContext::new(10)).is_none());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.keys().next(), Some(&a));
        assert_eq!(cache.get(&a).unwrap().downcast_ref::<i32>(), Some(&10));
    }

    #[test]
    fn test_key_trims_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.wav");
        fs::write(&path, b"x").unwrap();

        let padded = ConditioningKey::new(Path::new("/m"), &path, "  hi \n").unwrap();
        let plain = ConditioningKey::new(Path::new("/m"), &path, "hi").unwrap();
        assert_eq!(padded, plain);
    }

    #[test]
    fn test_get_or_prepare_not_applicable() {
        let dir = tempfile::tempdir().unwrap();
        let reference = dir.path().join("ref.wav");
        write_test_wav(&reference, 0.1, 24_000);
        let mut cache = ConditioningCache::default();

        assert!(cache
            .get_or_prepare(None, &reference, Some("hello"), true)
            .unwrap()
            .is_none());

        let engine = ScriptedEngine::new();
        let loaded = handle(&engine, "/models/clone");
        assert!(cache
            .get_or_prepare(Some(&loaded), &reference, Some("   "), true)
            .unwrap()
            .is_none());
        assert!(cache
            .get_or_prepare(Some(&loaded), &reference, None, true)
            .unwrap()
            .is_none());

        let plain = ScriptedEngine::new().without_conditioning();
        let loaded = handle(&plain, "/models/custom");
        assert!(cache
            .get_or_prepare(Some(&loaded), &reference, Some("hello"), true)
            .unwrap()
            .is_none());
        assert_eq!(engine.stats().preparations(), 0);
    }

    #[test]
    fn test_get_or_prepare_hits_after_miss() {
        let dir = tempfile::tempdir().unwrap();
        let reference = dir.path().join("ref.wav");
        write_test_wav(&reference, 0.1, 24_000);
        let engine = ScriptedEngine::new();
        let loaded = handle(&engine, "/models/clone");
        let mut cache = ConditioningCache::default();

        let first = cache
            .get_or_prepare(Some(&loaded), &reference, Some("hello"), true)
            .unwrap()
            .unwrap();
        let second = cache
            .get_or_prepare(Some(&loaded), &reference, Some("hello "), true)
            .unwrap()
            .unwrap();

        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert!(first.context.ptr_eq(&second.context));
        assert_eq!(engine.stats().preparations(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_get_or_prepare_without_persist_does_not_insert() {
        let dir = tempfile::tempdir().unwrap();
        let reference = dir.path().join("ref.wav");
        write_test_wav(&reference, 0.1, 24_000);
        let engine = ScriptedEngine::new();
        let loaded = handle(&engine, "/models/clone");
        let mut cache = ConditioningCache::default();

        for _ in 0..2 {
            let prepared = cache
                .get_or_prepare(Some(&loaded), &reference, Some("hello"), false)
                .unwrap()
                .unwrap();
            assert!(!prepared.cache_hit);
        }
        assert!(cache.is_empty());
        assert_eq!(engine.stats().preparations(), 2);
    }

    #[test]
    fn test_zero_capacity_means_one() {
        assert_eq!(ConditioningCache::new(0).capacity(), 1);
    }
}
