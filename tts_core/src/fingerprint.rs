//! Stat-based file identity shared by the reference and conditioning caches.
//!
//! A file is identified by its resolved path, size and modification time
//! rather than by hashing its contents. An in-place edit that keeps both size
//! and mtime is invisible here.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};

use crate::error::Result;

/// Number of hex characters of the digest used in cache file names.
pub const SHORT_FINGERPRINT_LEN: usize = 16;

/// The stat triple a fingerprint is derived from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    pub resolved_path: PathBuf,
    pub size_bytes: u64,
    pub modified_nanos: u128,
}

impl FileIdentity {
    /// Stat `path`, following symlinks to the real file.
    pub fn of(path: &Path) -> Result<Self> {
        let resolved_path = fs::canonicalize(path)?;
        let meta = fs::metadata(&resolved_path)?;
        let modified_nanos = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);

        Ok(Self {
            resolved_path,
            size_bytes: meta.len(),
            modified_nanos,
        })
    }

    /// Full SHA-256 hex digest of `{path}:{size}:{mtime_ns}`.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(
            format!(
                "{}:{}:{}",
                self.resolved_path.display(),
                self.size_bytes,
                self.modified_nanos
            )
            .as_bytes(),
        );
        hex::encode(hasher.finalize())
    }

    /// Truncated digest suitable for file names.
    pub fn short_fingerprint(&self) -> String {
        let mut digest = self.fingerprint();
        digest.truncate(SHORT_FINGERPRINT_LEN);
        digest
    }
}

/// Convenience wrapper: fingerprint of the file at `path`.
pub fn fingerprint(path: &Path) -> Result<String> {
    Ok(FileIdentity::of(path)?.fingerprint())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::time::{Duration, SystemTime};

    #[test]
    fn test_fingerprint_is_stable_for_unchanged_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp3");
        fs::write(&path, b"not really audio").unwrap();

        let first = fingerprint(&path).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let second = fingerprint(&path).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn test_fingerprint_changes_with_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp3");
        fs::write(&path, b"abc").unwrap();
        let mtime = fs::metadata(&path).unwrap().modified().unwrap();
        let before = fingerprint(&path).unwrap();

        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"def").unwrap();
        file.set_modified(mtime).unwrap();
        drop(file);

        assert_ne!(before, fingerprint(&path).unwrap());
    }

    #[test]
    fn test_fingerprint_changes_with_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp3");
        fs::write(&path, b"abc").unwrap();
        let before = fingerprint(&path).unwrap();

        let file = File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(3600))
            .unwrap();
        drop(file);

        assert_ne!(before, fingerprint(&path).unwrap());
    }

    #[test]
    fn test_same_file_through_different_paths_matches() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        let path = sub.join("clip.mp3");
        fs::write(&path, b"abc").unwrap();

        let indirect = dir.path().join("sub").join("..").join("sub").join("clip.mp3");
        assert_eq!(fingerprint(&path).unwrap(), fingerprint(&indirect).unwrap());
    }

    #[test]
    fn test_short_fingerprint_is_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp3");
        fs::write(&path, b"abc").unwrap();

        let identity = FileIdentity::of(&path).unwrap();
        let short = identity.short_fingerprint();
        assert_eq!(short.len(), SHORT_FINGERPRINT_LEN);
        assert!(identity.fingerprint().starts_with(&short));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileIdentity::of(&dir.path().join("nope.wav")).is_err());
    }
}
