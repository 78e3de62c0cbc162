use crate::crl::error::{CacheDirectoryCreationSnafu, CrlError, DiskCacheWriteSnafu};
use sha2::{Digest, Sha256};
use snafu::ResultExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// On-disk CRL store: one file per URL under a single directory, named by
/// the SHA-256 hex digest of the exact URL string. Files hold the raw DER
/// bytes only; all timing is recomputed from the CRL content at load time.
#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic filesystem-safe file name for a URL.
    pub fn url_digest(url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        let digest = hasher.finalize();
        hex::encode(digest)
    }

    pub fn path_for(&self, url: &str) -> PathBuf {
        self.dir.join(Self::url_digest(url))
    }

    /// Read the cached bytes for a URL. Plain read only; the file's mtime
    /// must not change so the cleanup sweep sees the original write time.
    pub fn read(&self, url: &str) -> Option<Vec<u8>> {
        std::fs::read(self.path_for(url)).ok()
    }

    /// Write bytes for a URL atomically: temp file in the same directory,
    /// tightened to owner-only, then renamed over the target.
    pub fn write_atomic(&self, url: &str, bytes: &[u8]) -> Result<(), CrlError> {
        std::fs::create_dir_all(&self.dir).context(CacheDirectoryCreationSnafu)?;
        let path = self.path_for(url);
        let tmp = self
            .dir
            .join(format!("{}.tmp.{}", Self::url_digest(url), std::process::id()));

        std::fs::write(&tmp, bytes).context(DiskCacheWriteSnafu)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .context(DiskCacheWriteSnafu)?;
        }
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e).context(DiskCacheWriteSnafu);
        }
        Ok(())
    }

    pub fn remove(&self, url: &str) {
        let _ = std::fs::remove_file(self.path_for(url));
    }

    /// Remove every cache file whose mtime is older than `cutoff`.
    /// Returns the number of files removed.
    pub fn remove_older_than(&self, cutoff: SystemTime) -> usize {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return 0;
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let Ok(mtime) = metadata.modified() else {
                continue;
            };
            if mtime < cutoff && std::fs::remove_file(entry.path()).is_ok() {
                removed += 1;
            }
        }
        removed
    }
}
