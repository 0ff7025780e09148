//! Content-addressed cache of derived files.
//!
//! The cached output of a derivation lives at `<root>/<fingerprint><suffix>`. Outputs are first written to a temporary
//! file inside the root and then renamed into place, so a file at a cache path is always complete. Builds of the same
//! fingerprint are serialized with [claims](Cache::claim).

use std::collections::HashSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use tempfile::{Builder, NamedTempFile};

use crate::fingerprint::Fingerprint;

#[derive(Debug)]
pub struct Cache {
  root: PathBuf,
  suffix: String,
  claims: Mutex<HashSet<Fingerprint>>,
  released: Condvar,
}

impl Cache {
  pub fn new(root: impl Into<PathBuf>, suffix: impl Into<String>) -> Self {
    Self {
      root: root.into(),
      suffix: suffix.into(),
      claims: Mutex::default(),
      released: Condvar::new(),
    }
  }

  #[inline]
  pub fn root(&self) -> &Path { &self.root }
  #[inline]
  pub fn suffix(&self) -> &str { &self.suffix }

  /// Returns the path where the output of the derivation with `fingerprint` is stored.
  #[inline]
  pub fn path_for(&self, fingerprint: &Fingerprint) -> PathBuf {
    self.root.join(format!("{}{}", fingerprint, self.suffix))
  }

  /// Creates the cache root directory and its parents if they do not exist yet.
  pub fn ensure_root(&self) -> Result<(), io::Error> {
    fs::create_dir_all(&self.root)
  }

  /// Claims the exclusive right to build `fingerprint` in this cache, blocking while another thread holds the claim.
  /// Returns the claim, which is released when dropped, and whether this call had to wait.
  ///
  /// A thread that waited should check the cache path again before building, as the previous holder has likely
  /// published the output.
  pub fn claim(&self, fingerprint: &Fingerprint) -> (BuildClaim<'_>, bool) {
    let mut claims = self.lock_claims();
    let mut waited = false;
    while claims.contains(fingerprint) {
      waited = true;
      claims = self.released.wait(claims).unwrap_or_else(PoisonError::into_inner);
    }
    claims.insert(fingerprint.clone());
    (BuildClaim { cache: self, fingerprint: fingerprint.clone() }, waited)
  }

  /// Starts writing a new output into the cache, in a temporary file inside the cache root. The root must exist.
  pub fn begin_write(&self) -> Result<PendingWrite, io::Error> {
    let file = Builder::new().prefix(".partial-").tempfile_in(&self.root)?;
    Ok(PendingWrite { file })
  }

  #[inline]
  fn lock_claims(&self) -> MutexGuard<HashSet<Fingerprint>> {
    self.claims.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// Exclusive right to build a fingerprint. Released on drop, waking up threads waiting in [`Cache::claim`].
#[derive(Debug)]
pub struct BuildClaim<'c> {
  cache: &'c Cache,
  fingerprint: Fingerprint,
}

impl BuildClaim<'_> {
  #[inline]
  pub fn fingerprint(&self) -> &Fingerprint { &self.fingerprint }
}

impl Drop for BuildClaim<'_> {
  fn drop(&mut self) {
    self.cache.lock_claims().remove(&self.fingerprint);
    self.cache.released.notify_all();
  }
}

/// Output being written into the cache. Deleted when dropped without being [committed](Self::commit) or
/// [abandoned](Self::abandon).
#[derive(Debug)]
pub struct PendingWrite {
  file: NamedTempFile,
}

impl PendingWrite {
  /// Path of the temporary file.
  #[inline]
  pub fn path(&self) -> &Path { self.file.path() }

  /// Opens a new handle to the temporary file for writing.
  #[inline]
  pub fn file(&self) -> Result<File, io::Error> { self.file.as_file().try_clone() }

  /// Atomically moves the written output to `destination`, replacing any file there.
  pub fn commit(self, destination: &Path) -> Result<(), io::Error> {
    self.file.persist(destination).map(|_| ()).map_err(|e| e.error)
  }

  /// Keeps the temporary file, for example to inspect partial output of a failed tool, and returns its path.
  pub fn abandon(self) -> Result<PathBuf, io::Error> {
    self.file.keep().map(|(_, path)| path).map_err(|e| e.error)
  }
}
