use std::collections::HashMap;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::artifact::{Artifact, ArtifactId, ArtifactStatus, InvalidArtifact};

/// Metadata store holding [`Artifact`] records.
///
/// The resolver reads artifacts through this trait and persists the only mutations it makes: status transitions, and
/// attaching a materialized file. Implementations must be safe to call from several threads when a resolver is shared
/// between workers, which is why all methods take `&self`.
pub trait MetadataStore {
  /// Gets the current record of artifact `id`.
  fn artifact(&self, id: &ArtifactId) -> Result<Artifact, StoreError>;
  /// Persists `status` for artifact `id`.
  fn set_status(&self, id: &ArtifactId, status: ArtifactStatus) -> Result<(), StoreError>;
  /// Persists that artifact `id` is materialized at `path` with `checksum`, and sets its status to
  /// [`ArtifactStatus::Ready`].
  fn set_materialized(&self, id: &ArtifactId, path: &Path, checksum: &str) -> Result<(), StoreError>;
}

impl<S: MetadataStore + ?Sized> MetadataStore for &S {
  #[inline]
  fn artifact(&self, id: &ArtifactId) -> Result<Artifact, StoreError> { (**self).artifact(id) }
  #[inline]
  fn set_status(&self, id: &ArtifactId, status: ArtifactStatus) -> Result<(), StoreError> {
    (**self).set_status(id, status)
  }
  #[inline]
  fn set_materialized(&self, id: &ArtifactId, path: &Path, checksum: &str) -> Result<(), StoreError> {
    (**self).set_materialized(id, path, checksum)
  }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("unknown artifact '{0}'")]
  UnknownArtifact(ArtifactId),
  #[error("metadata store failure: {0}")]
  Backend(#[source] Box<dyn Error + Send + Sync>),
}


/// Thread-safe in-memory [`MetadataStore`].
#[derive(Default, Debug)]
pub struct InMemoryStore {
  artifacts: Mutex<HashMap<ArtifactId, Artifact>>,
}

impl InMemoryStore {
  #[inline]
  pub fn new() -> Self { Self::default() }

  /// Inserts `artifact` after validating it, replacing any artifact with the same id.
  pub fn insert(&self, artifact: Artifact) -> Result<(), InvalidArtifact> {
    artifact.validate()?;
    self.lock().insert(artifact.id.clone(), artifact);
    Ok(())
  }

  /// Inserts all `artifacts`, stopping at the first invalid one.
  pub fn insert_all(&self, artifacts: impl IntoIterator<Item=Artifact>) -> Result<(), InvalidArtifact> {
    for artifact in artifacts {
      self.insert(artifact)?;
    }
    Ok(())
  }

  /// Gets a copy of artifact `id`, or `None` if it does not exist.
  #[inline]
  pub fn get(&self, id: &ArtifactId) -> Option<Artifact> { self.lock().get(id).cloned() }

  /// Gets the status of artifact `id`, or `None` if it does not exist.
  #[inline]
  pub fn status(&self, id: &ArtifactId) -> Option<ArtifactStatus> { self.lock().get(id).map(|a| a.status) }

  /// Gets the attached file path of artifact `id`, or `None` if it does not exist or has no file.
  #[inline]
  pub fn file_path(&self, id: &ArtifactId) -> Option<PathBuf> { self.lock().get(id).and_then(|a| a.file_path.clone()) }

  /// Returns the ids of artifacts that list `id` as an input, sorted.
  pub fn outputs_of(&self, id: &ArtifactId) -> Vec<ArtifactId> {
    let mut outputs: Vec<_> = self.lock()
      .values()
      .filter(|a| a.inputs.contains(id))
      .map(|a| a.id.clone())
      .collect();
    outputs.sort();
    outputs
  }

  #[inline]
  fn lock(&self) -> MutexGuard<HashMap<ArtifactId, Artifact>> {
    // Poisoning is ignored: every update is a single assignment under the lock.
    self.artifacts.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn update(&self, id: &ArtifactId, f: impl FnOnce(&mut Artifact)) -> Result<(), StoreError> {
    let mut artifacts = self.lock();
    let artifact = artifacts.get_mut(id).ok_or_else(|| StoreError::UnknownArtifact(id.clone()))?;
    f(artifact);
    Ok(())
  }
}

impl MetadataStore for InMemoryStore {
  fn artifact(&self, id: &ArtifactId) -> Result<Artifact, StoreError> {
    self.get(id).ok_or_else(|| StoreError::UnknownArtifact(id.clone()))
  }

  fn set_status(&self, id: &ArtifactId, status: ArtifactStatus) -> Result<(), StoreError> {
    self.update(id, |a| a.status = status)
  }

  fn set_materialized(&self, id: &ArtifactId, path: &Path, checksum: &str) -> Result<(), StoreError> {
    self.update(id, |a| {
      a.file_path = Some(path.to_path_buf());
      a.checksum = Some(checksum.to_string());
      a.status = ArtifactStatus::Ready;
    })
  }
}
