use std::path::Path;

use crate::artifact::{ArtifactId, ArtifactStatus};
use crate::error::PullError;
use crate::fingerprint::Fingerprint;
use crate::runner::{ToolFailure, ToolInvocation};

pub mod writing;
pub mod event;

/// Resolution event tracker. Can be used to implement logging, event tracing, progress tracking, metrics, etc.
///
/// Events of nested pulls (inputs being materialized) are reported between the `pull_start` and `pull_end` of the
/// artifact that requires them.
#[allow(unused_variables)]
pub trait Tracker {
  /// Start: pull `artifact`.
  #[inline]
  fn pull_start(&mut self, artifact: &ArtifactId) {}
  /// End: pulled `artifact`, resulting in the path of its materialized file or an error.
  #[inline]
  fn pull_end(&mut self, artifact: &ArtifactId, result: Result<&Path, &PullError>) {}

  /// `artifact` already has an existing file at `path`.
  #[inline]
  fn source_found(&mut self, artifact: &ArtifactId, path: &Path) {}
  /// The derivation of `artifact` with `fingerprint` was found in the cache at `path`.
  #[inline]
  fn cache_hit(&mut self, artifact: &ArtifactId, fingerprint: &Fingerprint, path: &Path) {}
  /// Another worker is building `fingerprint`; waiting for it to finish before deriving `artifact`.
  #[inline]
  fn build_wait(&mut self, artifact: &ArtifactId, fingerprint: &Fingerprint) {}
  /// The status of `artifact` was persisted as `status`.
  #[inline]
  fn status_change(&mut self, artifact: &ArtifactId, status: ArtifactStatus) {}

  /// Start: execute `invocation` to derive `artifact` with `fingerprint`.
  #[inline]
  fn execute_start(&mut self, artifact: &ArtifactId, fingerprint: &Fingerprint, invocation: &ToolInvocation) {}
  /// End: executed the tool deriving `artifact` with `fingerprint`, resulting in the cache path of its output or a
  /// failure.
  #[inline]
  fn execute_end(&mut self, artifact: &ArtifactId, fingerprint: &Fingerprint, result: Result<&Path, &ToolFailure>) {}
}

/// Implement [`Tracker`] for `()` that does nothing.
impl Tracker for () {}

/// A [`Tracker`] that forwards events to two [`Tracker`]s.
#[derive(Default, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug)]
pub struct CompositeTracker<A1, A2>(pub A1, pub A2);
impl<A1, A2> CompositeTracker<A1, A2> {
  pub fn new(tracker_1: A1, tracker_2: A2) -> Self { Self(tracker_1, tracker_2) }
}
impl<A1: Tracker, A2: Tracker> Tracker for CompositeTracker<A1, A2> {
  #[inline]
  fn pull_start(&mut self, artifact: &ArtifactId) {
    self.0.pull_start(artifact);
    self.1.pull_start(artifact);
  }
  #[inline]
  fn pull_end(&mut self, artifact: &ArtifactId, result: Result<&Path, &PullError>) {
    self.0.pull_end(artifact, result);
    self.1.pull_end(artifact, result);
  }

  #[inline]
  fn source_found(&mut self, artifact: &ArtifactId, path: &Path) {
    self.0.source_found(artifact, path);
    self.1.source_found(artifact, path);
  }
  #[inline]
  fn cache_hit(&mut self, artifact: &ArtifactId, fingerprint: &Fingerprint, path: &Path) {
    self.0.cache_hit(artifact, fingerprint, path);
    self.1.cache_hit(artifact, fingerprint, path);
  }
  #[inline]
  fn build_wait(&mut self, artifact: &ArtifactId, fingerprint: &Fingerprint) {
    self.0.build_wait(artifact, fingerprint);
    self.1.build_wait(artifact, fingerprint);
  }
  #[inline]
  fn status_change(&mut self, artifact: &ArtifactId, status: ArtifactStatus) {
    self.0.status_change(artifact, status);
    self.1.status_change(artifact, status);
  }

  #[inline]
  fn execute_start(&mut self, artifact: &ArtifactId, fingerprint: &Fingerprint, invocation: &ToolInvocation) {
    self.0.execute_start(artifact, fingerprint, invocation);
    self.1.execute_start(artifact, fingerprint, invocation);
  }
  #[inline]
  fn execute_end(&mut self, artifact: &ArtifactId, fingerprint: &Fingerprint, result: Result<&Path, &ToolFailure>) {
    self.0.execute_end(artifact, fingerprint, result);
    self.1.execute_end(artifact, fingerprint, result);
  }
}
