use std::path::{Path, PathBuf};

use crate::artifact::{ArtifactId, ArtifactStatus};
use crate::error::PullError;
use crate::fingerprint::Fingerprint;
use crate::runner::{ToolFailure, ToolInvocation};
use crate::tracker::Tracker;

/// A [`Tracker`] that stores [`Event`]s in a [`Vec`], useful in testing to assert that a resolver materializes, reuses,
/// and executes exactly what it should.
#[derive(Default, Clone, Debug)]
pub struct EventTracker {
  events: Vec<Event>,
}

/// Enumeration of important resolution events.
#[derive(Clone, Debug)]
pub enum Event {
  PullStart(PullStart),
  PullEnd(PullEnd),

  SourceFound(SourceFound),
  CacheHit(CacheHit),
  BuildWait(BuildWait),
  StatusChange(StatusChange),

  ExecuteStart(ExecuteStart),
  ExecuteEnd(ExecuteEnd),
}

/// Start: pull `artifact`.
#[derive(Clone, Debug)]
pub struct PullStart {
  pub artifact: ArtifactId,
  pub index: usize,
}
/// End: pulled `artifact`, resulting in a file path or an error message.
#[derive(Clone, Debug)]
pub struct PullEnd {
  pub artifact: ArtifactId,
  pub result: Result<PathBuf, String>,
  pub index: usize,
}
/// `artifact` already has an existing file at `path`.
#[derive(Clone, Debug)]
pub struct SourceFound {
  pub artifact: ArtifactId,
  pub path: PathBuf,
  pub index: usize,
}
/// The derivation of `artifact` with `fingerprint` was found in the cache at `path`.
#[derive(Clone, Debug)]
pub struct CacheHit {
  pub artifact: ArtifactId,
  pub fingerprint: Fingerprint,
  pub path: PathBuf,
  pub index: usize,
}
/// Waited for another worker building `fingerprint` before deriving `artifact`.
#[derive(Clone, Debug)]
pub struct BuildWait {
  pub artifact: ArtifactId,
  pub fingerprint: Fingerprint,
  pub index: usize,
}
/// The status of `artifact` was persisted as `status`.
#[derive(Clone, Debug)]
pub struct StatusChange {
  pub artifact: ArtifactId,
  pub status: ArtifactStatus,
  pub index: usize,
}
/// Start: execute `invocation` to derive `artifact` with `fingerprint`.
#[derive(Clone, Debug)]
pub struct ExecuteStart {
  pub artifact: ArtifactId,
  pub fingerprint: Fingerprint,
  pub invocation: ToolInvocation,
  pub index: usize,
}
/// End: executed the tool deriving `artifact` with `fingerprint`, resulting in a cache path or a failure message.
#[derive(Clone, Debug)]
pub struct ExecuteEnd {
  pub artifact: ArtifactId,
  pub fingerprint: Fingerprint,
  pub result: Result<PathBuf, String>,
  pub index: usize,
}

impl Tracker for EventTracker {
  #[inline]
  fn pull_start(&mut self, artifact: &ArtifactId) {
    let data = PullStart { artifact: artifact.clone(), index: self.events.len() };
    self.events.push(Event::PullStart(data));
  }
  #[inline]
  fn pull_end(&mut self, artifact: &ArtifactId, result: Result<&Path, &PullError>) {
    let data = PullEnd {
      artifact: artifact.clone(),
      result: result.map(Path::to_path_buf).map_err(|e| e.to_string()),
      index: self.events.len(),
    };
    self.events.push(Event::PullEnd(data));
  }

  #[inline]
  fn source_found(&mut self, artifact: &ArtifactId, path: &Path) {
    let data = SourceFound { artifact: artifact.clone(), path: path.to_path_buf(), index: self.events.len() };
    self.events.push(Event::SourceFound(data));
  }
  #[inline]
  fn cache_hit(&mut self, artifact: &ArtifactId, fingerprint: &Fingerprint, path: &Path) {
    let data = CacheHit {
      artifact: artifact.clone(),
      fingerprint: fingerprint.clone(),
      path: path.to_path_buf(),
      index: self.events.len(),
    };
    self.events.push(Event::CacheHit(data));
  }
  #[inline]
  fn build_wait(&mut self, artifact: &ArtifactId, fingerprint: &Fingerprint) {
    let data = BuildWait { artifact: artifact.clone(), fingerprint: fingerprint.clone(), index: self.events.len() };
    self.events.push(Event::BuildWait(data));
  }
  #[inline]
  fn status_change(&mut self, artifact: &ArtifactId, status: ArtifactStatus) {
    let data = StatusChange { artifact: artifact.clone(), status, index: self.events.len() };
    self.events.push(Event::StatusChange(data));
  }

  #[inline]
  fn execute_start(&mut self, artifact: &ArtifactId, fingerprint: &Fingerprint, invocation: &ToolInvocation) {
    let data = ExecuteStart {
      artifact: artifact.clone(),
      fingerprint: fingerprint.clone(),
      invocation: invocation.clone(),
      index: self.events.len(),
    };
    self.events.push(Event::ExecuteStart(data));
  }
  #[inline]
  fn execute_end(&mut self, artifact: &ArtifactId, fingerprint: &Fingerprint, result: Result<&Path, &ToolFailure>) {
    let data = ExecuteEnd {
      artifact: artifact.clone(),
      fingerprint: fingerprint.clone(),
      result: result.map(Path::to_path_buf).map_err(|e| e.to_string()),
      index: self.events.len(),
    };
    self.events.push(Event::ExecuteEnd(data));
  }
}

impl Event {
  /// Returns the artifact this event is about.
  pub fn artifact(&self) -> &ArtifactId {
    match self {
      Event::PullStart(PullStart { artifact, .. }) |
      Event::PullEnd(PullEnd { artifact, .. }) |
      Event::SourceFound(SourceFound { artifact, .. }) |
      Event::CacheHit(CacheHit { artifact, .. }) |
      Event::BuildWait(BuildWait { artifact, .. }) |
      Event::StatusChange(StatusChange { artifact, .. }) |
      Event::ExecuteStart(ExecuteStart { artifact, .. }) |
      Event::ExecuteEnd(ExecuteEnd { artifact, .. }) => artifact,
    }
  }

  /// Returns `true` if this is an execute [start](Event::ExecuteStart) or [end](Event::ExecuteEnd) event.
  pub fn is_execute(&self) -> bool {
    matches!(self, Event::ExecuteStart(_) | Event::ExecuteEnd(_))
  }
  /// Returns `true` if this is an execute [start](Event::ExecuteStart) or [end](Event::ExecuteEnd) event for
  /// `artifact`.
  pub fn is_execute_of(&self, artifact: &ArtifactId) -> bool {
    self.is_execute() && self.artifact() == artifact
  }
  /// Returns `Some(&data)` if this is an [execute start event](Event::ExecuteStart) for `artifact`, or `None` otherwise.
  pub fn match_execute_start(&self, artifact: &ArtifactId) -> Option<&ExecuteStart> {
    match self {
      Event::ExecuteStart(data) if &data.artifact == artifact => Some(data),
      _ => None,
    }
  }
  /// Returns `Some(&data)` if this is an [execute end event](Event::ExecuteEnd) for `artifact`, or `None` otherwise.
  pub fn match_execute_end(&self, artifact: &ArtifactId) -> Option<&ExecuteEnd> {
    match self {
      Event::ExecuteEnd(data) if &data.artifact == artifact => Some(data),
      _ => None,
    }
  }
  /// Returns `Some(&data)` if this is a [cache hit event](Event::CacheHit) for `artifact`, or `None` otherwise.
  pub fn match_cache_hit(&self, artifact: &ArtifactId) -> Option<&CacheHit> {
    match self {
      Event::CacheHit(data) if &data.artifact == artifact => Some(data),
      _ => None,
    }
  }
  /// Returns `Some(&data)` if this is a [pull end event](Event::PullEnd) for `artifact`, or `None` otherwise.
  pub fn match_pull_end(&self, artifact: &ArtifactId) -> Option<&PullEnd> {
    match self {
      Event::PullEnd(data) if &data.artifact == artifact => Some(data),
      _ => None,
    }
  }
  /// Returns `Some(status)` if this is a [status change event](Event::StatusChange) for `artifact`, or `None`
  /// otherwise.
  pub fn match_status_change(&self, artifact: &ArtifactId) -> Option<ArtifactStatus> {
    match self {
      Event::StatusChange(data) if &data.artifact == artifact => Some(data.status),
      _ => None,
    }
  }
}

impl EventTracker {
  /// Returns a slice over all events.
  pub fn slice(&self) -> &[Event] {
    &self.events
  }
  /// Returns an iterator over all events.
  pub fn iter(&self) -> impl Iterator<Item=&Event> {
    self.events.iter()
  }
  /// Removes all events.
  pub fn clear(&mut self) {
    self.events.clear();
  }

  /// Returns `true` if `predicate` returns `true` for any event.
  pub fn any(&self, predicate: impl FnMut(&Event) -> bool) -> bool {
    self.iter().any(predicate)
  }
  /// Returns `true` if `predicate` returns `true` for exactly one event.
  pub fn one(&self, predicate: impl FnMut(&&Event) -> bool) -> bool {
    self.iter().filter(predicate).count() == 1
  }

  /// Returns `true` if any tool was executed.
  pub fn any_execute(&self) -> bool {
    self.any(|e| e.is_execute())
  }
  /// Returns `true` if a tool was executed to derive `artifact`.
  pub fn any_execute_of(&self, artifact: &ArtifactId) -> bool {
    self.any(|e| e.is_execute_of(artifact))
  }
  /// Returns `true` if a tool was executed exactly once to derive `artifact`.
  pub fn one_execute_of(&self, artifact: &ArtifactId) -> bool {
    self.one(|e| e.match_execute_start(artifact).is_some())
  }
  /// Returns the number of tool executions for any artifact.
  pub fn execute_count(&self) -> usize {
    self.iter().filter(|e| matches!(e, Event::ExecuteStart(_))).count()
  }
  /// Finds the first [execute end event](Event::ExecuteEnd) for `artifact` and returns `Some(&data)`, or `None`
  /// otherwise.
  pub fn first_execute_end(&self, artifact: &ArtifactId) -> Option<&ExecuteEnd> {
    self.iter().find_map(|e| e.match_execute_end(artifact))
  }

  /// Returns `true` if the derivation of `artifact` was found in the cache.
  pub fn any_cache_hit_of(&self, artifact: &ArtifactId) -> bool {
    self.any(|e| e.match_cache_hit(artifact).is_some())
  }
  /// Returns `true` if any pull waited for another worker's build.
  pub fn any_build_wait(&self) -> bool {
    self.any(|e| matches!(e, Event::BuildWait(_)))
  }

  /// Returns the statuses persisted for `artifact`, in order.
  pub fn status_changes_of(&self, artifact: &ArtifactId) -> Vec<ArtifactStatus> {
    self.iter().filter_map(|e| e.match_status_change(artifact)).collect()
  }
  /// Returns the artifacts that were pulled, in the order their pulls ended.
  pub fn pulled(&self) -> Vec<&ArtifactId> {
    self.iter()
      .filter_map(|e| match e {
        Event::PullEnd(data) => Some(&data.artifact),
        _ => None,
      })
      .collect()
  }
}
