//! Materializing artifacts.
//!
//! [`Resolver::pull`] returns the path of an artifact's file, producing it first if needed: an attached file that
//! exists is returned as is, otherwise the artifact's inputs are pulled recursively, the derivation is looked up in the
//! [cache](Cache) by its [fingerprint](crate::fingerprint::fingerprint), and on a miss the artifact's tool is run.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::artifact::{Artifact, ArtifactId, ArtifactStatus};
use crate::cache::{Cache, PendingWrite};
use crate::config::ResolverConfig;
use crate::error::PullError;
use crate::fingerprint::{fingerprint, Fingerprint};
use crate::fs::{checksum_file, is_file};
use crate::runner::{expand_command, CommandExecutor, ProcessExecutor, ToolFailure, ToolRunner};
use crate::store::MetadataStore;
use crate::tool::{Tool, ToolRegistry};
use crate::tracker::Tracker;

/// Resolves artifacts from a [metadata store](MetadataStore) into files, running tools from a
/// [registry](ToolRegistry) with a [runner](ToolRunner) and caching their outputs in a [`Cache`].
///
/// A resolver can be shared between threads: concurrent pulls of derivations with the same fingerprint run the tool
/// at most once.
#[derive(Debug)]
pub struct Resolver<S, R, E = ProcessExecutor, A = ()> {
  store: S,
  registry: R,
  runner: ToolRunner<E>,
  cache: Cache,
  tracker: Mutex<A>,
}

impl<S: MetadataStore, R: ToolRegistry, E: CommandExecutor> Resolver<S, R, E> {
  /// Creates a new resolver without tracking.
  #[inline]
  pub fn new(store: S, registry: R, runner: ToolRunner<E>, cache: Cache) -> Self {
    Self::with_tracker(store, registry, runner, cache, ())
  }
}

impl<S: MetadataStore, R: ToolRegistry> Resolver<S, R> {
  /// Creates a new resolver that runs tools as processes, configured by `config`.
  pub fn from_config(store: S, registry: R, config: &ResolverConfig) -> Self {
    let executor = match config.tool_timeout() {
      Some(timeout) => ProcessExecutor::with_timeout(timeout),
      None => ProcessExecutor::new(),
    };
    let cache = Cache::new(&config.cache_root, &config.archive_suffix);
    Self::new(store, registry, ToolRunner::new(executor), cache)
  }
}

impl<S: MetadataStore, R: ToolRegistry, E: CommandExecutor, A: Tracker> Resolver<S, R, E, A> {
  /// Creates a new resolver that reports events to `tracker`.
  #[inline]
  pub fn with_tracker(store: S, registry: R, runner: ToolRunner<E>, cache: Cache, tracker: A) -> Self {
    Self { store, registry, runner, cache, tracker: Mutex::new(tracker) }
  }

  /// Materializes artifact `id` and returns the path of its file.
  ///
  /// Every call starts a new [session](Self::new_session), so changes made by other writers since the last pull are
  /// observed.
  #[inline]
  pub fn pull(&self, id: &ArtifactId) -> Result<PathBuf, PullError> {
    self.new_session().pull(id)
  }

  /// Creates a new session, in which each artifact is materialized at most once.
  #[inline]
  pub fn new_session(&self) -> Session<'_, S, R, E, A> {
    Session { resolver: self, resolved: HashMap::default(), stack: Vec::new() }
  }

  #[inline]
  pub fn store(&self) -> &S { &self.store }
  #[inline]
  pub fn registry(&self) -> &R { &self.registry }
  #[inline]
  pub fn cache(&self) -> &Cache { &self.cache }
  #[inline]
  pub fn runner(&self) -> &ToolRunner<E> { &self.runner }

  /// Locks and returns the tracker.
  #[inline]
  pub fn tracker(&self) -> MutexGuard<A> {
    self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
  }
  /// Consumes the resolver and returns its tracker.
  #[inline]
  pub fn into_tracker(self) -> A {
    self.tracker.into_inner().unwrap_or_else(PoisonError::into_inner)
  }

  #[inline]
  fn track(&self, f: impl FnOnce(&mut A)) {
    f(&mut self.tracker());
  }
}


/// Resolution session: memoizes the artifacts it materialized and tracks the current resolution chain to detect
/// cycles.
pub struct Session<'r, S, R, E, A> {
  resolver: &'r Resolver<S, R, E, A>,
  resolved: HashMap<ArtifactId, PathBuf>,
  stack: Vec<ArtifactId>,
}

impl<'r, S: MetadataStore, R: ToolRegistry, E: CommandExecutor, A: Tracker> Session<'r, S, R, E, A> {
  /// Materializes artifact `id` and returns the path of its file. Artifacts already materialized in this session are
  /// not looked at again.
  pub fn pull(&mut self, id: &ArtifactId) -> Result<PathBuf, PullError> {
    if let Some(path) = self.resolved.get(id) {
      return Ok(path.clone());
    }
    if let Some(position) = self.stack.iter().position(|a| a == id) {
      let mut cycle = self.stack[position..].to_vec();
      cycle.push(id.clone());
      return Err(PullError::CyclicDependency { cycle });
    }

    self.resolver.track(|t| t.pull_start(id));
    self.stack.push(id.clone());
    let result = self.materialize(id);
    self.stack.pop();
    self.resolver.track(|t| t.pull_end(id, result.as_deref()));

    if let Ok(path) = &result {
      self.resolved.insert(id.clone(), path.clone());
    }
    result
  }

  fn materialize(&mut self, id: &ArtifactId) -> Result<PathBuf, PullError> {
    let artifact = self.resolver.store.artifact(id)?;

    if let Some(path) = &artifact.file_path {
      if is_file(path).map_err(|source| PullError::Io { path: path.clone(), source })? {
        self.resolver.track(|t| t.source_found(id, path));
        return Ok(path.clone());
      }
    }
    let Some(tool_name) = &artifact.tool else {
      return Err(PullError::MissingSource { artifact: id.clone(), missing_file: artifact.file_path.clone() });
    };
    let Some(tool) = self.resolver.registry.tool(tool_name) else {
      return Err(PullError::UnknownTool { artifact: id.clone(), tool: tool_name.clone() });
    };

    let mut input_paths = Vec::with_capacity(artifact.inputs.len());
    for input in &artifact.inputs {
      match self.pull(input) {
        Ok(path) => input_paths.push(path),
        Err(e) => {
          let error = PullError::DependencyFailed { artifact: id.clone(), input: input.clone(), source: Box::new(e) };
          return self.fail(id, error);
        }
      }
    }

    let fingerprint = fingerprint(Some(&tool.name), &artifact.tool_params, &input_paths);
    let cache_path = self.resolver.cache.path_for(&fingerprint);
    if self.attach_cached(id, &fingerprint, &cache_path)? {
      return Ok(cache_path);
    }

    let (_claim, waited) = self.resolver.cache.claim(&fingerprint);
    if waited {
      self.resolver.track(|t| t.build_wait(id, &fingerprint));
    }
    if self.attach_cached(id, &fingerprint, &cache_path)? {
      return Ok(cache_path);
    }
    self.build(&artifact, &tool, &input_paths, &fingerprint, &cache_path)
  }

  /// Attaches the file at `cache_path` to artifact `id` if it exists, returning whether it did. A cache path that
  /// cannot be checked means the cache root is unusable, which fails the artifact.
  fn attach_cached(&self, id: &ArtifactId, fingerprint: &Fingerprint, cache_path: &Path) -> Result<bool, PullError> {
    match is_file(cache_path) {
      Ok(true) => {}
      Ok(false) => return Ok(false),
      Err(e) => return self.fail(id, cache_write_error(cache_path, e)),
    }
    self.resolver.track(|t| t.cache_hit(id, fingerprint, cache_path));
    let checksum = checksum_file(cache_path)
      .map_err(|source| PullError::Io { path: cache_path.to_path_buf(), source })?;
    self.resolver.store.set_materialized(id, cache_path, &checksum)?;
    self.resolver.track(|t| t.status_change(id, ArtifactStatus::Ready));
    Ok(true)
  }

  /// Runs the tool of `artifact` and publishes its output at `cache_path`. Any failure after the artifact is marked
  /// pending marks it failed.
  fn build(
    &self,
    artifact: &Artifact,
    tool: &Tool,
    input_paths: &[PathBuf],
    fingerprint: &Fingerprint,
    cache_path: &Path,
  ) -> Result<PathBuf, PullError> {
    let id = &artifact.id;
    self.set_status(id, ArtifactStatus::Pending)?;

    let cache = &self.resolver.cache;
    if let Err(e) = cache.ensure_root() {
      return self.fail(id, cache_write_error(cache.root(), e));
    }
    let output = match cache.begin_write() {
      Ok(output) => output,
      Err(e) => return self.fail(id, cache_write_error(cache.root(), e)),
    };

    if let Err(failure) = self.execute(artifact, tool, input_paths, fingerprint, &output, cache_path) {
      let partial_output = output.abandon().ok();
      let error = PullError::ToolExecution {
        artifact: id.clone(),
        fingerprint: fingerprint.clone(),
        partial_output,
        source: failure,
      };
      return self.fail(id, error);
    }

    if let Err(e) = output.commit(cache_path) {
      return self.fail(id, cache_write_error(cache_path, e));
    }
    let checksum = match checksum_file(cache_path) {
      Ok(checksum) => checksum,
      Err(source) => return self.fail(id, PullError::Io { path: cache_path.to_path_buf(), source }),
    };
    self.resolver.store.set_materialized(id, cache_path, &checksum)?;
    self.resolver.track(|t| t.status_change(id, ArtifactStatus::Ready));
    Ok(cache_path.to_path_buf())
  }

  fn execute(
    &self,
    artifact: &Artifact,
    tool: &Tool,
    input_paths: &[PathBuf],
    fingerprint: &Fingerprint,
    output: &PendingWrite,
    cache_path: &Path,
  ) -> Result<(), ToolFailure> {
    let id = &artifact.id;
    let invocation = expand_command(&tool.command_template, &artifact.tool_params, input_paths)?;
    let file = output.file()
      .map_err(|source| ToolFailure::Spawn { program: invocation.program.clone(), source })?;
    self.resolver.track(|t| t.execute_start(id, fingerprint, &invocation));
    let result = self.resolver.runner.execute(&invocation, file);
    self.resolver.track(|t| t.execute_end(id, fingerprint, result.as_ref().map(|_| cache_path)));
    result
  }

  fn set_status(&self, id: &ArtifactId, status: ArtifactStatus) -> Result<(), PullError> {
    self.resolver.store.set_status(id, status)?;
    self.resolver.track(|t| t.status_change(id, status));
    Ok(())
  }

  /// Marks artifact `id` failed and returns `error`, or the store error if marking failed.
  fn fail<T>(&self, id: &ArtifactId, error: PullError) -> Result<T, PullError> {
    self.set_status(id, ArtifactStatus::Failed)?;
    Err(error)
  }
}

#[inline]
fn cache_write_error(path: &Path, source: io::Error) -> PullError {
  PullError::CacheWrite { path: path.to_path_buf(), source }
}
