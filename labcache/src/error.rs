use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::artifact::ArtifactId;
use crate::fingerprint::Fingerprint;
use crate::runner::ToolFailure;
use crate::store::StoreError;

/// Error pulling (materializing) an artifact.
///
/// Status transitions caused by the failure are persisted before the error is returned, so the metadata store already
/// reflects the failure when the caller observes it.
#[derive(Debug, Error)]
pub enum PullError {
  /// The artifact has no usable file and no tool to derive one. Requires a metadata correction; retrying is pointless.
  #[error("artifact '{artifact}' has neither a file nor a tool{}", missing_file_suffix(.missing_file))]
  MissingSource {
    artifact: ArtifactId,
    /// The attached file path that no longer points to a file, if any.
    missing_file: Option<PathBuf>,
  },
  /// The artifact's tool is not known to the tool registry.
  #[error("artifact '{artifact}' refers to unknown tool '{tool}'")]
  UnknownTool {
    artifact: ArtifactId,
    tool: String,
  },
  /// Pulling input `input` of `artifact` failed. `artifact` has been marked failed.
  #[error("input '{input}' of artifact '{artifact}' could not be materialized")]
  DependencyFailed {
    artifact: ArtifactId,
    input: ArtifactId,
    #[source]
    source: Box<PullError>,
  },
  /// An artifact was revisited within a single resolution chain. `cycle` starts and ends with the revisited artifact.
  #[error("cyclic dependency: {}", join_ids(.cycle))]
  CyclicDependency {
    cycle: Vec<ArtifactId>,
  },
  /// The tool deriving `artifact` failed. `artifact` has been marked failed; pulling again retries the tool.
  #[error("tool execution for artifact '{artifact}' (fingerprint {fingerprint}) failed")]
  ToolExecution {
    artifact: ArtifactId,
    fingerprint: Fingerprint,
    /// Output the tool wrote before failing, kept for inspection.
    partial_output: Option<PathBuf>,
    #[source]
    source: ToolFailure,
  },
  /// The cache directory could not be written. Not retryable until the environment is fixed.
  #[error("cannot write to cache at '{}'", .path.display())]
  CacheWrite {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  /// Probing or reading a file failed.
  #[error("cannot access '{}'", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error(transparent)]
  Store(#[from] StoreError),
}

impl PullError {
  /// Returns the innermost error by unwrapping [`PullError::DependencyFailed`] chains.
  pub fn root_cause(&self) -> &PullError {
    let mut error = self;
    while let PullError::DependencyFailed { source, .. } = error {
      error = source;
    }
    error
  }

  /// Returns the diagnostic output captured from a failed tool, looking through dependency failures.
  pub fn diagnostics(&self) -> Option<&str> {
    match self.root_cause() {
      PullError::ToolExecution { source, .. } => source.diagnostics(),
      _ => None,
    }
  }

  /// Returns `true` if pulling again may succeed without changing metadata or the environment.
  pub fn is_retryable(&self) -> bool {
    matches!(self.root_cause(), PullError::ToolExecution { .. })
  }
}

fn missing_file_suffix(missing_file: &Option<PathBuf>) -> String {
  match missing_file {
    Some(path) => format!(" (attached file '{}' does not exist)", path.display()),
    None => String::new(),
  }
}

fn join_ids(ids: &[ArtifactId]) -> String {
  ids.iter().map(ArtifactId::as_str).collect::<Vec<_>>().join(" -> ")
}
