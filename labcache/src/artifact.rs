use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Opaque identifier of an [`Artifact`] in the metadata store.
#[derive(Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
  #[inline]
  pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }
  #[inline]
  pub fn as_str(&self) -> &str { &self.0 }
}
impl Display for ArtifactId {
  #[inline]
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}
impl From<&str> for ArtifactId {
  #[inline]
  fn from(value: &str) -> Self { Self::new(value) }
}
impl From<String> for ArtifactId {
  #[inline]
  fn from(value: String) -> Self { Self(value) }
}


/// Lifecycle state of an [`Artifact`].
///
/// `Ready -> Pending` when a derivation starts, then `Pending -> Ready` on success or `Pending -> Failed` on error.
/// `Failed -> Pending` happens when the artifact is pulled again; a failure is never terminal.
#[derive(Default, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
  #[default]
  Ready,
  Pending,
  Failed,
}
impl Display for ArtifactStatus {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    let s = match self {
      ArtifactStatus::Ready => "ready",
      ArtifactStatus::Pending => "pending",
      ArtifactStatus::Failed => "failed",
    };
    f.write_str(s)
  }
}


/// Value of a single tool parameter. Booleans are flags: `true` emits only the option name, `false` omits the option.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
  Bool(bool),
  Integer(i64),
  Float(f64),
  String(String),
}
impl Display for ParamValue {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    match self {
      ParamValue::Bool(b) => b.fmt(f),
      ParamValue::Integer(i) => i.fmt(f),
      ParamValue::Float(x) => write!(f, "{:?}", x),
      ParamValue::String(s) => f.write_str(s),
    }
  }
}
impl From<bool> for ParamValue {
  #[inline]
  fn from(value: bool) -> Self { Self::Bool(value) }
}
impl From<i64> for ParamValue {
  #[inline]
  fn from(value: i64) -> Self { Self::Integer(value) }
}
impl From<i32> for ParamValue {
  #[inline]
  fn from(value: i32) -> Self { Self::Integer(value as i64) }
}
impl From<u32> for ParamValue {
  #[inline]
  fn from(value: u32) -> Self { Self::Integer(value as i64) }
}
impl From<f64> for ParamValue {
  #[inline]
  fn from(value: f64) -> Self { Self::Float(value) }
}
impl From<&str> for ParamValue {
  #[inline]
  fn from(value: &str) -> Self { Self::String(value.to_string()) }
}
impl From<String> for ParamValue {
  #[inline]
  fn from(value: String) -> Self { Self::String(value) }
}


/// Ordered mapping from option name to [`ParamValue`]. Declaration order is preserved; it determines the order in
/// which options are passed to a tool, but never affects the fingerprint.
#[derive(Default, Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolParams(IndexMap<String, ParamValue>);

impl ToolParams {
  #[inline]
  pub fn new() -> Self { Self::default() }

  /// Parses parameters from a JSON object such as `{"-k": 2, "--verbose": true}`, keeping key order.
  pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(json)
  }

  /// Adds `name = value`, returning `self` for chaining. An existing `name` keeps its position but takes the new value.
  #[inline]
  pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
    self.insert(name, value);
    self
  }
  #[inline]
  pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Option<ParamValue> {
    self.0.insert(name.into(), value.into())
  }
  #[inline]
  pub fn get(&self, name: &str) -> Option<&ParamValue> { self.0.get(name) }

  #[inline]
  pub fn len(&self) -> usize { self.0.len() }
  #[inline]
  pub fn is_empty(&self) -> bool { self.0.is_empty() }

  /// Iterates over parameters in declaration order.
  #[inline]
  pub fn iter(&self) -> impl Iterator<Item=(&str, &ParamValue)> + ExactSizeIterator {
    self.0.iter().map(|(k, v)| (k.as_str(), v))
  }
  /// Returns parameters sorted by name.
  pub fn sorted(&self) -> Vec<(&str, &ParamValue)> {
    let mut sorted: Vec<_> = self.iter().collect();
    sorted.sort_by(|(a, _), (b, _)| a.cmp(b));
    sorted
  }
}
impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for ToolParams {
  fn from_iter<I: IntoIterator<Item=(K, V)>>(iter: I) -> Self {
    Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
  }
}


/// A file-bearing record: either a source artifact holding a directly attached file, or a derivation producing its
/// file by running a [tool](crate::Tool) over its `inputs`.
///
/// Any catalog record type (FASTA, FASTQ, QC files, images, ...) refers to an artifact by [`ArtifactId`] instead of
/// carrying derivation logic itself.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Artifact {
  pub id: ArtifactId,
  /// Path of the materialized file, if any.
  #[serde(default)]
  pub file_path: Option<PathBuf>,
  /// Hex SHA-256 of the materialized file. Required whenever `file_path` is set.
  #[serde(default)]
  pub checksum: Option<String>,
  /// Name of the tool deriving this artifact; `None` for source artifacts.
  #[serde(default)]
  pub tool: Option<String>,
  #[serde(default)]
  pub tool_params: ToolParams,
  #[serde(default)]
  pub inputs: Vec<ArtifactId>,
  #[serde(default)]
  pub status: ArtifactStatus,
}

impl Artifact {
  /// Creates a source artifact with an already attached file.
  pub fn source(id: impl Into<ArtifactId>, file_path: impl Into<PathBuf>, checksum: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      file_path: Some(file_path.into()),
      checksum: Some(checksum.into()),
      tool: None,
      tool_params: ToolParams::default(),
      inputs: Vec::new(),
      status: ArtifactStatus::Ready,
    }
  }

  /// Creates an artifact derived by running `tool` with `tool_params` over `inputs`. It has no file until pulled.
  pub fn derived(
    id: impl Into<ArtifactId>,
    tool: impl Into<String>,
    tool_params: ToolParams,
    inputs: impl IntoIterator<Item=impl Into<ArtifactId>>,
  ) -> Self {
    Self {
      id: id.into(),
      file_path: None,
      checksum: None,
      tool: Some(tool.into()),
      tool_params,
      inputs: inputs.into_iter().map(Into::into).collect(),
      status: ArtifactStatus::Ready,
    }
  }

  /// Creates an artifact with neither a file nor a tool. Such an artifact cannot be pulled, but metadata stores may
  /// hold one while a catalog entry is incomplete.
  pub fn empty(id: impl Into<ArtifactId>) -> Self {
    Self {
      id: id.into(),
      file_path: None,
      checksum: None,
      tool: None,
      tool_params: ToolParams::default(),
      inputs: Vec::new(),
      status: ArtifactStatus::Ready,
    }
  }

  #[inline]
  pub fn with_status(mut self, status: ArtifactStatus) -> Self {
    self.status = status;
    self
  }

  /// Returns `true` if this artifact is derived by a tool.
  #[inline]
  pub fn is_derived(&self) -> bool { self.tool.is_some() }

  /// Checks record-level invariants: an attached file must come with a checksum.
  pub fn validate(&self) -> Result<(), InvalidArtifact> {
    if self.file_path.is_some() && self.checksum.as_deref().map_or(true, str::is_empty) {
      return Err(InvalidArtifact::MissingChecksum(self.id.clone()));
    }
    Ok(())
  }
}

/// Violation of an [`Artifact`] record invariant.
#[derive(Clone, Eq, PartialEq, Debug, thiserror::Error)]
pub enum InvalidArtifact {
  #[error("artifact '{0}' has a file but no checksum; a checksum must be provided when a file is attached")]
  MissingChecksum(ArtifactId),
}


#[cfg(test)]
mod test {
  use assert_matches::assert_matches;

  use super::*;

  #[test]
  fn test_params_keep_declaration_order() {
    let params = ToolParams::new()
      .with("--verbose", true)
      .with("--threads", 4)
      .with("--dry-run", false);
    let names: Vec<_> = params.iter().map(|(k, _)| k).collect();
    assert_eq!(names, ["--verbose", "--threads", "--dry-run"]);
    let sorted: Vec<_> = params.sorted().into_iter().map(|(k, _)| k).collect();
    assert_eq!(sorted, ["--dry-run", "--threads", "--verbose"]);
  }

  #[test]
  fn test_params_from_json() -> Result<(), serde_json::Error> {
    let params = ToolParams::from_json_str(r#"{"-k": 2, "--verbose": true, "--scale": 0.5, "-o": "bed"}"#)?;
    assert_eq!(params.get("-k"), Some(&ParamValue::Integer(2)));
    assert_eq!(params.get("--verbose"), Some(&ParamValue::Bool(true)));
    assert_eq!(params.get("--scale"), Some(&ParamValue::Float(0.5)));
    assert_eq!(params.get("-o"), Some(&ParamValue::String("bed".to_string())));
    let names: Vec<_> = params.iter().map(|(k, _)| k).collect();
    assert_eq!(names, ["-k", "--verbose", "--scale", "-o"]);
    Ok(())
  }

  #[test]
  fn test_status_serializes_lowercase() -> Result<(), serde_json::Error> {
    assert_eq!(serde_json::to_string(&ArtifactStatus::Pending)?, r#""pending""#);
    assert_eq!(serde_json::from_str::<ArtifactStatus>(r#""failed""#)?, ArtifactStatus::Failed);
    assert_eq!(ArtifactStatus::default(), ArtifactStatus::Ready);
    Ok(())
  }

  #[test]
  fn test_artifact_deserializes_with_defaults() -> Result<(), serde_json::Error> {
    let artifact: Artifact = serde_json::from_str(r#"{"id": "x", "tool": "sort", "tool_params": {"-k": 2}, "inputs": ["y"]}"#)?;
    assert_eq!(artifact, Artifact::derived("x", "sort", ToolParams::new().with("-k", 2), ["y"]));
    Ok(())
  }

  #[test]
  fn test_validate_requires_checksum_with_file() {
    assert_matches!(Artifact::source("a", "/data/in.txt", "abc").validate(), Ok(()));
    assert_matches!(Artifact::derived("b", "sort", ToolParams::new(), ["a"]).validate(), Ok(()));
    assert_matches!(Artifact::empty("c").validate(), Ok(()));
    assert_matches!(
      Artifact::source("d", "/data/in.txt", "").validate(),
      Err(InvalidArtifact::MissingChecksum(id)) if id.as_str() == "d"
    );
  }
}
