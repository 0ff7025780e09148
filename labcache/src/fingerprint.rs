//! Deterministic cache keys for derivations.
//!
//! A fingerprint identifies a derivation by the tool that runs it, its parameters, and the paths of its resolved
//! inputs. Parameters are sorted by name and input paths are sorted lexicographically before encoding, so neither
//! parameter insertion order nor input declaration order affects the key.
//!
//! The canonical encoding is sorted-key JSON text with `", "` and `": "` separators and ASCII-only strings:
//!
//! ```text
//! {"inputs": ["/data/in.txt"], "params": {"-k": 2}, "tool": "sort"}
//! ```
//!
//! which is hashed with SHA-256. This matches the keys of caches written by the catalog before this crate existed, for
//! parameters holding strings, integers, and booleans.

use std::fmt::{self, Display, Formatter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::artifact::{ParamValue, ToolParams};
use crate::fs::to_hex;

/// Hex-encoded SHA-256 cache key of a derivation.
#[derive(Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
  #[inline]
  pub fn as_str(&self) -> &str { &self.0 }
}
impl Display for Fingerprint {
  #[inline]
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}
impl AsRef<str> for Fingerprint {
  #[inline]
  fn as_ref(&self) -> &str { &self.0 }
}

/// Computes the fingerprint of running `tool_name` with `params` over `resolved_input_paths`.
pub fn fingerprint(tool_name: Option<&str>, params: &ToolParams, resolved_input_paths: &[PathBuf]) -> Fingerprint {
  let canonical = canonical_key(tool_name, params, resolved_input_paths);
  let digest = Sha256::digest(canonical.as_bytes());
  Fingerprint(to_hex(&digest))
}

/// Returns the canonical text that [`fingerprint`] hashes.
pub fn canonical_key(tool_name: Option<&str>, params: &ToolParams, resolved_input_paths: &[PathBuf]) -> String {
  let mut inputs: Vec<Vec<u32>> = resolved_input_paths.iter().map(|p| path_code_points(p)).collect();
  inputs.sort();

  let mut out = String::with_capacity(64 + 32 * inputs.len() + 16 * params.len());
  out.push_str("{\"inputs\": [");
  for (i, input) in inputs.iter().enumerate() {
    if i > 0 { out.push_str(", "); }
    write_code_points(&mut out, input);
  }
  out.push_str("], \"params\": {");
  for (i, (name, value)) in params.sorted().into_iter().enumerate() {
    if i > 0 { out.push_str(", "); }
    write_str(&mut out, name);
    out.push_str(": ");
    write_value(&mut out, value);
  }
  out.push_str("}, \"tool\": ");
  match tool_name {
    Some(name) => write_str(&mut out, name),
    None => out.push_str("null"),
  }
  out.push('}');
  out
}

/// Returns the code points of `path` the way Python decodes file names: each byte that is not part of valid UTF-8
/// becomes the lone surrogate `U+DC00 + byte`, so distinct non-UTF-8 paths keep distinct keys. Comparing the results
/// orders paths as Python orders strings.
#[cfg(unix)]
fn path_code_points(path: &Path) -> Vec<u32> {
  use std::os::unix::ffi::OsStrExt;

  let mut bytes = path.as_os_str().as_bytes();
  let mut points = Vec::with_capacity(bytes.len());
  loop {
    match std::str::from_utf8(bytes) {
      Ok(valid) => {
        points.extend(valid.chars().map(u32::from));
        return points;
      }
      Err(e) => {
        let (valid, rest) = bytes.split_at(e.valid_up_to());
        points.extend(std::str::from_utf8(valid).unwrap_or_default().chars().map(u32::from));
        let invalid_len = e.error_len().unwrap_or(rest.len());
        points.extend(rest[..invalid_len].iter().map(|&b| 0xdc00 + u32::from(b)));
        bytes = &rest[invalid_len..];
      }
    }
  }
}
#[cfg(not(unix))]
fn path_code_points(path: &Path) -> Vec<u32> {
  path.to_string_lossy().chars().map(u32::from).collect()
}

fn write_value(out: &mut String, value: &ParamValue) {
  match value {
    ParamValue::Bool(true) => out.push_str("true"),
    ParamValue::Bool(false) => out.push_str("false"),
    ParamValue::Integer(i) => { let _ = write!(out, "{}", i); }
    ParamValue::Float(x) if x.is_nan() => out.push_str("NaN"),
    ParamValue::Float(x) if x.is_infinite() => out.push_str(if *x > 0.0 { "Infinity" } else { "-Infinity" }),
    ParamValue::Float(x) => { let _ = write!(out, "{:?}", x); }
    ParamValue::String(s) => write_str(out, s),
  }
}

/// Writes `s` as a JSON string literal, escaping every non-ASCII character as `\uXXXX` (UTF-16 code units).
fn write_str(out: &mut String, s: &str) {
  out.push('"');
  for c in s.chars() {
    write_char(out, c);
  }
  out.push('"');
}

/// Writes `points` as a JSON string literal like [`write_str`]. Lone surrogates are escaped as they are.
fn write_code_points(out: &mut String, points: &[u32]) {
  out.push('"');
  for &point in points {
    match char::from_u32(point) {
      Some(c) => write_char(out, c),
      None => { let _ = write!(out, "\\u{:04x}", point); }
    }
  }
  out.push('"');
}

fn write_char(out: &mut String, c: char) {
  match c {
    '"' => out.push_str("\\\""),
    '\\' => out.push_str("\\\\"),
    '\n' => out.push_str("\\n"),
    '\r' => out.push_str("\\r"),
    '\t' => out.push_str("\\t"),
    '\u{08}' => out.push_str("\\b"),
    '\u{0c}' => out.push_str("\\f"),
    c if c.is_ascii() && !c.is_ascii_control() => out.push(c),
    c => {
      let mut units = [0u16; 2];
      for unit in c.encode_utf16(&mut units) {
        let _ = write!(out, "\\u{:04x}", unit);
      }
    }
  }
}


#[cfg(test)]
mod test {
  use super::*;

  fn paths(paths: &[&str]) -> Vec<PathBuf> {
    paths.iter().map(PathBuf::from).collect()
  }

  #[test]
  fn test_canonical_key_format() {
    let params = ToolParams::new().with("-k", 2);
    assert_eq!(
      canonical_key(Some("sort"), &params, &paths(&["/data/in.txt"])),
      r#"{"inputs": ["/data/in.txt"], "params": {"-k": 2}, "tool": "sort"}"#
    );
    assert_eq!(canonical_key(None, &ToolParams::new(), &[]), r#"{"inputs": [], "params": {}, "tool": null}"#);
  }

  #[test]
  fn test_fingerprint_matches_known_keys() {
    let params = ToolParams::new().with("-k", 2);
    assert_eq!(
      fingerprint(Some("sort"), &params, &paths(&["/data/in.txt"])).as_str(),
      "419ed6729a9f82cf2a5b5d4cc7d552b9619f3d0858f7e890bd92d06bb241738c"
    );
    assert_eq!(
      fingerprint(None, &ToolParams::new(), &[]).as_str(),
      "3ca9a7f0a0db3900e14e26efc560e14f5d57cc1f4a8a4f7d5aa68227d0e96dc5"
    );
    let params = ToolParams::new()
      .with("r", 0.5)
      .with("name", "é x")
      .with("-t", 4)
      .with("--verbose", true);
    assert_eq!(
      fingerprint(Some("bedtools"), &params, &paths(&["/b", "/a"])).as_str(),
      "0df54e4df90ff503d0af454bc0ee39d65faf5d9a378c9778180b0f7b16c2163a"
    );
  }

  #[test]
  fn test_fingerprint_ignores_insertion_and_input_order() {
    let a = ToolParams::new().with("--threads", 4).with("--verbose", true).with("-o", "out");
    let b = ToolParams::new().with("-o", "out").with("--verbose", true).with("--threads", 4);
    let inputs_a = paths(&["/data/b.fq", "/data/a.fq"]);
    let inputs_b = paths(&["/data/a.fq", "/data/b.fq"]);
    let fingerprint_a = fingerprint(Some("align"), &a, &inputs_a);
    assert_eq!(fingerprint_a, fingerprint(Some("align"), &a, &inputs_a));
    assert_eq!(fingerprint_a, fingerprint(Some("align"), &b, &inputs_b));
  }

  #[test]
  fn test_fingerprint_distinguishes_derivations() {
    let params = ToolParams::new().with("-k", 2);
    let inputs = paths(&["/data/in.txt"]);
    let base = fingerprint(Some("sort"), &params, &inputs);
    assert_ne!(base, fingerprint(Some("uniq"), &params, &inputs));
    assert_ne!(base, fingerprint(None, &params, &inputs));
    assert_ne!(base, fingerprint(Some("sort"), &ToolParams::new().with("-k", 3), &inputs));
    assert_ne!(base, fingerprint(Some("sort"), &ToolParams::new().with("-k", "2"), &inputs));
    assert_ne!(base, fingerprint(Some("sort"), &params, &paths(&["/data/other.txt"])));
    assert_eq!(base.as_str().len(), 64);
  }

  #[test]
  fn test_string_escaping() {
    let mut out = String::new();
    write_str(&mut out, "a\"b\\c\nd\u{1}é🧬");
    assert_eq!(out, r#""a\"b\\c\nd\u0001\u00e9\ud83e\uddec""#);
  }

  #[cfg(unix)]
  #[test]
  fn test_non_utf8_paths_are_distinct() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let path = |bytes: &[u8]| PathBuf::from(OsStr::from_bytes(bytes));
    let ff = vec![path(b"/data/\xffa.txt")];
    let fe = vec![path(b"/data/\xfea.txt")];
    assert_ne!(fingerprint(Some("sort"), &ToolParams::new(), &ff), fingerprint(Some("sort"), &ToolParams::new(), &fe));
    assert_eq!(
      canonical_key(None, &ToolParams::new(), &[path(b"/d/\xc3\xa9\xff"), path(b"/d/z")]),
      r#"{"inputs": ["/d/z", "/d/\u00e9\udcff"], "params": {}, "tool": null}"#
    );
  }
}
