use std::{fs, io};
use std::fs::{File, Metadata};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Gets the metadata for given `path`, returning:
/// - `Ok(Some(metadata))` if a file or directory exists at given path,
/// - `Ok(None)` if no file or directory exists at given path,
/// - `Err(e)` if there was an error getting the metadata for given path.
pub fn metadata(path: impl AsRef<Path>) -> Result<Option<Metadata>, io::Error> {
  match fs::metadata(path) {
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
    Err(e) => Err(e),
    Ok(m) => Ok(Some(m))
  }
}

/// Returns `Ok(true)` if a file (not a directory) exists at `path`, `Ok(false)` if nothing or a directory exists
/// there, or an error if probing the path failed.
#[inline]
pub fn is_file(path: impl AsRef<Path>) -> Result<bool, io::Error> {
  Ok(metadata(path)?.map_or(false, |m| m.is_file()))
}

/// Hashes the contents of the file at `path` with SHA-256, returning the digest as lowercase hex.
pub fn checksum_file(path: impl AsRef<Path>) -> Result<String, io::Error> {
  let mut file = File::open(path)?;
  let mut hasher = Sha256::new();
  io::copy(&mut file, &mut hasher)?;
  Ok(to_hex(&hasher.finalize()))
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
  use std::fmt::Write;
  let mut hex = String::with_capacity(bytes.len() * 2);
  for b in bytes {
    let _ = write!(hex, "{:02x}", b);
  }
  hex
}
