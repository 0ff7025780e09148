use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::{NamedTempFile, TempDir};

/// Creates a new temporary file that gets cleaned up when dropped.
pub fn create_temp_file() -> Result<NamedTempFile, io::Error> {
  NamedTempFile::new()
}

/// Creates a new temporary directory that gets cleaned up when dropped.
pub fn create_temp_dir() -> Result<TempDir, io::Error> {
  TempDir::new()
}

/// Writes `contents` to `name` inside `dir`, creating parent directories as needed, and returns the full path.
pub fn write_file_in(dir: impl AsRef<Path>, name: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<PathBuf, io::Error> {
  let path = dir.as_ref().join(name);
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent)?;
  }
  fs::write(&path, contents)?;
  Ok(path)
}

/// Lists the file names in `dir`, sorted, ignoring entries that cannot be read.
pub fn list_file_names(dir: impl AsRef<Path>) -> Result<Vec<String>, io::Error> {
  let mut names: Vec<String> = fs::read_dir(dir)?
    .filter_map(|entry| entry.ok())
    .map(|entry| entry.file_name().to_string_lossy().into_owned())
    .collect();
  names.sort();
  Ok(names)
}


#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn test_write_file_in_creates_parents() -> Result<(), io::Error> {
    let temp_dir = create_temp_dir()?;
    let path = write_file_in(temp_dir.path(), "nested/in.txt", "HELLO")?;
    assert_eq!(fs::read_to_string(&path)?, "HELLO");
    assert_eq!(list_file_names(temp_dir.path())?, vec!["nested".to_string()]);
    Ok(())
  }
}
