#![cfg(unix)]

use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use rstest::rstest;
use tempfile::TempDir;

use labcache::{fingerprint, Artifact, ArtifactId, ArtifactStatus, CommandExecutor, InMemoryStore, ProcessExecutor, PullError, Resolver, ResolverConfig, Tool, ToolFailure, ToolInvocation, ToolParams, ToolRunner, ToolSet};

use util::*;

mod util;

fn store_with_raw(temp_dir: &TempDir, derived: Artifact) -> InMemoryStore {
  let store = InMemoryStore::new();
  store.insert_all([source_artifact(temp_dir.path(), "raw", "raw.txt", "b 2\na 3\nc 1\n"), derived]).unwrap();
  store
}

#[rstest]
fn test_sort_end_to_end(temp_dir: TempDir) -> Result<(), Box<dyn Error>> {
  let cache_root = temp_dir.path().join("generated");
  let params = ToolParams::from_json_str(r#"{"-k": 2}"#)?;
  let store = store_with_raw(&temp_dir, Artifact::derived("x", "sort", params.clone(), ["raw"]));
  let tools = ToolSet::new().with(Tool::new("sort", "sort {params} {input}"));
  let resolver = Resolver::from_config(store, tools, &ResolverConfig::new(&cache_root));

  let path = resolver.pull(&ArtifactId::from("x"))?;
  let fingerprint = fingerprint(Some("sort"), &params, &[temp_dir.path().join("raw.txt")]);
  assert_eq!(path, cache_root.join(format!("{}.tar.gz", fingerprint)));
  assert_eq!(fs::read_to_string(&path)?, "c 1\nb 2\na 3\n");
  assert_eq!(resolver.store().status(&ArtifactId::from("x")), Some(ArtifactStatus::Ready));
  assert_eq!(resolver.store().file_path(&ArtifactId::from("x")), Some(path));
  Ok(())
}

#[rstest]
fn test_arguments_are_not_interpreted_by_a_shell(temp_dir: TempDir) -> Result<(), Box<dyn Error>> {
  let params = ToolParams::new().with("-n", true).with("$(touch pwned); echo", "a b");
  let store = store_with_raw(&temp_dir, Artifact::derived("echoed", "echo", params, ["raw"]));
  let tools = ToolSet::new().with(Tool::new("echo", "echo {params}"));
  let resolver = new_test_resolver(store, tools, ProcessExecutor::new(), temp_dir.path().join("cache"));

  let path = resolver.pull(&ArtifactId::from("echoed"))?;
  assert_eq!(fs::read_to_string(path)?, "$(touch pwned); echo a b");
  assert!(!PathBuf::from("pwned").exists());
  Ok(())
}

#[rstest]
fn test_nonzero_exit_is_failure(temp_dir: TempDir) -> Result<(), Box<dyn Error>> {
  let store = store_with_raw(&temp_dir, Artifact::derived("listed", "ls", ToolParams::new(), ["raw"]));
  let tools = ToolSet::new().with(Tool::new("ls", "ls {input} /labcache-path-that-does-not-exist"));
  let resolver = new_test_resolver(store, tools, ProcessExecutor::new(), temp_dir.path().join("cache"));

  let error = assert_matches!(resolver.pull(&ArtifactId::from("listed")), Err(e) => e);
  let diagnostics = assert_matches!(error.diagnostics(), Some(d) => d);
  assert!(diagnostics.contains("labcache-path-that-does-not-exist"), "unexpected diagnostics: {}", diagnostics);
  let partial_output = assert_matches!(&error, PullError::ToolExecution { partial_output: Some(p), source: ToolFailure::Exit { code: Some(c), .. }, .. } if *c != 0 => p);
  // `ls` listed the existing input before failing on the missing one.
  assert!(fs::read_to_string(partial_output)?.contains("raw.txt"));
  assert_eq!(resolver.store().status(&ArtifactId::from("listed")), Some(ArtifactStatus::Failed));
  Ok(())
}

#[rstest]
fn test_missing_program_is_failure(temp_dir: TempDir) -> Result<(), Box<dyn Error>> {
  let store = store_with_raw(&temp_dir, Artifact::derived("x", "missing", ToolParams::new(), ["raw"]));
  let tools = ToolSet::new().with(Tool::new("missing", "labcache-program-that-does-not-exist {input}"));
  let resolver = new_test_resolver(store, tools, ProcessExecutor::new(), temp_dir.path().join("cache"));

  let result = resolver.pull(&ArtifactId::from("x"));
  assert_matches!(result, Err(PullError::ToolExecution { source: ToolFailure::Spawn { .. }, .. }));
  assert_eq!(resolver.store().status(&ArtifactId::from("x")), Some(ArtifactStatus::Failed));
  Ok(())
}

#[rstest]
fn test_timeout_kills_tool(temp_dir: TempDir) -> Result<(), Box<dyn Error>> {
  let store = store_with_raw(&temp_dir, Artifact::derived("slow", "sleep", ToolParams::new(), ["raw"]));
  let tools = ToolSet::new().with(Tool::new("sleep", "sleep 10"));
  let executor = ProcessExecutor::with_timeout(Duration::from_millis(200));
  let resolver = new_test_resolver(store, tools, executor, temp_dir.path().join("cache"));

  let start = Instant::now();
  let result = resolver.pull(&ArtifactId::from("slow"));
  assert!(start.elapsed() < Duration::from_secs(5));
  assert_matches!(result, Err(PullError::ToolExecution { source: ToolFailure::TimedOut { .. }, .. }));
  assert_eq!(resolver.store().status(&ArtifactId::from("slow")), Some(ArtifactStatus::Failed));
  Ok(())
}

#[rstest]
fn test_timeout_kills_processes_started_by_tool(temp_dir: TempDir) -> Result<(), Box<dyn Error>> {
  // `sh` forks `sleep` as a separate process that inherits the standard error pipe.
  let invocation = ToolInvocation {
    program: "sh".to_string(),
    args: vec!["-c".to_string(), "echo started >&2; sleep 4; true".to_string()],
  };
  let output = fs::File::create(temp_dir.path().join("out.txt"))?;
  let executor = ProcessExecutor::with_timeout(Duration::from_millis(200));

  let start = Instant::now();
  let result = executor.execute(&invocation, output);
  assert!(start.elapsed() < Duration::from_secs(2), "execution took {:?}", start.elapsed());
  assert_matches!(result, Err(ToolFailure::TimedOut { stderr, .. }) if stderr == "started");
  Ok(())
}

#[rstest]
fn test_tool_runner_run(temp_dir: TempDir) -> Result<(), Box<dyn Error>> {
  let input = dev_util::write_file_in(temp_dir.path(), "in.txt", "b\na\n")?;
  let output = temp_dir.path().join("out.txt");
  let runner = ToolRunner::new(ProcessExecutor::new());
  runner.run("sort {params} {input}", &ToolParams::new().with("-r", true), &[input], &output)?;
  assert_eq!(fs::read_to_string(&output)?, "b\na\n");
  Ok(())
}
