#![allow(dead_code)]

use std::fs::File;
use std::io::{Stdout, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use rstest::fixture;
use tempfile::TempDir;

use labcache::{Artifact, ArtifactId, Cache, CommandExecutor, InMemoryStore, PullError, Resolver, Tool, ToolFailure, ToolInvocation, ToolRunner, ToolSet};
use labcache::fs::checksum_file;
use labcache::tracker::CompositeTracker;
use labcache::tracker::event::EventTracker;
use labcache::tracker::writing::WritingTracker;

/// Testing tracker composed of an [`EventTracker`] for testing and stdout [`WritingTracker`] for debugging.
pub type TestTracker = CompositeTracker<EventTracker, WritingTracker<Stdout>>;
pub fn new_test_tracker() -> TestTracker {
  CompositeTracker(EventTracker::default(), WritingTracker::new_stdout_writer())
}

/// Testing [`Resolver`] using an [`InMemoryStore`], a [`ToolSet`], and [`TestTracker`].
pub type TestResolver<E = FakeExecutor> = Resolver<InMemoryStore, ToolSet, E, TestTracker>;
pub fn new_test_resolver<E: CommandExecutor>(
  store: InMemoryStore,
  tools: ToolSet,
  executor: E,
  cache_root: impl Into<PathBuf>,
) -> TestResolver<E> {
  let cache = Cache::new(cache_root, ".tar.gz");
  Resolver::with_tracker(store, tools, ToolRunner::new(executor), cache, new_test_tracker())
}

#[fixture]
pub fn temp_dir() -> TempDir {
  dev_util::create_temp_dir().expect("failed to create temporary directory")
}

/// Tools used throughout the tests.
pub fn test_tools() -> ToolSet {
  ToolSet::new()
    .with(Tool::new("sort", "sort {params} {input}"))
    .with(Tool::new("merge", "sort -m {params} {input}"))
}

/// Writes `contents` to file `name` in `dir` and returns a source artifact `id` attached to it.
pub fn source_artifact(dir: &Path, id: &str, name: &str, contents: &str) -> Artifact {
  let path = dev_util::write_file_in(dir, name, contents).expect("failed to write source file");
  let checksum = checksum_file(&path).expect("failed to checksum source file");
  Artifact::source(id, path, checksum)
}

/// Testing extensions for [`TestResolver`].
pub trait TestResolverExt {
  /// Clears recorded events, pulls `id`, then runs `test_assert_func` on the event tracker for test assertion purposes.
  fn pull_then_assert(
    &self,
    id: &str,
    test_assert_func: impl FnOnce(&EventTracker),
  ) -> Result<PathBuf, PullError>;

  /// Pulls `id`, then asserts that no tool was executed.
  fn pull_then_assert_no_execute(&self, id: &str) -> Result<PathBuf, PullError> {
    self.pull_then_assert(id, |t|
      assert!(!t.any_execute(), "expected no tool execution when pulling {}, but a tool was executed", id),
    )
  }
  /// Pulls `id`, then asserts that its tool was executed exactly once.
  fn pull_then_assert_one_execute(&self, id: &str) -> Result<PathBuf, PullError> {
    self.pull_then_assert(id, |t|
      assert!(t.one_execute_of(&id.into()), "expected one execution for {}, but there were none or several", id),
    )
  }
}
impl<E: CommandExecutor> TestResolverExt for TestResolver<E> {
  fn pull_then_assert(
    &self,
    id: &str,
    test_assert_func: impl FnOnce(&EventTracker),
  ) -> Result<PathBuf, PullError> {
    self.tracker().0.clear();
    let result = self.pull(&ArtifactId::from(id));
    test_assert_func(&self.tracker().0);
    result
  }
}


/// [`CommandExecutor`] that does not run processes. A successful execution writes the invocation's command line to
/// the output file. Failures can be scheduled with [`fail_next`](Self::fail_next).
#[derive(Default, Debug)]
pub struct FakeExecutor {
  invocations: Mutex<Vec<ToolInvocation>>,
  failures_left: AtomicUsize,
  delay: Option<Duration>,
}

/// Standard error text of scheduled failures.
pub const FAKE_FAILURE_STDERR: &str = "fake failure";
/// Output written by scheduled failures before failing.
pub const FAKE_PARTIAL_OUTPUT: &str = "partial";

impl FakeExecutor {
  pub fn new() -> Self { Self::default() }
  /// Creates an executor that sleeps for `delay` in every execution.
  pub fn with_delay(delay: Duration) -> Self { Self { delay: Some(delay), ..Self::default() } }

  /// Makes the next `count` executions fail with exit code 1.
  pub fn fail_next(&self, count: usize) {
    self.failures_left.store(count, Ordering::SeqCst);
  }

  pub fn invocations(&self) -> Vec<ToolInvocation> {
    self.invocations.lock().unwrap().clone()
  }
  pub fn execute_count(&self) -> usize {
    self.invocations.lock().unwrap().len()
  }

  /// Returns the output a successful execution of `invocation` writes.
  pub fn expected_output(invocation: &ToolInvocation) -> String {
    format!("{}\n", invocation)
  }
}

impl CommandExecutor for FakeExecutor {
  fn execute(&self, invocation: &ToolInvocation, mut output: File) -> Result<(), ToolFailure> {
    self.invocations.lock().unwrap().push(invocation.clone());
    if let Some(delay) = self.delay {
      thread::sleep(delay);
    }
    let program = invocation.program.clone();
    let write_error = |source| ToolFailure::Wait { program: program.clone(), source };

    let fail = self.failures_left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok();
    if fail {
      output.write_all(FAKE_PARTIAL_OUTPUT.as_bytes()).map_err(write_error)?;
      return Err(ToolFailure::Exit { program: program.clone(), code: Some(1), stderr: FAKE_FAILURE_STDERR.to_string() });
    }
    output.write_all(Self::expected_output(invocation).as_bytes()).map_err(write_error)?;
    Ok(())
  }
}
