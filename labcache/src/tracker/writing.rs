use std::io::{self, Stderr, Stdout};
use std::path::Path;

use crate::artifact::{ArtifactId, ArtifactStatus};
use crate::error::PullError;
use crate::fingerprint::Fingerprint;
use crate::runner::{ToolFailure, ToolInvocation};
use crate::tracker::Tracker;

/// A [`Tracker`] that writes events to a [`std::io::Write`] instance, for example [`std::io::Stderr`].
#[derive(Debug, Clone)]
pub struct WritingTracker<W> {
  writer: W,
  indentation: u32,
}

impl Default for WritingTracker<Stdout> {
  #[inline]
  fn default() -> Self { Self::new_stdout_writer() }
}

impl Default for WritingTracker<Stderr> {
  #[inline]
  fn default() -> Self { Self::new_stderr_writer() }
}

impl<W: io::Write> WritingTracker<W> {
  #[inline]
  pub fn new(writer: W) -> Self { Self { writer, indentation: 0 } }

  #[inline]
  pub fn writer(&self) -> &W { &self.writer }
  #[inline]
  pub fn into_writer(self) -> W { self.writer }
}

impl WritingTracker<Stdout> {
  #[inline]
  pub fn new_stdout_writer() -> Self { Self::new(io::stdout()) }
}

impl WritingTracker<Stderr> {
  #[inline]
  pub fn new_stderr_writer() -> Self { Self::new(io::stderr()) }
}

impl<W: io::Write> Tracker for WritingTracker<W> {
  #[inline]
  fn pull_start(&mut self, artifact: &ArtifactId) {
    self.writeln(format_args!("→ {}", artifact));
    self.indent();
  }
  #[inline]
  fn pull_end(&mut self, artifact: &ArtifactId, result: Result<&Path, &PullError>) {
    self.unindent();
    match result {
      Ok(path) => self.writeln(format_args!("← {} [{}]", artifact, path.display())),
      Err(e) => self.writeln(format_args!("← {} [error: {}]", artifact, e)),
    }
  }

  #[inline]
  fn source_found(&mut self, _artifact: &ArtifactId, path: &Path) {
    self.writeln(format_args!("✓ {}", path.display()));
  }
  #[inline]
  fn cache_hit(&mut self, _artifact: &ArtifactId, fingerprint: &Fingerprint, path: &Path) {
    self.writeln(format_args!("✓ {} [{}]", path.display(), fingerprint));
  }
  #[inline]
  fn build_wait(&mut self, _artifact: &ArtifactId, fingerprint: &Fingerprint) {
    self.writeln(format_args!("… waiting for build of {}", fingerprint));
  }
  #[inline]
  fn status_change(&mut self, _artifact: &ArtifactId, status: ArtifactStatus) {
    self.writeln(format_args!("= {}", status));
  }

  #[inline]
  fn execute_start(&mut self, _artifact: &ArtifactId, fingerprint: &Fingerprint, invocation: &ToolInvocation) {
    self.writeln(format_args!("▶ {} [{}]", invocation, fingerprint));
    self.indent();
  }
  #[inline]
  fn execute_end(&mut self, _artifact: &ArtifactId, _fingerprint: &Fingerprint, result: Result<&Path, &ToolFailure>) {
    self.unindent();
    match result {
      Ok(path) => self.writeln(format_args!("◀ {}", path.display())),
      Err(e) => {
        self.writeln(format_args!("◀ error: {}", e));
        if let Some(diagnostics) = e.diagnostics().filter(|d| !d.is_empty()) {
          self.indent();
          for line in diagnostics.lines() {
            self.writeln(format_args!("{}", line));
          }
          self.unindent();
        }
      }
    }
  }
}

impl<W: io::Write> WritingTracker<W> {
  #[inline]
  fn writeln(&mut self, args: std::fmt::Arguments) {
    self.write_indentation();
    writeln!(&mut self.writer, "{}", args).ok();
  }
  #[inline]
  fn write_indentation(&mut self) {
    for _ in 0..self.indentation {
      write!(&mut self.writer, " ").ok();
    }
  }

  #[inline]
  fn indent(&mut self) {
    self.indentation = self.indentation.saturating_add(1);
  }
  #[inline]
  fn unindent(&mut self) {
    self.indentation = self.indentation.saturating_sub(1);
  }
}
