//! Running external tools.
//!
//! A tool's command template is expanded into a [`ToolInvocation`]: a program and a structured list of arguments. The
//! invocation is never passed through a shell, so parameter values and input paths cannot inject commands. Execution
//! is abstracted by [`CommandExecutor`], implemented for real processes by [`ProcessExecutor`].

use std::fmt::{self, Display, Formatter};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::artifact::{ParamValue, ToolParams};

/// Placeholder in a command template replaced by the expanded tool parameters.
pub const PARAMS_PLACEHOLDER: &str = "{params}";
/// Placeholder in a command template replaced by the resolved input paths.
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// A fully expanded tool command: a program and its arguments.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct ToolInvocation {
  pub program: String,
  pub args: Vec<String>,
}

impl Display for ToolInvocation {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    f.write_str(&self.program)?;
    for arg in &self.args {
      if arg.is_empty() || arg.contains(char::is_whitespace) {
        write!(f, " {:?}", arg)?;
      } else {
        write!(f, " {}", arg)?;
      }
    }
    Ok(())
  }
}

/// Expands `params` into command-line tokens in declaration order: `name value` for each parameter, only `name` for a
/// `true` flag, and nothing for a `false` flag.
pub fn expand_params(params: &ToolParams) -> Vec<String> {
  let mut tokens = Vec::with_capacity(params.len() * 2);
  for (name, value) in params.iter() {
    match value {
      ParamValue::Bool(true) => tokens.push(name.to_string()),
      ParamValue::Bool(false) => {}
      value => {
        tokens.push(name.to_string());
        tokens.push(value.to_string());
      }
    }
  }
  tokens
}

/// Expands `command_template` into a [`ToolInvocation`].
///
/// The template is split on whitespace. A token that is exactly `{params}` is replaced by the [expanded
/// parameters](expand_params), and a token that is exactly `{input}` by one argument per input path. A placeholder
/// embedded in a longer token, as in `--in={input}`, is replaced by the space-joined expansion within that single
/// argument. The first resulting token is the program.
pub fn expand_command(
  command_template: &str,
  params: &ToolParams,
  input_paths: &[PathBuf],
) -> Result<ToolInvocation, TemplateError> {
  let param_tokens = expand_params(params);
  let input_tokens: Vec<String> = input_paths.iter().map(|p| p.to_string_lossy().into_owned()).collect();

  let mut tokens = Vec::new();
  for token in command_template.split_whitespace() {
    match token {
      PARAMS_PLACEHOLDER => tokens.extend(param_tokens.iter().cloned()),
      INPUT_PLACEHOLDER => tokens.extend(input_tokens.iter().cloned()),
      token => tokens.push(substitute_embedded(token, &param_tokens.join(" "), &input_tokens.join(" "))),
    }
  }

  let mut tokens = tokens.into_iter();
  let program = match tokens.next() {
    Some(program) if !program.is_empty() => program,
    _ => return Err(TemplateError::NoProgram { template: command_template.to_string() }),
  };
  Ok(ToolInvocation { program, args: tokens.collect() })
}

/// Replaces placeholders embedded in `token` in a single left-to-right pass, so that placeholder text inside a
/// substituted value stays literal.
fn substitute_embedded(token: &str, params: &str, input: &str) -> String {
  let mut result = String::with_capacity(token.len());
  let mut rest = token;
  while let Some(start) = rest.find('{') {
    result.push_str(&rest[..start]);
    rest = &rest[start..];
    if let Some(after) = rest.strip_prefix(PARAMS_PLACEHOLDER) {
      result.push_str(params);
      rest = after;
    } else if let Some(after) = rest.strip_prefix(INPUT_PLACEHOLDER) {
      result.push_str(input);
      rest = after;
    } else {
      result.push('{');
      rest = &rest[1..];
    }
  }
  result.push_str(rest);
  result
}

#[derive(Clone, Eq, PartialEq, Debug, Error)]
pub enum TemplateError {
  #[error("command template '{template}' does not name a program")]
  NoProgram { template: String },
}


/// Failure of a tool run.
#[derive(Debug, Error)]
pub enum ToolFailure {
  #[error(transparent)]
  Template(#[from] TemplateError),
  #[error("failed to start '{program}'")]
  Spawn {
    program: String,
    #[source]
    source: io::Error,
  },
  #[error("failed to wait for '{program}'")]
  Wait {
    program: String,
    #[source]
    source: io::Error,
  },
  #[error("'{program}' exited with {}{}", exit_code_text(.code), stderr_suffix(.stderr))]
  Exit {
    program: String,
    code: Option<i32>,
    stderr: String,
  },
  #[error("'{program}' timed out after {after:?} and was killed{}", stderr_suffix(.stderr))]
  TimedOut {
    program: String,
    after: Duration,
    stderr: String,
  },
}

impl ToolFailure {
  /// Returns the diagnostic text captured from the tool's standard error, if any was captured.
  pub fn diagnostics(&self) -> Option<&str> {
    match self {
      ToolFailure::Exit { stderr, .. } | ToolFailure::TimedOut { stderr, .. } => Some(stderr),
      _ => None,
    }
  }
}

fn exit_code_text(code: &Option<i32>) -> String {
  match code {
    Some(code) => format!("status {}", code),
    None => "a signal".to_string(),
  }
}

fn stderr_suffix(stderr: &str) -> String {
  if stderr.is_empty() {
    String::new()
  } else {
    format!(": {}", stderr)
  }
}


/// Executes tool invocations. The invocation's standard output must be written to `output`.
pub trait CommandExecutor {
  fn execute(&self, invocation: &ToolInvocation, output: File) -> Result<(), ToolFailure>;
}

impl<E: CommandExecutor + ?Sized> CommandExecutor for &E {
  #[inline]
  fn execute(&self, invocation: &ToolInvocation, output: File) -> Result<(), ToolFailure> {
    (**self).execute(invocation, output)
  }
}

/// [`CommandExecutor`] that runs invocations as child processes, without a shell.
///
/// Standard input is closed, standard output goes to the output file, and standard error is captured as diagnostics.
/// A nonzero exit status is the only failure signal. With a timeout set, a child still running when the timeout expires
/// is killed. On unix, the child runs in its own process group, and the whole group is killed, including processes the
/// tool started itself.
#[derive(Default, Clone, Debug)]
pub struct ProcessExecutor {
  timeout: Option<Duration>,
}

impl ProcessExecutor {
  #[inline]
  pub fn new() -> Self { Self::default() }
  #[inline]
  pub fn with_timeout(timeout: Duration) -> Self { Self { timeout: Some(timeout) } }
  #[inline]
  pub fn timeout(&self) -> Option<Duration> { self.timeout }
}

impl CommandExecutor for ProcessExecutor {
  fn execute(&self, invocation: &ToolInvocation, output: File) -> Result<(), ToolFailure> {
    let program = &invocation.program;
    let mut command = Command::new(program);
    command
      .args(&invocation.args)
      .stdin(Stdio::null())
      .stdout(Stdio::from(output))
      .stderr(Stdio::piped());
    #[cfg(unix)]
    std::os::unix::process::CommandExt::process_group(&mut command, 0);
    let mut child = command.spawn()
      .map_err(|source| ToolFailure::Spawn { program: program.clone(), source })?;

    let stderr = StderrDrain::start(&mut child);
    let status = match self.timeout {
      None => child.wait().map(Some),
      Some(timeout) => wait_with_timeout(&mut child, timeout),
    };
    let stderr = match status {
      // A process that left the tool's process group may still hold the pipe open.
      Ok(None) => stderr.finish_within(KILLED_STDERR_GRACE),
      _ => stderr.finish(),
    };

    match status {
      Err(source) => Err(ToolFailure::Wait { program: program.clone(), source }),
      Ok(None) => Err(ToolFailure::TimedOut { program: program.clone(), after: self.timeout.unwrap_or_default(), stderr }),
      Ok(Some(status)) if status.success() => Ok(()),
      Ok(Some(status)) => Err(ToolFailure::Exit { program: program.clone(), code: status.code(), stderr }),
    }
  }
}

/// How long to keep reading standard error of a killed tool.
const KILLED_STDERR_GRACE: Duration = Duration::from_millis(200);

/// Standard error of a child, read on another thread so that a chatty tool cannot block on a full pipe.
struct StderrDrain {
  buffer: Arc<Mutex<Vec<u8>>>,
  closed: Option<Receiver<()>>,
}

impl StderrDrain {
  fn start(child: &mut Child) -> Self {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let Some(mut stderr) = child.stderr.take() else {
      return Self { buffer, closed: None };
    };
    let (sender, closed) = mpsc::channel();
    let shared = buffer.clone();
    thread::spawn(move || {
      let mut chunk = [0u8; 4096];
      loop {
        match stderr.read(&mut chunk) {
          Ok(0) => break,
          Ok(n) => shared.lock().unwrap_or_else(PoisonError::into_inner).extend_from_slice(&chunk[..n]),
          Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
          Err(_) => break,
        }
      }
      let _ = sender.send(());
    });
    Self { buffer, closed: Some(closed) }
  }

  /// Waits until standard error is closed and returns its text.
  fn finish(self) -> String {
    if let Some(closed) = &self.closed {
      let _ = closed.recv();
    }
    self.text()
  }

  /// Waits at most `grace` for standard error to close and returns the text read so far.
  fn finish_within(self, grace: Duration) -> String {
    if let Some(closed) = &self.closed {
      let _ = closed.recv_timeout(grace);
    }
    self.text()
  }

  fn text(&self) -> String {
    let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
    String::from_utf8_lossy(&buffer).trim_end().to_string()
  }
}

/// Waits for `child` to exit, returning `Ok(None)` after killing it if it does not exit within `timeout`.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<Option<ExitStatus>, io::Error> {
  let deadline = Instant::now() + timeout;
  let mut poll_interval = Duration::from_millis(1);
  loop {
    if let Some(status) = child.try_wait()? {
      return Ok(Some(status));
    }
    let now = Instant::now();
    if now >= deadline {
      // The child may exit between `try_wait` and `kill`; either way it is reaped by `wait`.
      let _ = kill_process_group(child);
      child.wait()?;
      return Ok(None);
    }
    thread::sleep(poll_interval.min(deadline - now));
    poll_interval = (poll_interval * 2).min(Duration::from_millis(50));
  }
}


/// Kills `child` and, on unix, every other process in its process group.
fn kill_process_group(child: &mut Child) -> io::Result<()> {
  #[cfg(unix)]
  {
    // The child leads its own group, so its pid is the group id; a negative pid signals the whole group.
    let group = child.id() as libc::pid_t;
    if unsafe { libc::kill(-group, libc::SIGKILL) } == 0 {
      return Ok(());
    }
  }
  child.kill()
}


/// Runs tools: expands command templates and executes them with an [executor](CommandExecutor).
#[derive(Default, Clone, Debug)]
pub struct ToolRunner<E = ProcessExecutor> {
  executor: E,
}

impl<E: CommandExecutor> ToolRunner<E> {
  #[inline]
  pub fn new(executor: E) -> Self { Self { executor } }

  #[inline]
  pub fn executor(&self) -> &E { &self.executor }

  /// Expands `command_template` with `params` and `input_paths`, then executes it with standard output written to
  /// `output_path`, which is created or truncated. On failure, anything the tool wrote remains in `output_path`.
  pub fn run(
    &self,
    command_template: &str,
    params: &ToolParams,
    input_paths: &[PathBuf],
    output_path: &Path,
  ) -> Result<(), ToolFailure> {
    let invocation = expand_command(command_template, params, input_paths)?;
    let output = File::create(output_path)
      .map_err(|source| ToolFailure::Spawn { program: invocation.program.clone(), source })?;
    self.execute(&invocation, output)
  }

  /// Executes an already expanded `invocation` with standard output written to `output`.
  #[inline]
  pub fn execute(&self, invocation: &ToolInvocation, output: File) -> Result<(), ToolFailure> {
    self.executor.execute(invocation, output)
  }
}
