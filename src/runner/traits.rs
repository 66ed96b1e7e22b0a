//! Command runner abstraction for pluggable process backends

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};

/// An external program invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cmd {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory, inherited when `None`
    pub dir: Option<PathBuf>,
    /// Extra variables for this invocation only
    pub env: Vec<(String, String)>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Program and arguments, without environment (it may carry credentials)
impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// A running external process whose output is read line by line
#[async_trait]
pub trait ChildProcess: Send {
    /// Next line from stdout or stderr, `None` once both are closed
    async fn next_line(&mut self) -> Option<String>;

    /// Wait for exit, returning the exit code if there is one
    async fn wait(&mut self) -> Result<Option<i32>>;

    /// Terminate the process
    async fn kill(&mut self) -> Result<()>;
}

/// Runs external programs on behalf of handlers and status aggregators
///
/// `run` and `run_streaming` never fail: a spawn error or a non-zero exit is
/// folded into the returned text and callers look for failure markers in it.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion and capture output
    async fn run(&self, cmd: &Cmd) -> String;

    /// Run to completion, logging each line as it arrives
    async fn run_streaming(&self, cmd: &Cmd) -> String;

    /// Start a process and hand it back without waiting
    async fn spawn(&self, cmd: &Cmd) -> Result<Box<dyn ChildProcess>>;
}
