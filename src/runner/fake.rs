//! Scripted runner for tests

use super::traits::{ChildProcess, Cmd, CommandRunner};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Records every command and answers from a script.
///
/// A response applies when its pattern is a substring of the rendered
/// command; the first match wins, unmatched commands return an empty string.
#[derive(Default)]
pub struct FakeRunner {
    calls: Mutex<Vec<Cmd>>,
    responses: Mutex<Vec<(String, String)>>,
    exit_codes: Mutex<Vec<(String, i32)>>,
    stalled: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, pattern: &str, output: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push((pattern.to_string(), output.to_string()));
        self
    }

    /// Spawned children matching `pattern` exit with `code` instead of 0
    pub fn exit_code(self, pattern: &str, code: i32) -> Self {
        self.exit_codes.lock().unwrap().push((pattern.to_string(), code));
        self
    }

    /// Spawned children matching `pattern` stay silent after their output until killed
    pub fn stall(self, pattern: &str) -> Self {
        self.stalled.lock().unwrap().push(pattern.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Cmd> {
        self.calls.lock().unwrap().clone()
    }

    /// Rendered commands, in call order
    pub fn rendered(&self) -> Vec<String> {
        self.calls().iter().map(|c| c.to_string()).collect()
    }

    /// Number of calls whose rendering contains `pattern`
    pub fn count(&self, pattern: &str) -> usize {
        self.rendered().iter().filter(|c| c.contains(pattern)).count()
    }

    fn answer(&self, cmd: &Cmd) -> String {
        self.calls.lock().unwrap().push(cmd.clone());
        let rendered = cmd.to_string();
        self.responses
            .lock()
            .unwrap()
            .iter()
            .find(|(pattern, _)| rendered.contains(pattern.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, cmd: &Cmd) -> String {
        self.answer(cmd)
    }

    async fn run_streaming(&self, cmd: &Cmd) -> String {
        self.answer(cmd)
    }

    async fn spawn(&self, cmd: &Cmd) -> Result<Box<dyn ChildProcess>> {
        let output = self.answer(cmd);
        let rendered = cmd.to_string();
        let exit_code = self
            .exit_codes
            .lock()
            .unwrap()
            .iter()
            .find(|(pattern, _)| rendered.contains(pattern.as_str()))
            .map_or(0, |(_, code)| *code);
        let stalled = self
            .stalled
            .lock()
            .unwrap()
            .iter()
            .any(|pattern| rendered.contains(pattern.as_str()));
        Ok(Box::new(FakeChild {
            lines: output.lines().map(str::to_string).collect(),
            exit_code,
            stalled,
        }))
    }
}

struct FakeChild {
    lines: VecDeque<String>,
    exit_code: i32,
    stalled: bool,
}

#[async_trait]
impl ChildProcess for FakeChild {
    async fn next_line(&mut self) -> Option<String> {
        match self.lines.pop_front() {
            Some(line) => Some(line),
            None if self.stalled => std::future::pending().await,
            None => None,
        }
    }

    async fn wait(&mut self) -> Result<Option<i32>> {
        if self.stalled {
            std::future::pending::<()>().await;
        }
        Ok(Some(self.exit_code))
    }

    async fn kill(&mut self) -> Result<()> {
        Ok(())
    }
}
