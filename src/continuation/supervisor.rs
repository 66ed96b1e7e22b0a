//! Continuation Supervisor
//!
//! Owns the background work that handlers leave behind after returning to
//! the dispatcher. Each body runs behind a panic boundary; any failure is
//! logged and written to the status option the continuation is responsible
//! for, since the task that spawned it is already finished.

use crate::store::Options;
use anyhow::Result;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Writes a failure message into the continuation's own status option
pub type FailureReporter = Box<dyn FnOnce(&Options, &str) -> Result<()> + Send>;

/// A continuation that has been spawned and not yet reaped
struct ContinuationHandle {
    name: String,
    started: Instant,
    task: JoinHandle<()>,
}

/// Registry of detached continuations
#[derive(Clone)]
pub struct ContinuationSupervisor {
    options: Options,
    handles: Arc<Mutex<Vec<ContinuationHandle>>>,
}

impl ContinuationSupervisor {
    pub fn new(options: Options) -> Self {
        Self {
            options,
            handles: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn handles(&self) -> MutexGuard<'_, Vec<ContinuationHandle>> {
        self.handles.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Detach `body`; the engine never waits for or cancels it
    pub fn spawn<F>(&self, name: &str, on_failure: FailureReporter, body: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let options = self.options.clone();
        let label = name.to_string();

        let task = tokio::spawn(async move {
            let failure = match AssertUnwindSafe(body).catch_unwind().await {
                Ok(Ok(())) => {
                    info!("[CONTINUATION] {} completed", label);
                    None
                }
                Ok(Err(e)) => {
                    error!("[CONTINUATION] {} failed: {:#}", label, e);
                    Some(format!("{:#}", e))
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!("[CONTINUATION] {} panicked: {}", label, message);
                    Some(message)
                }
            };

            if let Some(message) = failure {
                if let Err(e) = on_failure(&options, &message) {
                    error!("[CONTINUATION] {} could not report failure: {:#}", label, e);
                }
            }
        });

        info!("[CONTINUATION] {} started", name);
        self.handles().push(ContinuationHandle {
            name: name.to_string(),
            started: Instant::now(),
            task,
        });
    }

    /// Drop finished continuations, returning how many are still running
    pub fn reap(&self) -> usize {
        let mut handles = self.handles();
        handles.retain(|handle| {
            if handle.task.is_finished() {
                debug!(
                    "[CONTINUATION] reaped {} after {:?}",
                    handle.name,
                    handle.started.elapsed()
                );
                false
            } else {
                true
            }
        });
        handles.len()
    }

    /// Names of continuations still in flight
    pub fn active(&self) -> Vec<String> {
        self.handles()
            .iter()
            .filter(|handle| !handle.task.is_finished())
            .map(|handle| handle.name.clone())
            .collect()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "continuation panicked".to_string()
    }
}
