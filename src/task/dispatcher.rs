//! Task dispatcher - claims queued tasks and runs their handlers

use super::handlers::{HandlerContext, HandlerResult};
use super::registry::HandlerRegistry;
use crate::store::TaskQueue;
use anyhow::Result;
use edgebox_shared::{Task, TaskStatus, FAILED_TASK_RESULT, INVALID_TASK_RESULT};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Moves one task at a time through `created -> executing -> {finished, error}`
pub struct Dispatcher {
    queue: Arc<dyn TaskQueue>,
    registry: Arc<HandlerRegistry>,
    ctx: HandlerContext,
    /// Claim tasks without running any handler
    dev_mode: bool,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        registry: Arc<HandlerRegistry>,
        ctx: HandlerContext,
        dev_mode: bool,
    ) -> Self {
        Self {
            queue,
            registry,
            ctx,
            dev_mode,
        }
    }

    /// Claim and run the oldest pending task, if any
    pub async fn dispatch_next(&self) -> Result<Option<(i64, TaskStatus)>> {
        let Some(task) = self.queue.dequeue_oldest_pending()? else {
            return Ok(None);
        };

        // Durable before any handler code runs
        self.queue.mark_executing(task.id)?;
        info!("[DISPATCH] Task {} ({}) claimed", task.id, task.kind);

        let status = self.execute_claimed(&task).await?;
        Ok(Some((task.id, status)))
    }

    /// Run the handler of a task already in `executing` and record the outcome
    ///
    /// Never returns with the task still in `executing`, unless the queue
    /// itself fails.
    pub async fn execute_claimed(&self, task: &Task) -> Result<TaskStatus> {
        if self.dev_mode {
            info!("[DISPATCH] Dev release, skipping task {} ({})", task.id, task.kind);
            self.queue.mark_error(task.id, INVALID_TASK_RESULT)?;
            return Ok(TaskStatus::Error);
        }

        let Some(handler) = self.registry.get(&task.kind) else {
            warn!("[DISPATCH] No handler for task kind '{}'", task.kind);
            self.queue.mark_error(task.id, INVALID_TASK_RESULT)?;
            return Ok(TaskStatus::Error);
        };

        let outcome = AssertUnwindSafe(handler.call(&self.ctx, task.args.as_deref()))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(HandlerResult::Completed(payload))) => {
                info!("[DISPATCH] Task {} finished", task.id);
                self.queue.mark_finished(task.id, &payload)?;
                Ok(TaskStatus::Finished)
            }
            Ok(Ok(HandlerResult::Accepted(payload))) => {
                info!("[DISPATCH] Task {} handed off to a continuation", task.id);
                self.queue.mark_finished(task.id, &payload)?;
                Ok(TaskStatus::Finished)
            }
            Ok(Ok(HandlerResult::Failed(message))) => {
                warn!("[DISPATCH] Task {} ({}) failed: {}", task.id, task.kind, message);
                self.queue.mark_error(task.id, FAILED_TASK_RESULT)?;
                Ok(TaskStatus::Error)
            }
            Ok(Err(e)) => {
                warn!("[DISPATCH] Task {} has invalid arguments: {}", task.id, e);
                self.queue.mark_error(task.id, INVALID_TASK_RESULT)?;
                Ok(TaskStatus::Error)
            }
            Err(_) => {
                error!("[DISPATCH] Task {} ({}) panicked", task.id, task.kind);
                self.queue.mark_error(task.id, FAILED_TASK_RESULT)?;
                Ok(TaskStatus::Error)
            }
        }
    }

    /// Re-run the most recent task left in `executing` by a crash
    ///
    /// Older stuck tasks are abandoned where they are.
    pub async fn recover(&self) -> Result<Option<i64>> {
        let mut stuck = self.queue.list_executing()?.into_iter();
        let Some(latest) = stuck.next() else {
            return Ok(None);
        };

        for abandoned in stuck {
            warn!(
                "[DISPATCH] Abandoning task {} ({}) left executing since {}",
                abandoned.id, abandoned.kind, abandoned.created
            );
        }

        info!("[DISPATCH] Recovering task {} ({})", latest.id, latest.kind);
        self.execute_claimed(&latest).await?;
        Ok(Some(latest.id))
    }
}
