//! Engine - the single-threaded tick loop
//!
//! Each tick runs, in order: crash recovery (first tick only), the
//! scheduled actions, one queued task, and reaping of finished
//! continuations. Nothing else ever runs concurrently with a task except
//! detached continuations.

use crate::config::AgentConfig;
use crate::continuation::ContinuationSupervisor;
use crate::scheduler::Scheduler;
use crate::store::TaskQueue;
use crate::task::{Dispatcher, HandlerContext, HandlerRegistry};
use anyhow::Result;
use edgebox_shared::TaskStatus;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What a single iteration of the loop did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Workspace not built yet; the tick counter did not move
    NotReady,
    Ran {
        tick: u64,
        /// Task id and final status, when a task was pending
        dispatched: Option<(i64, TaskStatus)>,
    },
}

pub struct Engine {
    config: Arc<AgentConfig>,
    dispatcher: Dispatcher,
    scheduler: Scheduler,
    continuations: ContinuationSupervisor,
    tick: u64,
}

impl Engine {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        registry: Arc<HandlerRegistry>,
        ctx: HandlerContext,
    ) -> Self {
        let config = ctx.config.clone();
        let continuations = ctx.continuations.clone();
        Self {
            dispatcher: Dispatcher::new(queue, registry.clone(), ctx.clone(), config.is_dev()),
            scheduler: Scheduler::new(ctx, registry),
            continuations,
            config,
            tick: 0,
        }
    }

    /// Ticks completed since startup
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// The workspace builder drops a marker file once the runtime exists
    pub fn is_ready(&self) -> bool {
        self.config.paths.ready_marker().exists()
    }

    /// One iteration of the loop, without the pause that follows it
    pub async fn run_once(&mut self) -> Result<TickOutcome> {
        if !self.is_ready() {
            return Ok(TickOutcome::NotReady);
        }

        // Tick stays at 0 until recovery succeeds
        if self.tick == 0 {
            if let Some(id) = self.dispatcher.recover().await? {
                info!("[ENGINE] Recovered task {} after restart", id);
            }
        }

        self.tick += 1;
        let tick = self.tick;

        let failures = self.scheduler.run_schedules(tick).await;
        if failures > 0 {
            debug!("[ENGINE] {} scheduled actions failed on tick {}", failures, tick);
        }

        let dispatched = self.dispatcher.dispatch_next().await?;

        let running = self.continuations.reap();
        if running > 0 {
            debug!("[ENGINE] {} continuations in flight: {:?}", running, self.continuations.active());
        }

        Ok(TickOutcome::Ran { tick, dispatched })
    }

    /// Tick until `shutdown` resolves; the current tick always completes
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("[ENGINE] {} started ({} release)", self.config.name, self.config.release.as_str());

        loop {
            let pause = match self.run_once().await {
                Ok(TickOutcome::NotReady) => {
                    warn!(
                        "[ENGINE] Workspace not ready ({} missing), waiting",
                        self.config.paths.ready_marker().display()
                    );
                    self.config.timing.not_ready_sleep()
                }
                Ok(TickOutcome::Ran { .. }) => self.config.timing.tick_interval(),
                Err(e) => {
                    error!("[ENGINE] tick {} error: {:?}", self.tick, e);
                    self.config.timing.tick_interval()
                }
            };

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!("[ENGINE] Stopped after {} ticks", self.tick);
    }
}
