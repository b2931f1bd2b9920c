//! Reconciles running worker loops to the configured count.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::TRACING_TARGET_DAEMON as TARGET;
use crate::config::ConfigHandle;
use crate::crawler::Crawler;
use crate::daemon::worker::{STOP_SENTINEL, WorkerLoop};

/// Handle on one spawned worker loop.
pub struct LoopHandle {
    name: String,
    delay: Arc<std::sync::atomic::AtomicI64>,
    task: JoinHandle<()>,
}

impl LoopHandle {
    /// Requests an asynchronous stop. Idempotent; the loop observes the
    /// sentinel on its next wakeup.
    pub fn stop(&self) {
        self.delay.store(STOP_SENTINEL, Ordering::SeqCst);
    }

    /// Returns `true` until the loop has fully stopped. A stopping loop
    /// still counts as running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Returns the loop name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Owns the set of worker loops and reconciles it to the configured
/// target count.
///
/// Reconciliation never blocks: surplus loops are asked to stop and
/// drain on their own schedule, and terminated loops are pruned on the
/// next pass.
pub struct LoopSupervisor {
    crawler: Arc<Crawler>,
    config: ConfigHandle,
    loops: Mutex<Vec<LoopHandle>>,
    spawned: AtomicUsize,
}

impl LoopSupervisor {
    /// Creates a supervisor over the given crawler and configuration.
    pub fn new(crawler: Arc<Crawler>, config: ConfigHandle) -> Self {
        Self {
            crawler,
            config,
            loops: Mutex::new(Vec::new()),
            spawned: AtomicUsize::new(0),
        }
    }

    /// Reconciles toward the configured loop count.
    pub fn run(&self) {
        let target = self.config.current().count;
        self.reconcile(target);
    }

    /// Reconciles toward zero loops.
    pub fn stop(&self) {
        self.reconcile(0);
    }

    /// Returns the number of loops still running, stopping included.
    #[must_use]
    pub fn status(&self) -> usize {
        let guard = self.loops.lock();
        let loops = guard.expect("should not be already held");
        loops.iter().filter(|handle| handle.is_running()).count()
    }

    fn reconcile(&self, target: usize) {
        let guard = self.loops.lock();
        let mut loops = guard.expect("should not be already held");
        loops.retain(LoopHandle::is_running);

        let running = loops.len();
        if running < target {
            for _ in running..target {
                let ordinal = self.spawned.fetch_add(1, Ordering::SeqCst) + 1;
                let name = format!("{}-{ordinal}", self.crawler.name());
                let worker = WorkerLoop::new(name.clone());
                let delay = worker.delay();
                let task = tokio::spawn(worker.run(self.crawler.clone()));
                loops.push(LoopHandle { name, delay, task });
            }
        } else {
            for handle in loops.iter().skip(target) {
                handle.stop();
            }
        }

        tracing::info!(
            target: TARGET,
            running,
            target_count = target,
            "reconciled worker loops"
        );
    }

    /// Watches the configuration channel, re-reconciling whenever the
    /// loop count changes.
    ///
    /// Returns the watcher task; aborting it stops watching without
    /// touching the loops.
    pub fn watch(self: Arc<Self>) -> JoinHandle<()> {
        let mut changes = self.config.subscribe();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(patch) => {
                        if patch.iter().any(|op| op.path == "/count") {
                            self.run();
                        }
                    }
                    // Missed patches may have included /count; resync.
                    Err(RecvError::Lagged(_)) => self.run(),
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
