//! Cancellable periodic background tasks.
//!
//! Both the durable-tier maintenance pass and the quota sweep run on their own
//! ticker. Each ticker owns a child [`CancellationToken`], so stopping one task
//! never stops the other, while cancelling the parent token stops everything.
//! The work itself is an ordinary async function, which lets tests invoke a
//! single pass directly without waiting on the clock.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A named task that runs on a fixed interval
#[derive(Debug, Clone)]
pub struct PeriodicTask {
    name: &'static str,
    interval: Duration,
    run_immediately: bool,
}

impl PeriodicTask {
    pub fn new(name: &'static str, interval: Duration) -> Self {
        Self {
            name,
            interval: interval.max(Duration::from_millis(1)),
            run_immediately: false,
        }
    }

    /// Run the first pass as soon as the task starts instead of after one
    /// interval
    pub fn run_immediately(mut self) -> Self {
        self.run_immediately = true;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the ticker on the current runtime.
    ///
    /// `work` receives the task's token so long passes can stop between files.
    pub fn spawn<F, Fut>(self, parent: &CancellationToken, mut work: F) -> MaintenanceHandle
    where
        F: FnMut(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = parent.child_token();
        let task_token = token.clone();
        let name = self.name;

        let join = tokio::spawn(async move {
            log::debug!(
                "Background task '{}' starting (every {}s)",
                name,
                self.interval.as_secs()
            );

            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            if !self.run_immediately {
                // The first tick completes immediately
                interval.tick().await;
            }

            loop {
                tokio::select! {
                    biased;

                    _ = task_token.cancelled() => {
                        log::debug!("Background task '{}' stopping", name);
                        break;
                    }

                    _ = interval.tick() => {
                        work(task_token.clone()).await;
                    }
                }
            }
        });

        MaintenanceHandle { name, token, join }
    }
}

/// Handle to a running [`PeriodicTask`]
#[derive(Debug)]
pub struct MaintenanceHandle {
    name: &'static str,
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl MaintenanceHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Request a stop without waiting for the current pass to finish
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Stop the task and wait for it to exit
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.join.await {
            if e.is_panic() {
                log::warn!("Background task '{}' panicked: {}", self.name, e);
            }
        }
    }
}
