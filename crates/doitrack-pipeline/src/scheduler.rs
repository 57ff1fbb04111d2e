//! Periodic stage scheduler
//!
//! Runs every registered stage in its own task on its own interval. A stage is
//! only ever run by that one task, so a run never overlaps the previous run of
//! the same stage; ticks missed while a run is in progress are skipped.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, info_span, Instrument, Span};

use crate::stages::PipelineStage;

pub struct StageScheduler {
    entries: Vec<(Arc<dyn PipelineStage>, Duration)>,
    span: Span,
}

impl Default for StageScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl StageScheduler {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            span: info_span!("scheduler"),
        }
    }

    pub fn add(mut self, stage: Arc<dyn PipelineStage>, every: Duration) -> Self {
        self.entries.push((stage, every));
        self
    }

    /// Run until `shutdown` resolves, then let in-flight runs finish and return
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let Self { entries, span } = self;
        let (stop_tx, stop_rx) = watch::channel(false);

        let handles: Vec<JoinHandle<()>> = entries
            .into_iter()
            .map(|(stage, every)| {
                let stage_loop = StageLoop {
                    stage,
                    every,
                    stop: stop_rx.clone(),
                };
                tokio::spawn(stage_loop.run().instrument(span.clone()))
            })
            .collect();

        info!(parent: &span, "Scheduler started with {} stages", handles.len());

        shutdown.await;
        info!(parent: &span, "Shutdown requested, waiting for running stages");
        let _ = stop_tx.send(true);

        for handle in handles {
            if let Err(e) = handle.await {
                error!(parent: &span, "Stage task panicked: {}", e);
            }
        }

        info!(parent: &span, "Scheduler stopped");
    }
}

/// One stage's loop; owns the only handle through which the stage is run
struct StageLoop {
    stage: Arc<dyn PipelineStage>,
    every: Duration,
    stop: watch::Receiver<bool>,
}

impl StageLoop {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("{} stage scheduled every {:?}", self.stage.stage(), self.every);

        loop {
            tokio::select! {
                biased;
                changed = self.stop.changed() => {
                    if changed.is_err() || *self.stop.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.stage.run().await {
                        Ok(report) => info!("{}", report.summary()),
                        Err(e) => error!(stage = %self.stage.stage(), error = %e, "Stage run failed"),
                    }
                }
            }
        }

        info!("{} stage loop stopped", self.stage.stage());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::PipelineResult;
    use crate::selector::Stage;
    use crate::stages::StageReport;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStage {
        stage: Stage,
        runs: AtomicUsize,
        active: AtomicUsize,
        overlapped: AtomicUsize,
        work: Duration,
    }

    impl CountingStage {
        fn new(stage: Stage, work: Duration) -> Arc<Self> {
            Arc::new(Self {
                stage,
                runs: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                overlapped: AtomicUsize::new(0),
                work,
            })
        }
    }

    #[async_trait]
    impl PipelineStage for CountingStage {
        fn stage(&self) -> Stage {
            self.stage
        }

        async fn run(&self) -> PipelineResult<StageReport> {
            if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlapped.fetch_add(1, Ordering::SeqCst);
            }
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.work).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(StageReport::new(self.stage))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_stage_runs_on_its_cadence() {
        let fast = CountingStage::new(Stage::Merge, Duration::ZERO);
        let slow = CountingStage::new(Stage::Validation, Duration::ZERO);

        StageScheduler::new()
            .add(fast.clone(), Duration::from_secs(10))
            .add(slow.clone(), Duration::from_secs(60))
            .run_until(tokio::time::sleep(Duration::from_secs(25)))
            .await;

        // first tick fires immediately
        assert_eq!(fast.runs.load(Ordering::SeqCst), 3);
        assert_eq!(slow.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_runs_never_overlap() {
        let stage = CountingStage::new(Stage::Citation, Duration::from_secs(25));

        StageScheduler::new()
            .add(stage.clone(), Duration::from_secs(10))
            .run_until(tokio::time::sleep(Duration::from_secs(100)))
            .await;

        assert_eq!(stage.overlapped.load(Ordering::SeqCst), 0);
        assert!(stage.runs.load(Ordering::SeqCst) >= 3);
    }
}
