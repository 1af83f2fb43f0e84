use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::config::DispatcherConfig;
use crate::error::DispatchError;
use crate::frame_source::{FrameSource, ImageReference};
use crate::relay::{AnalysisResult, Analyzer};
use crate::session::SessionHandle;

type FrameHook = Box<dyn Fn(&ImageReference) + Send + Sync>;
type ResultHook = Box<dyn Fn(AnalysisResult) + Send + Sync>;
type ErrorHook = Box<dyn Fn(&DispatchError) + Send + Sync>;

/// Serializes dispatch attempts: none while one is in flight, none within
/// `min_cooldown` of the last completion.
#[derive(Debug, Clone)]
pub struct DispatchGuard {
    in_flight: bool,
    last_completed: Option<Instant>,
    min_cooldown: Duration,
}

impl DispatchGuard {
    pub fn new(min_cooldown: Duration) -> Self {
        Self {
            in_flight: false,
            last_completed: None,
            min_cooldown,
        }
    }

    /// Claims the slot if allowed.
    pub fn try_begin(&mut self, now: Instant) -> bool {
        if self.in_flight {
            return false;
        }
        if let Some(last) = self.last_completed {
            if now.saturating_duration_since(last) < self.min_cooldown {
                return false;
            }
        }
        self.in_flight = true;
        true
    }

    /// Releases the slot; success or failure both count as completion.
    pub fn complete(&mut self, now: Instant) {
        self.in_flight = false;
        self.last_completed = Some(now);
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
}

/// Acquires frames on a fixed cadence and forwards them for analysis.
pub struct FrameDispatcher {
    source: Box<dyn FrameSource>,
    analyzer: Arc<dyn Analyzer>,
    prompt: String,
    interval: Duration,
    guard: DispatchGuard,
    frame_hooks: Vec<FrameHook>,
    result_hooks: Vec<ResultHook>,
    error_hooks: Vec<ErrorHook>,
    stats: DispatchStats,
}

impl FrameDispatcher {
    pub fn new(
        source: Box<dyn FrameSource>,
        analyzer: Arc<dyn Analyzer>,
        prompt: impl Into<String>,
        interval: Duration,
        min_cooldown: Duration,
    ) -> Self {
        Self {
            source,
            analyzer,
            prompt: prompt.into(),
            interval,
            guard: DispatchGuard::new(min_cooldown),
            frame_hooks: Vec::new(),
            result_hooks: Vec::new(),
            error_hooks: Vec::new(),
            stats: DispatchStats::default(),
        }
    }

    pub fn from_config(
        source: Box<dyn FrameSource>,
        analyzer: Arc<dyn Analyzer>,
        config: &DispatcherConfig,
    ) -> Self {
        Self::new(
            source,
            analyzer,
            config.prompt.clone(),
            Duration::from_secs(config.interval_seconds.max(1)),
            Duration::from_millis(config.min_cooldown_ms),
        )
    }

    pub fn on_frame(&mut self, hook: impl Fn(&ImageReference) + Send + Sync + 'static) {
        self.frame_hooks.push(Box::new(hook));
    }

    pub fn on_result(&mut self, hook: impl Fn(AnalysisResult) + Send + Sync + 'static) {
        self.result_hooks.push(Box::new(hook));
    }

    pub fn on_error(&mut self, hook: impl Fn(&DispatchError) + Send + Sync + 'static) {
        self.error_hooks.push(Box::new(hook));
    }

    /// Wires frames, results and failures into a session.
    pub fn attach_session(&mut self, session: &SessionHandle) {
        let frames = session.clone();
        self.on_frame(move |frame| frames.set_frame(frame.clone()));

        let results = session.clone();
        self.on_result(move |result| {
            results.append_result(result);
        });

        let errors = session.clone();
        self.on_error(move |e| errors.report_warning(e.notice()));
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Runs one acquisition/analysis round unless the guard refuses it.
    pub async fn try_cycle(&mut self) -> CycleOutcome {
        if !self.guard.try_begin(Instant::now()) {
            debug!("Dispatch suppressed by guard");
            self.stats.skipped += 1;
            return CycleOutcome::Skipped;
        }

        let outcome = self.cycle().await;
        self.guard.complete(Instant::now());

        match outcome {
            Ok(result) => {
                self.stats.completed += 1;
                for hook in &self.result_hooks {
                    hook(result.clone());
                }
                CycleOutcome::Completed
            }
            Err(e) => {
                error!("Dispatch cycle failed: {}", e);
                self.stats.failed += 1;
                for hook in &self.error_hooks {
                    hook(&e);
                }
                CycleOutcome::Failed
            }
        }
    }

    async fn cycle(&mut self) -> Result<AnalysisResult, DispatchError> {
        let frame = self.source.acquire().await?;
        for hook in &self.frame_hooks {
            hook(&frame);
        }

        let result = self.analyzer.analyze(&self.prompt, &frame.to_url()).await?;
        debug!("Analysis returned {} radar dot(s)", result.radar_dots.len());
        Ok(result)
    }

    /// Ticks until `shutdown` resolves. An in-flight cycle is never
    /// cancelled; shutdown is observed between cycles.
    pub async fn run<F>(mut self, shutdown: F) -> DispatchStats
    where
        F: Future<Output = ()>,
    {
        info!(
            "Starting frame dispatcher: {} every {:?}",
            self.source.describe(),
            self.interval
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    self.try_cycle().await;

                    let total = self.stats.completed + self.stats.failed;
                    if total > 0 && total % 100 == 0 {
                        info!(
                            "Dispatched {} frames ({} failed)",
                            total, self.stats.failed
                        );
                    }
                }
            }
        }

        info!(
            "Frame dispatcher stopped: {} completed, {} failed, {} skipped",
            self.stats.completed, self.stats.failed, self.stats.skipped
        );
        self.stats
    }
}
