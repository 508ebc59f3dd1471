//! Fixed-period tick scheduler for GPCM connection maintenance.
//!
//! One scheduler drives the server's maintenance loop: on every tick the
//! login-timeout sweep and the keep-alive broadcast run once. Periods are
//! measured in seconds, not frames, but the scheduler keeps the same
//! overrun handling a game loop needs: a maintenance pass that runs long
//! must not trigger a burst of back-to-back passes.
//!
//! # Integration
//!
//! The scheduler sits inside a `tokio::select!` loop next to a
//! cancellation branch:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         _ = shutdown.cancelled() => break,
//!         info = scheduler.wait_for_tick() => {
//!             run_maintenance(info).await;
//!             scheduler.record_tick_end();
//!         }
//!     }
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What to do when a tick fires late.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TickPolicy {
    /// Skip the missed tick(s) and schedule the next one a full period
    /// from now.
    #[default]
    Skip,
    /// Keep the original cadence: the next tick fires at its originally
    /// scheduled time, even if that is immediately.
    Drop,
}

/// Full configuration for the tick scheduler.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Time between two ticks.
    pub period: Duration,
    /// Overrun handling policy.
    pub policy: TickPolicy,
    /// Fraction of the period (0.0–1.0) after which a tick's recorded work
    /// triggers a warning. Default: 0.5.
    pub budget_warn_threshold: f64,
    /// Upper bound of the random delay added to the *first* tick, so that
    /// servers restarted together do not sweep in lockstep.
    pub initial_jitter: Duration,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(15),
            policy: TickPolicy::default(),
            budget_warn_threshold: 0.5,
            initial_jitter: Duration::from_millis(250),
        }
    }
}

impl TickConfig {
    /// Smallest period the scheduler accepts.
    pub const MIN_PERIOD: Duration = Duration::from_millis(1);

    /// Create a config for a specific period with default settings.
    pub fn with_period(period: Duration) -> Self {
        Self {
            period,
            ..Default::default()
        }
    }

    /// Clamp and fix any out-of-range values so the config is safe to use.
    ///
    /// Called automatically by [`TickScheduler::new`]:
    /// - `period` raised to [`Self::MIN_PERIOD`].
    /// - `budget_warn_threshold` clamped to `0.0..=1.0`.
    pub fn validated(mut self) -> Self {
        if self.period < Self::MIN_PERIOD {
            warn!(
                period_ms = self.period.as_secs_f64() * 1000.0,
                "tick period below minimum, clamping"
            );
            self.period = Self::MIN_PERIOD;
        }
        self.budget_warn_threshold = self.budget_warn_threshold.clamp(0.0, 1.0);
        self
    }
}

// ---------------------------------------------------------------------------
// Tick info
// ---------------------------------------------------------------------------

/// Information about a fired tick, returned by [`TickScheduler::wait_for_tick`].
#[derive(Debug, Clone)]
pub struct TickInfo {
    /// Monotonically increasing tick number (starts at 1).
    pub tick: u64,
    /// `true` if this tick fired more than 10% of a period late.
    pub overrun: bool,
    /// Whole periods skipped because of the overrun (`Skip` policy only).
    pub ticks_skipped: u64,
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Runtime metrics for the tick scheduler.
#[derive(Debug, Clone, Default)]
pub struct TickMetrics {
    /// Total ticks fired.
    pub total_ticks: u64,
    /// Total overruns detected.
    pub total_overruns: u64,
    /// Total periods skipped by the `Skip` policy.
    pub total_skipped: u64,
    /// Duration of the most recently recorded tick work.
    pub last_tick_time: Duration,
    /// Longest recorded tick work.
    pub max_tick_time: Duration,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Fixed-period tick scheduler.
pub struct TickScheduler {
    config: TickConfig,
    tick_count: u64,
    next_tick: Instant,
    /// Set by `wait_for_tick`, consumed by `record_tick_end`.
    tick_start: Option<Instant>,
    metrics: TickMetrics,
}

impl TickScheduler {
    /// Create a new scheduler from config. The first tick fires one period
    /// (plus jitter) from now.
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();

        let jitter = if config.initial_jitter.is_zero() {
            Duration::ZERO
        } else {
            let max_us = config.initial_jitter.as_micros().min(u64::MAX as u128) as u64;
            Duration::from_micros(rand::rng().random_range(0..max_us.max(1)))
        };
        let next_tick = Instant::now() + config.period + jitter;

        debug!(
            period_ms = config.period.as_secs_f64() * 1000.0,
            policy = ?config.policy,
            "tick scheduler created"
        );

        Self {
            config,
            tick_count: 0,
            next_tick,
            tick_start: None,
            metrics: TickMetrics::default(),
        }
    }

    /// Create a scheduler for a specific period with default settings.
    pub fn with_period(period: Duration) -> Self {
        Self::new(TickConfig::with_period(period))
    }

    /// Wait until the next tick is due.
    ///
    /// Cancel-safe: dropping the future before it resolves leaves the
    /// schedule untouched.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let due = self.next_tick;
        let period = self.config.period;

        time::sleep_until(due).await;

        let now = Instant::now();
        self.tick_count += 1;
        self.tick_start = Some(now);

        let late_by = now.saturating_duration_since(due);
        let overrun = late_by > period / 10;
        let mut ticks_skipped = 0u64;

        self.next_tick = match self.config.policy {
            TickPolicy::Skip => {
                if overrun {
                    ticks_skipped = (late_by.as_nanos() / period.as_nanos()) as u64;
                    if ticks_skipped > 0 {
                        warn!(
                            tick = self.tick_count,
                            skipped = ticks_skipped,
                            late_ms = late_by.as_secs_f64() * 1000.0,
                            "tick overrun, skipping ahead"
                        );
                    }
                }
                now + period
            }
            TickPolicy::Drop => {
                if overrun {
                    warn!(
                        tick = self.tick_count,
                        late_ms = late_by.as_secs_f64() * 1000.0,
                        "tick overrun, keeping original schedule"
                    );
                }
                due + period
            }
        };

        if overrun {
            self.metrics.total_overruns += 1;
        }
        self.metrics.total_skipped += ticks_skipped;
        self.metrics.total_ticks += 1;

        trace!(tick = self.tick_count, overrun, "tick fired");

        TickInfo {
            tick: self.tick_count,
            overrun,
            ticks_skipped,
        }
    }

    /// Record that the work for the current tick has finished.
    ///
    /// Feeds the metrics and warns when the work used more than
    /// `budget_warn_threshold` of the period. A no-op without a preceding
    /// [`wait_for_tick`](Self::wait_for_tick).
    pub fn record_tick_end(&mut self) {
        let Some(start) = self.tick_start.take() else {
            return;
        };
        let elapsed = start.elapsed();
        let utilization = elapsed.as_secs_f64() / self.config.period.as_secs_f64();

        if utilization >= self.config.budget_warn_threshold {
            warn!(
                tick = self.tick_count,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                period_ms = self.config.period.as_secs_f64() * 1000.0,
                "maintenance tick used most of its period"
            );
        }

        self.metrics.last_tick_time = elapsed;
        if elapsed > self.metrics.max_tick_time {
            self.metrics.max_tick_time = elapsed;
        }
    }

    /// Ticks fired so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Snapshot of current metrics.
    pub fn metrics(&self) -> &TickMetrics {
        &self.metrics
    }

    /// The configured period.
    pub fn period(&self) -> Duration {
        self.config.period
    }
}
