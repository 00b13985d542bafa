//! Periodic ticker for the mumblegate watchdog.
//!
//! Fires at a fixed period, skips ahead after overruns, and warns when a
//! pass eats most of the period.
//!
//! # Disabled mode
//!
//! When `period` is zero the ticker is disabled and [`Ticker::wait_for_tick`]
//! pends forever. This is how `watchdog = 0` in the config turns the
//! heartbeat off without special-casing the loop that drives it.
//!
//! # Integration
//!
//! The ticker is designed to sit inside a `tokio::select!` loop next to a
//! shutdown signal:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         _ = shutdown.changed() => break,
//!         info = ticker.wait_for_tick() => {
//!             manager.heartbeat().await;
//!             ticker.record_pass_end();
//!         }
//!     }
//! }
//! ```

use std::time::{Duration, Instant};

use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Full configuration for the ticker.
#[derive(Debug, Clone)]
pub struct TickerConfig {
    /// Time between ticks. Zero disables the ticker.
    pub period: Duration,
    /// Fraction of the period (0.0–1.0) a pass may take before a warning
    /// is logged. Default: 0.80.
    pub pass_warn_threshold: f64,
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self {
            period: Duration::ZERO,
            pass_warn_threshold: 0.80,
        }
    }
}

impl TickerConfig {
    /// Config for a given period with default settings.
    pub fn with_period(period: Duration) -> Self {
        Self {
            period,
            ..Default::default()
        }
    }

    /// Clamp any out-of-range values so the config is safe to use.
    ///
    /// Called automatically by [`Ticker::new`].
    pub fn validated(mut self) -> Self {
        self.pass_warn_threshold = self.pass_warn_threshold.clamp(0.0, 1.0);
        self
    }

    /// The tick period, or `None` when disabled.
    pub fn tick_period(&self) -> Option<Duration> {
        if self.period.is_zero() {
            None
        } else {
            Some(self.period)
        }
    }
}

/// Information about a tick, returned by [`Ticker::wait_for_tick`].
#[derive(Debug, Clone)]
pub struct TickInfo {
    /// Monotonically increasing tick number (starts at 1).
    pub tick: u64,
    /// `true` if this tick fired late.
    pub overrun: bool,
    /// How many whole periods were missed (0 in normal operation).
    pub ticks_skipped: u64,
}

// ---------------------------------------------------------------------------
// Ticker
// ---------------------------------------------------------------------------

/// Fixed-period ticker. One per watchdog loop.
pub struct Ticker {
    config: TickerConfig,
    period: Option<Duration>,
    tick_count: u64,
    /// When the next tick should fire (Tokio instant for `sleep_until`).
    next_tick: Option<TokioInstant>,
    /// Set by `wait_for_tick`, consumed by `record_pass_end`.
    pass_start: Option<Instant>,
}

impl Ticker {
    /// Create a new ticker from config. The first tick fires one period
    /// from now.
    pub fn new(config: TickerConfig) -> Self {
        let config = config.validated();
        let period = config.tick_period();
        let next_tick = period.map(|p| TokioInstant::now() + p);

        match period {
            None => debug!("ticker created disabled"),
            Some(p) => debug!(period_ms = p.as_millis() as u64, "ticker created"),
        }

        Self {
            config,
            period,
            tick_count: 0,
            next_tick,
            pass_start: None,
        }
    }

    /// Wait until the next tick is due.
    ///
    /// When disabled this future pends forever, so other `tokio::select!`
    /// branches keep running.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let (next, period) = match (self.next_tick, self.period) {
            (Some(next), Some(period)) => (next, period),
            _ => std::future::pending().await,
        };

        time::sleep_until(next).await;

        let now = TokioInstant::now();
        self.tick_count += 1;
        self.pass_start = Some(Instant::now());

        // More than 10% late counts as an overrun.
        let late_by = now.saturating_duration_since(next);
        let overrun = late_by > period / 10;
        let mut ticks_skipped = 0u64;
        if overrun {
            ticks_skipped = (late_by.as_nanos() / period.as_nanos()) as u64;
            if ticks_skipped > 0 {
                warn!(
                    tick = self.tick_count,
                    skipped = ticks_skipped,
                    late_ms = late_by.as_millis() as u64,
                    "ticker overrun, skipping ahead"
                );
            }
        }
        // Missed ticks are never replayed.
        self.next_tick = Some(now + period);

        trace!(tick = self.tick_count, overrun, "tick fired");

        TickInfo {
            tick: self.tick_count,
            overrun,
            ticks_skipped,
        }
    }

    /// Record that the work for the current tick has finished and return
    /// how long it took.
    ///
    /// Warns when the pass used more than the configured fraction of the
    /// period. Returns `None` if called without a preceding tick.
    pub fn record_pass_end(&mut self) -> Option<Duration> {
        let elapsed = self.pass_start.take()?.elapsed();

        if let Some(period) = self.period {
            let utilization = elapsed.as_secs_f64() / period.as_secs_f64();
            if utilization >= self.config.pass_warn_threshold {
                warn!(
                    tick = self.tick_count,
                    elapsed_ms = elapsed.as_millis() as u64,
                    period_ms = period.as_millis() as u64,
                    "pass is approaching the tick period"
                );
            }
        }
        Some(elapsed)
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }
}
