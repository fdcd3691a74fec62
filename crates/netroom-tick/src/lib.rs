//! Fixed-timestep tick clock for netroom rooms.
//!
//! Every room runs on a [`TickClock`]. The clock fires at a fixed rate,
//! keeps the room's server time (seconds since the room started, which is
//! what clients sync against) and watches how much of each tick's budget
//! the room actually used.
//!
//! # Integration
//!
//! The clock sits in one branch of the room actor's `select!`:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = control.recv() => { /* stop, info */ }
//!         tick = clock.next_tick() => {
//!             room.tick(tick.server_time);
//!             clock.record_tick_end();
//!         }
//!     }
//! }
//! ```
//!
//! Server time comes from Tokio's clock, so tests using
//! `#[tokio::test(start_paused = true)]` see it advance deterministically.

use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What to do when the room wakes up later than its tick deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickPolicy {
    /// Forget the missed ticks and schedule the next one from now.
    #[default]
    Skip,
    /// Fire missed ticks back to back, at most `max_catchup` of them.
    CatchUp { max_catchup: u32 },
    /// Keep the original cadence; the late tick is simply late.
    Drop,
}

/// Tick clock settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    /// Ticks per second, `1..=MAX_TICK_RATE_HZ`.
    pub tick_rate_hz: u32,
    pub policy: TickPolicy,
    /// Fraction of the tick budget (0.0 to 1.0) above which a warning is
    /// logged.
    pub budget_warn_threshold: f64,
    /// Fraction of the tick budget above which the tick is reported as
    /// critical.
    pub budget_critical_threshold: f64,
    /// Track average and maximum tick cost.
    pub metrics_enabled: bool,
    /// Upper bound of the random delay (µs) added before the first tick so
    /// rooms created together do not tick in lockstep.
    pub initial_jitter_us: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: Self::DEFAULT_TICK_RATE_HZ,
            policy: TickPolicy::default(),
            budget_warn_threshold: 0.80,
            budget_critical_threshold: 1.0,
            metrics_enabled: true,
            initial_jitter_us: 2_000,
        }
    }
}

impl TickConfig {
    pub const DEFAULT_TICK_RATE_HZ: u32 = 20;
    pub const MAX_TICK_RATE_HZ: u32 = 128;

    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self {
            tick_rate_hz,
            ..Default::default()
        }
    }

    /// Returns a copy with every out-of-range value clamped.
    ///
    /// - a zero rate becomes [`Self::DEFAULT_TICK_RATE_HZ`], anything above
    ///   [`Self::MAX_TICK_RATE_HZ`] is capped,
    /// - both thresholds are clamped to `0.0..=1.0` and the warning
    ///   threshold never exceeds the critical one.
    pub fn validated(mut self) -> Self {
        if self.tick_rate_hz == 0 {
            warn!(
                default = Self::DEFAULT_TICK_RATE_HZ,
                "tick_rate_hz is zero, using default rate"
            );
            self.tick_rate_hz = Self::DEFAULT_TICK_RATE_HZ;
        } else if self.tick_rate_hz > Self::MAX_TICK_RATE_HZ {
            warn!(
                rate = self.tick_rate_hz,
                max = Self::MAX_TICK_RATE_HZ,
                "tick_rate_hz above maximum, clamping"
            );
            self.tick_rate_hz = Self::MAX_TICK_RATE_HZ;
        }
        self.budget_warn_threshold = self.budget_warn_threshold.clamp(0.0, 1.0);
        self.budget_critical_threshold = self.budget_critical_threshold.clamp(0.0, 1.0);
        self.budget_warn_threshold = self
            .budget_warn_threshold
            .min(self.budget_critical_threshold);
        self
    }

    /// Length of one tick. A zero rate is treated as the default rate.
    pub fn tick_duration(&self) -> Duration {
        let rate = match self.tick_rate_hz {
            0 => Self::DEFAULT_TICK_RATE_HZ,
            rate => rate,
        };
        Duration::from_secs_f64(1.0 / f64::from(rate))
    }
}

// ---------------------------------------------------------------------------
// Per-tick information
// ---------------------------------------------------------------------------

/// What [`TickClock::next_tick`] reports for a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickInfo {
    /// Tick number, starting at 1.
    pub tick: u64,
    /// Fixed step, `1 / tick_rate_hz`.
    pub dt: Duration,
    /// Time since the clock was created.
    pub server_time: Duration,
    /// The tick fired more than 10% of a step late.
    pub overrun: bool,
    /// Ticks the policy decided not to run.
    pub ticks_skipped: u64,
}

impl TickInfo {
    /// Server time in seconds, as sent to clients.
    pub fn server_seconds(&self) -> f64 {
        self.server_time.as_secs_f64()
    }
}

/// Counters kept by a [`TickClock`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickMetrics {
    pub total_ticks: u64,
    pub total_overruns: u64,
    pub total_skipped: u64,
    /// Exponential moving average of the room's work per tick (α = 0.1).
    pub avg_tick_time: Duration,
    pub max_tick_time: Duration,
    /// Last tick's work divided by the budget. Above 1.0 is an overrun.
    pub budget_utilization: f64,
}

// ---------------------------------------------------------------------------
// TickClock
// ---------------------------------------------------------------------------

/// One room's fixed-rate clock.
#[derive(Debug)]
pub struct TickClock {
    config: TickConfig,
    step: Duration,
    started: TokioInstant,
    next_deadline: TokioInstant,
    tick_count: u64,
    /// Wall-clock start of the room's work for the current tick.
    work_started: Option<Instant>,
    metrics: TickMetrics,
}

impl TickClock {
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();
        let step = config.tick_duration();
        let jitter = match config.initial_jitter_us {
            0 => Duration::ZERO,
            max => Duration::from_micros(rand::rng().random_range(0..max)),
        };
        let started = TokioInstant::now();

        debug!(
            rate_hz = config.tick_rate_hz,
            step_ms = step.as_secs_f64() * 1000.0,
            policy = ?config.policy,
            jitter_us = jitter.as_micros() as u64,
            "tick clock created"
        );

        Self {
            config,
            step,
            started,
            next_deadline: started + step + jitter,
            tick_count: 0,
            work_started: None,
            metrics: TickMetrics::default(),
        }
    }

    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self::new(TickConfig::with_rate(tick_rate_hz))
    }

    /// Sleeps until the next tick is due and reports it.
    ///
    /// Cancel-safe: if the future is dropped inside `select!` before it
    /// completes, no tick is consumed.
    pub async fn next_tick(&mut self) -> TickInfo {
        let deadline = self.next_deadline;
        time::sleep_until(deadline).await;

        let now = TokioInstant::now();
        self.tick_count += 1;
        self.work_started = Some(Instant::now());

        let step = self.step;
        let late_by = now.saturating_duration_since(deadline);
        let overrun = late_by > step / 10;
        let behind = if overrun {
            (late_by.as_nanos() / step.as_nanos()) as u64
        } else {
            0
        };

        let (next, ticks_skipped) = match self.config.policy {
            TickPolicy::Skip => {
                if behind > 0 {
                    warn!(
                        tick = self.tick_count,
                        skipped = behind,
                        late_ms = late_by.as_secs_f64() * 1000.0,
                        "tick overrun, skipping ahead"
                    );
                }
                (now + step, behind)
            }
            TickPolicy::CatchUp { max_catchup } => {
                let cap = u64::from(max_catchup);
                if behind > 0 {
                    warn!(
                        tick = self.tick_count,
                        behind,
                        catching_up = behind.min(cap),
                        "tick overrun, catching up"
                    );
                }
                if behind <= cap {
                    (deadline + step, 0)
                } else {
                    (now + step, behind - cap)
                }
            }
            TickPolicy::Drop => {
                if overrun {
                    warn!(
                        tick = self.tick_count,
                        late_ms = late_by.as_secs_f64() * 1000.0,
                        "tick overrun, keeping cadence"
                    );
                }
                (deadline + step, 0)
            }
        };
        self.next_deadline = next;

        if overrun {
            self.metrics.total_overruns += 1;
        }
        self.metrics.total_skipped += ticks_skipped;
        self.metrics.total_ticks += 1;

        let server_time = now.saturating_duration_since(self.started);
        trace!(tick = self.tick_count, overrun, server_time = server_time.as_secs_f64(), "tick");

        TickInfo {
            tick: self.tick_count,
            dt: step,
            server_time,
            overrun,
            ticks_skipped,
        }
    }

    /// Marks the room's work for the current tick as done.
    ///
    /// Feeds the budget warnings and the metrics. Without a preceding
    /// [`next_tick`](Self::next_tick) this does nothing.
    pub fn record_tick_end(&mut self) {
        let Some(started) = self.work_started.take() else {
            return;
        };
        let elapsed = started.elapsed();
        let utilization = elapsed.as_secs_f64() / self.step.as_secs_f64();
        self.metrics.budget_utilization = utilization;

        if utilization >= self.config.budget_critical_threshold {
            warn!(
                tick = self.tick_count,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                budget_ms = self.step.as_secs_f64() * 1000.0,
                "tick exceeded its budget"
            );
        } else if utilization >= self.config.budget_warn_threshold {
            warn!(
                tick = self.tick_count,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                budget_ms = self.step.as_secs_f64() * 1000.0,
                "tick close to its budget"
            );
        }

        if self.config.metrics_enabled {
            self.metrics.max_tick_time = self.metrics.max_tick_time.max(elapsed);
            let alpha = 0.1;
            let avg = self.metrics.avg_tick_time.as_secs_f64() * (1.0 - alpha)
                + elapsed.as_secs_f64() * alpha;
            self.metrics.avg_tick_time = Duration::from_secs_f64(avg);
        }
    }

    /// Time since the clock was created, read now rather than at the last
    /// tick.
    pub fn server_time(&self) -> Duration {
        TokioInstant::now().saturating_duration_since(self.started)
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn metrics(&self) -> &TickMetrics {
        &self.metrics
    }

    pub fn tick_rate_hz(&self) -> u32 {
        self.config.tick_rate_hz
    }

    pub fn tick_duration(&self) -> Duration {
        self.step
    }

    pub fn config(&self) -> &TickConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validated_replaces_zero_rate() {
        let cfg = TickConfig::with_rate(0).validated();
        assert_eq!(cfg.tick_rate_hz, TickConfig::DEFAULT_TICK_RATE_HZ);
    }

    #[test]
    fn test_validated_clamps_rate_and_thresholds() {
        let cfg = TickConfig {
            tick_rate_hz: 1_000,
            budget_warn_threshold: 1.5,
            budget_critical_threshold: 0.5,
            ..Default::default()
        }
        .validated();
        assert_eq!(cfg.tick_rate_hz, TickConfig::MAX_TICK_RATE_HZ);
        assert_eq!(cfg.budget_critical_threshold, 0.5);
        assert_eq!(cfg.budget_warn_threshold, 0.5);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let cfg: TickConfig =
            serde_json::from_str(r#"{"tick_rate_hz":30,"policy":{"catch_up":{"max_catchup":2}}}"#)
                .unwrap();
        assert_eq!(cfg.tick_rate_hz, 30);
        assert_eq!(cfg.policy, TickPolicy::CatchUp { max_catchup: 2 });
        assert!(cfg.metrics_enabled);
    }
}
