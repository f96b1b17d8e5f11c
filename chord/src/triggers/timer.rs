//! Periodic timer trigger.

use super::{TimerConfig, Trigger};
use crate::context::ExecutionContext;
use crate::errors::ChordError;
use crate::outcome::Outcome;
use crate::sequence::Emitter;
use crate::stages::Stage;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Emits the current time once per period.
///
/// The first tick fires one period after the stage is started. Ticks missed
/// while the pipeline is busy are skipped rather than delivered in a burst.
/// Each start creates its own timer, so the stage is restartable.
#[derive(Debug, Clone, Copy)]
pub struct TimerTrigger {
    period: Duration,
}

impl TimerTrigger {
    /// Creates a timer firing every `period`.
    ///
    /// # Errors
    ///
    /// Returns [`ChordError::Config`] for a zero period.
    pub fn new(period: Duration) -> Result<Self, ChordError> {
        if period.is_zero() {
            return Err(ChordError::config("timer period must be greater than zero"));
        }
        Ok(Self { period })
    }

    /// Creates a timer from its configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ChordError::Config`] for a zero period.
    pub fn from_config(config: &TimerConfig) -> Result<Self, ChordError> {
        Self::new(config.period())
    }

    /// The configured period.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Trigger<DateTime<Utc>> for TimerTrigger {
    fn stage(&self, ctx: &ExecutionContext) -> Stage<DateTime<Utc>> {
        let period = self.period;
        let ctx = ctx.clone();
        Stage::spawn_with(move |tx| run_timer(ctx.clone(), period, tx))
    }
}

async fn run_timer(ctx: ExecutionContext, period: Duration, tx: Emitter<DateTime<Utc>>) {
    let period_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX);
    info!(period_ms, "timer trigger started");

    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut ticks = 0_u64;
    loop {
        tokio::select! {
            biased;
            () = ctx.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let outcome = Outcome::success(ctx.clone(), Utc::now());
        tokio::select! {
            biased;
            () = ctx.cancelled() => break,
            sent = tx.emit(outcome) => {
                if sent.is_err() {
                    debug!("pipeline closed, stopping timer");
                    break;
                }
                ticks += 1;
            }
        }
    }

    drop(ticker);
    info!(ticks, "timer trigger stopped");
    // `tx` drops here, after the timer is released.
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_zero_period_rejected() {
        let err = TimerTrigger::new(Duration::ZERO).expect_err("zero period");
        assert!(matches!(err, ChordError::Config(_)));
    }

    #[test]
    fn test_from_config_uses_period() {
        let config = TimerConfig::default().with_period(Duration::from_millis(15));
        let trigger = TimerTrigger::from_config(&config).expect("valid period");
        assert_eq!(trigger.period(), Duration::from_millis(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_honour_period() {
        let ctx = ExecutionContext::background();
        let trigger = TimerTrigger::new(Duration::from_millis(250)).expect("valid period");
        let mut seq = trigger.stage(&ctx).start();

        let start = Instant::now();
        for n in 1..=3_u32 {
            let tick = seq.next().await.expect("tick");
            assert!(tick.is_success());
            let elapsed = start.elapsed();
            assert!(elapsed >= Duration::from_millis(250) * n);
            assert!(elapsed < Duration::from_millis(250) * n + Duration::from_millis(10));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_closes_sequence() {
        let ctx = ExecutionContext::background();
        let trigger = TimerTrigger::new(Duration::from_millis(10)).expect("valid period");
        let seq = trigger.stage(&ctx).start();

        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(35)).await;
            canceller.cancel("test over");
        });

        let ticks: Vec<_> = seq.collect().await;
        assert_eq!(ticks.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_first_tick() {
        let ctx = ExecutionContext::background();
        ctx.cancel("never mind");
        let trigger = TimerTrigger::new(Duration::from_millis(10)).expect("valid period");

        let ticks: Vec<_> = trigger.stage(&ctx).start().collect().await;
        assert!(ticks.is_empty());
    }
}
