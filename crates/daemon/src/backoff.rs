//! Restart scheduling for stream-warden
//!
//! Decides what happens after a run ends: a fixed, operator-configured delay
//! after a clean finish, or a progressive backoff with jitter after a failure.
//! Also owns the one-second countdown that precedes every restart.

use crate::config::RetryPolicy;
use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How a finished run is classified for scheduling purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    /// Primary process exited with code 0.
    Success,
    /// Non-zero exit, death by signal, or the pipeline never spawned.
    Failure,
}

/// Why a restart was scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartKind {
    /// Regular restart after a clean finish.
    Scheduled,
    /// Backoff restart after a failure; `attempt` is the new retry count.
    ErrorRetry { attempt: u32 },
}

/// What the supervisor does next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// Settle to Stopped and wait for the operator.
    Stop,
    /// Count down `delay_secs` and launch again.
    Restart { delay_secs: u64, kind: RestartKind },
}

/// Result of planning: the updated retry count plus the next step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    pub retry_count: u32,
    pub next: NextStep,
}

/// Restart scheduler built from a retry policy
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    policy: RetryPolicy,
}

impl RetryScheduler {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Base delay for the given (already incremented) retry count.
    ///
    /// Attempt 1 uses the first table entry; counts beyond the table
    /// saturate at the last entry.
    pub fn base_delay_secs(&self, retry_count: u32) -> u64 {
        let schedule = &self.policy.schedule_secs;
        let index = (retry_count.saturating_sub(1) as usize).min(schedule.len().saturating_sub(1));
        schedule.get(index).copied().unwrap_or(self.policy.min_delay_secs)
    }

    /// Apply jitter of +/- `jitter_ratio` to a base delay, then the floor.
    pub fn jittered_delay_secs<R: Rng + ?Sized>(&self, base: u64, rng: &mut R) -> u64 {
        let ratio = self.policy.jitter_ratio;
        let jitter = if ratio > 0.0 {
            rng.gen_range(-ratio..=ratio) * base as f64
        } else {
            0.0
        };
        let delay = (base as f64 + jitter).max(self.policy.min_delay_secs as f64);
        delay.round() as u64
    }

    /// Delay before a normal restart: the job's delay in minutes, no jitter.
    pub fn scheduled_delay_secs(delay_minutes: u32) -> u64 {
        u64::from(delay_minutes) * 60
    }

    /// Plan the step after a run ends.
    ///
    /// # Arguments
    /// * `class` - How the run ended
    /// * `delay_minutes` - The job's delay at the moment of the decision
    /// * `retry_count` - Retry count before this decision
    /// * `rng` - Source of jitter
    ///
    /// Success resets the retry count and restarts after the job delay.
    /// Failure increments the retry count before picking the backoff delay.
    /// A delay of zero disables both paths; a failure then leaves the count
    /// untouched because no retry is scheduled.
    pub fn plan<R: Rng + ?Sized>(
        &self,
        class: ExitClass,
        delay_minutes: u32,
        retry_count: u32,
        rng: &mut R,
    ) -> Plan {
        match class {
            ExitClass::Success => {
                let next = if delay_minutes > 0 {
                    NextStep::Restart {
                        delay_secs: Self::scheduled_delay_secs(delay_minutes),
                        kind: RestartKind::Scheduled,
                    }
                } else {
                    NextStep::Stop
                };
                Plan {
                    retry_count: 0,
                    next,
                }
            }
            ExitClass::Failure if delay_minutes == 0 => Plan {
                retry_count,
                next: NextStep::Stop,
            },
            ExitClass::Failure => {
                let attempt = retry_count.saturating_add(1);
                let base = self.base_delay_secs(attempt);
                Plan {
                    retry_count: attempt,
                    next: NextStep::Restart {
                        delay_secs: self.jittered_delay_secs(base, rng),
                        kind: RestartKind::ErrorRetry { attempt },
                    },
                }
            }
        }
    }
}

/// How a countdown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownOutcome {
    Elapsed,
    Cancelled,
}

/// Count down from `seconds` in one-second ticks.
///
/// `on_tick` receives the remaining seconds after every tick, ending with 0.
/// Cancellation is observed between ticks and wins over a tick that is due
/// at the same instant, so a cancelled countdown never reports `Elapsed`.
pub async fn countdown<F>(seconds: u64, cancel: &CancellationToken, mut on_tick: F) -> CountdownOutcome
where
    F: FnMut(u64),
{
    let mut remaining = seconds;
    while remaining > 0 {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return CountdownOutcome::Cancelled,
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                remaining -= 1;
                on_tick(remaining);
            }
        }
    }
    if cancel.is_cancelled() {
        CountdownOutcome::Cancelled
    } else {
        CountdownOutcome::Elapsed
    }
}
