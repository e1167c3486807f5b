//! Bounded polling for convergence of slow external resources.
//!
//! Every wait-for-convergence in the orchestrator goes through [`poll`]: an
//! interval, an attempt budget, an optional deadline, a caller-supplied
//! classifier, and a [`CancelToken`] that interrupts the wait between
//! attempts. Exactly one poll loop is outstanding at a time; it blocks the
//! calling phase.

use crate::clients::{PodSignal, WorkloadStatus};
use crate::config::ReadinessConfig;
use crate::diagnosis;
use crate::error::{Result, RolloutError};
use serde::Serialize;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Classification / Readiness
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Ready,
    Converging,
    Failed(String),
}

/// Outcome of one poll loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Readiness {
    Ready { attempts: u32 },
    Failed { reason: String, attempts: u32 },
    /// Budget, deadline, or cancellation ran out while still converging.
    TimedOut { attempts: u32 },
}

// ---------------------------------------------------------------------------
// CancelToken
// ---------------------------------------------------------------------------

/// Externally-triggered interruption of any in-flight wait.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        if let Ok(mut cancelled) = lock.lock() {
            *cancelled = true;
            cvar.notify_all();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.0.lock().map(|c| *c).unwrap_or(true)
    }

    /// Sleep for `timeout` unless cancelled first. Returns true if cancelled.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let Ok(guard) = lock.lock() else {
            return true;
        };
        match cvar.wait_timeout_while(guard, timeout, |cancelled| !*cancelled) {
            Ok((cancelled, _)) => *cancelled,
            Err(_) => true,
        }
    }
}

// ---------------------------------------------------------------------------
// ReadinessQuery
// ---------------------------------------------------------------------------

pub struct ReadinessQuery<C> {
    pub target: String,
    pub interval: Duration,
    pub max_attempts: u32,
    /// Wall-clock bound on the whole loop, in addition to the attempt budget.
    pub deadline: Option<Duration>,
    pub classify: C,
}

impl<C> ReadinessQuery<C> {
    pub fn new(target: impl Into<String>, budget: &ReadinessConfig, classify: C) -> Self {
        Self {
            target: target.into(),
            interval: budget.interval(),
            max_attempts: budget.attempts.max(1),
            deadline: budget.max_duration().filter(|d| !d.is_zero()),
            classify,
        }
    }
}

/// Poll `probe` until the classifier says Ready or Failed, or until the
/// attempt budget, deadline, or cancel token runs out.
///
/// Probe failures from external commands count as a converging attempt;
/// any other error aborts the loop.
pub fn poll<S, P, C>(query: &ReadinessQuery<C>, cancel: &CancelToken, mut probe: P) -> Result<Readiness>
where
    P: FnMut() -> Result<S>,
    C: Fn(&S) -> Classification,
{
    let started = Instant::now();
    let mut attempts = 0;

    while attempts < query.max_attempts {
        if cancel.is_cancelled() {
            tracing::warn!(target = %query.target, attempts, "readiness wait cancelled");
            return Ok(Readiness::TimedOut { attempts });
        }
        attempts += 1;

        let classification = match probe() {
            Ok(state) => (query.classify)(&state),
            Err(e @ RolloutError::Command { .. }) | Err(e @ RolloutError::UnexpectedOutput { .. }) => {
                tracing::warn!(target = %query.target, attempts, error = %e, "probe failed; retrying");
                Classification::Converging
            }
            Err(e) => return Err(e),
        };

        match classification {
            Classification::Ready => {
                tracing::info!(target = %query.target, attempts, "ready");
                return Ok(Readiness::Ready { attempts });
            }
            Classification::Failed(reason) => {
                tracing::warn!(target = %query.target, attempts, %reason, "failed");
                return Ok(Readiness::Failed { reason, attempts });
            }
            Classification::Converging => {
                tracing::debug!(target = %query.target, attempts, "converging");
            }
        }

        if attempts == query.max_attempts {
            break;
        }
        let mut wait = query.interval;
        if let Some(deadline) = query.deadline {
            let remaining = deadline.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                break;
            }
            wait = wait.min(remaining);
        }
        if cancel.wait(wait) {
            tracing::warn!(target = %query.target, attempts, "readiness wait cancelled");
            break;
        }
    }

    tracing::warn!(target = %query.target, attempts, "not ready within budget");
    Ok(Readiness::TimedOut { attempts })
}

// ---------------------------------------------------------------------------
// Workload classifier
// ---------------------------------------------------------------------------

/// One observation of a workload: its rollout status plus pod-level signals.
#[derive(Debug, Clone, Default)]
pub struct WorkloadObservation {
    pub status: Option<WorkloadStatus>,
    pub signals: Vec<PodSignal>,
}

/// Ready once the expected image is fully rolled out; Failed on a terminal
/// pod signature or an exceeded progress deadline.
pub fn classify_workload(expected_image: Option<&str>) -> impl Fn(&WorkloadObservation) -> Classification + '_ {
    move |obs| {
        if diagnosis::is_terminal(&obs.signals) {
            let reasons: Vec<&str> = obs.signals.iter().map(|s| s.reason.as_str()).collect();
            return Classification::Failed(reasons.join(", "));
        }
        let Some(status) = &obs.status else {
            return Classification::Converging;
        };
        if status.progress_deadline_exceeded {
            return Classification::Failed("ProgressDeadlineExceeded".to_string());
        }
        if let (Some(expected), Some(actual)) = (expected_image, status.image.as_deref()) {
            if expected != actual {
                return Classification::Converging;
            }
        }
        if status.is_ready() {
            Classification::Ready
        } else {
            Classification::Converging
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn classify_str(s: &&str) -> Classification {
        match *s {
            "Ready" => Classification::Ready,
            "Failed" => Classification::Failed("terminal".into()),
            _ => Classification::Converging,
        }
    }

    fn query(attempts: u32) -> ReadinessQuery<fn(&&str) -> Classification> {
        ReadinessQuery {
            target: "db".into(),
            interval: Duration::ZERO,
            max_attempts: attempts,
            deadline: None,
            classify: classify_str,
        }
    }

    fn sequence(seq: &'static [&'static str]) -> impl FnMut() -> Result<&'static str> {
        let i = Cell::new(0);
        move || {
            let n = i.get();
            i.set(n + 1);
            Ok(seq.get(n).copied().unwrap_or("Converging"))
        }
    }

    #[test]
    fn ready_after_third_poll() {
        let r = poll(
            &query(5),
            &CancelToken::new(),
            sequence(&["Converging", "Converging", "Ready"]),
        )
        .unwrap();
        assert_eq!(r, Readiness::Ready { attempts: 3 });
    }

    #[test]
    fn times_out_when_budget_exhausted() {
        let r = poll(
            &query(5),
            &CancelToken::new(),
            sequence(&["Converging"; 5]),
        )
        .unwrap();
        assert_eq!(r, Readiness::TimedOut { attempts: 5 });
    }

    #[test]
    fn failed_on_second_poll_without_exhausting_budget() {
        let r = poll(&query(5), &CancelToken::new(), sequence(&["Converging", "Failed"])).unwrap();
        assert_eq!(
            r,
            Readiness::Failed {
                reason: "terminal".into(),
                attempts: 2
            }
        );
    }

    #[test]
    fn cancelled_token_stops_before_first_probe() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let r = poll(&query(5), &cancel, sequence(&["Ready"])).unwrap();
        assert_eq!(r, Readiness::TimedOut { attempts: 0 });
    }

    #[test]
    fn cancel_interrupts_a_long_wait() {
        let cancel = CancelToken::new();
        let remote = cancel.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });
        let q = ReadinessQuery {
            interval: Duration::from_secs(60),
            ..query(5)
        };
        let started = Instant::now();
        let r = poll(&q, &cancel, sequence(&["Converging"; 5])).unwrap();
        handle.join().unwrap();
        assert_eq!(r, Readiness::TimedOut { attempts: 1 });
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[test]
    fn deadline_bounds_the_loop() {
        let q = ReadinessQuery {
            interval: Duration::from_millis(5),
            deadline: Some(Duration::from_millis(1)),
            ..query(1000)
        };
        let r = poll(&q, &CancelToken::new(), sequence(&[])).unwrap();
        assert!(matches!(r, Readiness::TimedOut { attempts } if attempts < 1000));
    }

    #[test]
    fn command_errors_count_as_converging() {
        let calls = Cell::new(0);
        let r = poll(&query(3), &CancelToken::new(), || {
            calls.set(calls.get() + 1);
            if calls.get() == 1 {
                Err(RolloutError::Command {
                    command: "kubectl get".into(),
                    status: 1,
                    stderr: "connection refused".into(),
                })
            } else {
                Ok("Ready")
            }
        })
        .unwrap();
        assert_eq!(r, Readiness::Ready { attempts: 2 });
    }

    #[test]
    fn workload_with_wrong_image_is_converging() {
        let status = WorkloadStatus {
            name: "auth".into(),
            image: Some("reg/auth:v1".into()),
            desired: 1,
            updated: 1,
            ready: 1,
            available: 1,
            observed_current: true,
            progress_deadline_exceeded: false,
        };
        let obs = WorkloadObservation {
            status: Some(status),
            signals: vec![],
        };
        assert_eq!(classify_workload(Some("reg/auth:v2"))(&obs), Classification::Converging);
        assert_eq!(classify_workload(Some("reg/auth:v1"))(&obs), Classification::Ready);
        assert_eq!(classify_workload(None)(&obs), Classification::Ready);
    }

    #[test]
    fn crash_loop_signature_fails_workload() {
        let obs = WorkloadObservation {
            status: None,
            signals: vec![PodSignal {
                pod: "auth-1".into(),
                reason: "CrashLoopBackOff".into(),
                message: None,
                restarts: 5,
            }],
        };
        assert_eq!(
            classify_workload(None)(&obs),
            Classification::Failed("CrashLoopBackOff".into())
        );
    }
}
