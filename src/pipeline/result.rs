//! Step results collected over one invocation

use crate::action::Status;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Outcome of one (target, step) execution
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub target: String,
    pub action: String,
    pub status: Status,
    /// Layer reused instead of running the step
    pub cached: bool,
    pub error: Option<String>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(duration.as_millis() as u64)
    }
}

impl StepResult {
    pub fn success(target: &str, action: &str, duration: Duration) -> Self {
        Self {
            target: target.to_string(),
            action: action.to_string(),
            status: Status::Success,
            cached: false,
            error: None,
            duration,
        }
    }

    pub fn failure(target: &str, action: &str, error: String, duration: Duration) -> Self {
        Self {
            target: target.to_string(),
            action: action.to_string(),
            status: Status::Failure,
            cached: false,
            error: Some(error),
            duration,
        }
    }

    /// Step skipped because its layer was reused
    pub fn cached(target: &str, action: &str) -> Self {
        Self {
            cached: true,
            ..Self::success(target, action, Duration::ZERO)
        }
    }
}

/// Pass/fail counts of a result log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub passed: usize,
    pub failed: usize,
    pub cached: usize,
}

impl Tally {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Flat, ordered result collection shared by every step of an invocation
#[derive(Debug, Clone, Default)]
pub struct ResultLog {
    entries: Arc<Mutex<Vec<StepResult>>>,
}

impl ResultLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<StepResult>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn push(&self, result: StepResult) {
        self.entries().push(result);
    }

    /// Append everything recorded in `other`, in order
    pub fn absorb(&self, other: &ResultLog) {
        let moved = std::mem::take(&mut *other.entries());
        self.entries().extend(moved);
    }

    pub fn snapshot(&self) -> Vec<StepResult> {
        self.entries().clone()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn statuses(&self) -> Vec<Status> {
        self.entries().iter().map(|r| r.status).collect()
    }

    pub fn tally(&self) -> Tally {
        self.entries()
            .iter()
            .fold(Tally::default(), |mut tally, result| {
                match (result.status, result.cached) {
                    (Status::Success, true) => tally.cached += 1,
                    (Status::Success, false) => tally.passed += 1,
                    (Status::Failure, _) => tally.failed += 1,
                    _ => {}
                }
                tally
            })
    }
}
