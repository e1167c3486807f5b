//! The Phase Controller: sequences a fixed plan of phases.
//!
//! Each phase carries an idempotency predicate and an action. The controller
//! skips, short-circuits on satisfied goals, gates cost-incurring actions on
//! the operator, and halts the plan at the first failure. Nothing here is
//! persisted; every run rediscovers state through the predicates.

use crate::error::{Result, RolloutError};
use crate::operator::Operator;
use crate::types::{PhaseId, PhaseStatus};
use serde::Serialize;
use std::collections::HashSet;
use std::time::Instant;

type Predicate<'a> = Box<dyn Fn() -> Result<bool> + 'a>;
type Action<'a> = Box<dyn Fn() -> Result<()> + 'a>;
type Prompt<'a> = Box<dyn Fn() -> String + 'a>;

pub struct Phase<'a> {
    pub id: PhaseId,
    pub prerequisites: Vec<PhaseId>,
    pub skip: bool,
    satisfied: Predicate<'a>,
    action: Action<'a>,
    prompt: Option<Prompt<'a>>,
}

impl<'a> Phase<'a> {
    pub fn new(
        id: PhaseId,
        satisfied: impl Fn() -> Result<bool> + 'a,
        action: impl Fn() -> Result<()> + 'a,
    ) -> Self {
        Self {
            id,
            prerequisites: Vec::new(),
            skip: false,
            satisfied: Box::new(satisfied),
            action: Box::new(action),
            prompt: None,
        }
    }

    pub fn after(mut self, prerequisite: PhaseId) -> Self {
        self.prerequisites.push(prerequisite);
        self
    }

    pub fn skip(mut self, skip: bool) -> Self {
        self.skip = skip;
        self
    }

    /// Text shown at the cost gate; evaluated after the predicate ran.
    pub fn prompt(mut self, prompt: impl Fn() -> String + 'a) -> Self {
        self.prompt = Some(Box::new(prompt));
        self
    }
}

// ---------------------------------------------------------------------------
// RunReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct PhaseOutcome {
    pub phase: PhaseId,
    pub status: PhaseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug)]
pub struct RunReport {
    pub phases: Vec<PhaseOutcome>,
    /// The halting failure, wrapped with its phase.
    pub failure: Option<RolloutError>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none() && self.phases.iter().all(|p| p.status.is_ok())
    }

    pub fn status_of(&self, phase: PhaseId) -> Option<PhaseStatus> {
        self.phases.iter().find(|p| p.phase == phase).map(|p| p.status)
    }

    pub fn failed_phase(&self) -> Option<PhaseId> {
        self.phases
            .iter()
            .find(|p| p.status == PhaseStatus::Failed)
            .map(|p| p.phase)
    }

    pub fn into_result(self) -> Result<()> {
        match self.failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// PhaseController
// ---------------------------------------------------------------------------

pub struct PhaseController<'a> {
    operator: &'a dyn Operator,
}

impl<'a> PhaseController<'a> {
    pub fn new(operator: &'a dyn Operator) -> Self {
        Self { operator }
    }

    /// Every prerequisite must name a phase that appears earlier.
    pub fn validate(phases: &[Phase<'_>]) -> Result<()> {
        let mut seen = HashSet::new();
        for phase in phases {
            for prereq in &phase.prerequisites {
                if !seen.contains(prereq) {
                    return Err(RolloutError::InvalidPlan(format!(
                        "phase '{}' depends on '{prereq}', which does not run before it",
                        phase.id
                    )));
                }
            }
            if !seen.insert(phase.id) {
                return Err(RolloutError::InvalidPlan(format!(
                    "phase '{}' appears twice",
                    phase.id
                )));
            }
        }
        Ok(())
    }

    /// Execute the plan in order. Only an invalid plan is an `Err`; phase
    /// failures are reported in the returned [`RunReport`].
    pub fn run(&self, phases: Vec<Phase<'_>>) -> Result<RunReport> {
        Self::validate(&phases)?;

        let mut outcomes: Vec<PhaseOutcome> = phases
            .iter()
            .map(|p| PhaseOutcome {
                phase: p.id,
                status: PhaseStatus::Pending,
                detail: None,
                elapsed_ms: 0,
            })
            .collect();
        let mut failure = None;

        for (i, phase) in phases.iter().enumerate() {
            let started = Instant::now();
            let result = self.run_phase(phase, &mut outcomes[i]);
            outcomes[i].elapsed_ms = started.elapsed().as_millis() as u64;
            if let Err(e) = result {
                outcomes[i].status = PhaseStatus::Failed;
                outcomes[i].detail = Some(e.to_string());
                tracing::error!(phase = %phase.id, error = %e, "phase failed; halting");
                failure = Some(RolloutError::in_phase(phase.id.as_str(), e));
                break;
            }
        }

        let report = RunReport {
            phases: outcomes,
            failure,
        };
        for p in &report.phases {
            tracing::info!(phase = %p.phase, status = %p.status, elapsed_ms = p.elapsed_ms, "phase summary");
        }
        Ok(report)
    }

    fn run_phase(&self, phase: &Phase<'_>, outcome: &mut PhaseOutcome) -> Result<()> {
        if phase.skip {
            tracing::info!(phase = %phase.id, "skipped");
            outcome.status = PhaseStatus::Skipped;
            return Ok(());
        }
        if (phase.satisfied)()? {
            tracing::info!(phase = %phase.id, "already satisfied");
            outcome.status = PhaseStatus::Satisfied;
            return Ok(());
        }

        if phase.id.incurs_cost() {
            let prompt = match &phase.prompt {
                Some(f) => f(),
                None => format!("phase '{}' creates billable resources. Continue?", phase.id),
            };
            if !self.operator.confirm(&prompt) {
                return Err(RolloutError::Aborted(format!(
                    "declined cost confirmation for '{}'",
                    phase.id
                )));
            }
        }

        tracing::info!(phase = %phase.id, "running");
        outcome.status = PhaseStatus::Running;
        (phase.action)()?;
        outcome.status = PhaseStatus::Succeeded;
        tracing::info!(phase = %phase.id, "succeeded");
        Ok(())
    }
}
