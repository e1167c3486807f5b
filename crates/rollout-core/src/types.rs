use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// PhaseId
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseId {
    Infrastructure,
    Artifacts,
    Workloads,
    Observability,
}

impl PhaseId {
    pub fn all() -> &'static [PhaseId] {
        &[
            PhaseId::Infrastructure,
            PhaseId::Artifacts,
            PhaseId::Workloads,
            PhaseId::Observability,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PhaseId::Infrastructure => "infrastructure",
            PhaseId::Artifacts => "artifacts",
            PhaseId::Workloads => "workloads",
            PhaseId::Observability => "observability",
        }
    }

    /// Phases whose action creates resources that bill while they exist.
    pub fn incurs_cost(self) -> bool {
        matches!(self, PhaseId::Infrastructure | PhaseId::Observability)
    }

    /// External binaries the phase shells out to.
    pub fn required_tools(self) -> &'static [&'static str] {
        match self {
            PhaseId::Infrastructure => &["terraform", "aws"],
            PhaseId::Artifacts => &["docker", "aws"],
            PhaseId::Workloads => &["kubectl", "aws"],
            PhaseId::Observability => &["kubectl"],
        }
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PhaseId {
    type Err = crate::error::RolloutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "infrastructure" | "infra" => Ok(PhaseId::Infrastructure),
            "artifacts" => Ok(PhaseId::Artifacts),
            "workloads" => Ok(PhaseId::Workloads),
            "observability" => Ok(PhaseId::Observability),
            _ => Err(crate::error::RolloutError::InvalidPlan(format!(
                "unknown phase '{s}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// PhaseStatus
// ---------------------------------------------------------------------------

/// Lifecycle of one phase within a single run.
///
/// `Pending → Skipped | Satisfied | Running → Succeeded | Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Running,
    Skipped,
    Satisfied,
    Succeeded,
    Failed,
}

impl PhaseStatus {
    /// Terminal states that count toward a successful run.
    pub fn is_ok(self) -> bool {
        matches!(
            self,
            PhaseStatus::Skipped | PhaseStatus::Satisfied | PhaseStatus::Succeeded
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::Running => "running",
            PhaseStatus::Skipped => "skipped",
            PhaseStatus::Satisfied => "satisfied",
            PhaseStatus::Succeeded => "succeeded",
            PhaseStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
