use crate::diagnosis::Diagnosis;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("not initialized: run 'rollout init'")]
    NotInitialized,

    #[error("required tool '{0}' not found on PATH")]
    MissingTool(String),

    #[error("no cluster found for project '{project}' in region '{region}'")]
    MissingCluster { project: String, region: String },

    #[error("environment error: {0}")]
    Environment(String),

    #[error("ambiguous {target}: {} candidates match ({})", candidates.len(), candidates.join(", "))]
    Ambiguous {
        target: String,
        candidates: Vec<String>,
    },

    #[error("credentials unavailable for: {}", fields.join(", "))]
    CredentialsUnavailable { fields: Vec<String> },

    #[error("phase '{phase}' failed: {cause}")]
    PhaseFailed {
        phase: String,
        #[source]
        cause: Box<RolloutError>,
    },

    #[error("{target} failed readiness: {}", diagnosis.summary)]
    ReadinessFailed { target: String, diagnosis: Diagnosis },

    #[error("{target} not ready after {attempts} attempts")]
    ReadinessTimeout { target: String, attempts: u32 },

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid name '{0}': must be lowercase alphanumeric with hyphens")]
    InvalidName(String),

    #[error("workload not configured: {0}")]
    WorkloadNotFound(String),

    #[error("aborted by operator: {0}")]
    Aborted(String),

    #[error("`{command}` exited with {status}: {stderr}")]
    Command {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("unexpected output from `{command}`: {reason}")]
    UnexpectedOutput { command: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RolloutError>;

// ---------------------------------------------------------------------------
// Exit classes
// ---------------------------------------------------------------------------

/// Process exit code ranges, one per error class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    Success,
    Declined,
    MissingTool,
    MissingCluster,
    Ambiguous,
    Config,
    Credentials,
    PhaseFailure,
    Readiness,
    Other,
}

impl ExitClass {
    pub fn code(self) -> i32 {
        match self {
            ExitClass::Success => 0,
            ExitClass::Other => 1,
            ExitClass::Declined => 2,
            ExitClass::MissingTool => 10,
            ExitClass::MissingCluster => 11,
            ExitClass::Ambiguous => 12,
            ExitClass::Config => 13,
            ExitClass::Credentials => 20,
            ExitClass::PhaseFailure => 30,
            ExitClass::Readiness => 40,
        }
    }
}

impl RolloutError {
    /// Wrap a phase action error, keeping an already-wrapped error as-is.
    pub fn in_phase(phase: impl Into<String>, cause: RolloutError) -> Self {
        match cause {
            e @ RolloutError::PhaseFailed { .. } => e,
            cause => RolloutError::PhaseFailed {
                phase: phase.into(),
                cause: Box::new(cause),
            },
        }
    }

    /// The innermost error, looking through phase wrappers.
    pub fn root_cause(&self) -> &RolloutError {
        match self {
            RolloutError::PhaseFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// Environment failures and fatal readiness timeouts keep their own exit
    /// class even when they surface through a phase; everything else inside
    /// a phase is a phase action failure.
    pub fn exit_class(&self) -> ExitClass {
        match self {
            RolloutError::MissingTool(_) => ExitClass::MissingTool,
            RolloutError::MissingCluster { .. } | RolloutError::Environment(_) => {
                ExitClass::MissingCluster
            }
            RolloutError::Ambiguous { .. } => ExitClass::Ambiguous,
            RolloutError::NotInitialized
            | RolloutError::InvalidConfig(_)
            | RolloutError::InvalidName(_)
            | RolloutError::WorkloadNotFound(_)
            | RolloutError::InvalidPlan(_) => ExitClass::Config,
            RolloutError::CredentialsUnavailable { .. } => ExitClass::Credentials,
            // A terminal readiness signature is promoted to a phase action
            // failure; only a timeout held to be fatal keeps its own class.
            RolloutError::ReadinessFailed { .. } => ExitClass::PhaseFailure,
            RolloutError::ReadinessTimeout { .. } => ExitClass::Readiness,
            RolloutError::Aborted(_) => ExitClass::Declined,
            RolloutError::PhaseFailed { cause, .. } => match cause.exit_class() {
                ExitClass::Other => ExitClass::PhaseFailure,
                class => class,
            },
            RolloutError::Command { .. }
            | RolloutError::UnexpectedOutput { .. }
            | RolloutError::Io(_)
            | RolloutError::Yaml(_)
            | RolloutError::Json(_) => ExitClass::Other,
        }
    }

    /// Operator-facing follow-up: the command to inspect further and, where
    /// known, ranked causes with remediation.
    pub fn hint(&self) -> Option<String> {
        match self.root_cause() {
            RolloutError::MissingTool(tool) => Some(format!(
                "install '{tool}' and make sure it is on PATH, then re-run"
            )),
            RolloutError::MissingCluster { region, .. } => Some(format!(
                "inspect: aws eks list-clusters --region {region}\n\
                 the infrastructure phase was skipped or has not completed; \
                 re-run without --skip-infra"
            )),
            RolloutError::Ambiguous { candidates, .. } => Some(format!(
                "select one explicitly with --cluster <name> (one of: {})",
                candidates.join(", ")
            )),
            RolloutError::CredentialsUnavailable { .. } => Some(
                "add a fallback for each field under credentials: in .rollout/config.yaml \
                 or create the secret in the secret store"
                    .to_string(),
            ),
            RolloutError::ReadinessFailed { diagnosis, .. } => Some(diagnosis.render()),
            RolloutError::ReadinessTimeout { target, .. } => Some(format!(
                "still converging; re-poll later with: rollout wait {target}"
            )),
            RolloutError::Command { command, .. } => {
                Some(format!("re-run to inspect: {command}"))
            }
            RolloutError::NotInitialized => Some("run: rollout init".to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_failure_keeps_environment_class() {
        let err = RolloutError::in_phase(
            "workloads",
            RolloutError::MissingCluster {
                project: "shop".into(),
                region: "us-east-1".into(),
            },
        );
        assert_eq!(err.exit_class(), ExitClass::MissingCluster);
        assert_eq!(err.exit_class().code(), 11);
    }

    #[test]
    fn phase_failure_wraps_command_errors() {
        let err = RolloutError::in_phase(
            "infrastructure",
            RolloutError::Command {
                command: "terraform apply".into(),
                status: 1,
                stderr: "quota exceeded".into(),
            },
        );
        assert_eq!(err.exit_class(), ExitClass::PhaseFailure);
        assert!(err.to_string().contains("infrastructure"));
        assert!(err.hint().unwrap().contains("terraform apply"));
    }

    #[test]
    fn in_phase_does_not_double_wrap() {
        let inner = RolloutError::in_phase("artifacts", RolloutError::InvalidPlan("x".into()));
        let outer = RolloutError::in_phase("workloads", inner);
        match outer {
            RolloutError::PhaseFailed { phase, .. } => assert_eq!(phase, "artifacts"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn terminal_readiness_failure_is_a_phase_failure() {
        let failed = RolloutError::in_phase(
            "workloads",
            RolloutError::ReadinessFailed {
                target: "auth".into(),
                diagnosis: Diagnosis {
                    summary: "CrashLoopBackOff".into(),
                    causes: Vec::new(),
                    inspect: Vec::new(),
                },
            },
        );
        assert_eq!(failed.exit_class().code(), 30);

        let timed_out = RolloutError::in_phase(
            "workloads",
            RolloutError::ReadinessTimeout {
                target: "auth".into(),
                attempts: 5,
            },
        );
        assert_eq!(timed_out.exit_class().code(), 40);
    }

    #[test]
    fn exit_codes_are_distinct_per_class() {
        let codes = [
            ExitClass::MissingTool.code(),
            ExitClass::Credentials.code(),
            ExitClass::PhaseFailure.code(),
            ExitClass::Readiness.code(),
        ];
        assert_eq!(codes, [10, 20, 30, 40]);
    }
}
