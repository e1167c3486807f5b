//! End-of-run summary, written whatever the outcome.

use crate::deploy::WorkloadOutcome;
use crate::diagnosis::Diagnosis;
use crate::error::{Result, RolloutError};
use crate::io;
use crate::paths;
use crate::phase::{PhaseOutcome, RunReport};
use crate::types::PhaseId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize)]
pub struct Endpoints {
    pub cluster: Option<String>,
    pub database: Option<String>,
    pub cache: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureSummary {
    pub phase: Option<PhaseId>,
    pub message: String,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<Diagnosis>,
}

impl FailureSummary {
    pub fn from_error(phase: Option<PhaseId>, err: &RolloutError) -> Self {
        let diagnosis = match err.root_cause() {
            RolloutError::ReadinessFailed { diagnosis, .. } => Some(diagnosis.clone()),
            _ => None,
        };
        Self {
            phase,
            message: format!("{err}"),
            exit_code: err.exit_class().code(),
            hint: err.hint(),
            diagnosis,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub project: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub succeeded: bool,
    pub endpoints: Endpoints,
    pub phases: Vec<PhaseOutcome>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub workloads: Vec<WorkloadOutcome>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureSummary>,
    pub next_steps: Vec<String>,
}

impl RunSummary {
    pub fn new(project: &str, started_at: DateTime<Utc>, report: &RunReport) -> Self {
        let failure = report
            .failure
            .as_ref()
            .map(|e| FailureSummary::from_error(report.failed_phase(), e));
        Self {
            run_id: Uuid::new_v4(),
            project: project.to_string(),
            started_at,
            finished_at: Utc::now(),
            succeeded: report.succeeded(),
            endpoints: Endpoints::default(),
            phases: report.phases.clone(),
            workloads: Vec::new(),
            warnings: Vec::new(),
            failure,
            next_steps: Vec::new(),
        }
    }

    /// Standard operator follow-ups for `namespace`.
    pub fn with_next_steps(mut self, namespace: &str, workloads: &[String]) -> Self {
        let mut steps = vec![format!("kubectl get pods -n {namespace}")];
        for w in workloads {
            steps.push(format!("kubectl rollout status deployment/{w} -n {namespace}"));
            steps.push(format!("kubectl logs -n {namespace} deployment/{w} --tail=50"));
        }
        if self.succeeded {
            steps.push("rollout status".to_string());
        } else {
            steps.push("rollout up  # resumes at the first unsatisfied phase".to_string());
        }
        self.next_steps = steps;
        self
    }

    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        let outcome = if self.succeeded { "succeeded" } else { "FAILED" };
        out.push_str(&format!("# Rollout run: {} ({outcome})\n\n", self.project));
        out.push_str(&format!("- run id: `{}`\n", self.run_id));
        out.push_str(&format!("- started: {}\n", self.started_at.to_rfc3339()));
        out.push_str(&format!("- finished: {}\n\n", self.finished_at.to_rfc3339()));

        out.push_str("## Endpoints\n\n");
        let none = "(absent)".to_string();
        out.push_str(&format!(
            "- cluster: {}\n",
            self.endpoints.cluster.as_ref().unwrap_or(&none)
        ));
        out.push_str(&format!(
            "- database: {}\n",
            self.endpoints.database.as_ref().unwrap_or(&none)
        ));
        out.push_str(&format!(
            "- cache: {}\n\n",
            self.endpoints.cache.as_ref().unwrap_or(&none)
        ));

        out.push_str("## Phases\n\n| phase | status | elapsed | detail |\n|---|---|---|---|\n");
        for p in &self.phases {
            out.push_str(&format!(
                "| {} | {} | {}ms | {} |\n",
                p.phase,
                p.status,
                p.elapsed_ms,
                p.detail.as_deref().unwrap_or("").replace('|', "\\|")
            ));
        }

        if !self.workloads.is_empty() {
            out.push_str("\n## Workloads\n\n");
            for w in &self.workloads {
                out.push_str(&format!(
                    "- {} ({:?}): {:?}\n",
                    w.name, w.action, w.readiness
                ));
            }
        }

        if !self.warnings.is_empty() {
            out.push_str("\n## Warnings\n\n");
            for w in &self.warnings {
                out.push_str(&format!("- {w}\n"));
            }
        }

        if let Some(f) = &self.failure {
            out.push_str("\n## Failure\n\n");
            if let Some(phase) = f.phase {
                out.push_str(&format!("Phase `{phase}` failed (exit {}).\n\n", f.exit_code));
            }
            out.push_str(&format!("```\n{}\n```\n", f.message));
            if let Some(hint) = &f.hint {
                out.push_str(&format!("\n```\n{hint}\n```\n"));
            }
        }

        out.push_str("\n## Next steps\n\n");
        for step in &self.next_steps {
            out.push_str(&format!("    {step}\n"));
        }
        out
    }

    pub fn write(&self, root: &Path) -> Result<PathBuf> {
        let path = paths::summary_path(root);
        io::atomic_write(&path, self.render_markdown().as_bytes())?;
        Ok(path)
    }
}
