//! Workload Deployer: renders descriptors, applies them, and confirms each
//! rollout through the readiness verifier. The primary workload goes first.

use crate::clients::WorkloadRuntime;
use crate::config::{RunConfig, WorkloadConfig};
use crate::diagnosis::Diagnosis;
use crate::error::{Result, RolloutError};
use crate::paths;
use crate::readiness::{
    classify_workload, poll, CancelToken, Classification, Readiness, ReadinessQuery,
    WorkloadObservation,
};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployAction {
    Created,
    /// Already existed; restarted so running processes pick up new secrets.
    Restarted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadOutcome {
    pub name: String,
    pub image: Option<String>,
    pub action: DeployAction,
    pub readiness: Readiness,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeployReport {
    pub outcomes: Vec<WorkloadOutcome>,
    /// Soft readiness timeouts.
    pub warnings: Vec<String>,
}

/// Applies rendered descriptors and confirms each rollout.
pub struct WorkloadDeployer<'a> {
    root: &'a Path,
    config: &'a RunConfig,
    runtime: &'a dyn WorkloadRuntime,
    cancel: &'a CancelToken,
    strict: bool,
}

impl<'a> WorkloadDeployer<'a> {
    pub fn new(
        root: &'a Path,
        config: &'a RunConfig,
        runtime: &'a dyn WorkloadRuntime,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            root,
            config,
            runtime,
            cancel,
            strict: false,
        }
    }

    /// Treat every readiness timeout as fatal.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    fn namespace(&self) -> &str {
        &self.config.project.namespace
    }

    fn descriptor(&self, workload: &WorkloadConfig) -> Result<String> {
        let path = paths::resolve(self.root, &workload.descriptor);
        std::fs::read_to_string(&path).map_err(|e| {
            RolloutError::InvalidConfig(format!(
                "cannot read descriptor {} for '{}': {e}",
                path.display(),
                workload.name
            ))
        })
    }

    /// The artifact reference the workload should run, when its descriptor
    /// carries the placeholder.
    pub fn expected_image(&self, workload: &WorkloadConfig) -> Result<Option<String>> {
        let text = self.descriptor(workload)?;
        Ok(text
            .contains(&self.config.registry.placeholder)
            .then(|| self.config.registry.image_ref(workload.artifact_name())))
    }

    /// Descriptor text with the placeholder replaced by the artifact reference.
    pub fn render(&self, workload: &WorkloadConfig) -> Result<String> {
        let text = self.descriptor(workload)?;
        let placeholder = &self.config.registry.placeholder;
        if !text.contains(placeholder.as_str()) {
            tracing::warn!(workload = %workload.name, %placeholder, "descriptor has no placeholder");
            return Ok(text);
        }
        let image = self.config.registry.image_ref(workload.artifact_name());
        Ok(text.replace(placeholder.as_str(), &image))
    }

    pub fn observe(&self, workload: &WorkloadConfig) -> Result<WorkloadObservation> {
        let ns = self.namespace();
        Ok(WorkloadObservation {
            status: self.runtime.workload(ns, &workload.name)?,
            signals: self.runtime.pod_signals(ns, &workload.name)?,
        })
    }

    /// One observation: exists, runs the expected image, and is ready.
    pub fn is_current(&self, workload: &WorkloadConfig) -> Result<bool> {
        let expected = self.expected_image(workload)?;
        let obs = self.observe(workload)?;
        let ready = classify_workload(expected.as_deref())(&obs) == Classification::Ready;
        Ok(ready)
    }

    /// Apply one workload, restarting it if it was already running.
    pub fn apply(&self, workload: &WorkloadConfig) -> Result<DeployAction> {
        let ns = self.namespace();
        let manifest = self.render(workload)?;
        let existed = self.runtime.workload(ns, &workload.name)?.is_some();
        self.runtime.apply(ns, &manifest)?;
        let action = if existed {
            self.runtime.restart(ns, &workload.name)?;
            DeployAction::Restarted
        } else {
            DeployAction::Created
        };
        tracing::info!(workload = %workload.name, ?action, "applied");
        Ok(action)
    }

    /// Poll until the workload runs the expected image and is ready.
    pub fn verify(&self, workload: &WorkloadConfig) -> Result<Readiness> {
        let expected = self.expected_image(workload)?;
        let budget = self.config.readiness_for(workload);
        let query = ReadinessQuery::new(
            workload.name.clone(),
            &budget,
            classify_workload(expected.as_deref()),
        );
        poll(&query, self.cancel, || self.observe(workload))
    }

    /// Turn a readiness result into success, a soft warning, or an error.
    ///
    /// Failed always errors with a diagnosis. An interrupted wait is
    /// `Aborted`. TimedOut errors when `fatal`, strict mode, or the
    /// workload's budget says so.
    pub fn settle(
        &self,
        workload: &WorkloadConfig,
        readiness: &Readiness,
        fatal: bool,
    ) -> Result<Option<String>> {
        match readiness {
            Readiness::Ready { .. } => Ok(None),
            Readiness::Failed { reason, .. } => {
                let signals = self
                    .runtime
                    .pod_signals(self.namespace(), &workload.name)
                    .unwrap_or_default();
                let image = self.config.registry.image_ref(workload.artifact_name());
                let mut diagnosis =
                    Diagnosis::from_signals(self.namespace(), &workload.name, &image, &signals);
                if diagnosis.causes.is_empty() {
                    diagnosis.summary = reason.clone();
                }
                Err(RolloutError::ReadinessFailed {
                    target: workload.name.clone(),
                    diagnosis,
                })
            }
            Readiness::TimedOut { .. } if self.cancel.is_cancelled() => Err(RolloutError::Aborted(
                format!("interrupted while waiting for {}", workload.name),
            )),
            Readiness::TimedOut { attempts } => {
                let fatal = fatal
                    || self.strict
                    || self.config.readiness_for(workload).timeout_is_fatal;
                if fatal {
                    return Err(RolloutError::ReadinessTimeout {
                        target: workload.name.clone(),
                        attempts: *attempts,
                    });
                }
                let warning = format!(
                    "{} not ready after {attempts} attempts; re-poll with: rollout wait {}",
                    workload.name, workload.name
                );
                tracing::warn!("{warning}");
                Ok(Some(warning))
            }
        }
    }

    /// Deploy a set of workloads. The primary, if any, is applied and
    /// confirmed ready before anything else is applied. A primary timeout is
    /// always fatal.
    pub fn deploy_all(&self, workloads: &[WorkloadConfig]) -> Result<DeployReport> {
        let mut report = DeployReport::default();

        let primary = workloads.iter().position(|w| w.primary);
        let dependents: Vec<&WorkloadConfig> = workloads
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != primary)
            .map(|(_, w)| w)
            .collect();
        if let Some(primary) = primary.map(|i| &workloads[i]) {
            let action = self.apply(primary)?;
            let readiness = self.verify(primary)?;
            self.settle(primary, &readiness, true)?;
            report.outcomes.push(self.outcome(primary, action, readiness)?);
        }

        let mut applied = Vec::with_capacity(dependents.len());
        for w in dependents {
            applied.push((w, self.apply(w)?));
        }
        for (w, action) in applied {
            let readiness = self.verify(w)?;
            if let Some(warning) = self.settle(w, &readiness, false)? {
                report.warnings.push(warning);
            }
            report.outcomes.push(self.outcome(w, action, readiness)?);
        }
        Ok(report)
    }

    fn outcome(
        &self,
        workload: &WorkloadConfig,
        action: DeployAction,
        readiness: Readiness,
    ) -> Result<WorkloadOutcome> {
        Ok(WorkloadOutcome {
            name: workload.name.clone(),
            image: self.expected_image(workload)?,
            action,
            readiness,
        })
    }

    /// Operator-invoked only; never called by the plan.
    pub fn rollback(&self, workload: &WorkloadConfig) -> Result<()> {
        self.runtime.rollback(self.namespace(), &workload.name)?;
        tracing::info!(workload = %workload.name, "rollback requested");
        Ok(())
    }
}
