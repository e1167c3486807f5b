//! The fixed plan: infrastructure → artifacts → workloads → observability.
//!
//! [`Orchestrator`] builds the four phases over one set of collaborators and
//! runs them through the [`PhaseController`]. Values discovered during the
//! run (plan diff, chosen cluster, credential bundle) are cached for that run
//! only and dropped with the orchestrator.

use crate::clients::{Collaborators, PlanDiff};
use crate::config::{ArtifactConfig, RunConfig, WorkloadConfig};
use crate::credentials::{CredentialBroker, CredentialBundle};
use crate::deploy::{DeployReport, WorkloadDeployer, WorkloadOutcome};
use crate::error::{Result, RolloutError};
use crate::operator::Operator;
use crate::phase::{Phase, PhaseController, RunReport};
use crate::probe::{DeploymentState, Lookup, StateProber};
use crate::readiness::CancelToken;
use crate::secret_sync::SecretSynchronizer;
use crate::summary::{Endpoints, RunSummary};
use crate::types::PhaseId;
use chrono::Utc;
use std::cell::RefCell;
use std::path::{Path, PathBuf};

#[derive(Default)]
struct RunState {
    plan: Option<PlanDiff>,
    cluster: Option<String>,
    state: Option<DeploymentState>,
    bundle: Option<CredentialBundle>,
    workloads: Vec<WorkloadOutcome>,
    warnings: Vec<String>,
}

pub struct RunOutcome {
    pub report: RunReport,
    pub summary: RunSummary,
    pub summary_path: PathBuf,
}

pub struct Orchestrator<'a> {
    root: &'a Path,
    config: &'a RunConfig,
    collab: Collaborators<'a>,
    operator: &'a dyn Operator,
    cancel: CancelToken,
    strict_readiness: bool,
    run: RefCell<RunState>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        root: &'a Path,
        config: &'a RunConfig,
        collab: Collaborators<'a>,
        operator: &'a dyn Operator,
    ) -> Self {
        Self {
            root,
            config,
            collab,
            operator,
            cancel: CancelToken::new(),
            strict_readiness: false,
            run: RefCell::new(RunState::default()),
        }
    }

    /// Interrupts any readiness wait when cancelled from elsewhere.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn strict_readiness(mut self, strict: bool) -> Self {
        self.strict_readiness = strict;
        self
    }

    /// Run the plan and write the summary, whatever the outcome.
    pub fn up(&self) -> Result<RunOutcome> {
        let started = Utc::now();
        tracing::info!(project = %self.config.project.name, "starting run");
        let report = PhaseController::new(self.operator).run(self.plan())?;
        if self.run.borrow().state.is_none() {
            self.probe_endpoints();
        }
        let summary = self.summarize(started, &report);
        let summary_path = summary.write(self.root)?;
        Ok(RunOutcome {
            report,
            summary,
            summary_path,
        })
    }

    pub fn plan(&self) -> Vec<Phase<'_>> {
        vec![
            Phase::new(
                PhaseId::Infrastructure,
                move || self.infrastructure_satisfied(),
                move || self.apply_infrastructure(),
            )
            .skip(self.config.is_skipped(PhaseId::Infrastructure))
            .prompt(move || {
                let run = self.run.borrow();
                let diff = run.plan.as_ref().map_or("changes pending", |p| p.summary.as_str());
                format!("infrastructure: {diff}. These resources are billed while they exist. Apply?")
            }),
            Phase::new(
                PhaseId::Artifacts,
                move || Ok(self.missing_artifacts()?.is_empty()),
                move || self.publish_artifacts(),
            )
            .after(PhaseId::Infrastructure)
            .skip(self.config.is_skipped(PhaseId::Artifacts)),
            Phase::new(
                PhaseId::Workloads,
                move || self.workloads_satisfied(),
                move || self.deploy_workloads(),
            )
            .after(PhaseId::Artifacts)
            .skip(self.config.is_skipped(PhaseId::Workloads)),
            Phase::new(
                PhaseId::Observability,
                move || self.observability_satisfied(),
                move || self.deploy_observability(),
            )
            .after(PhaseId::Workloads)
            .skip(self.config.is_skipped(PhaseId::Observability))
            .prompt(move || {
                format!(
                    "observability: deploy {} workload(s); the stack is billed while it runs. Continue?",
                    self.config.observability.len()
                )
            }),
        ]
    }

    // -----------------------------------------------------------------------
    // infrastructure
    // -----------------------------------------------------------------------

    fn infrastructure_satisfied(&self) -> Result<bool> {
        let diff = self.collab.provisioner.plan()?;
        tracing::info!(summary = %diff.summary, "infrastructure plan");
        let satisfied = !diff.has_changes;
        self.run.borrow_mut().plan = Some(diff);
        Ok(satisfied)
    }

    fn apply_infrastructure(&self) -> Result<()> {
        let result = self.collab.provisioner.apply()?;
        tracing::info!(%result, "infrastructure applied");
        self.probe()?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // artifacts
    // -----------------------------------------------------------------------

    fn missing_artifacts(&self) -> Result<Vec<&'a ArtifactConfig>> {
        let registry = &self.config.registry;
        let mut missing = Vec::new();
        for artifact in &self.config.artifacts {
            if !self
                .collab
                .registry
                .exists(&registry.repository(&artifact.name), &registry.tag)?
            {
                missing.push(artifact);
            }
        }
        Ok(missing)
    }

    fn publish_artifacts(&self) -> Result<()> {
        for artifact in self.missing_artifacts()? {
            let image = self.config.registry.image_ref(&artifact.name);
            self.collab.registry.publish(artifact, &image)?;
            tracing::info!(artifact = %artifact.name, %image, "published");
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // workloads
    // -----------------------------------------------------------------------

    fn workloads_satisfied(&self) -> Result<bool> {
        self.require_cluster()?;
        let bundle = self.bundle()?;
        if !self.synchronizer().is_current(&bundle)? {
            return Ok(false);
        }
        self.all_current(&self.config.workloads)
    }

    fn deploy_workloads(&self) -> Result<()> {
        self.require_cluster()?;
        let bundle = self.bundle()?;
        let outcome = self.synchronizer().synchronize(&bundle)?;
        if !outcome.removed_keys.is_empty() {
            tracing::info!(removed = ?outcome.removed_keys, "stale secret keys dropped");
        }
        let report = self.deployer().deploy_all(&self.config.workloads)?;
        self.record(report);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // observability
    // -----------------------------------------------------------------------

    fn observability_satisfied(&self) -> Result<bool> {
        if self.config.observability.is_empty() {
            return Ok(true);
        }
        self.require_cluster()?;
        self.all_current(&self.config.observability)
    }

    fn deploy_observability(&self) -> Result<()> {
        self.require_cluster()?;
        let report = self.deployer().deploy_all(&self.config.observability)?;
        self.record(report);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Shared helpers
    // -----------------------------------------------------------------------

    /// The one cluster this run targets. Absent is an environment error
    /// raised before any credential is resolved.
    fn require_cluster(&self) -> Result<String> {
        let cached = self.run.borrow().cluster.clone();
        if let Some(cluster) = cached {
            return Ok(cluster);
        }
        let lookup = StateProber::new(self.config, &self.collab).cluster()?;
        let cluster = lookup
            .resolve("cluster", self.operator)?
            .ok_or_else(|| RolloutError::MissingCluster {
                project: self.config.project.name.clone(),
                region: self.config.project.region.clone(),
            })?;
        self.collab.runtime.connect(&cluster)?;
        tracing::info!(%cluster, "targeting cluster");
        self.run.borrow_mut().cluster = Some(cluster.clone());
        Ok(cluster)
    }

    fn probe(&self) -> Result<DeploymentState> {
        let cluster = self.run.borrow().cluster.clone();
        let state = StateProber::new(self.config, &self.collab)
            .pin_cluster(cluster)
            .probe()?;
        self.run.borrow_mut().state = Some(state.clone());
        Ok(state)
    }

    /// Endpoints for the summary when no phase probed this run. Reads no
    /// secret; a failure only leaves the endpoints blank.
    fn probe_endpoints(&self) {
        let prober = StateProber::new(self.config, &self.collab);
        let cluster = match self.run.borrow().cluster.clone() {
            Some(c) => Lookup::Found(c),
            None => prober.cluster().unwrap_or(Lookup::Absent),
        };
        match prober.data_stores() {
            Ok((database, cache)) => {
                self.run.borrow_mut().state = Some(DeploymentState {
                    cluster,
                    database,
                    cache,
                    secrets: Default::default(),
                });
            }
            Err(e) => tracing::warn!(error = %e, "could not probe endpoints for the summary"),
        }
    }

    /// Resolved at most once per run so generated fields stay stable
    /// between the predicate and the action.
    fn bundle(&self) -> Result<CredentialBundle> {
        let cached = self.run.borrow().bundle.clone();
        if let Some(bundle) = cached {
            return Ok(bundle);
        }
        let state = self.probe()?.disambiguate(self.operator)?;
        self.run.borrow_mut().state = Some(state.clone());
        let bundle = CredentialBroker::new(self.config, self.collab.secrets)
            .with_runtime(self.collab.runtime)
            .resolve(&state)?;
        let mut run = self.run.borrow_mut();
        for field in bundle.fallback_fields() {
            run.warnings
                .push(format!("credential '{field}' uses its fallback value"));
        }
        run.bundle = Some(bundle.clone());
        Ok(bundle)
    }

    fn synchronizer(&self) -> SecretSynchronizer<'_> {
        SecretSynchronizer::new(self.config, self.collab.runtime, self.collab.secrets)
    }

    fn deployer(&self) -> WorkloadDeployer<'_> {
        WorkloadDeployer::new(self.root, self.config, self.collab.runtime, &self.cancel)
            .strict(self.strict_readiness)
    }

    fn all_current(&self, workloads: &[WorkloadConfig]) -> Result<bool> {
        let deployer = self.deployer();
        for w in workloads {
            if !deployer.is_current(w)? {
                tracing::debug!(workload = %w.name, "not current");
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn record(&self, report: DeployReport) {
        let mut run = self.run.borrow_mut();
        run.workloads.extend(report.outcomes);
        run.warnings.extend(report.warnings);
    }

    fn summarize(&self, started: chrono::DateTime<Utc>, report: &RunReport) -> RunSummary {
        let run = self.run.borrow();
        let state = run.state.as_ref();
        let names: Vec<String> = self.config.workloads.iter().map(|w| w.name.clone()).collect();
        let mut summary = RunSummary::new(&self.config.project.name, started, report)
            .with_next_steps(&self.config.project.namespace, &names);
        summary.endpoints = Endpoints {
            cluster: run
                .cluster
                .clone()
                .or_else(|| state.and_then(|s| s.cluster.found().cloned())),
            database: state.and_then(|s| s.database_endpoint()).map(|e| e.to_string()),
            cache: state.and_then(|s| s.cache_endpoint()).map(|e| e.to_string()),
        };
        if let Some(cluster) = &summary.endpoints.cluster {
            // The run used a private kubeconfig; the operator's is unchanged.
            summary.next_steps.insert(
                0,
                format!(
                    "aws eks update-kubeconfig --name {cluster} --region {}",
                    self.config.project.region
                ),
            );
        }
        summary.workloads = run.workloads.clone();
        summary.warnings = run.warnings.clone();
        summary
    }
}
