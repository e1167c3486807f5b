//! Narrow contracts for the externally-owned systems the orchestrator drives.
//!
//! Components depend only on these traits. The production implementations
//! shell out to `terraform`, `aws`, `docker`, and `kubectl` and parse their
//! JSON output into the typed results below.

use crate::config::ArtifactConfig;
use crate::error::Result;
use crate::types::Endpoint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod aws;
pub mod docker;
pub mod kubectl;
pub mod terraform;

#[cfg(test)]
pub(crate) mod memory;

pub use aws::{AwsDescriber, AwsSecretStore};
pub use docker::EcrRegistry;
pub use kubectl::KubectlRuntime;
pub use terraform::TerraformProvisioner;

/// Flat string map used for secret payloads.
pub type SecretData = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Provisioning
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDiff {
    /// True when applying would create, update, or destroy something.
    pub has_changes: bool,
    pub summary: String,
}

pub trait Provisioner {
    /// Compute the diff between declared and actual infrastructure.
    fn plan(&self) -> Result<PlanDiff>;
    /// Apply the declared infrastructure. Idempotent on the provider side.
    fn apply(&self) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Resource description
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub name: String,
    pub status: String,
}

impl ClusterInfo {
    pub fn is_active(&self) -> bool {
        self.status.eq_ignore_ascii_case("ACTIVE")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataStoreInfo {
    pub id: String,
    pub status: String,
    pub endpoint: Option<Endpoint>,
}

pub trait ResourceDescriber {
    fn list_clusters(&self) -> Result<Vec<String>>;
    fn describe_cluster(&self, name: &str) -> Result<Option<ClusterInfo>>;
    fn databases(&self) -> Result<Vec<DataStoreInfo>>;
    fn caches(&self) -> Result<Vec<DataStoreInfo>>;
}

// ---------------------------------------------------------------------------
// Secret store
// ---------------------------------------------------------------------------

pub trait SecretStore {
    /// `Ok(None)` when the secret does not exist yet.
    fn get(&self, id: &str) -> Result<Option<SecretData>>;
    fn put(&self, id: &str, values: &SecretData) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Artifact registry
// ---------------------------------------------------------------------------

pub trait ArtifactRegistry {
    fn exists(&self, repository: &str, tag: &str) -> Result<bool>;
    /// Build the artifact and push it under `image_ref`.
    fn publish(&self, artifact: &ArtifactConfig, image_ref: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Orchestration runtime
// ---------------------------------------------------------------------------

/// Observed rollout state of one workload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkloadStatus {
    pub name: String,
    pub image: Option<String>,
    pub desired: u32,
    pub updated: u32,
    pub ready: u32,
    pub available: u32,
    /// The controller has observed the latest spec generation.
    pub observed_current: bool,
    pub progress_deadline_exceeded: bool,
}

impl WorkloadStatus {
    pub fn is_ready(&self) -> bool {
        self.observed_current
            && self.updated >= self.desired
            && self.ready >= self.desired
            && self.available >= self.desired
    }
}

/// Per-container condition worth diagnosing (waiting or terminated reason).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSignal {
    pub pod: String,
    pub reason: String,
    pub message: Option<String>,
    pub restarts: u32,
}

pub trait WorkloadRuntime {
    /// Point this client at the named cluster. Scoped to the client: the
    /// operator's own runtime configuration is left as it was.
    fn connect(&self, cluster: &str) -> Result<()>;
    fn workload(&self, namespace: &str, name: &str) -> Result<Option<WorkloadStatus>>;
    fn pod_signals(&self, namespace: &str, name: &str) -> Result<Vec<PodSignal>>;
    fn apply(&self, namespace: &str, manifest: &str) -> Result<()>;
    fn restart(&self, namespace: &str, name: &str) -> Result<()>;
    fn rollback(&self, namespace: &str, name: &str) -> Result<()>;
    fn read_secret(&self, namespace: &str, name: &str) -> Result<Option<SecretData>>;
    /// Replace the whole secret object; no key from a prior version survives.
    fn replace_secret(&self, namespace: &str, name: &str, data: &SecretData) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// The set of external systems one run talks to.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub provisioner: &'a dyn Provisioner,
    pub describer: &'a dyn ResourceDescriber,
    pub secrets: &'a dyn SecretStore,
    pub registry: &'a dyn ArtifactRegistry,
    pub runtime: &'a dyn WorkloadRuntime,
}
