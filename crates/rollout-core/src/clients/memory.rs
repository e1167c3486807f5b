//! In-memory stand-in for every external system, used by unit tests.

use super::{
    ArtifactRegistry, ClusterInfo, Collaborators, DataStoreInfo, PlanDiff, PodSignal,
    Provisioner, ResourceDescriber, SecretData, SecretStore, WorkloadRuntime, WorkloadStatus,
};
use crate::config::ArtifactConfig;
use crate::error::{Result, RolloutError};
use crate::types::Endpoint;
use serde::Deserialize;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Default)]
pub struct CloudState {
    /// Declared infrastructure not yet applied.
    pub pending_infra: bool,
    pub cluster_on_apply: String,
    pub clusters: Vec<String>,
    pub databases: Vec<DataStoreInfo>,
    pub caches: Vec<DataStoreInfo>,
    pub infra_applies: u32,

    pub store: BTreeMap<String, SecretData>,
    pub store_reads: u32,
    pub store_puts: u32,

    pub images: BTreeSet<(String, String)>,
    pub publishes: u32,

    pub connected: Option<String>,
    pub workloads: BTreeMap<String, WorkloadStatus>,
    /// Polls remaining before a freshly applied workload reports ready.
    pub converge_polls: BTreeMap<String, u32>,
    pub polls_per_rollout: u32,
    pub crashing: BTreeSet<String>,
    pub applied: Vec<String>,
    pub restarts: Vec<String>,
    pub rollbacks: Vec<String>,
    pub secrets: BTreeMap<String, SecretData>,
    pub secret_reads: u32,
    pub secret_writes: u32,
    pub fail_apply: Option<String>,
}

#[derive(Default)]
pub struct MemoryCloud {
    pub state: RefCell<CloudState>,
}

impl MemoryCloud {
    /// Nothing provisioned yet; applying creates `cluster`, a database, and a cache.
    pub fn empty(cluster: &str) -> Self {
        let cloud = Self::default();
        {
            let mut s = cloud.state.borrow_mut();
            s.pending_infra = true;
            s.cluster_on_apply = cluster.to_string();
        }
        cloud
    }

    pub fn collaborators(&self) -> Collaborators<'_> {
        Collaborators {
            provisioner: self,
            describer: self,
            secrets: self,
            registry: self,
            runtime: self,
        }
    }

    fn ready_status(name: &str, image: Option<String>) -> WorkloadStatus {
        WorkloadStatus {
            name: name.to_string(),
            image,
            desired: 1,
            updated: 1,
            ready: 1,
            available: 1,
            observed_current: true,
            progress_deadline_exceeded: false,
        }
    }
}

impl Provisioner for MemoryCloud {
    fn plan(&self) -> Result<PlanDiff> {
        let s = self.state.borrow();
        Ok(PlanDiff {
            has_changes: s.pending_infra,
            summary: if s.pending_infra {
                "3 to add, 0 to change, 0 to destroy".to_string()
            } else {
                "no changes".to_string()
            },
        })
    }

    fn apply(&self) -> Result<String> {
        let mut s = self.state.borrow_mut();
        s.infra_applies += 1;
        if s.pending_infra {
            let cluster = s.cluster_on_apply.clone();
            s.clusters.push(cluster);
            s.databases.push(DataStoreInfo {
                id: "shop-db".into(),
                status: "available".into(),
                endpoint: Some(Endpoint::new("shop-db.internal", 5432)),
            });
            s.caches.push(DataStoreInfo {
                id: "shop-cache".into(),
                status: "available".into(),
                endpoint: Some(Endpoint::new("shop-cache.internal", 6379)),
            });
            s.pending_infra = false;
        }
        Ok("Apply complete!".to_string())
    }
}

impl ResourceDescriber for MemoryCloud {
    fn list_clusters(&self) -> Result<Vec<String>> {
        Ok(self.state.borrow().clusters.clone())
    }

    fn describe_cluster(&self, name: &str) -> Result<Option<ClusterInfo>> {
        let s = self.state.borrow();
        Ok(s.clusters.iter().find(|c| *c == name).map(|c| ClusterInfo {
            name: c.clone(),
            status: "ACTIVE".into(),
        }))
    }

    fn databases(&self) -> Result<Vec<DataStoreInfo>> {
        Ok(self.state.borrow().databases.clone())
    }

    fn caches(&self) -> Result<Vec<DataStoreInfo>> {
        Ok(self.state.borrow().caches.clone())
    }
}

impl SecretStore for MemoryCloud {
    fn get(&self, id: &str) -> Result<Option<SecretData>> {
        let mut s = self.state.borrow_mut();
        s.store_reads += 1;
        Ok(s.store.get(id).cloned())
    }

    fn put(&self, id: &str, values: &SecretData) -> Result<()> {
        let mut s = self.state.borrow_mut();
        s.store_puts += 1;
        s.store.insert(id.to_string(), values.clone());
        Ok(())
    }
}

impl ArtifactRegistry for MemoryCloud {
    fn exists(&self, repository: &str, tag: &str) -> Result<bool> {
        Ok(self
            .state
            .borrow()
            .images
            .contains(&(repository.to_string(), tag.to_string())))
    }

    fn publish(&self, _artifact: &ArtifactConfig, image_ref: &str) -> Result<()> {
        let (repo_path, tag) = image_ref.rsplit_once(':').unwrap_or((image_ref, "latest"));
        let repository = repo_path.split_once('/').map_or(repo_path, |(_, r)| r);
        let mut s = self.state.borrow_mut();
        s.publishes += 1;
        s.images.insert((repository.to_string(), tag.to_string()));
        Ok(())
    }
}

#[derive(Deserialize)]
struct Doc {
    kind: String,
    metadata: DocMeta,
    #[serde(default)]
    spec: serde_yaml::Value,
}

#[derive(Deserialize)]
struct DocMeta {
    name: String,
}

impl WorkloadRuntime for MemoryCloud {
    fn connect(&self, cluster: &str) -> Result<()> {
        self.state.borrow_mut().connected = Some(cluster.to_string());
        Ok(())
    }

    fn workload(&self, _namespace: &str, name: &str) -> Result<Option<WorkloadStatus>> {
        let mut s = self.state.borrow_mut();
        let Some(mut status) = s.workloads.get(name).cloned() else {
            return Ok(None);
        };
        if s.crashing.contains(name) {
            status.ready = 0;
            status.available = 0;
            return Ok(Some(status));
        }
        if let Some(remaining) = s.converge_polls.get_mut(name) {
            if *remaining > 0 {
                *remaining -= 1;
                status.ready = 0;
                status.available = 0;
            }
        }
        Ok(Some(status))
    }

    fn pod_signals(&self, _namespace: &str, name: &str) -> Result<Vec<PodSignal>> {
        let s = self.state.borrow();
        if s.crashing.contains(name) {
            return Ok(vec![PodSignal {
                pod: format!("{name}-7d9f"),
                reason: "CrashLoopBackOff".into(),
                message: Some("back-off restarting failed container".into()),
                restarts: 6,
            }]);
        }
        Ok(Vec::new())
    }

    fn apply(&self, _namespace: &str, manifest: &str) -> Result<()> {
        let mut s = self.state.borrow_mut();
        if let Some(reason) = &s.fail_apply {
            return Err(RolloutError::Command {
                command: "kubectl apply -f -".into(),
                status: 1,
                stderr: reason.clone(),
            });
        }
        for doc in serde_yaml::Deserializer::from_str(manifest) {
            let doc = Doc::deserialize(doc)?;
            if doc.kind != "Deployment" {
                continue;
            }
            let image = doc.spec["template"]["spec"]["containers"][0]["image"]
                .as_str()
                .map(str::to_string);
            let name = doc.metadata.name;
            let polls = s.polls_per_rollout;
            s.converge_polls.insert(name.clone(), polls);
            s.workloads
                .insert(name.clone(), Self::ready_status(&name, image));
            s.applied.push(name);
        }
        Ok(())
    }

    fn restart(&self, _namespace: &str, name: &str) -> Result<()> {
        let mut s = self.state.borrow_mut();
        s.restarts.push(name.to_string());
        let polls = s.polls_per_rollout;
        s.converge_polls.insert(name.to_string(), polls);
        Ok(())
    }

    fn rollback(&self, _namespace: &str, name: &str) -> Result<()> {
        self.state.borrow_mut().rollbacks.push(name.to_string());
        Ok(())
    }

    fn read_secret(&self, _namespace: &str, name: &str) -> Result<Option<SecretData>> {
        let mut s = self.state.borrow_mut();
        s.secret_reads += 1;
        Ok(s.secrets.get(name).cloned())
    }

    fn replace_secret(&self, _namespace: &str, name: &str, data: &SecretData) -> Result<()> {
        let mut s = self.state.borrow_mut();
        s.secret_writes += 1;
        s.secrets.insert(name.to_string(), data.clone());
        Ok(())
    }
}
