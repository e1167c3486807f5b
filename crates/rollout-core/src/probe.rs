//! Read-only discovery of what already exists.
//!
//! Every field of a [`DeploymentState`] is independently optional: partial
//! infrastructure is data, not an error. When a heuristic matches more than
//! one resource the prober reports the candidates instead of picking one.
//! Connecting the runtime client is scoped to that client and leaves the
//! operator's own configuration alone.

use crate::clients::{Collaborators, DataStoreInfo, ResourceDescriber, SecretStore, WorkloadRuntime};
use crate::config::RunConfig;
use crate::error::{Result, RolloutError};
use crate::operator::Operator;
use crate::types::Endpoint;
use serde::Serialize;
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate<T> {
    pub name: String,
    pub value: T,
}

/// Result of locating one logical target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Lookup<T> {
    Absent,
    Found(T),
    /// More than one resource matched; the caller must disambiguate.
    Ambiguous(Vec<Candidate<T>>),
}

impl<T> Lookup<T> {
    fn from_choice(choice: Option<T>) -> Self {
        choice.map_or(Lookup::Absent, Lookup::Found)
    }

    fn from_candidates(mut candidates: Vec<Candidate<T>>) -> Self {
        match candidates.len() {
            0 => Lookup::Absent,
            1 => Lookup::Found(candidates.remove(0).value),
            _ => Lookup::Ambiguous(candidates),
        }
    }

    pub fn found(&self) -> Option<&T> {
        match self {
            Lookup::Found(v) => Some(v),
            _ => None,
        }
    }

    pub fn candidate_names(&self) -> Vec<String> {
        match self {
            Lookup::Ambiguous(c) => c.iter().map(|c| c.name.clone()).collect(),
            _ => Vec::new(),
        }
    }

    /// Collapse to a single value. Ambiguity goes to the operator when one
    /// is interactive and is fatal otherwise.
    pub fn resolve(self, target: &str, operator: &dyn Operator) -> Result<Option<T>> {
        match self {
            Lookup::Absent => Ok(None),
            Lookup::Found(v) => Ok(Some(v)),
            Lookup::Ambiguous(candidates) => {
                let names: Vec<String> = candidates.iter().map(|c| c.name.clone()).collect();
                if !operator.is_interactive() {
                    return Err(RolloutError::Ambiguous {
                        target: target.to_string(),
                        candidates: names,
                    });
                }
                let Some(choice) = operator.choose(target, &names) else {
                    return Err(RolloutError::Aborted(format!("no {target} selected")));
                };
                candidates
                    .into_iter()
                    .find(|c| c.name == choice)
                    .map(|c| Some(c.value))
                    .ok_or(RolloutError::Ambiguous {
                        target: target.to_string(),
                        candidates: names,
                    })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// DeploymentState
// ---------------------------------------------------------------------------

/// Snapshot of external state. Captured by value; never updated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentState {
    pub cluster: Lookup<String>,
    pub database: Lookup<Endpoint>,
    pub cache: Lookup<Endpoint>,
    /// Logical secret name → opaque locator; `None` when it does not exist.
    pub secrets: BTreeMap<String, Option<String>>,
}

impl DeploymentState {
    pub fn database_endpoint(&self) -> Option<&Endpoint> {
        self.database.found()
    }

    pub fn cache_endpoint(&self) -> Option<&Endpoint> {
        self.cache.found()
    }

    /// Collapse ambiguous data stores to the operator's choice. Fails with
    /// `Ambiguous` when nobody can answer.
    pub fn disambiguate(mut self, operator: &dyn Operator) -> Result<Self> {
        self.database = Lookup::from_choice(self.database.resolve("database", operator)?);
        self.cache = Lookup::from_choice(self.cache.resolve("cache", operator)?);
        Ok(self)
    }
}

pub const STORE_SECRET: &str = "store";
pub const RUNTIME_SECRET: &str = "runtime";

// ---------------------------------------------------------------------------
// StateProber
// ---------------------------------------------------------------------------

pub struct StateProber<'a> {
    config: &'a RunConfig,
    describer: &'a dyn ResourceDescriber,
    secrets: &'a dyn SecretStore,
    runtime: &'a dyn WorkloadRuntime,
    pinned: Option<String>,
}

impl<'a> StateProber<'a> {
    pub fn new(config: &'a RunConfig, collaborators: &Collaborators<'a>) -> Self {
        Self {
            config,
            describer: collaborators.describer,
            secrets: collaborators.secrets,
            runtime: collaborators.runtime,
            pinned: None,
        }
    }

    /// Use a cluster already chosen this run instead of rediscovering it.
    pub fn pin_cluster(mut self, cluster: Option<String>) -> Self {
        self.pinned = cluster;
        self
    }

    /// Full snapshot. Secret references for the runtime are only looked up
    /// when exactly one cluster is known.
    pub fn probe(&self) -> Result<DeploymentState> {
        let cluster = self.cluster()?;
        let (database, cache) = self.data_stores()?;
        let secrets = self.secret_refs(cluster.found().map(String::as_str))?;
        let state = DeploymentState {
            cluster,
            database,
            cache,
            secrets,
        };
        tracing::debug!(?state, "probed deployment state");
        Ok(state)
    }

    /// Pinned or configured name when set, otherwise every cluster whose
    /// name contains the project name.
    pub fn cluster(&self) -> Result<Lookup<String>> {
        if let Some(name) = self.pinned.as_ref().or(self.config.project.cluster.as_ref()) {
            return Ok(match self.describer.describe_cluster(name)? {
                Some(info) => {
                    if !info.is_active() {
                        tracing::warn!(cluster = %info.name, status = %info.status, "cluster is not active");
                    }
                    Lookup::Found(info.name)
                }
                None => Lookup::Absent,
            });
        }
        let project = &self.config.project.name;
        let candidates = self
            .describer
            .list_clusters()?
            .into_iter()
            .filter(|c| c.contains(project.as_str()))
            .map(|c| Candidate {
                name: c.clone(),
                value: c,
            })
            .collect();
        Ok(Lookup::from_candidates(candidates))
    }

    /// Database and cache endpoints only; touches no secret.
    pub fn data_stores(&self) -> Result<(Lookup<Endpoint>, Lookup<Endpoint>)> {
        Ok((
            self.data_store("database", self.describer.databases()?),
            self.data_store("cache", self.describer.caches()?),
        ))
    }

    fn data_store(&self, kind: &str, stores: Vec<DataStoreInfo>) -> Lookup<Endpoint> {
        let project = &self.config.project.name;
        let candidates = stores
            .into_iter()
            .filter(|s| s.id.contains(project.as_str()))
            .filter_map(|s| match s.endpoint {
                Some(endpoint) => Some(Candidate {
                    name: s.id,
                    value: endpoint,
                }),
                None => {
                    tracing::debug!(kind, id = %s.id, status = %s.status, "no endpoint yet");
                    None
                }
            })
            .collect();
        Lookup::from_candidates(candidates)
    }

    fn secret_refs(&self, cluster: Option<&str>) -> Result<BTreeMap<String, Option<String>>> {
        let mut refs = BTreeMap::new();

        let store_id = self.config.secret_store_id();
        let stored = self.secrets.get(&store_id)?.map(|_| format!("secretsmanager:{store_id}"));
        refs.insert(STORE_SECRET.to_string(), stored);

        let runtime = match cluster {
            Some(cluster) => {
                self.runtime.connect(cluster)?;
                let ns = &self.config.project.namespace;
                let name = self.config.secret_name();
                self.runtime
                    .read_secret(ns, &name)?
                    .map(|_| format!("{cluster}/{ns}/secret/{name}"))
            }
            None => None,
        };
        refs.insert(RUNTIME_SECRET.to_string(), runtime);
        Ok(refs)
    }
}
