//! Per-field credential resolution with provenance.
//!
//! Precedence for every field: live endpoint discovery, then the secret
//! store document, then (for `generate` fields) the value already in the
//! runtime secret or a fresh one, then the static fallback.
//! Fallbacks degrade the run with a warning; they never abort it.

use crate::clients::{SecretData, SecretStore, WorkloadRuntime};
use crate::config::{CredentialField, LiveSource, RunConfig};
use crate::error::{Result, RolloutError};
use crate::probe::DeploymentState;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

const GENERATED_LEN: usize = 48;

// ---------------------------------------------------------------------------
// Provenance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Live,
    SecretStore,
    RuntimeSecret,
    /// Synthesized this run because no prior value existed.
    Generated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "provenance", content = "source", rename_all = "snake_case")]
pub enum Provenance {
    Resolved(Source),
    Fallback,
}

impl Provenance {
    pub fn is_fallback(self) -> bool {
        matches!(self, Provenance::Fallback)
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Resolved(Source::Live) => f.write_str("live"),
            Provenance::Resolved(Source::SecretStore) => f.write_str("secret store"),
            Provenance::Resolved(Source::RuntimeSecret) => f.write_str("runtime secret"),
            Provenance::Resolved(Source::Generated) => f.write_str("generated"),
            Provenance::Fallback => f.write_str("FALLBACK"),
        }
    }
}

// ---------------------------------------------------------------------------
// CredentialBundle
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, Eq)]
pub struct CredentialValue {
    pub value: String,
    pub provenance: Provenance,
}

impl CredentialValue {
    pub fn masked(&self) -> String {
        if self.value.is_empty() {
            String::new()
        } else {
            "********".to_string()
        }
    }
}

impl fmt::Debug for CredentialValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialValue")
            .field("value", &self.masked())
            .field("provenance", &self.provenance)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialBundle {
    fields: BTreeMap<String, CredentialValue>,
}

impl CredentialBundle {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(|v| v.value.as_str())
    }

    pub fn provenance(&self, field: &str) -> Option<Provenance> {
        self.fields.get(field).map(|v| v.provenance)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CredentialValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn fallback_fields(&self) -> Vec<&str> {
        self.iter()
            .filter(|(_, v)| v.provenance.is_fallback())
            .map(|(k, _)| k)
            .collect()
    }

    pub fn generated_fields(&self) -> Vec<&str> {
        self.iter()
            .filter(|(_, v)| v.provenance == Provenance::Resolved(Source::Generated))
            .map(|(k, _)| k)
            .collect()
    }

    /// The exact key set written to the runtime secret.
    pub fn to_secret_data(&self) -> SecretData {
        self.fields
            .iter()
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect()
    }

    fn insert(&mut self, field: &str, value: String, provenance: Provenance) {
        self.fields
            .insert(field.to_string(), CredentialValue { value, provenance });
    }
}

// ---------------------------------------------------------------------------
// CredentialBroker
// ---------------------------------------------------------------------------

pub struct CredentialBroker<'a> {
    config: &'a RunConfig,
    secrets: &'a dyn SecretStore,
    runtime: Option<&'a dyn WorkloadRuntime>,
}

impl<'a> CredentialBroker<'a> {
    pub fn new(config: &'a RunConfig, secrets: &'a dyn SecretStore) -> Self {
        Self {
            config,
            secrets,
            runtime: None,
        }
    }

    /// Also consult the secret already in the runtime. The runtime client
    /// must already be connected to the target cluster.
    pub fn with_runtime(mut self, runtime: &'a dyn WorkloadRuntime) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn resolve(&self, state: &DeploymentState) -> Result<CredentialBundle> {
        let store_id = self.config.secret_store_id();
        let stored = degrade("secret store", &store_id, self.secrets.get(&store_id))?;
        if stored.is_none() {
            tracing::warn!(id = %store_id, "secret store has no credentials document");
        }
        let stored = stored.unwrap_or_default();

        let prior = match (self.runtime, state.cluster.found()) {
            (Some(runtime), Some(_)) => {
                let ns = &self.config.project.namespace;
                let name = self.config.secret_name();
                degrade("runtime secret", &name, runtime.read_secret(ns, &name))?
                    .unwrap_or_default()
            }
            _ => SecretData::new(),
        };

        let mut bundle = CredentialBundle::default();
        let mut missing = Vec::new();
        for (name, field) in &self.config.credentials.fields {
            match resolve_field(name, field, state, &stored, &prior) {
                Some((value, provenance)) => {
                    if provenance.is_fallback() {
                        tracing::warn!(field = %name, "using fallback credential value");
                    }
                    bundle.insert(name, value, provenance);
                }
                None => missing.push(name.clone()),
            }
        }

        if !missing.is_empty() {
            return Err(RolloutError::CredentialsUnavailable { fields: missing });
        }
        tracing::info!(
            fields = bundle.fields.len(),
            fallback = bundle.fallback_fields().len(),
            generated = bundle.generated_fields().len(),
            "resolved credential bundle"
        );
        Ok(bundle)
    }
}

fn resolve_field(
    name: &str,
    field: &CredentialField,
    state: &DeploymentState,
    stored: &SecretData,
    prior: &SecretData,
) -> Option<(String, Provenance)> {
    if let Some(value) = field.live.and_then(|source| live_value(source, state)) {
        return Some((value, Provenance::Resolved(Source::Live)));
    }
    if let Some(value) = field.store_key.as_ref().and_then(|k| stored.get(k)) {
        return Some((value.clone(), Provenance::Resolved(Source::SecretStore)));
    }
    if field.generate {
        // A one-time secret already in use must survive a store that lost it.
        if let Some(value) = prior.get(name) {
            return Some((value.clone(), Provenance::Resolved(Source::RuntimeSecret)));
        }
        return Some((generate_secret(), Provenance::Resolved(Source::Generated)));
    }
    field
        .fallback
        .as_ref()
        .map(|value| (value.clone(), Provenance::Fallback))
}

fn live_value(source: LiveSource, state: &DeploymentState) -> Option<String> {
    match source {
        LiveSource::DatabaseHost => state.database_endpoint().map(|e| e.host.clone()),
        LiveSource::DatabasePort => state.database_endpoint().map(|e| e.port.to_string()),
        LiveSource::CacheHost => state.cache_endpoint().map(|e| e.host.clone()),
        LiveSource::CachePort => state.cache_endpoint().map(|e| e.port.to_string()),
    }
}

/// A failed read from an external command is a missing value, not a
/// fatal error. Missing tools and local errors still propagate.
fn degrade<T>(what: &str, id: &str, result: Result<Option<T>>) -> Result<Option<T>> {
    match result {
        Ok(v) => Ok(v),
        Err(e) if is_unreadable(&e) => {
            tracing::warn!(%what, %id, error = %e, "could not read; treating as absent");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// The external system answered, but not usefully: denied, missing, or
/// malformed.
pub(crate) fn is_unreadable(e: &RolloutError) -> bool {
    matches!(
        e,
        RolloutError::Command { .. } | RolloutError::UnexpectedOutput { .. }
    )
}

pub fn generate_secret() -> String {
    use rand::{distributions::Alphanumeric, Rng};
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::memory::MemoryCloud;
    use crate::probe::{Lookup, DeploymentState};
    use crate::types::Endpoint;

    fn state(cluster: Option<&str>, db: Option<Endpoint>) -> DeploymentState {
        DeploymentState {
            cluster: cluster.map_or(Lookup::Absent, |c| Lookup::Found(c.to_string())),
            database: db.map_or(Lookup::Absent, Lookup::Found),
            cache: Lookup::Absent,
            secrets: Default::default(),
        }
    }

    fn data(pairs: &[(&str, &str)]) -> SecretData {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_store_falls_back_with_provenance() {
        let cloud = MemoryCloud::default();
        let cfg = RunConfig::new("shop");
        let bundle = CredentialBroker::new(&cfg, &cloud)
            .resolve(&state(None, None))
            .unwrap();

        assert_eq!(bundle.get("db_user"), Some("admin"));
        assert_eq!(bundle.get("db_password"), Some("changeme"));
        assert_eq!(bundle.get("db_name"), Some("microservices"));
        for field in ["db_user", "db_password", "db_name"] {
            assert_eq!(bundle.provenance(field), Some(Provenance::Fallback));
        }
        assert!(bundle.fallback_fields().contains(&"db_password"));
    }

    #[test]
    fn live_endpoint_beats_stored_value() {
        let cloud = MemoryCloud::default();
        cloud
            .state
            .borrow_mut()
            .store
            .insert("shop/runtime".into(), data(&[("host", "stale.internal")]));
        let cfg = RunConfig::new("shop");
        let bundle = CredentialBroker::new(&cfg, &cloud)
            .resolve(&state(None, Some(Endpoint::new("db.internal", 5433))))
            .unwrap();
        assert_eq!(bundle.get("db_host"), Some("db.internal"));
        assert_eq!(bundle.get("db_port"), Some("5433"));
        assert_eq!(
            bundle.provenance("db_host"),
            Some(Provenance::Resolved(Source::Live))
        );
    }

    #[test]
    fn bundle_mixes_stored_and_fallback_fields() {
        let cloud = MemoryCloud::default();
        cloud.state.borrow_mut().store.insert(
            "shop/runtime".into(),
            data(&[("username", "svc"), ("password", "s3cret")]),
        );
        let cfg = RunConfig::new("shop");
        let bundle = CredentialBroker::new(&cfg, &cloud)
            .resolve(&state(None, None))
            .unwrap();
        assert_eq!(bundle.get("db_password"), Some("s3cret"));
        assert_eq!(
            bundle.provenance("db_user"),
            Some(Provenance::Resolved(Source::SecretStore))
        );
        assert_eq!(bundle.provenance("db_name"), Some(Provenance::Fallback));
    }

    #[test]
    fn signing_key_generated_once_then_reused_from_runtime() {
        let cloud = MemoryCloud::default();
        let cfg = RunConfig::new("shop");
        let first = CredentialBroker::new(&cfg, &cloud)
            .resolve(&state(None, None))
            .unwrap();
        let key = first.get("signing_key").unwrap().to_string();
        assert_eq!(key.len(), GENERATED_LEN);
        assert_eq!(first.generated_fields(), vec!["signing_key"]);

        cloud
            .state
            .borrow_mut()
            .secrets
            .insert("shop-credentials".into(), data(&[("signing_key", key.as_str())]));
        let second = CredentialBroker::new(&cfg, &cloud)
            .with_runtime(&cloud)
            .resolve(&state(Some("shop-eks"), None))
            .unwrap();
        assert_eq!(second.get("signing_key"), Some(key.as_str()));
        assert_eq!(
            second.provenance("signing_key"),
            Some(Provenance::Resolved(Source::RuntimeSecret))
        );
        assert!(second.generated_fields().is_empty());
    }

    #[test]
    fn fallback_written_last_run_stays_fallback() {
        let cloud = MemoryCloud::default();
        cloud
            .state
            .borrow_mut()
            .secrets
            .insert("shop-credentials".into(), data(&[("db_password", "changeme")]));
        let cfg = RunConfig::new("shop");
        let bundle = CredentialBroker::new(&cfg, &cloud)
            .with_runtime(&cloud)
            .resolve(&state(Some("shop-eks"), None))
            .unwrap();
        assert_eq!(bundle.provenance("db_password"), Some(Provenance::Fallback));
    }

    #[test]
    fn field_without_any_value_is_unavailable() {
        let cloud = MemoryCloud::default();
        let mut cfg = RunConfig::new("shop");
        cfg.credentials.fields.insert(
            "api_token".into(),
            CredentialField {
                store_key: Some("api_token".into()),
                ..CredentialField::default()
            },
        );
        let err = CredentialBroker::new(&cfg, &cloud)
            .resolve(&state(None, None))
            .unwrap_err();
        match err {
            RolloutError::CredentialsUnavailable { fields } => assert_eq!(fields, vec!["api_token"]),
            other => panic!("expected CredentialsUnavailable, got {other:?}"),
        }
    }

    struct DeniedStore;

    impl SecretStore for DeniedStore {
        fn get(&self, _id: &str) -> Result<Option<SecretData>> {
            Err(RolloutError::Command {
                command: "aws secretsmanager get-secret-value".into(),
                status: 255,
                stderr: "AccessDeniedException".into(),
            })
        }

        fn put(&self, _id: &str, _values: &SecretData) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn unreadable_store_degrades_to_fallback() {
        let cfg = RunConfig::new("shop");
        let bundle = CredentialBroker::new(&cfg, &DeniedStore)
            .resolve(&state(None, None))
            .unwrap();
        assert_eq!(bundle.provenance("db_password"), Some(Provenance::Fallback));
    }

    #[test]
    fn debug_output_masks_values() {
        let v = CredentialValue {
            value: "hunter2".into(),
            provenance: Provenance::Fallback,
        };
        assert!(!format!("{v:?}").contains("hunter2"));
    }
}
