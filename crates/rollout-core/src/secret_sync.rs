//! Writes a credential bundle into the runtime's secret storage.

use crate::clients::{SecretData, SecretStore, WorkloadRuntime};
use crate::config::RunConfig;
use crate::credentials::{is_unreadable, CredentialBundle};
use crate::error::Result;
use serde::Serialize;
use std::cell::Cell;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    /// A secret with this name existed before the write.
    pub replaced: bool,
    /// Keys present before and absent now.
    pub removed_keys: Vec<String>,
    /// Freshly generated fields written back to the secret store.
    pub persisted: Vec<String>,
}

pub struct SecretSynchronizer<'a> {
    config: &'a RunConfig,
    runtime: &'a dyn WorkloadRuntime,
    secrets: &'a dyn SecretStore,
    persisted: Cell<bool>,
}

impl<'a> SecretSynchronizer<'a> {
    pub fn new(
        config: &'a RunConfig,
        runtime: &'a dyn WorkloadRuntime,
        secrets: &'a dyn SecretStore,
    ) -> Self {
        Self {
            config,
            runtime,
            secrets,
            persisted: Cell::new(false),
        }
    }

    /// True when the runtime secret already holds exactly the bundle.
    pub fn is_current(&self, bundle: &CredentialBundle) -> Result<bool> {
        let existing = self
            .runtime
            .read_secret(&self.config.project.namespace, &self.config.secret_name())?;
        Ok(existing.as_ref() == Some(&bundle.to_secret_data()))
    }

    /// Replace the runtime secret with exactly the bundle's fields.
    ///
    /// The runtime writes the whole object in one call, so readers see the
    /// old secret or the new one, never a mix. Generated fields are merged
    /// into the secret store first, at most once per synchronizer.
    pub fn synchronize(&self, bundle: &CredentialBundle) -> Result<SyncOutcome> {
        let ns = &self.config.project.namespace;
        let name = self.config.secret_name();

        let persisted = self.persist_generated(bundle)?;

        let data = bundle.to_secret_data();
        let previous = self.runtime.read_secret(ns, &name)?;
        let removed_keys = previous
            .as_ref()
            .map(|old| {
                old.keys()
                    .filter(|k| !data.contains_key(*k))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        self.runtime.replace_secret(ns, &name, &data)?;
        tracing::info!(
            secret = %name,
            namespace = %ns,
            keys = data.len(),
            removed = ?removed_keys,
            "runtime secret replaced"
        );
        Ok(SyncOutcome {
            replaced: previous.is_some(),
            removed_keys,
            persisted,
        })
    }

    fn persist_generated(&self, bundle: &CredentialBundle) -> Result<Vec<String>> {
        let generated = bundle.generated_fields();
        if generated.is_empty() || self.persisted.get() {
            return Ok(Vec::new());
        }

        let store_id = self.config.secret_store_id();
        // Writing without the current document would drop its other keys.
        let mut document: SecretData = match self.secrets.get(&store_id) {
            Ok(document) => document.unwrap_or_default(),
            Err(e) if is_unreadable(&e) => {
                tracing::warn!(
                    id = %store_id,
                    error = %e,
                    "secret store unreadable; generated values kept only in the runtime secret"
                );
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        let mut written = Vec::new();
        for field in generated {
            let key = self
                .config
                .credentials
                .fields
                .get(field)
                .and_then(|f| f.store_key.clone())
                .unwrap_or_else(|| field.to_string());
            if let Some(value) = bundle.get(field) {
                document.insert(key, value.to_string());
                written.push(field.to_string());
            }
        }
        self.secrets.put(&store_id, &document)?;
        self.persisted.set(true);
        tracing::info!(id = %store_id, fields = ?written, "persisted generated secrets");
        Ok(written)
    }
}
