use crate::error::{Result, RolloutError};
use crate::paths;
use crate::types::PhaseId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PLACEHOLDER: &str = "{{IMAGE}}";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ProjectConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Explicit cluster name. When unset the prober matches clusters whose
    /// name contains the project name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

// ---------------------------------------------------------------------------
// ProvisioningConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    /// Directory holding the declarative resource definitions.
    #[serde(default = "default_provisioning_dir")]
    pub dir: PathBuf,
}

fn default_provisioning_dir() -> PathBuf {
    PathBuf::from("infra")
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            dir: default_provisioning_dir(),
        }
    }
}

// ---------------------------------------------------------------------------
// RegistryConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegistryConfig {
    /// Registry host, e.g. `123456789012.dkr.ecr.us-east-1.amazonaws.com`.
    #[serde(default)]
    pub host: String,
    /// Repository prefix prepended to each artifact name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prefix: String,
    #[serde(default = "default_tag")]
    pub tag: String,
    /// Token in deployment descriptors replaced by the image reference.
    #[serde(default = "default_placeholder")]
    pub placeholder: String,
}

fn default_tag() -> String {
    "latest".to_string()
}

fn default_placeholder() -> String {
    DEFAULT_PLACEHOLDER.to_string()
}

impl RegistryConfig {
    pub fn repository(&self, artifact: &str) -> String {
        if self.prefix.is_empty() {
            artifact.to_string()
        } else {
            format!("{}/{}", self.prefix.trim_end_matches('/'), artifact)
        }
    }

    /// Fully-qualified artifact reference: `host/prefix/name:tag`.
    pub fn image_ref(&self, artifact: &str) -> String {
        format!("{}/{}:{}", self.host, self.repository(artifact), self.tag)
    }
}

// ---------------------------------------------------------------------------
// ArtifactConfig / WorkloadConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    pub name: String,
    /// Build context directory.
    pub context: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    pub name: String,
    /// Deployment descriptor (YAML) applied to the runtime.
    pub descriptor: PathBuf,
    /// Artifact whose reference replaces the placeholder. Defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    /// Deployed and confirmed ready before every other workload.
    #[serde(default)]
    pub primary: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness: Option<ReadinessConfig>,
}

impl WorkloadConfig {
    pub fn artifact_name(&self) -> &str {
        self.artifact.as_deref().unwrap_or(&self.name)
    }
}

// ---------------------------------------------------------------------------
// ReadinessConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReadinessConfig {
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Promote a readiness timeout to a fatal run failure.
    #[serde(default)]
    pub timeout_is_fatal: bool,
}

fn default_interval() -> u64 {
    10
}

fn default_attempts() -> u32 {
    30
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval(),
            attempts: default_attempts(),
            timeout_is_fatal: false,
        }
    }
}

impl ReadinessConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    /// Upper bound on one poll loop: every attempt plus its wait. `None`
    /// when the product does not fit in a `Duration`.
    pub fn max_duration(&self) -> Option<Duration> {
        self.interval().checked_mul(self.attempts.max(1))
    }
}

// ---------------------------------------------------------------------------
// CredentialsConfig
// ---------------------------------------------------------------------------

/// Live values discovered by the state prober.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveSource {
    DatabaseHost,
    DatabasePort,
    CacheHost,
    CachePort,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialField {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live: Option<LiveSource>,
    /// Key inside the secret store's JSON document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
    /// Synthesize a fresh random value when no prior value exists.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub generate: bool,
}

impl CredentialField {
    fn live(source: LiveSource, store_key: &str, fallback: &str) -> Self {
        Self {
            live: Some(source),
            store_key: Some(store_key.to_string()),
            fallback: Some(fallback.to_string()),
            generate: false,
        }
    }

    fn stored(store_key: &str, fallback: &str) -> Self {
        Self {
            live: None,
            store_key: Some(store_key.to_string()),
            fallback: Some(fallback.to_string()),
            generate: false,
        }
    }

    fn generated(store_key: &str) -> Self {
        Self {
            live: None,
            store_key: Some(store_key.to_string()),
            fallback: None,
            generate: true,
        }
    }

    pub fn has_source(&self) -> bool {
        self.live.is_some() || self.store_key.is_some() || self.fallback.is_some() || self.generate
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Secret store id; defaults to `<project>/runtime`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_id: Option<String>,
    /// Runtime secret name; defaults to `<project>-credentials`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
    #[serde(default = "default_credential_fields")]
    pub fields: BTreeMap<String, CredentialField>,
}

fn default_credential_fields() -> BTreeMap<String, CredentialField> {
    let mut m = BTreeMap::new();
    m.insert(
        "db_host".to_string(),
        CredentialField::live(LiveSource::DatabaseHost, "host", "localhost"),
    );
    m.insert(
        "db_port".to_string(),
        CredentialField::live(LiveSource::DatabasePort, "port", "5432"),
    );
    m.insert(
        "db_name".to_string(),
        CredentialField::stored("dbname", "microservices"),
    );
    m.insert(
        "db_user".to_string(),
        CredentialField::stored("username", "admin"),
    );
    m.insert(
        "db_password".to_string(),
        CredentialField::stored("password", "changeme"),
    );
    m.insert(
        "cache_host".to_string(),
        CredentialField::live(LiveSource::CacheHost, "cache_host", "localhost"),
    );
    m.insert(
        "cache_port".to_string(),
        CredentialField::live(LiveSource::CachePort, "cache_port", "6379"),
    );
    m.insert(
        "signing_key".to_string(),
        CredentialField::generated("jwt_secret"),
    );
    m
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            store_id: None,
            secret_name: None,
            fields: default_credential_fields(),
        }
    }
}

// ---------------------------------------------------------------------------
// RunConfig (top-level)
// ---------------------------------------------------------------------------

/// Everything one invocation needs, passed explicitly to every component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    pub project: ProjectConfig,
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<ArtifactConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workloads: Vec<WorkloadConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub observability: Vec<WorkloadConfig>,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    /// Phases skipped on every run. CLI flags add to this list.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip: Vec<PhaseId>,
}

fn default_version() -> u32 {
    1
}

impl RunConfig {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            version: 1,
            project: ProjectConfig {
                name: project_name.into(),
                region: default_region(),
                namespace: default_namespace(),
                cluster: None,
            },
            provisioning: ProvisioningConfig::default(),
            registry: RegistryConfig {
                host: String::new(),
                prefix: String::new(),
                tag: default_tag(),
                placeholder: default_placeholder(),
            },
            artifacts: Vec::new(),
            workloads: Vec::new(),
            observability: Vec::new(),
            credentials: CredentialsConfig::default(),
            readiness: ReadinessConfig::default(),
            skip: Vec::new(),
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(RolloutError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: RunConfig = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn secret_store_id(&self) -> String {
        self.credentials
            .store_id
            .clone()
            .unwrap_or_else(|| format!("{}/runtime", self.project.name))
    }

    pub fn secret_name(&self) -> String {
        self.credentials
            .secret_name
            .clone()
            .unwrap_or_else(|| format!("{}-credentials", self.project.name))
    }

    pub fn is_skipped(&self, phase: PhaseId) -> bool {
        self.skip.contains(&phase)
    }

    pub fn skip_phase(&mut self, phase: PhaseId) {
        if !self.skip.contains(&phase) {
            self.skip.push(phase);
        }
    }

    pub fn workload(&self, name: &str) -> Result<&WorkloadConfig> {
        self.workloads
            .iter()
            .chain(self.observability.iter())
            .find(|w| w.name == name)
            .ok_or_else(|| RolloutError::WorkloadNotFound(name.to_string()))
    }

    pub fn readiness_for(&self, workload: &WorkloadConfig) -> ReadinessConfig {
        workload.readiness.unwrap_or(self.readiness)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self, root: &Path) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut error = |message: String| {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message,
            })
        };

        if paths::validate_name(&self.project.name).is_err() {
            error(format!(
                "project name '{}' is not a valid resource name",
                self.project.name
            ));
        }
        for name in self
            .workloads
            .iter()
            .chain(self.observability.iter())
            .map(|w| w.name.as_str())
            .chain(self.artifacts.iter().map(|a| a.name.as_str()))
        {
            if paths::validate_name(name).is_err() {
                error(format!("'{name}' is not a valid resource name"));
            }
        }

        let primaries = self.workloads.iter().filter(|w| w.primary).count();
        if primaries > 1 {
            error(format!(
                "{primaries} workloads are marked primary; at most one is allowed"
            ));
        }
        if self.readiness.attempts == 0 {
            error("readiness.attempts must be at least 1".to_string());
        }
        let budgets = std::iter::once(("readiness".to_string(), &self.readiness)).chain(
            self.workloads
                .iter()
                .chain(self.observability.iter())
                .filter_map(|w| w.readiness.as_ref().map(|r| (format!("workload '{}'", w.name), r))),
        );
        for (owner, budget) in budgets {
            if budget.max_duration().is_none() {
                error(format!(
                    "{owner}: interval_seconds * attempts overflows the maximum wait"
                ));
            }
        }
        for (name, field) in &self.credentials.fields {
            if !field.has_source() {
                error(format!("credential field '{name}' has no source"));
            }
        }

        if !self.workloads.is_empty() && primaries == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "no workload is marked primary; all workloads deploy together"
                    .to_string(),
            });
        }
        if !self.artifacts.is_empty() && self.registry.host.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "registry.host is empty; artifact references will be unqualified"
                    .to_string(),
            });
        }
        for w in &self.workloads {
            let known = self.artifacts.iter().any(|a| a.name == w.artifact_name());
            if !known {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "workload '{}' references artifact '{}' which is not built here",
                        w.name,
                        w.artifact_name()
                    ),
                });
            }
            let path = paths::resolve(root, &w.descriptor);
            match std::fs::read_to_string(&path) {
                Ok(text) if !text.contains(&self.registry.placeholder) => {
                    warnings.push(ConfigWarning {
                        level: WarnLevel::Warning,
                        message: format!(
                            "descriptor {} does not contain the placeholder {}",
                            w.descriptor.display(),
                            self.registry.placeholder
                        ),
                    });
                }
                Ok(_) => {}
                Err(_) => warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("descriptor {} cannot be read", w.descriptor.display()),
                }),
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
