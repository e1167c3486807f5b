use super::{PodSignal, SecretData, WorkloadRuntime, WorkloadStatus};
use crate::error::{Result, RolloutError};
use crate::tool_runner::{CommandOutput, CommandRunner, CommandSpec};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tempfile::TempDir;

/// The orchestration runtime, driven through `kubectl`.
///
/// Cluster credentials live in a kubeconfig private to this client and
/// removed with it; the operator's own kubeconfig and current context are
/// never touched.
pub struct KubectlRuntime<'r> {
    runner: &'r dyn CommandRunner,
    region: String,
    kubeconfig: PathBuf,
    _scratch: TempDir,
}

impl<'r> KubectlRuntime<'r> {
    pub fn new(runner: &'r dyn CommandRunner, region: impl Into<String>) -> Result<Self> {
        let scratch = tempfile::Builder::new().prefix("rollout-kube").tempdir()?;
        Ok(Self {
            runner,
            region: region.into(),
            kubeconfig: scratch.path().join("config"),
            _scratch: scratch,
        })
    }

    fn kubectl(&self) -> CommandSpec {
        CommandSpec::new("kubectl")
            .arg("--kubeconfig")
            .arg(self.kubeconfig.display().to_string())
    }

    fn get(&self, kind: &str, namespace: &str, name: &str) -> Result<Option<(CommandSpec, CommandOutput)>> {
        let spec = self.kubectl().args(["get", kind, name, "-n", namespace, "-o", "json"]);
        let out = self.runner.run(&spec)?;
        if !out.success() && out.stderr.contains("NotFound") {
            return Ok(None);
        }
        let out = out.check(&spec)?;
        Ok(Some((spec, out)))
    }
}

fn parse<T: serde::de::DeserializeOwned>(spec: &CommandSpec, out: &CommandOutput) -> Result<T> {
    serde_json::from_str(&out.stdout).map_err(|e| RolloutError::UnexpectedOutput {
        command: spec.display(),
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Deployment JSON
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct Deployment {
    metadata: Metadata,
    #[serde(default)]
    spec: DeploymentSpec,
    #[serde(default)]
    status: DeploymentStatus,
}

#[derive(Deserialize)]
struct Metadata {
    name: String,
    #[serde(default)]
    generation: i64,
}

#[derive(Deserialize, Default)]
struct DeploymentSpec {
    replicas: Option<u32>,
    #[serde(default)]
    template: PodTemplate,
}

#[derive(Deserialize, Default)]
struct PodTemplate {
    #[serde(default)]
    spec: PodSpec,
}

#[derive(Deserialize, Default)]
struct PodSpec {
    #[serde(default)]
    containers: Vec<Container>,
}

#[derive(Deserialize)]
struct Container {
    image: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct DeploymentStatus {
    #[serde(default)]
    observed_generation: i64,
    #[serde(default)]
    updated_replicas: u32,
    #[serde(default)]
    ready_replicas: u32,
    #[serde(default)]
    available_replicas: u32,
    #[serde(default)]
    conditions: Vec<Condition>,
}

#[derive(Deserialize)]
struct Condition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
    reason: Option<String>,
    message: Option<String>,
}

impl From<Deployment> for WorkloadStatus {
    fn from(d: Deployment) -> Self {
        let progress_deadline_exceeded = d.status.conditions.iter().any(|c| {
            c.kind == "Progressing" && c.reason.as_deref() == Some("ProgressDeadlineExceeded")
        });
        WorkloadStatus {
            name: d.metadata.name,
            image: d.spec.template.spec.containers.into_iter().find_map(|c| c.image),
            desired: d.spec.replicas.unwrap_or(1),
            updated: d.status.updated_replicas,
            ready: d.status.ready_replicas,
            available: d.status.available_replicas,
            observed_current: d.status.observed_generation >= d.metadata.generation,
            progress_deadline_exceeded,
        }
    }
}

// ---------------------------------------------------------------------------
// Pod JSON
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Deserialize)]
struct Pod {
    metadata: Metadata,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PodStatus {
    #[serde(default)]
    conditions: Vec<Condition>,
    #[serde(default)]
    container_statuses: Vec<ContainerStatus>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContainerStatus {
    #[serde(default)]
    restart_count: u32,
    #[serde(default)]
    state: ContainerState,
    #[serde(default)]
    last_state: ContainerState,
}

#[derive(Deserialize, Default)]
struct ContainerState {
    waiting: Option<StateDetail>,
    terminated: Option<StateDetail>,
}

#[derive(Deserialize)]
struct StateDetail {
    reason: Option<String>,
    message: Option<String>,
}

fn pod_signals(pod: Pod) -> Vec<PodSignal> {
    let name = pod.metadata.name;
    let mut signals = Vec::new();

    for c in &pod.status.conditions {
        if c.kind == "PodScheduled" && c.status == "False" {
            signals.push(PodSignal {
                pod: name.clone(),
                reason: c.reason.clone().unwrap_or_else(|| "Unschedulable".to_string()),
                message: c.message.clone(),
                restarts: 0,
            });
        }
    }

    for cs in pod.status.container_statuses {
        let detail = cs
            .state
            .waiting
            .or(cs.state.terminated)
            .or(cs.last_state.terminated);
        if let Some(StateDetail {
            reason: Some(reason),
            message,
        }) = detail
        {
            signals.push(PodSignal {
                pod: name.clone(),
                reason,
                message,
                restarts: cs.restart_count,
            });
        }
    }
    signals
}

// ---------------------------------------------------------------------------
// Secret JSON
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct Secret {
    #[serde(default)]
    data: BTreeMap<String, String>,
}

fn secret_manifest(namespace: &str, name: &str, data: &SecretData) -> String {
    let encoded: BTreeMap<&str, String> = data
        .iter()
        .map(|(k, v)| (k.as_str(), STANDARD.encode(v.as_bytes())))
        .collect();
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "type": "Opaque",
        "metadata": { "name": name, "namespace": namespace },
        "data": encoded,
    })
    .to_string()
}

impl WorkloadRuntime for KubectlRuntime<'_> {
    fn connect(&self, cluster: &str) -> Result<()> {
        let spec = CommandSpec::new("aws").args([
            "eks",
            "update-kubeconfig",
            "--name",
            cluster,
            "--region",
            self.region.as_str(),
        ])
        .arg("--kubeconfig")
        .arg(self.kubeconfig.display().to_string());
        self.runner.run_checked(&spec)?;
        Ok(())
    }

    fn workload(&self, namespace: &str, name: &str) -> Result<Option<WorkloadStatus>> {
        let Some((spec, out)) = self.get("deployment", namespace, name)? else {
            return Ok(None);
        };
        let deployment: Deployment = parse(&spec, &out)?;
        Ok(Some(deployment.into()))
    }

    fn pod_signals(&self, namespace: &str, name: &str) -> Result<Vec<PodSignal>> {
        let selector = format!("app={name}");
        let spec = self.kubectl().args([
            "get",
            "pods",
            "-n",
            namespace,
            "-l",
            selector.as_str(),
            "-o",
            "json",
        ]);
        let out = self.runner.run_checked(&spec)?;
        let pods: PodList = parse(&spec, &out)?;
        Ok(pods.items.into_iter().flat_map(pod_signals).collect())
    }

    fn apply(&self, namespace: &str, manifest: &str) -> Result<()> {
        let spec = self.kubectl()
            .args(["apply", "-n", namespace, "-f", "-"])
            .stdin(manifest);
        self.runner.run_checked(&spec)?;
        Ok(())
    }

    fn restart(&self, namespace: &str, name: &str) -> Result<()> {
        let target = format!("deployment/{name}");
        let spec = self.kubectl().args(["rollout", "restart", target.as_str(), "-n", namespace]);
        self.runner.run_checked(&spec)?;
        Ok(())
    }

    fn rollback(&self, namespace: &str, name: &str) -> Result<()> {
        let target = format!("deployment/{name}");
        let spec = self.kubectl().args(["rollout", "undo", target.as_str(), "-n", namespace]);
        self.runner.run_checked(&spec)?;
        Ok(())
    }

    fn read_secret(&self, namespace: &str, name: &str) -> Result<Option<SecretData>> {
        let Some((spec, out)) = self.get("secret", namespace, name)? else {
            return Ok(None);
        };
        let secret: Secret = parse(&spec, &out)?;
        let mut data = SecretData::new();
        for (key, encoded) in secret.data {
            let bytes = STANDARD
                .decode(encoded.as_bytes())
                .map_err(|e| RolloutError::UnexpectedOutput {
                    command: spec.display(),
                    reason: format!("secret key '{key}' is not base64: {e}"),
                })?;
            data.insert(key, String::from_utf8_lossy(&bytes).into_owned());
        }
        Ok(Some(data))
    }

    fn replace_secret(&self, namespace: &str, name: &str, data: &SecretData) -> Result<()> {
        // `replace` is a whole-object PUT: the API server swaps the secret in
        // one write, so keys absent from `data` disappear with it.
        let verb = if self.get("secret", namespace, name)?.is_some() {
            "replace"
        } else {
            "create"
        };
        let spec = self.kubectl()
            .args([verb, "-f", "-"])
            .stdin(secret_manifest(namespace, name, data));
        self.runner.run_checked(&spec)?;
        Ok(())
    }
}
