pub mod config;
pub mod credentials;
pub mod init;
pub mod rollback;
pub mod status;
pub mod up;
pub mod wait;

use anyhow::Context;
use rollout_core::clients::{
    AwsDescriber, AwsSecretStore, Collaborators, EcrRegistry, KubectlRuntime,
    TerraformProvisioner,
};
use rollout_core::config::RunConfig;
use rollout_core::paths;
use rollout_core::tool_runner::CommandRunner;
use std::path::Path;

/// Load the run configuration, applying the `--cluster` override.
pub fn load_config(root: &Path, cluster: Option<&str>) -> anyhow::Result<RunConfig> {
    let mut config = RunConfig::load(root).context("failed to load .rollout/config.yaml")?;
    if let Some(name) = cluster {
        config.project.cluster = Some(name.to_string());
    }
    Ok(config)
}

/// The production collaborators, all driven through one command runner.
pub struct SystemClients<'r> {
    provisioner: TerraformProvisioner<'r>,
    describer: AwsDescriber<'r>,
    secrets: AwsSecretStore<'r>,
    registry: EcrRegistry<'r>,
    runtime: KubectlRuntime<'r>,
}

impl<'r> SystemClients<'r> {
    pub fn new(runner: &'r dyn CommandRunner, root: &Path, config: &RunConfig) -> anyhow::Result<Self> {
        let region = config.project.region.as_str();
        let runtime = KubectlRuntime::new(runner, region)
            .context("failed to create a private kubeconfig")?;
        Ok(Self {
            provisioner: TerraformProvisioner::new(
                runner,
                paths::resolve(root, &config.provisioning.dir),
            ),
            describer: AwsDescriber::new(runner, region),
            secrets: AwsSecretStore::new(runner, region),
            registry: EcrRegistry::new(runner, region, config.registry.host.as_str(), root),
            runtime,
        })
    }

    /// Fail before any phase runs when the cloud account is unreachable.
    pub fn preflight(&self) -> anyhow::Result<()> {
        let identity = self.describer.caller_identity()?;
        tracing::info!(%identity, "authenticated");
        Ok(())
    }

    pub fn collaborators(&self) -> Collaborators<'_> {
        Collaborators {
            provisioner: &self.provisioner,
            describer: &self.describer,
            secrets: &self.secrets,
            registry: &self.registry,
            runtime: &self.runtime,
        }
    }
}
