use crate::cmd::up::readiness_label;
use crate::cmd::{load_config, SystemClients};
use crate::output::print_json;
use crate::terminal;
use rollout_core::deploy::WorkloadDeployer;
use rollout_core::probe::StateProber;
use rollout_core::tool_runner::{require_tools, SystemRunner};
use rollout_core::RolloutError;
use std::path::Path;

/// Re-poll one workload with its configured budget. A timeout here is
/// always an error.
pub fn run(
    root: &Path,
    workload: &str,
    cluster: Option<&str>,
    non_interactive: bool,
    json: bool,
) -> anyhow::Result<()> {
    let config = load_config(root, cluster)?;
    let target = config.workload(workload)?.clone();
    require_tools(&["aws", "kubectl"])?;

    let runner = SystemRunner;
    let clients = SystemClients::new(&runner, root, &config)?;
    let collab = clients.collaborators();
    connect(&config, &collab, non_interactive)?;

    let cancel = terminal::cancel_on_interrupt();
    let deployer = WorkloadDeployer::new(root, &config, collab.runtime, &cancel);
    let readiness = deployer.verify(&target)?;

    if json {
        print_json(&serde_json::json!({ "workload": target.name, "readiness": readiness }))?;
    } else {
        println!("{}: {}", target.name, readiness_label(&readiness));
    }
    deployer.settle(&target, &readiness, true)?;
    Ok(())
}

/// Locate the cluster and point the runtime at it.
pub fn connect(
    config: &rollout_core::config::RunConfig,
    collab: &rollout_core::clients::Collaborators<'_>,
    non_interactive: bool,
) -> anyhow::Result<String> {
    let operator = terminal::operator(false, non_interactive);
    let cluster = StateProber::new(config, collab)
        .cluster()?
        .resolve("cluster", operator.as_ref())?
        .ok_or_else(|| RolloutError::MissingCluster {
            project: config.project.name.clone(),
            region: config.project.region.clone(),
        })?;
    collab.runtime.connect(&cluster)?;
    Ok(cluster)
}
