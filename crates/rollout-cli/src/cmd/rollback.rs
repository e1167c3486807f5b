use crate::cmd::wait::connect;
use crate::cmd::{load_config, SystemClients};
use crate::terminal;
use rollout_core::deploy::WorkloadDeployer;
use rollout_core::readiness::CancelToken;
use rollout_core::tool_runner::{require_tools, SystemRunner};
use rollout_core::RolloutError;
use std::path::Path;

/// Revert one workload to its previous revision. Only ever operator-invoked.
pub fn run(
    root: &Path,
    workload: &str,
    cluster: Option<&str>,
    yes: bool,
    non_interactive: bool,
) -> anyhow::Result<()> {
    let config = load_config(root, cluster)?;
    let target = config.workload(workload)?.clone();
    require_tools(&["aws", "kubectl"])?;

    let operator = terminal::operator(yes, non_interactive);
    let prompt = format!(
        "roll back {} in namespace {} to its previous revision?",
        target.name, config.project.namespace
    );
    if !operator.confirm(&prompt) {
        return Err(RolloutError::Aborted(format!("rollback of '{}' declined", target.name)).into());
    }

    let runner = SystemRunner;
    let clients = SystemClients::new(&runner, root, &config)?;
    let collab = clients.collaborators();
    let cluster = connect(&config, &collab, non_interactive)?;

    let cancel = CancelToken::new();
    WorkloadDeployer::new(root, &config, collab.runtime, &cancel).rollback(&target)?;
    println!("rolled back {} on {cluster}", target.name);
    println!(
        "  check: kubectl rollout status deployment/{} -n {}",
        target.name, config.project.namespace
    );
    Ok(())
}
