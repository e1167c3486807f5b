use crate::cmd::{load_config, SystemClients};
use crate::output::{print_json, print_table};
use crate::terminal;
use clap::Args;
use rollout_core::plan::{Orchestrator, RunOutcome};
use rollout_core::readiness::Readiness;
use rollout_core::tool_runner::{require_tools, tools_for, SystemRunner};
use rollout_core::types::PhaseId;
use std::path::Path;

#[derive(Args, Debug, Default)]
pub struct UpArgs {
    /// Skip the infrastructure phase
    #[arg(long)]
    pub skip_infra: bool,

    /// Skip building and publishing artifacts
    #[arg(long)]
    pub skip_artifacts: bool,

    /// Skip secret sync and workload deployment
    #[arg(long)]
    pub skip_workloads: bool,

    /// Skip the observability stack
    #[arg(long)]
    pub skip_observability: bool,

    /// Confirm every cost-incurring phase without asking
    #[arg(long, short = 'y')]
    pub yes: bool,

    /// Never prompt: ambiguity is fatal and cost gates need --yes
    #[arg(long)]
    pub non_interactive: bool,

    /// Treat every readiness timeout as fatal
    #[arg(long)]
    pub strict_readiness: bool,

    /// Target this cluster instead of discovering one
    #[arg(long)]
    pub cluster: Option<String>,
}

impl UpArgs {
    fn skipped(&self) -> Vec<PhaseId> {
        [
            (self.skip_infra, PhaseId::Infrastructure),
            (self.skip_artifacts, PhaseId::Artifacts),
            (self.skip_workloads, PhaseId::Workloads),
            (self.skip_observability, PhaseId::Observability),
        ]
        .into_iter()
        .filter_map(|(skip, phase)| skip.then_some(phase))
        .collect()
    }
}

pub fn run(root: &Path, args: UpArgs, json: bool) -> anyhow::Result<()> {
    let mut config = load_config(root, args.cluster.as_deref())?;
    for phase in args.skipped() {
        config.skip_phase(phase);
    }

    let enabled: Vec<PhaseId> = PhaseId::all()
        .iter()
        .copied()
        .filter(|p| !config.is_skipped(*p))
        .collect();
    require_tools(&tools_for(&enabled))?;

    let runner = SystemRunner;
    let clients = SystemClients::new(&runner, root, &config)?;
    if enabled.iter().any(|p| p.required_tools().contains(&"aws")) {
        clients.preflight()?;
    }
    let operator = terminal::operator(args.yes, args.non_interactive);

    let outcome = Orchestrator::new(root, &config, clients.collaborators(), operator.as_ref())
        .strict_readiness(args.strict_readiness)
        .with_cancel(terminal::cancel_on_interrupt())
        .up()?;

    if json {
        print_json(&outcome.summary)?;
    } else {
        print_outcome(root, &outcome);
    }
    outcome.report.into_result()?;
    Ok(())
}

fn print_outcome(root: &Path, outcome: &RunOutcome) {
    let summary = &outcome.summary;
    let rows = summary
        .phases
        .iter()
        .map(|p| {
            vec![
                p.phase.to_string(),
                p.status.to_string(),
                format!("{}ms", p.elapsed_ms),
                p.detail.clone().unwrap_or_default(),
            ]
        })
        .collect();
    print_table(&["PHASE", "STATUS", "ELAPSED", "DETAIL"], rows);

    if !summary.workloads.is_empty() {
        println!();
        let rows = summary
            .workloads
            .iter()
            .map(|w| {
                vec![
                    w.name.clone(),
                    format!("{:?}", w.action).to_lowercase(),
                    w.image.clone().unwrap_or_else(|| "-".to_string()),
                    readiness_label(&w.readiness),
                ]
            })
            .collect();
        print_table(&["WORKLOAD", "ACTION", "IMAGE", "READINESS"], rows);
    }

    for w in &summary.warnings {
        println!("warning: {w}");
    }

    let path = outcome
        .summary_path
        .strip_prefix(root)
        .unwrap_or(&outcome.summary_path);
    println!("\nSummary written to {}", path.display());
    if summary.succeeded {
        for step in &summary.next_steps {
            println!("  {step}");
        }
    }
}

pub fn readiness_label(r: &Readiness) -> String {
    match r {
        Readiness::Ready { attempts } => format!("ready ({attempts} polls)"),
        Readiness::Failed { reason, .. } => format!("failed: {reason}"),
        Readiness::TimedOut { attempts } => format!("timed out after {attempts} polls"),
    }
}
