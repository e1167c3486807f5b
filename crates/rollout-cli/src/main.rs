mod cmd;
mod output;
mod root;
mod terminal;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, up::UpArgs};
use rollout_core::RolloutError;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "rollout",
    about = "Idempotent, resumable deployment: infrastructure, artifacts, workloads, observability",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .rollout/ or .git/)
    #[arg(long, global = true, env = "ROLLOUT_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scaffold .rollout/ in the current project
    Init,

    /// Run the deployment plan, resuming at the first unsatisfied phase
    Up(UpArgs),

    /// Probe and print the current deployment state (read-only)
    Status {
        /// Target this cluster instead of discovering one
        #[arg(long)]
        cluster: Option<String>,
    },

    /// Resolve credentials read-only and show each field's provenance
    Credentials {
        /// Print values instead of masking them
        #[arg(long)]
        reveal: bool,

        #[arg(long)]
        cluster: Option<String>,

        /// Fail instead of prompting when a data store is ambiguous
        #[arg(long)]
        non_interactive: bool,
    },

    /// Re-poll readiness for one workload
    Wait {
        workload: String,

        #[arg(long)]
        cluster: Option<String>,

        /// Fail instead of prompting when the cluster is ambiguous
        #[arg(long)]
        non_interactive: bool,
    },

    /// Roll one workload back to its previous revision
    Rollback {
        workload: String,

        #[arg(long)]
        cluster: Option<String>,

        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,

        #[arg(long)]
        non_interactive: bool,
    },

    /// Inspect and validate the run configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Up(_) | Commands::Wait { .. } | Commands::Rollback { .. } => {
            tracing::Level::INFO
        }
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Up(args) => cmd::up::run(&root, args, cli.json),
        Commands::Status { cluster } => cmd::status::run(&root, cluster.as_deref(), cli.json),
        Commands::Credentials {
            reveal,
            cluster,
            non_interactive,
        } => cmd::credentials::run(&root, cluster.as_deref(), reveal, non_interactive, cli.json),
        Commands::Wait {
            workload,
            cluster,
            non_interactive,
        } => cmd::wait::run(&root, &workload, cluster.as_deref(), non_interactive, cli.json),
        Commands::Rollback {
            workload,
            cluster,
            yes,
            non_interactive,
        } => cmd::rollback::run(&root, &workload, cluster.as_deref(), yes, non_interactive),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        let core = e.chain().find_map(|c| c.downcast_ref::<RolloutError>());
        if let Some(hint) = core.and_then(RolloutError::hint) {
            eprintln!();
            for line in hint.lines() {
                eprintln!("  {line}");
            }
        }
        let code = core.map_or(1, |c| c.exit_class().code());
        std::process::exit(code);
    }
}
