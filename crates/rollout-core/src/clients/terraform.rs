use super::{PlanDiff, Provisioner};
use crate::error::{Result, RolloutError};
use crate::tool_runner::{CommandRunner, CommandSpec};
use serde::Deserialize;
use std::cell::Cell;
use std::path::{Path, PathBuf};

const PLAN_FILE: &str = "rollout.tfplan";

/// Drives `terraform` in one working directory.
///
/// State locking is terraform's own; this client never issues two commands
/// concurrently.
pub struct TerraformProvisioner<'r> {
    runner: &'r dyn CommandRunner,
    dir: PathBuf,
    initialized: Cell<bool>,
    /// A plan file from this client is on disk and may be applied.
    planned: Cell<bool>,
}

impl<'r> TerraformProvisioner<'r> {
    pub fn new(runner: &'r dyn CommandRunner, dir: impl AsRef<Path>) -> Self {
        Self {
            runner,
            dir: dir.as_ref().to_path_buf(),
            initialized: Cell::new(false),
            planned: Cell::new(false),
        }
    }

    fn command(&self, subcommand: &str) -> CommandSpec {
        CommandSpec::new("terraform")
            .arg(format!("-chdir={}", self.dir.display()))
            .arg(subcommand)
    }

    fn ensure_init(&self) -> Result<()> {
        if self.initialized.get() {
            return Ok(());
        }
        let spec = self.command("init").args(["-input=false", "-no-color"]);
        self.runner.run_checked(&spec)?;
        self.initialized.set(true);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// `terraform show -json` plan shape
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PlanJson {
    #[serde(default)]
    resource_changes: Vec<ResourceChange>,
}

#[derive(Debug, Deserialize)]
struct ResourceChange {
    address: String,
    change: Change,
}

#[derive(Debug, Deserialize)]
struct Change {
    actions: Vec<String>,
}

fn summarize(plan: &PlanJson) -> String {
    let (mut add, mut change, mut destroy) = (0, 0, 0);
    for rc in &plan.resource_changes {
        let actions: Vec<&str> = rc.change.actions.iter().map(String::as_str).collect();
        match actions.as_slice() {
            ["create"] => add += 1,
            ["update"] => change += 1,
            ["delete"] => destroy += 1,
            ["delete", "create"] | ["create", "delete"] => {
                add += 1;
                destroy += 1;
            }
            _ => {}
        }
        if !matches!(actions.as_slice(), ["no-op"] | ["read"]) {
            tracing::debug!(address = %rc.address, ?actions, "planned change");
        }
    }
    format!("{add} to add, {change} to change, {destroy} to destroy")
}

impl Provisioner for TerraformProvisioner<'_> {
    fn plan(&self) -> Result<PlanDiff> {
        self.ensure_init()?;
        let spec = self.command("plan").args([
            "-input=false",
            "-no-color",
            "-detailed-exitcode",
            format!("-out={PLAN_FILE}").as_str(),
        ]);
        let out = self.runner.run(&spec)?;
        // -detailed-exitcode: 0 = no changes, 2 = changes present, 1 = error.
        let has_changes = match out.status {
            0 => false,
            2 => true,
            status => {
                return Err(RolloutError::Command {
                    command: spec.display(),
                    status,
                    stderr: out.stderr.trim().chars().take(500).collect(),
                })
            }
        };
        self.planned.set(true);
        if !has_changes {
            return Ok(PlanDiff {
                has_changes,
                summary: "no changes".to_string(),
            });
        }

        let show = self.command("show").args(["-json", PLAN_FILE]);
        let out = self.runner.run_checked(&show)?;
        let plan: PlanJson =
            serde_json::from_str(&out.stdout).map_err(|e| RolloutError::UnexpectedOutput {
                command: show.display(),
                reason: e.to_string(),
            })?;
        Ok(PlanDiff {
            has_changes,
            summary: summarize(&plan),
        })
    }

    /// Applies exactly the saved plan the operator reviewed. Terraform
    /// refuses a stale plan file, so drift since `plan` fails the phase.
    fn apply(&self) -> Result<String> {
        if !self.planned.get() {
            return Err(RolloutError::InvalidPlan(
                "terraform apply requested without a reviewed plan".to_string(),
            ));
        }
        let spec = self
            .command("apply")
            .args(["-input=false", "-no-color", PLAN_FILE]);
        let out = self.runner.run_checked(&spec)?;
        self.planned.set(false);
        let summary = out
            .stdout
            .lines()
            .rev()
            .find(|l| l.starts_with("Apply complete!"))
            .unwrap_or("apply complete")
            .to_string();
        Ok(summary)
    }
}
