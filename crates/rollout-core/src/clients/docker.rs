use super::ArtifactRegistry;
use crate::config::ArtifactConfig;
use crate::error::Result;
use crate::paths;
use crate::tool_runner::{CommandRunner, CommandSpec};
use std::cell::Cell;
use std::path::{Path, PathBuf};

const MISSING_MARKERS: [&str; 2] = ["ImageNotFoundException", "RepositoryNotFoundException"];

/// Builds with `docker` and publishes to an ECR registry.
pub struct EcrRegistry<'r> {
    runner: &'r dyn CommandRunner,
    region: String,
    host: String,
    root: PathBuf,
    logged_in: Cell<bool>,
}

impl<'r> EcrRegistry<'r> {
    pub fn new(
        runner: &'r dyn CommandRunner,
        region: impl Into<String>,
        host: impl Into<String>,
        root: impl AsRef<Path>,
    ) -> Self {
        Self {
            runner,
            region: region.into(),
            host: host.into(),
            root: root.as_ref().to_path_buf(),
            logged_in: Cell::new(false),
        }
    }

    fn login(&self) -> Result<()> {
        if self.logged_in.get() {
            return Ok(());
        }
        let password = CommandSpec::new("aws").args([
            "ecr",
            "get-login-password",
            "--region",
            self.region.as_str(),
        ]);
        let out = self.runner.run_checked(&password)?;
        let login = CommandSpec::new("docker")
            .args(["login", "--username", "AWS", "--password-stdin", self.host.as_str()])
            .stdin(out.stdout.trim().to_string());
        self.runner.run_checked(&login)?;
        self.logged_in.set(true);
        Ok(())
    }
}

impl ArtifactRegistry for EcrRegistry<'_> {
    fn exists(&self, repository: &str, tag: &str) -> Result<bool> {
        let spec = CommandSpec::new("aws").args([
            "ecr",
            "describe-images",
            "--repository-name",
            repository,
            "--image-ids",
            format!("imageTag={tag}").as_str(),
            "--region",
            self.region.as_str(),
            "--output",
            "json",
        ]);
        let out = self.runner.run(&spec)?;
        if !out.success() && MISSING_MARKERS.iter().any(|m| out.stderr.contains(m)) {
            return Ok(false);
        }
        out.check(&spec)?;
        Ok(true)
    }

    fn publish(&self, artifact: &ArtifactConfig, image_ref: &str) -> Result<()> {
        self.login()?;

        let context = paths::resolve(&self.root, &artifact.context);
        let mut build = CommandSpec::new("docker").args(["build", "-t", image_ref]);
        if let Some(dockerfile) = &artifact.dockerfile {
            build = build
                .arg("-f")
                .arg(paths::resolve(&self.root, dockerfile).display().to_string());
        }
        let build = build.arg(context.display().to_string());
        self.runner.run_checked(&build)?;

        let push = CommandSpec::new("docker").args(["push", image_ref]);
        self.runner.run_checked(&push)?;
        tracing::info!(artifact = %artifact.name, image = %image_ref, "published");
        Ok(())
    }
}
