use anyhow::Context;
use rollout_core::config::RunConfig;
use rollout_core::{io, paths};
use std::path::Path;

const DESCRIPTOR_EXAMPLE: &str = "\
# Example deployment descriptor. Reference it from config.yaml under
# `workloads:`; the placeholder below is replaced by the artifact reference.
#
# apiVersion: apps/v1
# kind: Deployment
# metadata:
#   name: api
# spec:
#   template:
#     spec:
#       containers:
#         - name: api
#           image: {{IMAGE}}
";

pub fn run(root: &Path) -> anyhow::Result<()> {
    let project_name = project_name(root);
    println!("Initializing rollout in: {}", root.display());

    for dir in [paths::ROLLOUT_DIR, paths::DESCRIPTORS_DIR, paths::OBSERVABILITY_DIR] {
        let p = root.join(dir);
        io::ensure_dir(&p).with_context(|| format!("failed to create {}", p.display()))?;
    }

    if paths::config_path(root).exists() {
        println!("  exists:  {}", paths::CONFIG_FILE);
    } else {
        RunConfig::new(&project_name)
            .save(root)
            .context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
    }

    let example = paths::descriptors_dir(root).join("example.yaml");
    if io::write_if_missing(&example, DESCRIPTOR_EXAMPLE.as_bytes())? {
        println!("  created: {}/example.yaml", paths::DESCRIPTORS_DIR);
    } else {
        println!("  exists:  {}/example.yaml", paths::DESCRIPTORS_DIR);
    }

    println!("\nNext: describe artifacts and workloads in {}, then run: rollout up", paths::CONFIG_FILE);
    Ok(())
}

/// Directory name folded into a valid resource name.
fn project_name(root: &Path) -> String {
    let raw = root
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    let mut name = String::new();
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            name.push(c);
        } else if !name.is_empty() && !name.ends_with('-') {
            name.push('-');
        }
    }
    let name = name.trim_end_matches('-').to_string();
    if name.is_empty() {
        "project".to_string()
    } else {
        name
    }
}
