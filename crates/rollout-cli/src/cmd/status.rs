use crate::cmd::{load_config, SystemClients};
use crate::output::{print_json, print_table};
use rollout_core::probe::{Lookup, StateProber};
use rollout_core::tool_runner::{require_tools, tools_for, SystemRunner};
use rollout_core::types::PhaseId;
use std::fmt::Display;
use std::path::Path;

pub fn run(root: &Path, cluster: Option<&str>, json: bool) -> anyhow::Result<()> {
    let config = load_config(root, cluster)?;
    // Probing reads what the workloads phase writes.
    require_tools(&tools_for(&[PhaseId::Workloads]))?;

    let runner = SystemRunner;
    let clients = SystemClients::new(&runner, root, &config)?;
    let state = StateProber::new(&config, &clients.collaborators()).probe()?;

    if json {
        return print_json(&state);
    }

    let mut rows = vec![
        lookup_row("cluster", &state.cluster),
        lookup_row("database", &state.database),
        lookup_row("cache", &state.cache),
    ];
    for (name, locator) in &state.secrets {
        rows.push(match locator {
            Some(loc) => vec![format!("secret:{name}"), "found".to_string(), loc.clone()],
            None => vec![format!("secret:{name}"), "absent".to_string(), String::new()],
        });
    }
    print_table(&["TARGET", "STATE", "VALUE"], rows);
    Ok(())
}

fn lookup_row<T: Display>(target: &str, lookup: &Lookup<T>) -> Vec<String> {
    match lookup {
        Lookup::Absent => vec![target.to_string(), "absent".to_string(), String::new()],
        Lookup::Found(v) => vec![target.to_string(), "found".to_string(), v.to_string()],
        Lookup::Ambiguous(_) => vec![
            target.to_string(),
            "ambiguous".to_string(),
            lookup.candidate_names().join(", "),
        ],
    }
}
