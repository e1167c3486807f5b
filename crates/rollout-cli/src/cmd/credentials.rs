use crate::cmd::{load_config, SystemClients};
use crate::output::{print_json, print_table};
use crate::terminal;
use rollout_core::credentials::{CredentialBroker, CredentialBundle, Provenance, Source};
use rollout_core::probe::StateProber;
use rollout_core::tool_runner::{require_tools, tools_for, SystemRunner};
use rollout_core::types::PhaseId;
use std::path::Path;

/// Resolve the bundle without writing anything and show where each field
/// came from.
pub fn run(
    root: &Path,
    cluster: Option<&str>,
    reveal: bool,
    non_interactive: bool,
    json: bool,
) -> anyhow::Result<()> {
    let config = load_config(root, cluster)?;
    require_tools(&tools_for(&[PhaseId::Workloads]))?;

    let runner = SystemRunner;
    let clients = SystemClients::new(&runner, root, &config)?;
    let collab = clients.collaborators();
    let operator = terminal::operator(false, non_interactive);
    let state = StateProber::new(&config, &collab)
        .probe()?
        .disambiguate(operator.as_ref())?;
    let bundle = CredentialBroker::new(&config, collab.secrets)
        .with_runtime(collab.runtime)
        .resolve(&state)?;

    if json {
        return print_json(&serde_json::json!({ "fields": entries(&bundle, reveal) }));
    }

    let rows = entries(&bundle, reveal)
        .into_iter()
        .map(|e| vec![e.field, e.provenance, e.value])
        .collect();
    print_table(&["FIELD", "PROVENANCE", "VALUE"], rows);

    if !bundle.generated_fields().is_empty() {
        println!("\ngenerated values are persisted on the next `rollout up`");
    }
    let fallbacks = bundle.fallback_fields();
    if !fallbacks.is_empty() {
        println!("warning: using fallback values for: {}", fallbacks.join(", "));
    }
    Ok(())
}

#[derive(serde::Serialize)]
struct Entry {
    field: String,
    provenance: String,
    value: String,
}

fn entries(bundle: &CredentialBundle, reveal: bool) -> Vec<Entry> {
    bundle
        .iter()
        .map(|(field, v)| Entry {
            field: field.to_string(),
            provenance: match v.provenance {
                Provenance::Resolved(Source::Generated) => "generated (unsaved)".to_string(),
                p => p.to_string(),
            },
            value: if reveal { v.value.clone() } else { v.masked() },
        })
        .collect()
}
