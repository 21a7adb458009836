//! JSON schema generation for the wire types

use anyhow::{Context, Result};
use runhost_core::RuntimeConfig;
use schema::{
    ErrorReport, KillReport, LaunchReport, ListReport, ProcessSnapshot, RunFailure, RunSuccess,
    ToolCall, ToolRequest, ToolResponse,
};
use schemars::{schema::RootSchema, schema_for};
use std::fs;
use std::path::{Path, PathBuf};

fn schemas() -> Vec<(&'static str, RootSchema)> {
    vec![
        ("tool-call", schema_for!(ToolCall)),
        ("tool-request", schema_for!(ToolRequest)),
        ("tool-response", schema_for!(ToolResponse)),
        ("run-success", schema_for!(RunSuccess)),
        ("run-failure", schema_for!(RunFailure)),
        ("launch-report", schema_for!(LaunchReport)),
        ("kill-report", schema_for!(KillReport)),
        ("list-report", schema_for!(ListReport)),
        ("process-snapshot", schema_for!(ProcessSnapshot)),
        ("error-report", schema_for!(ErrorReport)),
        ("runtime-config", schema_for!(RuntimeConfig)),
    ]
}

/// Write one `<name>.schema.json` per wire type into `out`
pub fn run(out: &Path) -> Result<()> {
    let written = write_all(out)?;
    for path in &written {
        println!("wrote {}", path.display());
    }
    Ok(())
}

fn write_all(out: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;

    let mut written = Vec::new();
    for (name, schema) in schemas() {
        let path = out.join(format!("{}.schema.json", name));
        let mut json = serde_json::to_string_pretty(&schema)?;
        json.push('\n');
        fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}
