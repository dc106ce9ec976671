use crate::output::{print_json, print_table};
use anyhow::Context;
use stackboot_core::supervisor::Supervisor;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let cfg = super::read_config(root)?;
    let status = Supervisor::new(root, &cfg)
        .status()
        .context("failed to read the process registry")?;

    if json {
        return print_json(&status);
    }

    let rows = status
        .iter()
        .map(|s| {
            vec![
                s.name.to_string(),
                s.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
                match (s.pid, s.alive) {
                    (None, _) => "not started",
                    (Some(_), true) => "alive",
                    (Some(_), false) => "dead (stale entry)",
                }
                .to_string(),
            ]
        })
        .collect();
    print_table(&["NAME", "PID", "STATE"], rows);
    Ok(())
}
