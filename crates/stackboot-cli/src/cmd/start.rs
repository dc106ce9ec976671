use crate::output::{print_json, print_table};
use anyhow::Context;
use stackboot_core::supervisor::{StartOutcome, StartReport, Supervisor};
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let cfg = super::load_config(root)?;
    let report = Supervisor::new(root, &cfg)
        .start()
        .context("failed to start processes")?;

    if json {
        return print_json(&report);
    }
    render(&report);
    Ok(())
}

pub fn render(report: &StartReport) {
    let rows: Vec<Vec<String>> = report
        .processes
        .iter()
        .map(|(name, outcome)| {
            let (state, pid, detail) = match outcome {
                StartOutcome::Spawned {
                    pid, log, health, ..
                } => {
                    let detail = match health {
                        Some(h) if h.is_healthy() => "healthy".to_string(),
                        Some(_) => format!("NOT healthy; see {}", log.display()),
                        None => format!("log: {}", log.display()),
                    };
                    ("started", pid.to_string(), detail)
                }
                StartOutcome::AlreadyRunning { pid } => {
                    ("running", pid.to_string(), "already running".to_string())
                }
                StartOutcome::Skipped { reason } => ("skipped", "-".to_string(), reason.clone()),
            };
            vec![name.to_string(), state.to_string(), pid, detail]
        })
        .collect();
    print_table(&["NAME", "STATE", "PID", "DETAIL"], rows);
}
