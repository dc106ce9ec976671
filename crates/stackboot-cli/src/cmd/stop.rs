use crate::output::print_json;
use anyhow::Context;
use stackboot_core::supervisor::{StopOutcome, Supervisor};
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let cfg = super::read_config(root)?;
    let stopped = Supervisor::new(root, &cfg)
        .stop()
        .context("failed to stop processes")?;

    if json {
        return print_json(&stopped);
    }
    for (name, outcome) in stopped.iter().rev() {
        match outcome {
            StopOutcome::Stopped { pid } => println!("Stopped {name} (PID {pid})"),
            StopOutcome::NotRunning => println!("{name}: not running"),
        }
    }
    Ok(())
}
