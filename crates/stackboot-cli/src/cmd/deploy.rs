use super::InstallFlags;
use crate::output::print_json;
use anyhow::Context;
use stackboot_core::exec::SystemRunner;
use stackboot_core::stack::{self, DeployOptions};
use std::path::Path;

pub fn run(
    root: &Path,
    flags: &InstallFlags,
    stages: DeployOptions,
    json: bool,
) -> anyhow::Result<()> {
    let cfg = super::load_config(root)?;
    let opts = flags.apply(&cfg);
    let deployed = stack::deploy(&mut SystemRunner, root, &cfg, &opts, stages)
        .context("deploy failed")?;

    if json {
        return print_json(&deployed);
    }
    if let Some(report) = &deployed.preflight {
        super::check::render_preflight(report);
    }
    if let Some(report) = &deployed.scaffold {
        super::scaffold::render(root, report);
    }
    if let Some(prepared) = &deployed.prepared {
        super::prepare::render(prepared);
    }
    if let Some(started) = &deployed.started {
        super::start::render(started);
    }
    Ok(())
}
