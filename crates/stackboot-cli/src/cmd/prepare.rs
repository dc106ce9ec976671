use super::InstallFlags;
use crate::output::print_json;
use anyhow::Context;
use stackboot_core::exec::SystemRunner;
use stackboot_core::installer::FrontendInstall;
use stackboot_core::stack::{self, Prepared};
use std::path::Path;

pub fn run(root: &Path, flags: &InstallFlags, json: bool) -> anyhow::Result<()> {
    let cfg = super::load_config(root)?;
    let opts = flags.apply(&cfg);
    let prepared = stack::prepare(&mut SystemRunner, root, &cfg, &opts)
        .context("environment preparation failed")?;

    if json {
        return print_json(&prepared);
    }
    render(&prepared);
    Ok(())
}

pub fn render(prepared: &Prepared) {
    if let Some(env) = &prepared.environment {
        println!("Python environment: {}", env.interpreter.display());
        if env.created_by == "existing" {
            println!("  reused existing environment");
        } else {
            println!("  created with {}", env.created_by);
        }
        if env.requirements.created {
            println!("  seeded requirements with {} entries", env.requirements.added.len());
        } else if !env.requirements.added.is_empty() {
            println!("  added to requirements: {}", env.requirements.added.join(", "));
        }
        if let Some(tier) = &env.remediated_by {
            println!("  remediated with the {tier} install tier");
        }
        for (step, message) in env.steps.warnings() {
            println!("  \u{26a0} {step}: {}", first_line(message));
        }
    }

    let frontend = match prepared.frontend {
        Some(FrontendInstall::Installed) => "packages installed",
        Some(FrontendInstall::AlreadyPresent) => "packages already present",
        Some(FrontendInstall::NoManifest) => "no package.json, skipped",
        Some(FrontendInstall::NpmMissing) => "npm not on PATH, skipped",
        None => "install failed (see warnings)",
    };
    println!("Frontend: {frontend}");
    for (step, message) in prepared.steps.warnings() {
        println!("  \u{26a0} {step}: {}", first_line(message));
    }
}

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or(message)
}
