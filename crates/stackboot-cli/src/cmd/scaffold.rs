use crate::output::print_json;
use anyhow::Context;
use stackboot_core::scaffold::{self, ScaffoldReport};
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let cfg = super::load_config(root)?;
    let report = scaffold::scaffold(root, &cfg)
        .with_context(|| format!("failed to scaffold {}", root.display()))?;

    if json {
        return print_json(&report);
    }
    render(root, &report);
    Ok(())
}

pub fn render(root: &Path, report: &ScaffoldReport) {
    println!("Scaffolding in: {}", root.display());
    if report.dirs.is_empty() && report.files.is_empty() && report.gitignore.is_empty() {
        println!("  nothing to do; every starter file already exists");
        return;
    }
    for dir in &report.dirs {
        println!("  created: {}/", dir.display());
    }
    for file in &report.files {
        println!("  created: {}", file.display());
    }
    for entry in &report.gitignore {
        println!("  .gitignore += {entry}");
    }
}
