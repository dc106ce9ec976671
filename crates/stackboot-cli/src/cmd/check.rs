use crate::output::print_json;
use stackboot_core::config::{ConfigWarning, WarnLevel};
use stackboot_core::exec::SystemRunner;
use stackboot_core::installer::InstallOptions;
use stackboot_core::paths;
use stackboot_core::preflight::{self, Preflight};
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = super::read_config(root)?;
    let warnings = config.validate();
    let opts = InstallOptions::from_config(&config.install);
    let report = preflight::run(&mut SystemRunner, root, opts.python.as_deref(), true)?;

    if json {
        let value = serde_json::json!({
            "config": paths::config_path(root),
            "exists": paths::config_path(root).exists(),
            "warnings": warnings,
            "preflight": report,
        });
        print_json(&value)?;
    } else {
        if warnings.is_empty() {
            println!("Config is valid. No warnings.");
        } else {
            print_issues(&warnings);
        }
        render_preflight(&report);
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    if report.has_errors() {
        anyhow::bail!("preflight checks failed");
    }
    Ok(())
}

fn print_issues(issues: &[ConfigWarning]) {
    for w in issues {
        let prefix = match w.level {
            WarnLevel::Warning => "warning",
            WarnLevel::Error => "error",
        };
        println!("[{prefix}] {}", w.message);
    }
}

pub fn render_preflight(report: &Preflight) {
    if report.writable {
        println!("Working root is writable.");
    }
    if let Some(py) = &report.python {
        println!("Python {} at {}", py.version, py.path.display());
    }
    print_issues(&report.issues);
}
