pub mod check;
pub mod deploy;
pub mod prepare;
pub mod scaffold;
pub mod start;
pub mod status;
pub mod stop;

use anyhow::Context;
use stackboot_core::config::{StackConfig, WarnLevel};
use stackboot_core::installer::InstallOptions;
use std::path::Path;

/// Install-related flags shared by `prepare` and `deploy`.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct InstallFlags {
    /// Allow building the remediable package from source as a last resort
    #[arg(long)]
    pub allow_source_build: bool,

    /// Never use uv, even when it is on PATH
    #[arg(long)]
    pub no_uv: bool,
}

impl InstallFlags {
    /// Config values, with flags able to switch features on (source builds)
    /// or off (uv) but never the other way round.
    pub fn apply(&self, cfg: &StackConfig) -> InstallOptions {
        let mut opts = InstallOptions::from_config(&cfg.install);
        opts.allow_source_build |= self.allow_source_build;
        opts.prefer_uv &= !self.no_uv;
        opts
    }
}

/// Parse `stackboot.yaml` without validating it. `stop` and `status` only
/// need the registry location, so a bad port must not lock them out.
pub fn read_config(root: &Path) -> anyhow::Result<StackConfig> {
    StackConfig::load(root).context("failed to load stackboot.yaml")
}

/// Load `stackboot.yaml`, log warnings, and refuse to continue on errors.
pub fn load_config(root: &Path) -> anyhow::Result<StackConfig> {
    let cfg = read_config(root)?;
    let warnings = cfg.validate();
    for w in &warnings {
        match w.level {
            WarnLevel::Warning => tracing::warn!("config: {}", w.message),
            WarnLevel::Error => tracing::error!("config: {}", w.message),
        }
    }
    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("stackboot.yaml has errors; run `stackboot check` for details");
    }
    Ok(cfg)
}
