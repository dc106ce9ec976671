//! Top-level flows composed from the other modules.
//!
//! `prepare` builds both runtimes; `deploy` is preflight → scaffold →
//! prepare → start as one pipeline. Every stage after preflight is skippable.

use crate::config::{StackConfig, WarnLevel};
use crate::error::{Result, StackError};
use crate::exec::Runner;
use crate::installer::{self, FrontendInstall, InstallOptions, RuntimeEnvironment};
use crate::pipeline::{Pipeline, PipelineReport, Step};
use crate::preflight::{self, Preflight};
use crate::scaffold::{self, ScaffoldReport};
use crate::supervisor::{StartReport, Supervisor};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct Prepared {
    pub environment: Option<RuntimeEnvironment>,
    /// `None` when the frontend step failed softly; the warning is in `steps`.
    pub frontend: Option<FrontendInstall>,
    pub steps: PipelineReport,
}

struct PrepareContext<'a> {
    runner: &'a mut dyn Runner,
    root: &'a Path,
    cfg: &'a StackConfig,
    opts: &'a InstallOptions,
    environment: Option<RuntimeEnvironment>,
    frontend: Option<FrontendInstall>,
}

fn python_environment(ctx: &mut PrepareContext) -> Result<()> {
    let backend = ctx.cfg.backend_dir(ctx.root);
    let env = installer::ensure_environment(
        &mut *ctx.runner,
        &backend,
        &ctx.cfg.backend.venv_dir,
        &ctx.cfg.backend.requirements,
        ctx.opts,
    )?;
    ctx.environment = Some(env);
    Ok(())
}

fn frontend_packages(ctx: &mut PrepareContext) -> Result<()> {
    let status = installer::ensure_frontend_packages(
        &mut *ctx.runner,
        &ctx.cfg.frontend_dir(ctx.root),
        &ctx.cfg.frontend_manifest(ctx.root),
    )?;
    ctx.frontend = Some(status);
    Ok(())
}

/// Python environment (HARD) then frontend packages (SOFT).
pub fn prepare(
    runner: &mut dyn Runner,
    root: &Path,
    cfg: &StackConfig,
    opts: &InstallOptions,
) -> Result<Prepared> {
    let mut ctx = PrepareContext {
        runner,
        root,
        cfg,
        opts,
        environment: None,
        frontend: None,
    };
    let steps = Pipeline::new()
        .step(Step::hard("python-environment", python_environment))
        .step(Step::soft("frontend-packages", frontend_packages))
        .run(&mut ctx)?;
    Ok(Prepared {
        environment: ctx.environment,
        frontend: ctx.frontend,
        steps,
    })
}

// ---------------------------------------------------------------------------
// deploy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct DeployOptions {
    pub skip_scaffold: bool,
    pub skip_install: bool,
    pub skip_start: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Deployed {
    pub preflight: Option<Preflight>,
    pub scaffold: Option<ScaffoldReport>,
    pub prepared: Option<Prepared>,
    pub started: Option<StartReport>,
    pub steps: PipelineReport,
}

struct DeployContext<'a> {
    prepare: PrepareContext<'a>,
    stages: DeployOptions,
    preflight: Option<Preflight>,
    scaffold: Option<ScaffoldReport>,
    prepared: Option<Prepared>,
    started: Option<StartReport>,
}

/// The interpreter is only checked when the prepare stage will need it.
fn preflight_stage(ctx: &mut DeployContext) -> Result<()> {
    let check_python = !ctx.stages.skip_install;
    let p = &mut ctx.prepare;
    let report = preflight::run(&mut *p.runner, p.root, p.opts.python.as_deref(), check_python)?;
    for issue in &report.issues {
        match issue.level {
            WarnLevel::Error => tracing::error!("preflight: {}", issue.message),
            WarnLevel::Warning => tracing::warn!("preflight: {}", issue.message),
        }
    }
    let failed = report.has_errors().then(|| report.error_summary());
    ctx.preflight = Some(report);
    match failed {
        Some(summary) => Err(StackError::Preflight(summary)),
        None => Ok(()),
    }
}

fn scaffold_stage(ctx: &mut DeployContext) -> Result<()> {
    let p = &ctx.prepare;
    ctx.scaffold = Some(scaffold::scaffold(p.root, p.cfg)?);
    Ok(())
}

fn prepare_stage(ctx: &mut DeployContext) -> Result<()> {
    let p = &mut ctx.prepare;
    ctx.prepared = Some(prepare(&mut *p.runner, p.root, p.cfg, p.opts)?);
    Ok(())
}

fn start_stage(ctx: &mut DeployContext) -> Result<()> {
    let p = &ctx.prepare;
    ctx.started = Some(Supervisor::new(p.root, p.cfg).start()?);
    Ok(())
}

/// Preflight, scaffold, prepare and start as one HARD pipeline.
pub fn deploy(
    runner: &mut dyn Runner,
    root: &Path,
    cfg: &StackConfig,
    opts: &InstallOptions,
    stages: DeployOptions,
) -> Result<Deployed> {
    let mut ctx = DeployContext {
        prepare: PrepareContext {
            runner,
            root,
            cfg,
            opts,
            environment: None,
            frontend: None,
        },
        stages,
        preflight: None,
        scaffold: None,
        prepared: None,
        started: None,
    };
    let steps = Pipeline::new()
        .step(Step::hard("preflight", preflight_stage))
        .step(Step::hard("scaffold", scaffold_stage).skip_if(move |_| stages.skip_scaffold))
        .step(Step::hard("prepare", prepare_stage).skip_if(move |_| stages.skip_install))
        .step(Step::hard("start", start_stage).skip_if(move |_| stages.skip_start))
        .run(&mut ctx)?;
    Ok(Deployed {
        preflight: ctx.preflight,
        scaffold: ctx.scaffold,
        prepared: ctx.prepared,
        started: ctx.started,
        steps,
    })
}
