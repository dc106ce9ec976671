//! Python runtime environment: create, install, verify, remediate.
//!
//! [`ensure_environment`] is a fixed pipeline over the backend's virtual
//! environment:
//!
//! | step                     | class | skipped when                   |
//! |--------------------------|-------|--------------------------------|
//! | `create-venv`            | HARD  | the venv interpreter exists    |
//! | `bootstrap-pip`          | SOFT  | `python -m pip --version` ok   |
//! | `upgrade-pip`            | SOFT  |                                |
//! | `reconcile-requirements` | HARD  |                                |
//! | `install`                | HARD  |                                |
//! | `verify`                 | HARD  |                                |
//!
//! Tool selection inside a step is an ordered candidate list: uv first when
//! preferred and on PATH, then the interpreter's own tooling. When
//! verification fails only because of the configured remediable package,
//! escalating install tiers are tried one at a time and verification is
//! re-run after each.

use crate::config::{InstallConfig, RemediableConfig};
use crate::error::{EnvironmentError, ImportFailure, Result, StackError};
use crate::exec::{CommandSpec, Runner};
use crate::paths;
use crate::pipeline::{Pipeline, PipelineReport, Step};
use crate::requirements::{self, DependencySpec, Reconciled};
use crate::strategy::{first_success, Candidate, Exhausted};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Options / results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Host interpreter used for `python -m venv`. Searched on PATH if unset.
    pub python: Option<String>,
    pub prefer_uv: bool,
    pub allow_source_build: bool,
    pub must_have: Vec<DependencySpec>,
    pub remediable: RemediableConfig,
}

impl InstallOptions {
    pub fn from_config(cfg: &InstallConfig) -> Self {
        Self {
            python: cfg.python.clone(),
            prefer_uv: cfg.prefer_uv,
            allow_source_build: cfg.allow_source_build,
            must_have: cfg.must_have.clone(),
            remediable: cfg.remediable.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeEnvironment {
    pub root: PathBuf,
    pub interpreter: PathBuf,
    pub created_at: DateTime<Utc>,
    /// Strategy that created the venv, or `existing`.
    pub created_by: String,
    pub requirements: Reconciled,
    /// Remediation tier that fixed verification, if one was needed.
    pub remediated_by: Option<String>,
    pub steps: PipelineReport,
}

/// Host interpreter names tried, in order, when none is configured.
const HOST_PYTHONS: &[&str] = if cfg!(windows) {
    &["python", "python3"]
} else {
    &["python3", "python"]
};

/// A configured interpreter is used as given when it is not on PATH, so an
/// absolute path still works.
pub(crate) fn find_host_python(runner: &dyn Runner, configured: Option<&str>) -> Option<PathBuf> {
    match configured {
        Some(py) => Some(runner.find(py).unwrap_or_else(|| PathBuf::from(py))),
        None => HOST_PYTHONS.iter().find_map(|name| runner.find(name)),
    }
}

pub(crate) fn host_python_names() -> String {
    HOST_PYTHONS.join(", ")
}

// ---------------------------------------------------------------------------
// Pipeline context
// ---------------------------------------------------------------------------

struct InstallContext<'r> {
    runner: &'r mut dyn Runner,
    venv: PathBuf,
    interpreter: PathBuf,
    requirements: PathBuf,
    opts: InstallOptions,
    created_by: Option<String>,
    reconciled: Reconciled,
    remediated_by: Option<String>,
}

impl InstallContext<'_> {
    fn python(&self) -> CommandSpec {
        CommandSpec::new(&self.interpreter)
    }

    fn uv(&self) -> Option<PathBuf> {
        if self.opts.prefer_uv {
            self.runner.find("uv")
        } else {
            None
        }
    }

    fn host_python(&self) -> Result<PathBuf> {
        find_host_python(&*self.runner, self.opts.python.as_deref())
            .ok_or_else(|| EnvironmentError::NoInterpreter(host_python_names()).into())
    }

    /// A creation command can exit 0 and still leave no interpreter behind.
    fn expect_interpreter(&self) -> Result<()> {
        if self.interpreter.exists() {
            Ok(())
        } else {
            Err(StackError::Probe(format!(
                "no interpreter at {} after creation",
                self.interpreter.display()
            )))
        }
    }
}

/// Surface an interruption as-is; fold every other exhaustion into `wrap`.
fn exhausted(ex: Exhausted<StackError>, wrap: impl FnOnce(String) -> EnvironmentError) -> StackError {
    match ex.take_last_if(StackError::is_interrupted) {
        Ok(interrupted) => interrupted,
        Err(ex) => wrap(ex.to_string()).into(),
    }
}

// ---------------------------------------------------------------------------
// ensure_environment
// ---------------------------------------------------------------------------

/// Bring the venv under `root` to a verified state.
///
/// `venv_dir` and `dependency_file` are resolved against `root` unless
/// absolute. Running this twice in a row performs no creation the second
/// time and leaves the dependency file untouched.
pub fn ensure_environment(
    runner: &mut dyn Runner,
    root: &Path,
    venv_dir: &Path,
    dependency_file: &Path,
    opts: &InstallOptions,
) -> Result<RuntimeEnvironment> {
    let venv = root.join(venv_dir);
    let interpreter = paths::venv_python(&venv);
    let mut ctx = InstallContext {
        runner,
        venv,
        interpreter,
        requirements: root.join(dependency_file),
        opts: opts.clone(),
        created_by: None,
        reconciled: Reconciled::default(),
        remediated_by: None,
    };

    let steps = Pipeline::new()
        .step(Step::hard("create-venv", create_venv).skip_if(venv_exists))
        .step(Step::soft("bootstrap-pip", bootstrap_pip).skip_if(pip_available))
        .step(Step::soft("upgrade-pip", upgrade_pip))
        .step(Step::hard("reconcile-requirements", reconcile_requirements))
        .step(Step::hard("install", install))
        .step(Step::hard("verify", verify_and_remediate))
        .run(&mut ctx)?;

    let created_at = std::fs::metadata(&ctx.interpreter)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    Ok(RuntimeEnvironment {
        root: root.to_path_buf(),
        interpreter: ctx.interpreter,
        created_at,
        created_by: ctx.created_by.unwrap_or_else(|| "existing".to_string()),
        requirements: ctx.reconciled,
        remediated_by: ctx.remediated_by,
        steps,
    })
}

fn create_venv<'r>(ctx: &mut InstallContext<'r>) -> Result<()> {
    let mut candidates: Vec<Candidate<InstallContext<'r>, (), StackError>> = Vec::new();

    if let Some(uv) = ctx.uv() {
        candidates.push(Candidate::new("uv venv", move |c: &mut InstallContext<'r>| {
            let mut spec = CommandSpec::new(&uv).arg("venv").arg(&c.venv);
            if let Some(py) = &c.opts.python {
                spec = spec.arg("--python").arg(py);
            }
            c.runner.run("create-venv", &spec)?;
            c.expect_interpreter()
        }));
    }
    candidates.push(Candidate::new("python -m venv", |c: &mut InstallContext<'r>| {
        let host = c.host_python()?;
        let spec = CommandSpec::new(host).args(["-m", "venv"]).arg(&c.venv);
        c.runner.run("create-venv", &spec)?;
        c.expect_interpreter()
    }));

    match first_success(ctx, candidates, StackError::is_interrupted) {
        Ok(won) => {
            tracing::info!(strategy = %won.name, venv = %ctx.venv.display(), "virtual environment created");
            ctx.created_by = Some(won.name);
            Ok(())
        }
        Err(ex) => {
            let venv = ctx.venv.display().to_string();
            Err(exhausted(ex, |attempts| EnvironmentError::CreationFailed { venv, attempts }))
        }
    }
}

fn venv_exists(ctx: &mut InstallContext) -> bool {
    ctx.interpreter.exists()
}

fn pip_available(ctx: &mut InstallContext) -> bool {
    let spec = ctx.python().args(["-m", "pip", "--version"]).quiet();
    ctx.runner.run("bootstrap-pip", &spec).is_ok()
}

fn bootstrap_pip(ctx: &mut InstallContext) -> Result<()> {
    let spec = ctx.python().args(["-m", "ensurepip", "--upgrade"]);
    ctx.runner.run("bootstrap-pip", &spec).map(drop)
}

fn upgrade_pip(ctx: &mut InstallContext) -> Result<()> {
    let spec = ctx
        .python()
        .args(["-m", "pip", "install", "--upgrade", "pip"]);
    ctx.runner.run("upgrade-pip", &spec).map(drop)
}

fn reconcile_requirements(ctx: &mut InstallContext) -> Result<()> {
    ctx.reconciled = requirements::reconcile(&ctx.requirements, &ctx.opts.must_have)?;
    if ctx.reconciled.created {
        tracing::info!(path = %ctx.requirements.display(), "dependency file seeded");
    } else if !ctx.reconciled.added.is_empty() {
        tracing::info!(added = ?ctx.reconciled.added, "dependency file extended");
    }
    Ok(())
}

fn install<'r>(ctx: &mut InstallContext<'r>) -> Result<()> {
    let mut candidates: Vec<Candidate<InstallContext<'r>, (), StackError>> = Vec::new();

    if let Some(uv) = ctx.uv() {
        candidates.push(Candidate::new("uv pip", move |c: &mut InstallContext<'r>| {
            let spec = CommandSpec::new(&uv)
                .args(["pip", "install", "--python"])
                .arg(&c.interpreter)
                .arg("-r")
                .arg(&c.requirements);
            c.runner.run("install", &spec).map(drop)
        }));
    }
    candidates.push(Candidate::new("pip", |c: &mut InstallContext<'r>| {
        let spec = c
            .python()
            .args(["-m", "pip", "install", "-r"])
            .arg(&c.requirements);
        c.runner.run("install", &spec).map(drop)
    }));

    match first_success(ctx, candidates, StackError::is_interrupted) {
        Ok(won) => {
            if !won.failed.is_empty() {
                tracing::warn!(fell_back_from = ?won.failed, used = %won.name, "installer fallback");
            }
            Ok(())
        }
        Err(ex) => Err(exhausted(ex, |attempts| EnvironmentError::InstallFailed { attempts })),
    }
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Imports each module named on the command line and prints one JSON
/// object describing what failed.
const PROBE_SCRIPT: &str = r#"import importlib, json, platform, sys
failures = []
for name in sys.argv[1:]:
    try:
        importlib.import_module(name)
    except Exception as exc:
        missing = exc.name if isinstance(exc, ImportError) else None
        failures.append({"module": name, "missing": missing, "error": f"{type(exc).__name__}: {exc}"})
print(json.dumps({
    "python": platform.python_version(),
    "platform": f"{platform.system()} {platform.machine()}",
    "failures": failures,
}))
"#;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProbeReport {
    pub python: String,
    pub platform: String,
    #[serde(default)]
    pub failures: Vec<ImportFailure>,
}

impl ProbeReport {
    /// Parse the last non-empty stdout line as the report.
    pub fn parse(stdout: &str) -> Result<Self> {
        let line = stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| StackError::Probe("probe printed nothing".to_string()))?;
        serde_json::from_str(line).map_err(|e| StackError::Probe(format!("{e}: {line}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Passed,
    /// Every failure traces back to the remediable package.
    KnownRemediable(ProbeReport),
    Missing(ProbeReport),
}

/// Classify a probe report against the remediable module name.
pub fn classify(report: ProbeReport, remediable_module: &str) -> Verification {
    if report.failures.is_empty() {
        return Verification::Passed;
    }
    let all_remediable = report.failures.iter().all(|f| {
        let cause = f.root_cause();
        cause.split('.').next() == Some(remediable_module)
    });
    if all_remediable {
        Verification::KnownRemediable(report)
    } else {
        Verification::Missing(report)
    }
}

/// Run the import probe inside the venv for every must-have module.
pub fn probe(runner: &mut dyn Runner, interpreter: &Path, modules: &[String]) -> Result<ProbeReport> {
    let mut script = tempfile::Builder::new()
        .prefix("stackboot-probe-")
        .suffix(".py")
        .tempfile()?;
    script.write_all(PROBE_SCRIPT.as_bytes())?;
    script.flush()?;

    let spec = CommandSpec::new(interpreter)
        .arg(script.path())
        .args(modules)
        .quiet();
    let out = runner.run("verify", &spec)?;
    ProbeReport::parse(&out.stdout)
}

fn verify(ctx: &mut InstallContext) -> Result<Verification> {
    let mut modules: Vec<String> = requirements::dedupe(&ctx.opts.must_have)
        .iter()
        .map(DependencySpec::import_module)
        .collect();
    let remediable = &ctx.opts.remediable.module;
    if !modules.contains(remediable) {
        modules.push(remediable.clone());
    }
    let report = probe(&mut *ctx.runner, &ctx.interpreter, &modules)?;
    Ok(classify(report, &ctx.opts.remediable.module))
}

fn verify_and_remediate(ctx: &mut InstallContext) -> Result<()> {
    match verify(ctx)? {
        Verification::Passed => Ok(()),
        Verification::Missing(report) => Err(EnvironmentError::MissingModules {
            failures: report.failures,
        }
        .into()),
        Verification::KnownRemediable(report) => {
            tracing::warn!(
                package = %ctx.opts.remediable.package,
                python = %report.python,
                "verification failed on a known package, escalating install"
            );
            remediate(ctx, report)
        }
    }
}

// ---------------------------------------------------------------------------
// Remediation
// ---------------------------------------------------------------------------

/// Install flags per tier, least invasive first.
pub fn remediation_tiers(package: &str, allow_source_build: bool) -> Vec<(&'static str, Vec<String>)> {
    let mut tiers = vec![
        ("binary-only", vec!["--only-binary=:all:".to_string()]),
        (
            "binary-only-prerelease",
            vec!["--only-binary=:all:".to_string(), "--pre".to_string()],
        ),
    ];
    if allow_source_build {
        tiers.push(("source-build", vec![format!("--no-binary={package}")]));
    }
    tiers
}

/// uv spells pip's `--pre` differently.
fn uv_flag(flag: &str) -> &str {
    if flag == "--pre" {
        "--prerelease=allow"
    } else {
        flag
    }
}

fn remediate<'r>(ctx: &mut InstallContext<'r>, report: ProbeReport) -> Result<()> {
    let package = ctx.opts.remediable.package.clone();
    let uv = ctx.uv();
    let candidates: Vec<Candidate<InstallContext<'r>, (), StackError>> =
        remediation_tiers(&package, ctx.opts.allow_source_build)
            .into_iter()
            .map(|(name, flags)| {
                let package = package.clone();
                let uv = uv.clone();
                Candidate::new(name, move |c: &mut InstallContext<'r>| {
                    let spec = match &uv {
                        Some(uv) => CommandSpec::new(uv)
                            .args(["pip", "install", "--python"])
                            .arg(&c.interpreter)
                            .arg("--upgrade")
                            .args(flags.iter().map(|f| uv_flag(f)))
                            .arg(&package),
                        None => c
                            .python()
                            .args(["-m", "pip", "install", "--upgrade"])
                            .args(&flags)
                            .arg(&package),
                    };
                    c.runner.run("remediate", &spec)?;
                    match verify(c)? {
                        Verification::Passed => Ok(()),
                        Verification::KnownRemediable(r) | Verification::Missing(r) => {
                            Err(EnvironmentError::MissingModules { failures: r.failures }.into())
                        }
                    }
                })
            })
            .collect();

    match first_success(ctx, candidates, StackError::is_interrupted) {
        Ok(won) => {
            tracing::info!(tier = %won.name, "remediation succeeded");
            ctx.remediated_by = Some(won.name);
            Ok(())
        }
        Err(ex) => match ex.take_last_if(StackError::is_interrupted) {
            Ok(interrupted) => Err(interrupted),
            Err(ex) => Err(EnvironmentError::KnownRemediable {
                package: package.clone(),
                python: report.python,
                platform: report.platform,
                tried: ex.names().join(", "),
                remediation: remediation_advice(ctx, &package),
                last_error: ex.last().map(ToString::to_string).unwrap_or_default(),
            }
            .into()),
        },
    }
}

fn remediation_advice(ctx: &InstallContext, package: &str) -> String {
    let recommended = &ctx.opts.remediable.recommended_python;
    let mut advice = format!(
        "To fix:\n  1. Recreate the environment on Python {recommended}: delete {} and set \
         install.python to a Python {recommended} interpreter, then run `stackboot prepare`.",
        ctx.venv.display()
    );
    if ctx.opts.allow_source_build {
        advice.push_str(&format!(
            "\n  2. The source build of {package} also failed; check that a C compiler and \
             Python headers are installed."
        ));
    } else {
        advice.push_str(&format!(
            "\n  2. Install a C compiler toolchain and rerun with --allow-source-build to \
             build {package} from source."
        ));
    }
    advice
}

// ---------------------------------------------------------------------------
// Frontend packages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrontendInstall {
    Installed,
    AlreadyPresent,
    NoManifest,
    NpmMissing,
}

/// `npm install` in `frontend_dir` when a manifest exists and packages do not.
pub fn ensure_frontend_packages(
    runner: &mut dyn Runner,
    frontend_dir: &Path,
    manifest: &Path,
) -> Result<FrontendInstall> {
    if !manifest.exists() {
        return Ok(FrontendInstall::NoManifest);
    }
    if frontend_dir.join("node_modules").is_dir() {
        return Ok(FrontendInstall::AlreadyPresent);
    }
    let Some(npm) = runner.find("npm") else {
        tracing::warn!("npm not found on PATH; frontend packages not installed");
        return Ok(FrontendInstall::NpmMissing);
    };
    let spec = CommandSpec::new(npm).arg("install").cwd(frontend_dir);
    runner.run("frontend-install", &spec)?;
    Ok(FrontendInstall::Installed)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
