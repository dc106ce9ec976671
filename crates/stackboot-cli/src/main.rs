mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use stackboot_core::config::StackConfig;
use stackboot_core::{paths, StackError};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Parser)]
#[command(
    name = "stackboot",
    about = "Bootstrap, start and stop a local Flask + Vite development stack",
    version,
    propagate_version = true
)]
struct Cli {
    /// Working root (default: derived from the deployment handle, else the current directory)
    #[arg(long, global = true, env = "STACKBOOT_ROOT")]
    root: Option<PathBuf>,

    /// Deployment handle; the working root is four directories above it
    #[arg(long, global = true, env = paths::DEPLOY_HANDLE_ENV)]
    deploy_handle: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Debug-level logging
    #[arg(long, global = true, short = 'v')]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the Python environment, install and verify dependencies, install frontend packages
    Prepare {
        #[command(flatten)]
        install: cmd::InstallFlags,
    },

    /// Create any missing starter files and directories
    Scaffold,

    /// Start the backend and frontend in the background
    Start,

    /// Stop processes started by `stackboot start`
    Stop,

    /// Show registered processes and whether they are alive
    Status,

    /// Scaffold, prepare and start in one go
    Deploy {
        #[command(flatten)]
        install: cmd::InstallFlags,

        /// Do not create starter files
        #[arg(long)]
        skip_scaffold: bool,

        /// Do not touch the Python or frontend environments
        #[arg(long)]
        skip_install: bool,

        /// Do not start any processes
        #[arg(long)]
        skip_start: bool,
    },

    /// Validate stackboot.yaml
    Check,
}

impl Commands {
    /// Commands that act on the stack keep a transcript; read-only ones don't.
    fn keeps_transcript(&self) -> bool {
        matches!(
            self,
            Commands::Prepare { .. } | Commands::Start | Commands::Stop | Commands::Deploy { .. }
        )
    }
}

fn main() {
    let cli = Cli::parse();

    let root = root::resolve_root(cli.root, cli.deploy_handle);
    let transcript = cli
        .command
        .keeps_transcript()
        .then(|| transcript_path(&root));
    let transcript = init_logging(cli.verbose, transcript);
    tracing::debug!(root = %root.display(), "working root");
    let json = cli.json;
    let command = cli.command;

    let result = run_interruptible(move || match command {
        Commands::Prepare { install } => cmd::prepare::run(&root, &install, json),
        Commands::Scaffold => cmd::scaffold::run(&root, json),
        Commands::Start => cmd::start::run(&root, json),
        Commands::Stop => cmd::stop::run(&root, json),
        Commands::Status => cmd::status::run(&root, json),
        Commands::Deploy {
            install,
            skip_scaffold,
            skip_install,
            skip_start,
        } => cmd::deploy::run(
            &root,
            &install,
            stackboot_core::stack::DeployOptions {
                skip_scaffold,
                skip_install,
                skip_start,
            },
            json,
        ),
        Commands::Check => cmd::check::run(&root, json),
    });

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        if let Some(path) = &transcript {
            eprintln!("See {} for the full transcript.", path.display());
        }
        std::process::exit(exit_code(&e));
    }
}

/// Console output goes to stderr. When `transcript` is given the same events
/// are appended to that file without colour. Returns the transcript path if
/// it could be opened.
fn init_logging(verbose: bool, transcript: Option<PathBuf>) -> Option<PathBuf> {
    use tracing_subscriber::prelude::*;

    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());
    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let mut opened = None;
    let file_layer = match transcript {
        Some(path) => match open_transcript(&path) {
            Ok(file) => {
                opened = Some(path);
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_target(false)
                        .with_writer(Mutex::new(file)),
                )
            }
            Err(e) => {
                eprintln!("warning: cannot write transcript {}: {e}", path.display());
                None
            }
        },
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .init();
    opened
}

/// `<run_dir>/stackboot.log`. A config that does not parse falls back to the
/// default run directory; the command itself reports the parse error.
fn transcript_path(root: &Path) -> PathBuf {
    let run_dir = StackConfig::load(root)
        .map(|cfg| cfg.run_dir(root))
        .unwrap_or_else(|_| root.join(paths::RUN_DIR));
    run_dir.join(paths::TRANSCRIPT_FILE)
}

fn open_transcript(path: &Path) -> std::io::Result<File> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Run `work` on a blocking thread and race it against Ctrl-C.
fn run_interruptible(
    work: impl FnOnce() -> anyhow::Result<()> + Send + 'static,
) -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(async move {
        let task = tokio::task::spawn_blocking(work);
        tokio::select! {
            res = task => res.map_err(|e| anyhow::anyhow!("worker thread failed: {e}"))?,
            signal = tokio::signal::ctrl_c() => {
                signal?;
                Err(StackError::Interrupted {
                    step: "stackboot".to_string(),
                }
                .into())
            }
        }
    });
    // An interrupted worker may still be blocked on a child; don't wait for it.
    rt.shutdown_background();
    result
}

/// 130 for user interruption anywhere in the chain, 1 otherwise.
fn exit_code(err: &anyhow::Error) -> i32 {
    let interrupted = err.chain().any(|cause| {
        cause
            .downcast_ref::<StackError>()
            .is_some_and(StackError::is_interrupted)
    });
    if interrupted {
        130
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn interruption_maps_to_130_through_context() {
        let err: anyhow::Result<()> = Err(StackError::Interrupted {
            step: "install".into(),
        })
        .context("prepare failed");
        assert_eq!(exit_code(&err.unwrap_err()), 130);
    }

    #[test]
    fn other_errors_map_to_1() {
        let err = anyhow::Error::from(StackError::ToolNotFound("npm".into()));
        assert_eq!(exit_code(&err), 1);
    }

    #[test]
    fn transcript_follows_configured_run_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        assert_eq!(
            transcript_path(dir.path()),
            dir.path().join(".stackboot-run/stackboot.log")
        );

        std::fs::write(
            dir.path().join("stackboot.yaml"),
            "supervisor:\n  run_dir: var/run\n",
        )
        .unwrap();
        assert_eq!(
            transcript_path(dir.path()),
            dir.path().join("var/run/stackboot.log")
        );

        std::fs::write(dir.path().join("stackboot.yaml"), "backend: [broken\n").unwrap();
        assert_eq!(
            transcript_path(dir.path()),
            dir.path().join(".stackboot-run/stackboot.log")
        );
    }

    #[test]
    fn only_mutating_commands_keep_a_transcript() {
        let parse = |args: &[&str]| Cli::try_parse_from(args).unwrap().command;
        assert!(parse(&["stackboot", "stop"]).keeps_transcript());
        assert!(parse(&["stackboot", "deploy", "--skip-start"]).keeps_transcript());
        assert!(!parse(&["stackboot", "status"]).keeps_transcript());
        assert!(!parse(&["stackboot", "check"]).keeps_transcript());
    }

    #[test]
    fn cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "stackboot",
            "prepare",
            "--allow-source-build",
            "--no-uv",
            "--json",
            "--root",
            "/tmp/x",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/x")));
        match cli.command {
            Commands::Prepare { install } => {
                assert!(install.allow_source_build);
                assert!(install.no_uv);
            }
            _ => panic!("expected prepare"),
        }
    }
}
