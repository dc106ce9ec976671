use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const CONFIG_FILE: &str = "stackboot.yaml";

pub const BACKEND_DIR: &str = "backend";
pub const FRONTEND_DIR: &str = "frontend";
pub const VENV_DIR: &str = ".venv";
pub const REQUIREMENTS_FILE: &str = "requirements.txt";
pub const FRONTEND_MANIFEST: &str = "package.json";

pub const RUN_DIR: &str = ".stackboot-run";
pub const REGISTRY_FILE: &str = "pids.json";
/// Per-run transcript of everything logged, kept under the run directory.
pub const TRANSCRIPT_FILE: &str = "stackboot.log";

/// Environment variable carrying the deployment handle.
pub const DEPLOY_HANDLE_ENV: &str = "VELA_CORE_DIR";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

/// Interpreter location inside a virtual environment. The layout differs
/// between Windows and POSIX.
pub fn venv_python(venv: &Path) -> PathBuf {
    if cfg!(windows) {
        venv.join("Scripts").join("python.exe")
    } else {
        venv.join("bin").join("python")
    }
}

pub fn log_path(run_dir: &Path, name: &str) -> PathBuf {
    run_dir.join(format!("{name}.log"))
}
