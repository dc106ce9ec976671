use stackboot_core::root::{resolve, ResolveInput};
use std::path::PathBuf;

/// Resolve the working root from CLI flags / environment.
///
/// Priority:
/// 1. `--root` flag / `STACKBOOT_ROOT` env var
/// 2. `--deploy-handle` / `VELA_CORE_DIR`, four levels up
/// 3. the current directory
///
/// An empty handle counts as unset.
pub fn resolve_root(explicit: Option<PathBuf>, handle: Option<PathBuf>) -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    resolve(&ResolveInput {
        explicit: explicit.filter(|p| !p.as_os_str().is_empty()),
        handle: handle.filter(|p| !p.as_os_str().is_empty()),
        cwd,
    })
}
