//! Working-root resolution.
//!
//! A host that deploys the stack may hand us a path deep inside its own
//! runtime tree (`<root>/data/.vela/cores/<version>`). The working root sits a
//! fixed number of levels above that path.

use std::path::{Component, Path, PathBuf};

/// Levels between the deployment handle and the working root.
pub const HANDLE_DEPTH: usize = 4;

/// Inputs to [`resolve`]. Callers read the environment; this module never does.
#[derive(Debug, Clone, Default)]
pub struct ResolveInput {
    /// `--root` / `STACKBOOT_ROOT`. Wins over everything else.
    pub explicit: Option<PathBuf>,
    /// Deployment handle (`VELA_CORE_DIR`).
    pub handle: Option<PathBuf>,
    pub cwd: PathBuf,
}

/// Resolve the working root. Pure path arithmetic; never fails.
///
/// Priority:
/// 1. explicit root
/// 2. the `HANDLE_DEPTH`-th ancestor of the deployment handle
/// 3. `cwd` (also the fallback when the handle is too shallow)
pub fn resolve(input: &ResolveInput) -> PathBuf {
    if let Some(p) = &input.explicit {
        return absolutize(&input.cwd, p);
    }
    match &input.handle {
        Some(handle) => from_handle(handle, &input.cwd),
        None => input.cwd.clone(),
    }
}

/// Ascend exactly [`HANDLE_DEPTH`] levels from `handle`, or return `cwd` if
/// the handle has fewer ancestors than that.
pub fn from_handle(handle: &Path, cwd: &Path) -> PathBuf {
    let absolute = absolutize(cwd, handle);
    absolute
        .ancestors()
        .nth(HANDLE_DEPTH)
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| cwd.to_path_buf())
}

/// Join `path` onto `base` and fold `.`/`..` lexically.
fn absolutize(base: &Path, path: &Path) -> PathBuf {
    let joined = base.join(path);
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(handle: Option<&str>, cwd: &str) -> ResolveInput {
        ResolveInput {
            explicit: None,
            handle: handle.map(PathBuf::from),
            cwd: PathBuf::from(cwd),
        }
    }

    #[cfg(unix)]
    #[test]
    fn handle_ascends_exactly_four_levels() {
        let root = resolve(&input(
            Some("/opt/install_1/data/.vela/cores/1.0.0-e34b2e4c"),
            "/somewhere/else",
        ));
        assert_eq!(root, PathBuf::from("/opt/install_1"));
    }

    #[cfg(unix)]
    #[test]
    fn handle_with_exactly_four_ancestors_reaches_filesystem_root() {
        let root = resolve(&input(Some("/a/b/c/d"), "/cwd"));
        assert_eq!(root, PathBuf::from("/"));
    }

    #[cfg(unix)]
    #[test]
    fn shallow_handle_falls_back_to_cwd() {
        let root = resolve(&input(Some("/a/b"), "/work/dir"));
        assert_eq!(root, PathBuf::from("/work/dir"));
    }

    #[cfg(unix)]
    #[test]
    fn relative_handle_is_anchored_at_cwd() {
        let root = resolve(&input(Some("data/.vela/cores/v1"), "/srv/app"));
        assert_eq!(root, PathBuf::from("/srv/app"));
    }

    #[cfg(unix)]
    #[test]
    fn no_handle_uses_cwd() {
        assert_eq!(resolve(&input(None, "/work")), PathBuf::from("/work"));
    }

    #[cfg(unix)]
    #[test]
    fn explicit_root_wins() {
        let mut i = input(Some("/a/b/c/d/e/f"), "/work");
        i.explicit = Some(PathBuf::from("/chosen"));
        assert_eq!(resolve(&i), PathBuf::from("/chosen"));
    }
}
