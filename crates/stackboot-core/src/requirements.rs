//! The dependency declaration file (`requirements.txt`).
//!
//! Must-have entries are merged into an existing file by canonical name only.
//! Lines the user wrote are never rewritten, reordered or removed.

use crate::error::Result;
use crate::io::atomic_write;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// DependencySpec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    pub name: String,
    #[serde(default)]
    pub constraint: String,
    /// Import name used by verification. Defaults to the name with `-`
    /// replaced by `_`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
}

impl DependencySpec {
    pub fn new(name: &str, constraint: &str, module: &str) -> Self {
        Self {
            name: name.to_string(),
            constraint: constraint.to_string(),
            module: Some(module.to_string()),
        }
    }

    pub fn canonical_name(&self) -> String {
        canonicalize(&self.name)
    }

    pub fn import_module(&self) -> String {
        self.module
            .clone()
            .unwrap_or_else(|| self.name.replace('-', "_"))
    }
}

impl fmt::Display for DependencySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.constraint)
    }
}

/// Drop later specs whose canonical name was already seen.
pub fn dedupe(specs: &[DependencySpec]) -> Vec<DependencySpec> {
    let mut seen = HashSet::new();
    specs
        .iter()
        .filter(|s| seen.insert(s.canonical_name()))
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Name parsing
// ---------------------------------------------------------------------------

static NAME_RE: OnceLock<Regex> = OnceLock::new();
static SEPARATOR_RE: OnceLock<Regex> = OnceLock::new();

fn name_re() -> &'static Regex {
    NAME_RE.get_or_init(|| Regex::new(r"^([A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)").unwrap())
}

fn separator_re() -> &'static Regex {
    SEPARATOR_RE.get_or_init(|| Regex::new(r"[-_.]+").unwrap())
}

/// PEP 503 normalization: lowercase, runs of `-`, `_`, `.` become one `-`.
pub fn canonicalize(name: &str) -> String {
    separator_re()
        .replace_all(&name.to_ascii_lowercase(), "-")
        .into_owned()
}

/// Canonical package name declared on a requirements line, if any.
///
/// Comments, blank lines and option lines (`-r`, `--index-url`, `-e`) declare
/// nothing.
pub fn declared_name(line: &str) -> Option<String> {
    let line = line.split(" #").next().unwrap_or("").trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with('-') {
        return None;
    }
    name_re()
        .captures(line)
        .map(|c| canonicalize(&c[1]))
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Reconciled {
    /// The file did not exist and was written from scratch.
    pub created: bool,
    /// Entries appended (or seeded) by this call.
    pub added: Vec<String>,
}

/// Union-merge `must_have` into the file at `path`.
pub fn reconcile(path: &Path, must_have: &[DependencySpec]) -> Result<Reconciled> {
    let must_have = dedupe(must_have);

    if !path.exists() {
        let added: Vec<String> = must_have.iter().map(ToString::to_string).collect();
        let mut body = String::from("# Managed by stackboot; edit freely, entries are only ever appended.\n");
        for line in &added {
            body.push_str(line);
            body.push('\n');
        }
        atomic_write(path, body.as_bytes())?;
        return Ok(Reconciled {
            created: true,
            added,
        });
    }

    let existing = std::fs::read_to_string(path)?;
    let present: HashSet<String> = existing.lines().filter_map(declared_name).collect();

    let added: Vec<String> = must_have
        .iter()
        .filter(|s| !present.contains(&s.canonical_name()))
        .map(ToString::to_string)
        .collect();

    if added.is_empty() {
        return Ok(Reconciled::default());
    }

    let mut body = existing;
    if !body.is_empty() && !body.ends_with('\n') {
        body.push('\n');
    }
    for line in &added {
        body.push_str(line);
        body.push('\n');
    }
    atomic_write(path, body.as_bytes())?;

    Ok(Reconciled {
        created: false,
        added,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn must_have() -> Vec<DependencySpec> {
        vec![
            DependencySpec::new("flask", ">=3.0", "flask"),
            DependencySpec::new("flask-cors", ">=4.0", "flask_cors"),
            DependencySpec::new("paho-mqtt", ">=2.0", "paho.mqtt.client"),
        ]
    }

    #[test]
    fn canonical_names() {
        assert_eq!(canonicalize("Flask_CORS"), "flask-cors");
        assert_eq!(canonicalize("zope.interface"), "zope-interface");
        assert_eq!(canonicalize("a__-.b"), "a-b");
    }

    #[test]
    fn declared_name_ignores_operators_and_extras() {
        assert_eq!(declared_name("Flask==2.3.1"), Some("flask".into()));
        assert_eq!(declared_name("flask_cors ~= 4.0"), Some("flask-cors".into()));
        assert_eq!(declared_name("uvicorn[standard]>=0.20"), Some("uvicorn".into()));
        assert_eq!(declared_name("requests ; python_version>'3'"), Some("requests".into()));
        assert_eq!(declared_name("pytest  # dev only"), Some("pytest".into()));
    }

    #[test]
    fn declared_name_skips_non_requirements() {
        assert_eq!(declared_name(""), None);
        assert_eq!(declared_name("   "), None);
        assert_eq!(declared_name("# flask"), None);
        assert_eq!(declared_name("-r base.txt"), None);
        assert_eq!(declared_name("--index-url https://example.org"), None);
    }

    #[test]
    fn dedupe_keeps_first_by_canonical_name() {
        let specs = vec![
            DependencySpec::new("Flask", ">=3", "flask"),
            DependencySpec::new("flask", "", "flask"),
            DependencySpec::new("gevent", "", "gevent"),
        ];
        let out = dedupe(&specs);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].name, "Flask");
    }

    #[test]
    fn import_module_defaults_from_name() {
        let spec = DependencySpec {
            name: "python-dotenv".into(),
            constraint: String::new(),
            module: None,
        };
        assert_eq!(spec.import_module(), "python_dotenv");
        assert_eq!(must_have()[2].import_module(), "paho.mqtt.client");
    }

    #[test]
    fn absent_file_is_seeded_with_every_must_have() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backend/requirements.txt");
        let out = reconcile(&path, &must_have()).unwrap();
        assert!(out.created);
        assert_eq!(out.added.len(), 3);
        let content = std::fs::read_to_string(&path).unwrap();
        for spec in must_have() {
            assert!(content.lines().any(|l| l == spec.to_string()));
        }
    }

    #[test]
    fn union_merge_preserves_existing_lines_in_place() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("requirements.txt");
        let original = "# pinned by hand\nFlask==2.3.3\r\nrequests>=2\n\nFLASK_CORS<5";
        std::fs::write(&path, original).unwrap();

        let out = reconcile(&path, &must_have()).unwrap();
        assert!(!out.created);
        assert_eq!(out.added, vec!["paho-mqtt>=2.0".to_string()]);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with(original));
        let original_lines: Vec<&str> = original.lines().collect();
        let new_lines: Vec<&str> = content.lines().collect();
        assert_eq!(&new_lines[..original_lines.len()], &original_lines[..]);

        let names: HashSet<String> = content.lines().filter_map(declared_name).collect();
        for spec in must_have() {
            assert!(names.contains(&spec.canonical_name()));
        }
    }

    #[test]
    fn reconcile_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("requirements.txt");
        reconcile(&path, &must_have()).unwrap();
        let first = std::fs::read(&path).unwrap();
        let out = reconcile(&path, &must_have()).unwrap();
        assert_eq!(out, Reconciled::default());
        assert_eq!(std::fs::read(&path).unwrap(), first);
    }
}
