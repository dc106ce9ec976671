//! Starter project files.
//!
//! Everything here is create-if-absent. A file that exists is never opened
//! for writing, so user edits survive any number of re-runs.

use crate::config::StackConfig;
use crate::error::Result;
use crate::io::{ensure_dir, ensure_gitignore_entry, write_if_missing};
use std::path::{Path, PathBuf};

/// Relative path → file content.
pub type FileMap = Vec<(PathBuf, String)>;

/// Write each file in `files` under `root` if it does not exist yet.
///
/// Returns exactly the paths that were created, relative to `root`. A repeat
/// run returns an empty list.
pub fn materialize(root: &Path, files: &[(PathBuf, String)]) -> Result<Vec<PathBuf>> {
    let mut created = Vec::new();
    for (rel, content) in files {
        if write_if_missing(&root.join(rel), content.as_bytes())? {
            tracing::info!(path = %rel.display(), "created");
            created.push(rel.clone());
        }
    }
    Ok(created)
}

/// Create the empty skeleton directories. Returns those that were new.
pub fn ensure_dirs(root: &Path, cfg: &StackConfig) -> Result<Vec<PathBuf>> {
    let mut created = Vec::new();
    for rel in skeleton_dirs(cfg) {
        if ensure_dir(&root.join(&rel))? {
            created.push(rel);
        }
    }
    Ok(created)
}

fn skeleton_dirs(cfg: &StackConfig) -> Vec<PathBuf> {
    let backend = &cfg.backend.dir;
    let frontend = &cfg.frontend.dir;
    vec![
        backend.join("app/routes"),
        backend.join("app/models"),
        frontend.join("src/components"),
        frontend.join("public"),
        PathBuf::from("tests/backend"),
        PathBuf::from("tests/frontend"),
        PathBuf::from("config"),
        PathBuf::from("logs"),
    ]
}

/// Append the venv and run directories to `.gitignore` when missing.
pub fn ensure_gitignore(root: &Path, cfg: &StackConfig) -> Result<Vec<String>> {
    let entries = [
        format!("{}/", cfg.backend.dir.join(&cfg.backend.venv_dir).display()),
        format!("{}/", cfg.supervisor.run_dir.display()),
        format!("{}/node_modules/", cfg.frontend.dir.display()),
    ];
    let mut added = Vec::new();
    for entry in entries {
        let entry = entry.replace('\\', "/");
        if ensure_gitignore_entry(root, &entry)? {
            added.push(entry);
        }
    }
    Ok(added)
}

// ---------------------------------------------------------------------------
// Default file map
// ---------------------------------------------------------------------------

const APP_INIT: &str = "\"\"\"Backend application package.\"\"\"\n";

const APP_MAIN: &str = r#"from flask import Flask, jsonify
from flask_cors import CORS


def create_app():
    app = Flask(__name__)
    CORS(app, resources={r"/api/*": {"origins": "*"}})

    @app.get("/api/health")
    def health():
        return jsonify({"status": "ok", "service": "backend"})

    return app
"#;

const INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="UTF-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1.0" />
    <title>App</title>
  </head>
  <body>
    <div id="root"></div>
    <script type="module" src="/src/main.jsx"></script>
  </body>
</html>
"#;

const MAIN_JSX: &str = r#"import React from 'react'
import ReactDOM from 'react-dom/client'
import App from './App.jsx'

ReactDOM.createRoot(document.getElementById('root')).render(
  <React.StrictMode>
    <App />
  </React.StrictMode>,
)
"#;

const APP_JSX: &str = r#"import { useEffect, useState } from 'react'

export default function App() {
  const [health, setHealth] = useState('checking...')

  useEffect(() => {
    fetch('/api/health')
      .then((r) => r.json())
      .then((body) => setHealth(body.status))
      .catch(() => setHealth('unreachable'))
  }, [])

  return (
    <main>
      <h1>Flask + Vite</h1>
      <p>Backend: {health}</p>
    </main>
  )
}
"#;

fn package_json() -> String {
    let manifest = serde_json::json!({
        "name": "frontend",
        "private": true,
        "version": "0.1.0",
        "type": "module",
        "scripts": {
            "dev": "vite",
            "build": "vite build",
            "preview": "vite preview"
        },
        "dependencies": {
            "react": "^18.3.1",
            "react-dom": "^18.3.1"
        },
        "devDependencies": {
            "@vitejs/plugin-react": "^4.3.1",
            "vite": "^5.4.0"
        }
    });
    // to_string_pretty on a Value cannot fail.
    let mut out = serde_json::to_string_pretty(&manifest).unwrap_or_default();
    out.push('\n');
    out
}

fn vite_config(cfg: &StackConfig) -> String {
    format!(
        r#"import {{ defineConfig }} from 'vite'
import react from '@vitejs/plugin-react'

export default defineConfig({{
  plugins: [react()],
  server: {{
    host: '{fe_host}',
    port: {fe_port},
    proxy: {{
      '/api': 'http://{be_host}:{be_port}',
    }},
  }},
}})
"#,
        fe_host = cfg.frontend.host,
        fe_port = cfg.frontend.port,
        be_host = cfg.backend.host,
        be_port = cfg.backend.port,
    )
}

fn env_example(cfg: &StackConfig) -> String {
    format!(
        "# Copy to .env and adjust.\nFLASK_RUN_HOST={}\nFLASK_RUN_PORT={}\nVITE_PORT={}\n",
        cfg.backend.host, cfg.backend.port, cfg.frontend.port
    )
}

/// The starter file set, with host/port values taken from `cfg`.
pub fn default_files(cfg: &StackConfig) -> FileMap {
    let backend = &cfg.backend.dir;
    let frontend = &cfg.frontend.dir;
    vec![
        (backend.join("app/__init__.py"), APP_INIT.to_string()),
        (backend.join("app/main.py"), APP_MAIN.to_string()),
        (frontend.join(&cfg.frontend.manifest), package_json()),
        (frontend.join("index.html"), INDEX_HTML.to_string()),
        (frontend.join("src/main.jsx"), MAIN_JSX.to_string()),
        (frontend.join("src/App.jsx"), APP_JSX.to_string()),
        (frontend.join("vite.config.js"), vite_config(cfg)),
        (PathBuf::from("config/.env.example"), env_example(cfg)),
        (PathBuf::from("logs/.gitkeep"), String::new()),
    ]
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ScaffoldReport {
    pub dirs: Vec<PathBuf>,
    pub files: Vec<PathBuf>,
    pub gitignore: Vec<String>,
}

/// Skeleton directories, default files, then `.gitignore` entries.
pub fn scaffold(root: &Path, cfg: &StackConfig) -> Result<ScaffoldReport> {
    Ok(ScaffoldReport {
        dirs: ensure_dirs(root, cfg)?,
        files: materialize(root, &default_files(cfg))?,
        gitignore: ensure_gitignore(root, cfg)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn materialize_returns_only_created_paths() {
        let dir = TempDir::new().unwrap();
        let files: FileMap = vec![
            (PathBuf::from("a/one.txt"), "1".into()),
            (PathBuf::from("b/c/two.txt"), "2".into()),
        ];
        let first = materialize(dir.path(), &files).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("b/c/two.txt")).unwrap(),
            "2"
        );
        assert!(materialize(dir.path(), &files).unwrap().is_empty());
    }

    #[test]
    fn existing_file_is_never_touched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backend/app/main.py");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "# mine").unwrap();

        let created = materialize(dir.path(), &default_files(&StackConfig::default())).unwrap();
        assert!(!created.contains(&PathBuf::from("backend/app/main.py")));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# mine");
    }

    #[test]
    fn scaffold_twice_creates_nothing_the_second_time() {
        let dir = TempDir::new().unwrap();
        let cfg = StackConfig::default();
        let first = scaffold(dir.path(), &cfg).unwrap();
        assert!(!first.dirs.is_empty());
        assert_eq!(first.files.len(), default_files(&cfg).len());
        assert_eq!(first.gitignore.len(), 3);

        let second = scaffold(dir.path(), &cfg).unwrap();
        assert!(second.dirs.is_empty());
        assert!(second.files.is_empty());
        assert!(second.gitignore.is_empty());
    }

    #[test]
    fn vite_config_proxies_to_backend() {
        let mut cfg = StackConfig::default();
        cfg.backend.port = 8000;
        cfg.frontend.port = 3000;
        let js = vite_config(&cfg);
        assert!(js.contains("port: 3000"));
        assert!(js.contains("'/api': 'http://127.0.0.1:8000'"));
    }

    #[test]
    fn package_json_has_dev_script() {
        let value: serde_json::Value = serde_json::from_str(&package_json()).unwrap();
        assert_eq!(value["scripts"]["dev"], "vite");
    }

    #[test]
    fn gitignore_gets_venv_and_run_dir() {
        let dir = TempDir::new().unwrap();
        ensure_gitignore(dir.path(), &StackConfig::default()).unwrap();
        let content = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert!(content.lines().any(|l| l == "backend/.venv/"));
        assert!(content.lines().any(|l| l == ".stackboot-run/"));
    }
}
