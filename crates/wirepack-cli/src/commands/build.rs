//! `wirepack build` command implementation.
//!
//! One full build; on success every emitted asset is written under the
//! output directory. Diagnostics go to stderr, or to stdout as one JSON
//! object with `--json`.

use super::Project;
use crate::notifier::DesktopNotifier;
use miette::{IntoDiagnostic, Result};
use std::path::Path;
use std::time::Instant;
use wirepack_core::report::{format_human, json_report};
use wirepack_core::Compilation;
use wirepack_util::fs::atomic_write;

/// Build command action.
#[derive(Debug, Clone)]
pub struct BuildAction {
    pub project: Project,
    pub json: bool,
    pub quiet: bool,
}

/// Run a build. Returns `false` when the compilation had errors.
pub fn run(action: BuildAction) -> Result<bool> {
    let start = Instant::now();
    let project = &action.project;
    let compiler = project.compiler(false, DesktopNotifier::detect(action.quiet))?;
    let compilation = compiler.build();

    let ok = !compilation.has_errors();
    if ok {
        let written = write_assets(&compilation, &project.output_dir())?;
        tracing::info!(
            files = written,
            out = %project.output_dir().display(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "assets written"
        );
    }

    if action.json {
        let report = json_report(&compilation.diagnostics);
        println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);
    } else if !action.quiet && !compilation.diagnostics.is_empty() {
        eprint!("{}", format_human(&compilation.diagnostics));
    }
    Ok(ok)
}

/// Write every emitted asset under `out_dir`. Returns the number written.
pub fn write_assets(compilation: &Compilation, out_dir: &Path) -> Result<usize> {
    for (name, asset) in &compilation.assets {
        atomic_write(&out_dir.join(name), &asset.bytes).into_diagnostic()?;
    }
    Ok(compilation.assets.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_build_writes_assets() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(
            dir.path().join("wirepack.config.json"),
            r#"{ "entry": "./src/main.js", "plugins": { "notify": false } }"#,
        )
        .unwrap();
        fs::write(dir.path().join("src/main.js"), "module.exports = 1;").unwrap();

        let project = Project::load(dir.path(), None).unwrap();
        let ok = run(BuildAction {
            project,
            json: false,
            quiet: true,
        })
        .unwrap();
        assert!(ok);
        assert!(dir.path().join("dist/main.js").is_file());
        let html = fs::read_to_string(dir.path().join("dist/index.html")).unwrap();
        assert!(html.contains("<script src=\"/main.js\"></script>"));
    }

    #[test]
    fn test_build_with_errors_writes_nothing() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(
            dir.path().join("wirepack.config.json"),
            r#"{ "entry": "./src/main.js", "plugins": { "notify": false } }"#,
        )
        .unwrap();
        fs::write(dir.path().join("src/main.js"), "require('./nope');").unwrap();

        let project = Project::load(dir.path(), None).unwrap();
        let ok = run(BuildAction {
            project,
            json: false,
            quiet: true,
        })
        .unwrap();
        assert!(!ok);
        assert!(!dir.path().join("dist").exists());
    }

    #[test]
    fn test_missing_entry_is_startup_error() {
        let dir = tempdir().unwrap();
        let project = Project::load(dir.path(), None).unwrap();
        let err = run(BuildAction {
            project,
            json: false,
            quiet: true,
        })
        .unwrap_err();
        assert!(err.to_string().contains("Cannot read entry './src/main.ts'"));
    }
}
