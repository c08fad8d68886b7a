//! Error reporter.
//!
//! Aggregates compilation diagnostics, classifies severity and produces the
//! human summary, the `--json` payload and the single desktop notification
//! for an error batch.

use crate::loader::CompileError;
use crate::plugin::PluginError;
use crate::resolve::ResolveError;
use serde::Serialize;
use std::fmt::Write as _;

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Where a diagnostic came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticKind {
    /// A specifier could not be resolved.
    Resolve,
    /// A loader step failed or warned.
    Compile,
    /// A plugin hook failed.
    Plugin,
    /// Asset naming problems.
    Asset,
    /// Asset size hints.
    Performance,
}

/// A single compilation diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    /// One-line headline.
    pub title: String,
    pub message: String,
    /// Originating file, possibly prefixed by a `!`-separated loader request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Diagnostic {
    #[must_use]
    pub fn error(kind: DiagnosticKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Error,
            title: title.into(),
            message: message.into(),
            file: None,
        }
    }

    #[must_use]
    pub fn warning(
        kind: DiagnosticKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(kind, title, message)
        }
    }

    #[must_use]
    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Diagnostic for an unresolvable import in `importer`.
    #[must_use]
    pub fn from_resolve(err: &ResolveError, importer: &str) -> Self {
        let searched = err
            .searched_paths
            .iter()
            .map(|p| format!("  {}", p.display()))
            .collect::<Vec<_>>()
            .join("\n");
        Self::error(
            DiagnosticKind::Resolve,
            format!("Module not found: '{}'", err.specifier),
            format!("Can't resolve '{}'. Searched:\n{searched}", err.specifier),
        )
        .with_file(importer)
    }

    /// Diagnostic for a failed loader step; `request` is the `!`-joined chain.
    #[must_use]
    pub fn from_compile(err: &CompileError, request: &str) -> Self {
        Self::error(
            DiagnosticKind::Compile,
            format!("Module build failed ({})", err.step),
            err.message.clone(),
        )
        .with_file(request)
    }

    #[must_use]
    pub fn from_plugin(err: &PluginError) -> Self {
        Self::error(
            DiagnosticKind::Plugin,
            format!("Plugin '{}' failed in {}", err.plugin, err.hook),
            err.message.clone(),
        )
    }
}

/// Counts plus the representative error.
#[derive(Debug, Clone, Copy)]
pub struct Summary<'a> {
    pub errors: usize,
    pub warnings: usize,
    /// First error in the batch, if any.
    pub first_error: Option<&'a Diagnostic>,
}

impl Summary<'_> {
    /// A batch without errors is servable regardless of warnings.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors == 0
    }
}

/// Count errors and warnings.
#[must_use]
pub fn summarize(diagnostics: &[Diagnostic]) -> Summary<'_> {
    let errors = diagnostics.iter().filter(|d| d.is_error()).count();
    Summary {
        errors,
        warnings: diagnostics.len() - errors,
        first_error: diagnostics.iter().find(|d| d.is_error()),
    }
}

/// Strip a `!`-separated loader prefix: `style!css!src/a.css` → `src/a.css`.
#[must_use]
pub fn strip_loader_prefix(file: &str) -> &str {
    file.rsplit_once('!').map_or(file, |(_, path)| path)
}

/// A desktop notification payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
}

/// The one notification for an error batch; `None` for warning-only batches.
#[must_use]
pub fn notification_for(project: &str, diagnostics: &[Diagnostic]) -> Option<Notification> {
    let first = summarize(diagnostics).first_error?;
    Some(Notification {
        title: project.to_string(),
        message: format!("error: {}", first.title),
        subtitle: first.file.as_deref().map(|f| strip_loader_prefix(f).to_string()),
    })
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

/// Multi-line human summary: counts, then each diagnostic with its file.
#[must_use]
pub fn format_human(diagnostics: &[Diagnostic]) -> String {
    let summary = summarize(diagnostics);
    let mut out = format!(
        "{}, {}\n",
        plural(summary.errors, "error"),
        plural(summary.warnings, "warning")
    );
    for d in diagnostics {
        let label = match d.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        let _ = write!(out, "\n{label}: {}", d.title);
        if let Some(file) = &d.file {
            let _ = write!(out, "\n  in {file}");
        }
        for line in d.message.lines() {
            let _ = write!(out, "\n  {line}");
        }
        out.push('\n');
    }
    out
}

/// The `--json` report.
#[derive(Debug, Serialize)]
pub struct JsonReport<'a> {
    pub ok: bool,
    pub errors: usize,
    pub warnings: usize,
    pub diagnostics: &'a [Diagnostic],
}

#[must_use]
pub fn json_report(diagnostics: &[Diagnostic]) -> JsonReport<'_> {
    let summary = summarize(diagnostics);
    JsonReport {
        ok: summary.is_ok(),
        errors: summary.errors,
        warnings: summary.warnings,
        diagnostics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn batch() -> Vec<Diagnostic> {
        vec![
            Diagnostic::warning(DiagnosticKind::Performance, "asset size limit", "main.js is big"),
            Diagnostic::error(DiagnosticKind::Compile, "Module build failed (sass)", "bad")
                .with_file("style!css!sass!src/app.scss"),
            Diagnostic::error(DiagnosticKind::Resolve, "Module not found: './x'", "nope")
                .with_file("src/main.ts"),
        ]
    }

    #[test]
    fn test_summarize_counts() {
        let diags = batch();
        let summary = summarize(&diags);
        assert_eq!(summary.errors, 2);
        assert_eq!(summary.warnings, 1);
        assert!(!summary.is_ok());
        assert_eq!(summary.first_error.unwrap().title, "Module build failed (sass)");
    }

    #[test]
    fn test_warnings_only_is_ok() {
        let diags = vec![Diagnostic::warning(DiagnosticKind::Compile, "w", "m")];
        assert!(summarize(&diags).is_ok());
        assert!(notification_for("app", &diags).is_none());
    }

    #[test]
    fn test_notification_uses_first_error() {
        let n = notification_for("my-app", &batch()).unwrap();
        assert_eq!(n.title, "my-app");
        assert_eq!(n.message, "error: Module build failed (sass)");
        assert_eq!(n.subtitle.as_deref(), Some("src/app.scss"));
    }

    #[test]
    fn test_strip_loader_prefix() {
        assert_eq!(strip_loader_prefix("a!b!src/x.css"), "src/x.css");
        assert_eq!(strip_loader_prefix("src/x.css"), "src/x.css");
    }

    #[test]
    fn test_format_human() {
        let text = format_human(&batch());
        assert!(text.starts_with("2 errors, 1 warning\n"));
        assert!(text.contains("error: Module not found: './x'\n  in src/main.ts\n  nope"));
    }

    #[test]
    fn test_json_report_shape() {
        let diags = batch();
        let value = serde_json::to_value(json_report(&diags)).unwrap();
        assert_eq!(value["ok"], false);
        assert_eq!(value["errors"], 2);
        assert_eq!(value["diagnostics"][0]["severity"], "warning");
        assert_eq!(value["diagnostics"][0]["kind"], "performance");
        assert!(value["diagnostics"][0].get("file").is_none());
    }

    #[test]
    fn test_from_resolve_lists_paths() {
        let err = ResolveError {
            specifier: "./x".to_string(),
            searched_paths: vec![PathBuf::from("/p/x"), PathBuf::from("/p/x.js")],
        };
        let d = Diagnostic::from_resolve(&err, "src/main.ts");
        assert!(d.message.contains("/p/x.js"));
        assert_eq!(d.file.as_deref(), Some("src/main.ts"));
    }
}
