//! Entry document generation.

use crate::compilation::Compilation;
use crate::config::HtmlPluginConfig;
use crate::plugin::{EmitHook, HookContext, HookFile, HookResult, PluginError};
use std::sync::Arc;
use wirepack_util::fs::read_to_string_lossy;

/// Path the dev server serves the live-update client from.
pub const CLIENT_PATH: &str = "/__wirepack/client.js";

/// Used when the configured template file does not exist.
pub const FALLBACK_TEMPLATE: &str = "<!DOCTYPE html>
<html>
  <head>
    <meta charset=\"utf-8\">
    <title>{{title}}</title>
  </head>
  <body>
    <div id=\"app\"></div>
  </body>
</html>
";

/// Tags to place into the entry document, already in output order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InjectedTags {
    pub title: String,
    /// `<script>` and `<link>` elements, one per line.
    pub tags: Vec<String>,
}

/// Renders the entry document from template text.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, injected: &InjectedTags) -> Result<String, String>;
}

/// Replaces `{{title}}` and inserts tags before `</body>` (appended when the
/// template has no body close).
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticRenderer;

impl TemplateRenderer for StaticRenderer {
    fn render(&self, template: &str, injected: &InjectedTags) -> Result<String, String> {
        let text = template.replace("{{title}}", &injected.title);
        if injected.tags.is_empty() {
            return Ok(text);
        }
        let block: String = injected
            .tags
            .iter()
            .map(|t| format!("    {t}\n"))
            .collect();
        Ok(match text.rfind("</body>") {
            Some(at) => {
                let line_start = text[..at].rfind('\n').map_or(0, |i| i + 1);
                let indent_only = text[line_start..at].trim().is_empty();
                let insert_at = if indent_only { line_start } else { at };
                format!("{}{block}{}", &text[..insert_at], &text[insert_at..])
            }
            None => format!("{text}\n{block}"),
        })
    }
}

/// Emits the entry document for each successful compilation.
pub struct HtmlPlugin {
    config: HtmlPluginConfig,
    renderer: Arc<dyn TemplateRenderer>,
}

impl HtmlPlugin {
    #[must_use]
    pub fn new(config: HtmlPluginConfig) -> Self {
        Self::with_renderer(config, Arc::new(StaticRenderer))
    }

    #[must_use]
    pub fn with_renderer(config: HtmlPluginConfig, renderer: Arc<dyn TemplateRenderer>) -> Self {
        Self { config, renderer }
    }

    /// Tags for the compilation's entry assets: the live-update client first
    /// (dev with hot), then scripts, then stylesheets, each sorted by name.
    #[must_use]
    pub fn tags(&self, compilation: &Compilation, ctx: &HookContext) -> Vec<String> {
        let mut tags = Vec::new();
        if !self.config.inject {
            return tags;
        }
        if ctx.dev && ctx.hot {
            tags.push(format!("<script src=\"{CLIENT_PATH}\"></script>"));
        }
        let mut scripts: Vec<&String> = compilation
            .entry_assets
            .iter()
            .filter(|a| a.ends_with(".js"))
            .collect();
        let mut styles: Vec<&String> = compilation
            .entry_assets
            .iter()
            .filter(|a| a.ends_with(".css"))
            .collect();
        scripts.sort();
        styles.sort();
        tags.extend(scripts.into_iter().map(|s| {
            format!("<script src=\"{}\"></script>", ctx.output.public_url(s))
        }));
        tags.extend(styles.into_iter().map(|s| {
            format!("<link rel=\"stylesheet\" href=\"{}\">", ctx.output.public_url(s))
        }));
        tags
    }
}

impl std::fmt::Debug for HtmlPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HtmlPlugin")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EmitHook for HtmlPlugin {
    fn name(&self) -> &str {
        "html"
    }

    fn emit(&self, compilation: &Compilation, ctx: &HookContext) -> HookResult<Vec<HookFile>> {
        let path = ctx.root.join(&self.config.template);
        let template = match read_to_string_lossy(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(template = %path.display(), "using built-in template");
                FALLBACK_TEMPLATE.to_string()
            }
            Err(e) => {
                return Err(PluginError::new(
                    "html",
                    "emit",
                    format!("cannot read {}: {e}", path.display()),
                ))
            }
        };
        let injected = InjectedTags {
            title: ctx.project_name.clone(),
            tags: self.tags(compilation, ctx),
        };
        let html = self
            .renderer
            .render(&template, &injected)
            .map_err(|e| PluginError::new("html", "emit", e))?;
        Ok(vec![HookFile {
            name: self.config.filename.clone(),
            bytes: html.into_bytes(),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputConfig;
    use tempfile::tempdir;

    fn ctx(root: &std::path::Path, dev: bool) -> HookContext {
        HookContext {
            root: root.to_path_buf(),
            project_name: "demo".to_string(),
            output: OutputConfig::default(),
            dev,
            hot: true,
        }
    }

    fn compilation() -> Compilation {
        Compilation {
            entry_assets: vec!["main.js".to_string(), "main.css".to_string(), "a.js".to_string()],
            ..Compilation::default()
        }
    }

    #[test]
    fn test_tag_order() {
        let dir = tempdir().unwrap();
        let plugin = HtmlPlugin::new(HtmlPluginConfig::default());
        let tags = plugin.tags(&compilation(), &ctx(dir.path(), true));
        assert_eq!(
            tags,
            vec![
                "<script src=\"/__wirepack/client.js\"></script>",
                "<script src=\"/a.js\"></script>",
                "<script src=\"/main.js\"></script>",
                "<link rel=\"stylesheet\" href=\"/main.css\">",
            ]
        );
        let build_tags = plugin.tags(&compilation(), &ctx(dir.path(), false));
        assert_eq!(build_tags.len(), 3);
    }

    #[test]
    fn test_fallback_template_is_deterministic() {
        let dir = tempdir().unwrap();
        let plugin = HtmlPlugin::new(HtmlPluginConfig::default());
        let first = plugin.emit(&compilation(), &ctx(dir.path(), false)).unwrap();
        let second = plugin.emit(&compilation(), &ctx(dir.path(), false)).unwrap();
        assert_eq!(first, second);
        let html = String::from_utf8(first[0].bytes.clone()).unwrap();
        assert_eq!(first[0].name, "index.html");
        assert!(html.contains("<title>demo</title>"));
        let script = html.find("/main.js").unwrap();
        let body_end = html.find("</body>").unwrap();
        assert!(script < body_end);
    }

    #[test]
    fn test_template_file_is_used() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("index.html"),
            "<html><body><p>hi</p></body></html>",
        )
        .unwrap();
        let plugin = HtmlPlugin::new(HtmlPluginConfig::default());
        let files = plugin.emit(&compilation(), &ctx(dir.path(), false)).unwrap();
        let html = String::from_utf8(files[0].bytes.clone()).unwrap();
        assert!(html.starts_with("<html><body><p>hi</p>"));
        assert!(html.ends_with("</body></html>"));
        assert!(html.contains("<script src=\"/main.js\"></script>"));
    }

    #[test]
    fn test_no_inject() {
        let dir = tempdir().unwrap();
        let plugin = HtmlPlugin::new(HtmlPluginConfig {
            inject: false,
            ..HtmlPluginConfig::default()
        });
        assert!(plugin.tags(&compilation(), &ctx(dir.path(), true)).is_empty());
    }
}
