//! Built-in loaders: `sass`, `css`, `style`, `json`, `raw`.

use super::{Loader, LoaderContext, LoaderError, OutputKind};
use lightningcss::printer::PrinterOptions;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, StyleSheet};

/// Sass/SCSS to CSS using grass.
///
/// The file's directory is added as a load path so relative `@import`s work.
/// Options: `minify` (compressed output), `includePaths` (extra load paths,
/// relative to the project root).
#[derive(Debug, Clone, Copy, Default)]
pub struct SassLoader;

impl Loader for SassLoader {
    fn name(&self) -> &str {
        "sass"
    }

    fn produces(&self) -> Option<OutputKind> {
        Some(OutputKind::Stylesheet)
    }

    fn transform(&self, input: &str, ctx: &mut LoaderContext<'_>) -> Result<String, LoaderError> {
        let style = if ctx.flag("minify") {
            grass::OutputStyle::Compressed
        } else {
            grass::OutputStyle::Expanded
        };
        let indented = ctx
            .resource
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("sass"));

        let include_paths: Vec<_> = ctx
            .options
            .get("includePaths")
            .and_then(serde_json::Value::as_array)
            .map(|paths| {
                paths
                    .iter()
                    .filter_map(serde_json::Value::as_str)
                    .map(|p| ctx.root.join(p))
                    .collect()
            })
            .unwrap_or_default();

        let mut options = grass::Options::default().style(style);
        if indented {
            options = options.input_syntax(grass::InputSyntax::Sass);
        }
        if let Some(parent) = ctx.resource.parent() {
            options = options.load_path(parent);
        }
        for path in &include_paths {
            options = options.load_path(path);
        }

        grass::from_string(input.to_string(), &options).map_err(|e| LoaderError::new(e.to_string()))
    }
}

/// CSS parse and print through lightningcss. Option: `minify`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CssLoader;

impl Loader for CssLoader {
    fn name(&self) -> &str {
        "css"
    }

    fn produces(&self) -> Option<OutputKind> {
        Some(OutputKind::Stylesheet)
    }

    fn transform(&self, input: &str, ctx: &mut LoaderContext<'_>) -> Result<String, LoaderError> {
        let minify = ctx.flag("minify");
        let filename = ctx.resource.display().to_string();

        let mut stylesheet = StyleSheet::parse(
            input,
            ParserOptions {
                filename: filename.clone(),
                ..ParserOptions::default()
            },
        )
        .map_err(|e| LoaderError::new(format!("CSS parse error in {filename}: {e}")))?;

        if minify {
            stylesheet
                .minify(MinifyOptions::default())
                .map_err(|e| LoaderError::new(format!("CSS minify error: {e}")))?;
        }

        let output = stylesheet
            .to_css(PrinterOptions {
                minify,
                ..PrinterOptions::default()
            })
            .map_err(|e| LoaderError::new(format!("CSS print error: {e}")))?;
        Ok(output.code)
    }
}

/// Wraps CSS into a script that injects a `<style>` element.
#[derive(Debug, Clone, Copy, Default)]
pub struct StyleLoader;

impl Loader for StyleLoader {
    fn name(&self) -> &str {
        "style"
    }

    fn produces(&self) -> Option<OutputKind> {
        Some(OutputKind::Script)
    }

    fn transform(&self, input: &str, _ctx: &mut LoaderContext<'_>) -> Result<String, LoaderError> {
        Ok(format!(
            "var css = '{}';\n\
             var prev = document.querySelector('style[data-wirepack=\"' + module.id + '\"]');\n\
             if (prev) prev.parentNode.removeChild(prev);\n\
             var style = document.createElement('style');\n\
             style.setAttribute('data-wirepack', module.id);\n\
             style.textContent = css;\n\
             document.head.appendChild(style);\n\
             module.exports = css;\n",
            js_single_quote(input)
        ))
    }
}

/// Validates JSON and exports it.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLoader;

impl Loader for JsonLoader {
    fn name(&self) -> &str {
        "json"
    }

    fn produces(&self) -> Option<OutputKind> {
        Some(OutputKind::Script)
    }

    fn transform(&self, input: &str, _ctx: &mut LoaderContext<'_>) -> Result<String, LoaderError> {
        let value: serde_json::Value =
            serde_json::from_str(input).map_err(|e| LoaderError::new(format!("invalid JSON: {e}")))?;
        let compact =
            serde_json::to_string(&value).map_err(|e| LoaderError::new(e.to_string()))?;
        Ok(format!("module.exports = {compact};\n"))
    }
}

/// Exports the source text as a string.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawLoader;

impl Loader for RawLoader {
    fn name(&self) -> &str {
        "raw"
    }

    fn produces(&self) -> Option<OutputKind> {
        Some(OutputKind::Script)
    }

    fn transform(&self, input: &str, _ctx: &mut LoaderContext<'_>) -> Result<String, LoaderError> {
        Ok(format!("module.exports = '{}';\n", js_single_quote(input)))
    }
}

/// Escape text for a single-quoted JS string literal.
///
/// Only `\`, `'` and line breaks are escaped, so `url("...")` references stay
/// visible to the dependency scanner.
fn js_single_quote(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 8);
    for c in input.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            _ => out.push(c),
        }
    }
    out
}
