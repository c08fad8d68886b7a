//! Dependency scanner.
//!
//! Finds module references in transformed output without full parsing:
//! `import`/`export … from`, `require()`, `import()` in scripts and
//! `@import`/`url()` in stylesheets. Results carry byte ranges so the
//! compiler can rewrite references in place.

use regex_lite::Regex;
use std::collections::HashSet;
use std::ops::Range;
use std::sync::OnceLock;

/// How a dependency was referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    /// `import … from '…'`, `import '…'`, `export … from '…'`.
    Import,
    /// `require('…')`.
    Require,
    /// `import('…')`.
    Dynamic,
    /// CSS `@import`.
    CssImport,
    /// CSS `url(…)`.
    CssUrl,
}

/// A reference found in source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub specifier: String,
    pub kind: DependencyKind,
    /// Byte range of the specifier text.
    pub span: Range<usize>,
    /// Byte range of the whole statement (`@import …;`) or call.
    pub statement: Range<usize>,
}

fn static_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?m)(?:^|[^.\w$])(?:import|export)\s*(?:[\w$*{}\s,]+?\s*from\s*)?['"]([^'"\n]+)['"]"#,
        )
        .unwrap_or_else(|e| unreachable!("static import pattern: {e}"))
    })
}

fn call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?:^|[^.\w$])(require|import)\s*\(\s*['"]([^'"\n]+)['"]\s*\)"#)
            .unwrap_or_else(|e| unreachable!("call pattern: {e}"))
    })
}

fn css_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"@import\s+(?:url\(\s*)?\\?['"]?([^'"\\\s;)]+)\\?['"]?\s*\)?[^;]*;"#)
            .unwrap_or_else(|e| unreachable!("css import pattern: {e}"))
    })
}

fn css_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"url\(\s*(?:\\?['"])?([^'"\\)\s]+)(?:\\?['"])?\s*\)"#)
            .unwrap_or_else(|e| unreachable!("css url pattern: {e}"))
    })
}

/// References that never name a module.
fn is_external(specifier: &str) -> bool {
    specifier.starts_with("data:")
        || specifier.starts_with("http:")
        || specifier.starts_with("https:")
        || specifier.starts_with("//")
        || specifier.starts_with('#')
}

/// Scan script output. Deduplicated by specifier, in first-appearance order.
#[must_use]
pub fn scan_script(source: &str) -> Vec<Dependency> {
    let mut found = Vec::new();

    for caps in static_import_re().captures_iter(source) {
        if let (Some(whole), Some(spec)) = (caps.get(0), caps.get(1)) {
            found.push(Dependency {
                specifier: spec.as_str().to_string(),
                kind: DependencyKind::Import,
                span: spec.range(),
                statement: whole.range(),
            });
        }
    }
    for caps in call_re().captures_iter(source) {
        if let (Some(whole), Some(callee), Some(spec)) = (caps.get(0), caps.get(1), caps.get(2)) {
            let kind = if callee.as_str() == "require" {
                DependencyKind::Require
            } else {
                DependencyKind::Dynamic
            };
            found.push(Dependency {
                specifier: spec.as_str().to_string(),
                kind,
                span: spec.range(),
                statement: whole.range(),
            });
        }
    }

    finish(found)
}

/// Scan stylesheet text (plain CSS, or CSS embedded in a script string).
///
/// Every `url()` occurrence is returned, since each one is rewritten.
#[must_use]
pub fn scan_style(source: &str) -> Vec<Dependency> {
    let mut found = Vec::new();

    for caps in css_import_re().captures_iter(source) {
        if let (Some(whole), Some(spec)) = (caps.get(0), caps.get(1)) {
            found.push(Dependency {
                specifier: spec.as_str().to_string(),
                kind: DependencyKind::CssImport,
                span: spec.range(),
                statement: whole.range(),
            });
        }
    }
    let imports: Vec<Range<usize>> = found.iter().map(|d| d.statement.clone()).collect();
    for caps in css_url_re().captures_iter(source) {
        if let (Some(whole), Some(spec)) = (caps.get(0), caps.get(1)) {
            // url() inside an @import was already taken
            if imports.iter().any(|r| r.contains(&whole.start())) {
                continue;
            }
            found.push(Dependency {
                specifier: spec.as_str().to_string(),
                kind: DependencyKind::CssUrl,
                span: spec.range(),
                statement: whole.range(),
            });
        }
    }

    found.retain(|d| !is_external(&d.specifier));
    found.sort_by_key(|d| d.span.start);
    found
}

fn finish(mut found: Vec<Dependency>) -> Vec<Dependency> {
    found.retain(|d| !is_external(&d.specifier));
    found.sort_by_key(|d| d.span.start);
    let mut seen = HashSet::new();
    found.retain(|d| seen.insert(d.specifier.clone()));
    found
}

/// Apply `(range, replacement)` edits to `source`. Ranges must not overlap.
#[must_use]
pub fn rewrite(source: &str, mut edits: Vec<(Range<usize>, String)>) -> String {
    edits.sort_by_key(|(r, _)| std::cmp::Reverse(r.start));
    let mut out = source.to_string();
    for (range, replacement) in edits {
        out.replace_range(range, &replacement);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(deps: &[Dependency]) -> Vec<&str> {
        deps.iter().map(|d| d.specifier.as_str()).collect()
    }

    #[test]
    fn test_scan_script_forms() {
        let src = r#"
import Vue from 'vue'
import './styles/app.scss';
import { a, b as c } from "@/util";
export * from './reexport';
export { x } from "./x";
const lazy = () => import('./lazy');
const data = require('./data.json');
"#;
        let deps = scan_script(src);
        assert_eq!(
            specs(&deps),
            vec![
                "vue",
                "./styles/app.scss",
                "@/util",
                "./reexport",
                "./x",
                "./lazy",
                "./data.json"
            ]
        );
        assert_eq!(deps[5].kind, DependencyKind::Dynamic);
        assert_eq!(deps[6].kind, DependencyKind::Require);
    }

    #[test]
    fn test_scan_script_ignores_member_calls_and_dedups() {
        let src = "foo.require('./no'); require('./a'); require('./a');";
        assert_eq!(specs(&scan_script(src)), vec!["./a"]);
    }

    #[test]
    fn test_scan_style() {
        let src = r#"@import "./base.css";
.logo { background: url(./logo.png) no-repeat; }
.icon { background: url('../img/icon.svg'); }
.x { background: url(data:image/png;base64,AAAA); }
.y { background: url("https://cdn.example.com/a.png"); }
.f { src: url(#frag); }"#;
        let deps = scan_style(src);
        assert_eq!(specs(&deps), vec!["./base.css", "./logo.png", "../img/icon.svg"]);
        assert_eq!(deps[0].kind, DependencyKind::CssImport);
        assert_eq!(&src[deps[0].statement.clone()], "@import \"./base.css\";");
        assert_eq!(&src[deps[1].span.clone()], "./logo.png");
    }

    #[test]
    fn test_scan_style_inside_script_string() {
        let src = r"var css = '.a { background: url(\'./a.png\'); }\n.b { background: url(./a.png); }';";
        let deps = scan_style(src);
        assert_eq!(specs(&deps), vec!["./a.png", "./a.png"]);
    }

    #[test]
    fn test_rewrite_edits_from_the_end() {
        let src = "url(./a.png) url(./b.png)";
        let deps = scan_style(src);
        let edits = deps
            .iter()
            .map(|d| (d.span.clone(), format!("/img/{}", &d.specifier[2..])))
            .collect();
        assert_eq!(rewrite(src, edits), "url(/img/a.png) url(/img/b.png)");
    }
}
