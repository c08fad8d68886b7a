//! Static directory copy.

use crate::config::CopyPattern;
use crate::plugin::{BeforeRunHook, HookContext, HookFile, HookResult, PluginError};
use wirepack_util::fs::collect_tree;

/// Stages static directories verbatim on cold start.
#[derive(Debug, Clone)]
pub struct CopyPlugin {
    patterns: Vec<CopyPattern>,
}

impl CopyPlugin {
    #[must_use]
    pub fn new(patterns: Vec<CopyPattern>) -> Self {
        Self { patterns }
    }
}

impl BeforeRunHook for CopyPlugin {
    fn name(&self) -> &str {
        "copy"
    }

    fn before_run(&self, ctx: &HookContext) -> HookResult<Vec<HookFile>> {
        let mut files = Vec::new();
        for pattern in &self.patterns {
            let from = ctx.root.join(&pattern.from);
            if !from.is_dir() {
                tracing::debug!(from = %from.display(), "copy source missing, skipped");
                continue;
            }
            let tree = collect_tree(&from, &pattern.ignore).map_err(|e| {
                PluginError::new("copy", "before-run", format!("{}: {e}", from.display()))
            })?;
            let prefix = pattern.to.trim_matches('/');
            files.extend(tree.into_iter().map(|f| HookFile {
                name: if prefix.is_empty() {
                    f.relative
                } else {
                    format!("{prefix}/{}", f.relative)
                },
                bytes: f.bytes,
            }));
        }
        tracing::debug!(count = files.len(), "static files staged");
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputConfig;
    use std::fs;
    use tempfile::tempdir;

    fn ctx(root: &std::path::Path) -> HookContext {
        HookContext {
            root: root.to_path_buf(),
            project_name: "demo".to_string(),
            output: OutputConfig::default(),
            dev: false,
            hot: false,
        }
    }

    #[test]
    fn test_copies_tree_skipping_dotfiles() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("static/fonts")).unwrap();
        fs::write(dir.path().join("static/robots.txt"), "ok").unwrap();
        fs::write(dir.path().join("static/fonts/a.woff"), [1u8, 2]).unwrap();
        fs::write(dir.path().join("static/.gitkeep"), "").unwrap();

        let plugin = CopyPlugin::new(vec![CopyPattern::default()]);
        let files = plugin.before_run(&ctx(dir.path())).unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["static/fonts/a.woff", "static/robots.txt"]);
        assert_eq!(files[1].bytes, b"ok");
    }

    #[test]
    fn test_missing_source_is_empty() {
        let dir = tempdir().unwrap();
        let plugin = CopyPlugin::new(vec![CopyPattern::default()]);
        assert!(plugin.before_run(&ctx(dir.path())).unwrap().is_empty());
    }

    #[test]
    fn test_bad_ignore_pattern_fails() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("static")).unwrap();
        let plugin = CopyPlugin::new(vec![CopyPattern {
            ignore: vec!["[".to_string()],
            ..CopyPattern::default()
        }]);
        let err = plugin.before_run(&ctx(dir.path())).unwrap_err();
        assert_eq!(err.plugin, "copy");
    }
}
