//! Rule compilation and matching.

use super::{normalize_loader_name, Loader, LoaderRegistry};
use crate::assets::DEFAULT_IMAGE_NAME;
use crate::config::{RuleConfig, UseEntry};
use crate::error::Error;
use regex_lite::Regex;
use std::path::Path;
use std::sync::Arc;

/// Default inline threshold for `url` rules, in bytes.
pub const DEFAULT_URL_LIMIT: u64 = 10_000;

/// One resolved step of a loader chain.
#[derive(Debug, Clone)]
pub struct LoaderStep {
    pub name: String,
    pub options: serde_json::Value,
    pub loader: Arc<dyn Loader>,
}

/// `url` inlines small files; `file` always emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetRuleKind {
    Url,
    File,
}

/// Static-asset handling for a rule whose chain is exactly `url` or `file`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRule {
    pub kind: AssetRuleKind,
    /// Files strictly smaller than this are inlined as `data:` URIs.
    pub limit: u64,
    /// Emitted-name template.
    pub name: String,
}

impl AssetRule {
    /// Whether a file of `size` bytes is inlined.
    #[must_use]
    pub fn inlines(&self, size: u64) -> bool {
        size < self.limit
    }
}

/// What a matched rule does with a module.
#[derive(Debug, Clone)]
pub enum RuleAction {
    /// Run a loader chain (declaration order; applied last-first).
    Chain(Vec<LoaderStep>),
    /// Emit or inline the file and substitute a reference.
    Asset(AssetRule),
}

/// A compiled `module.rules` entry.
#[derive(Debug, Clone)]
pub struct Rule {
    test: Regex,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    pub action: RuleAction,
}

impl Rule {
    /// Test, include and exclude against a `/`-separated path.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.test.is_match(path)
            && (self.include.is_empty() || self.include.iter().any(|r| r.is_match(path)))
            && !self.exclude.iter().any(|r| r.is_match(path))
    }

    /// Loader names in declaration order.
    #[must_use]
    pub fn chain_names(&self) -> Vec<String> {
        match &self.action {
            RuleAction::Chain(steps) => steps.iter().map(|s| s.name.clone()).collect(),
            RuleAction::Asset(asset) => vec![match asset.kind {
                AssetRuleKind::Url => "url".to_string(),
                AssetRuleKind::File => "file".to_string(),
            }],
        }
    }
}

/// Ordered rules; the first match wins.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Compile rules, resolving every loader name against `registry`.
    pub fn compile(configs: &[RuleConfig], registry: &LoaderRegistry) -> Result<Self, Error> {
        let rules = configs
            .iter()
            .enumerate()
            .map(|(i, config)| compile_rule(i, config, registry))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// First rule matching `path`.
    #[must_use]
    pub fn find(&self, path: &Path) -> Option<&Rule> {
        let path = slash_path(path);
        self.rules.iter().find(|r| r.matches(&path))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn slash_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn compile_regex(index: usize, field: &str, pattern: &str) -> Result<Regex, Error> {
    Regex::new(pattern).map_err(|e| {
        Error::invalid(format!("module.rules[{index}].{field}: invalid pattern '{pattern}': {e}"))
    })
}

fn compile_rule(index: usize, config: &RuleConfig, registry: &LoaderRegistry) -> Result<Rule, Error> {
    if config.test.is_empty() {
        return Err(Error::invalid(format!("module.rules[{index}]: missing 'test'")));
    }
    let test = compile_regex(index, "test", &config.test)?;
    let include = config
        .include
        .to_vec()
        .iter()
        .map(|p| compile_regex(index, "include", p))
        .collect::<Result<Vec<_>, _>>()?;
    let exclude = config
        .exclude
        .to_vec()
        .iter()
        .map(|p| compile_regex(index, "exclude", p))
        .collect::<Result<Vec<_>, _>>()?;

    let entries = chain_entries(index, config)?;
    let action = if entries.len() == 1 && matches!(entries[0].0.as_str(), "url" | "file") {
        let (name, options) = &entries[0];
        RuleAction::Asset(asset_rule(name, options))
    } else {
        let steps = entries
            .into_iter()
            .map(|(name, options)| {
                if matches!(name.as_str(), "url" | "file") {
                    return Err(Error::invalid(format!(
                        "module.rules[{index}]: '{name}' loader must be the only loader in its rule"
                    )));
                }
                let loader = registry.get(&name).ok_or_else(|| {
                    Error::invalid(format!(
                        "module.rules[{index}]: unknown loader '{name}' (available: {})",
                        registry.names().join(", ")
                    ))
                })?;
                Ok(LoaderStep {
                    name,
                    options,
                    loader,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        RuleAction::Chain(steps)
    };

    Ok(Rule {
        test,
        include,
        exclude,
        action,
    })
}

/// Normalized `(name, options)` pairs in declaration order.
fn chain_entries(
    index: usize,
    config: &RuleConfig,
) -> Result<Vec<(String, serde_json::Value)>, Error> {
    let mut entries: Vec<(String, serde_json::Value)> = match (&config.loader, &config.use_) {
        (Some(_), Some(_)) => {
            return Err(Error::invalid(format!(
                "module.rules[{index}]: use either 'loader' or 'use', not both"
            )))
        }
        (Some(chain), None) => chain
            .split('!')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| (normalize_loader_name(s).to_string(), serde_json::Value::Null))
            .collect(),
        (None, Some(list)) => list
            .iter()
            .map(|entry| match entry {
                UseEntry::Name(name) => {
                    (normalize_loader_name(name).to_string(), serde_json::Value::Null)
                }
                UseEntry::Detailed { loader, options } => (
                    normalize_loader_name(loader).to_string(),
                    options.clone().unwrap_or(serde_json::Value::Null),
                ),
            })
            .collect(),
        (None, None) => Vec::new(),
    };

    if entries.is_empty() {
        return Err(Error::invalid(format!("module.rules[{index}]: empty loader chain")));
    }
    if let (Some(options), [only]) = (&config.options, entries.as_mut_slice()) {
        if only.1.is_null() {
            only.1 = options.clone();
        }
    }
    Ok(entries)
}

fn asset_rule(name: &str, options: &serde_json::Value) -> AssetRule {
    let kind = if name == "url" {
        AssetRuleKind::Url
    } else {
        AssetRuleKind::File
    };
    let default_limit = match kind {
        AssetRuleKind::Url => DEFAULT_URL_LIMIT,
        AssetRuleKind::File => 0,
    };
    AssetRule {
        kind,
        limit: options
            .get("limit")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(default_limit),
        name: options
            .get("name")
            .and_then(serde_json::Value::as_str)
            .unwrap_or(DEFAULT_IMAGE_NAME)
            .to_string(),
    }
}
