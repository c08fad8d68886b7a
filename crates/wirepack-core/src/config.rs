//! Configuration file discovery and parsing.
//!
//! Loads `wirepack.config.json` from the project root (or an explicit path).
//! Every field has a default, so an empty object (or no file at all) yields a
//! working development setup:
//!
//! ```json
//! {
//!   "entry": "./src/main.ts",
//!   "output": { "path": "dist", "publicPath": "/", "filename": "[name].js" },
//!   "resolve": { "alias": { "@": "src" }, "extensions": [".js", ".ts"] },
//!   "module": { "rules": [{ "test": "\\.scss$", "loader": "style-loader!css-loader!sass-loader" }] },
//!   "devServer": { "port": 8080, "historyApiFallback": true, "proxy": { "/api": "http://localhost:3000" } }
//! }
//! ```
//!
//! The configuration is read once at startup and never mutated afterwards.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Config file names in priority order.
const CONFIG_FILES: &[&str] = &["wirepack.config.json", ".wirepackrc.json"];

/// Default dev server port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default dev server host.
pub const DEFAULT_HOST: &str = "localhost";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    /// Project name shown in notifications (falls back to package.json `name`).
    pub name: Option<String>,
    /// Entry specifier, resolved from the project root.
    pub entry: String,
    pub output: OutputConfig,
    pub resolve: ResolveConfig,
    pub module: ModuleConfig,
    /// External toolchain loaders by name (e.g. `babel`, `ts`).
    pub loaders: BTreeMap<String, ExternalLoaderConfig>,
    pub plugins: PluginsConfig,
    pub dev_server: DevServerConfig,
    pub performance: PerformanceConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: None,
            entry: "./src/main.ts".to_string(),
            output: OutputConfig::default(),
            resolve: ResolveConfig::default(),
            module: ModuleConfig::default(),
            loaders: BTreeMap::new(),
            plugins: PluginsConfig::default(),
            dev_server: DevServerConfig::default(),
            performance: PerformanceConfig::default(),
        }
    }
}

/// Output location and naming.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputConfig {
    /// Output directory, relative to the project root.
    pub path: PathBuf,
    /// URL prefix under which emitted assets are served.
    pub public_path: String,
    /// Script bundle name template (`[name]` is the bundle name).
    pub filename: String,
    /// Style bundle name template.
    pub css_filename: String,
    /// Bundle name substituted for `[name]`.
    pub bundle_name: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("dist"),
            public_path: "/".to_string(),
            filename: "[name].js".to_string(),
            css_filename: "[name].css".to_string(),
            bundle_name: "main".to_string(),
        }
    }
}

impl OutputConfig {
    /// Name of the emitted script bundle.
    #[must_use]
    pub fn script_name(&self) -> String {
        self.filename.replace("[name]", &self.bundle_name)
    }

    /// Name of the emitted style bundle.
    #[must_use]
    pub fn style_name(&self) -> String {
        self.css_filename.replace("[name]", &self.bundle_name)
    }

    /// Public URL for an emitted asset name.
    #[must_use]
    pub fn public_url(&self, asset: &str) -> String {
        let base = if self.public_path.ends_with('/') {
            self.public_path.clone()
        } else {
            format!("{}/", self.public_path)
        };
        format!("{base}{}", asset.trim_start_matches('/'))
    }
}

/// Resolver options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolveConfig {
    /// Specifier prefix → replacement. A key ending in `$` only matches exactly.
    ///
    /// Defaults to `@` → `./src`; a configured table replaces it.
    pub alias: BTreeMap<String, String>,
    /// Extensions probed, in order, when a specifier has no recognized one.
    pub extensions: Vec<String>,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            alias: BTreeMap::from([("@".to_string(), "./src".to_string())]),
            extensions: [".js", ".json", ".vue", ".ts", ".tsx"]
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

/// Loader rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    pub rules: Vec<RuleConfig>,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            rules: vec![
                RuleConfig::with_loader(r"\.json$", "json-loader"),
                RuleConfig::with_loader(r"\.(png|jpe?g|gif|svg)(\?.*)?$", "url-loader"),
                RuleConfig::with_loader(r"\.css$", "style-loader!css-loader"),
                RuleConfig::with_loader(r"\.scss$", "style-loader!css-loader!sass-loader!"),
            ],
        }
    }
}

/// One entry of `module.rules`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleConfig {
    /// Regex tested against the resolved module path.
    pub test: String,
    /// Only match paths matching one of these regexes (when non-empty).
    pub include: OneOrMany,
    /// Never match paths matching one of these regexes.
    pub exclude: OneOrMany,
    /// `!`-separated loader chain, e.g. `"style-loader!css-loader"`.
    pub loader: Option<String>,
    /// Loader chain as a list.
    #[serde(rename = "use")]
    pub use_: Option<Vec<UseEntry>>,
    /// Options for a single-loader rule.
    pub options: Option<serde_json::Value>,
}

impl RuleConfig {
    /// Rule with a test pattern and a `!`-separated loader chain.
    #[must_use]
    pub fn with_loader(test: &str, loader: &str) -> Self {
        Self {
            test: test.to_string(),
            loader: Some(loader.to_string()),
            ..Default::default()
        }
    }
}

/// A loader reference inside `use`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UseEntry {
    Name(String),
    Detailed {
        loader: String,
        #[serde(default)]
        options: Option<serde_json::Value>,
    },
}

/// A single regex or a list of regexes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    #[default]
    None,
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    /// Flatten into a list.
    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::None => Vec::new(),
            Self::One(s) => vec![s.clone()],
            Self::Many(v) => v.clone(),
        }
    }
}

/// An external transform toolchain driven over stdin/stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalLoaderConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// What the command produces: `script` (default) or `stylesheet`.
    #[serde(default)]
    pub produces: Option<String>,
}

/// Built-in plugin configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PluginsConfig {
    /// Entry document generation; `None` disables it.
    pub html: Option<HtmlPluginConfig>,
    /// Static directories copied verbatim on cold start.
    pub copy: Vec<CopyPattern>,
    /// Desktop notification on compile errors.
    pub notify: bool,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            html: Some(HtmlPluginConfig::default()),
            copy: vec![CopyPattern::default()],
            notify: true,
        }
    }
}

/// Entry document options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HtmlPluginConfig {
    /// Emitted document name.
    pub filename: String,
    /// Template path relative to the project root.
    pub template: PathBuf,
    /// Inject asset tags.
    pub inject: bool,
}

impl Default for HtmlPluginConfig {
    fn default() -> Self {
        Self {
            filename: "index.html".to_string(),
            template: PathBuf::from("index.html"),
            inject: true,
        }
    }
}

/// A static copy source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CopyPattern {
    /// Source directory relative to the project root.
    pub from: PathBuf,
    /// Destination prefix inside the output directory.
    pub to: String,
    /// Glob patterns of names to skip.
    pub ignore: Vec<String>,
}

impl Default for CopyPattern {
    fn default() -> Self {
        Self {
            from: PathBuf::from("static"),
            to: "static".to_string(),
            ignore: vec![".*".to_string()],
        }
    }
}

/// Dev server options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DevServerConfig {
    pub host: String,
    pub port: u16,
    /// Live module replacement.
    pub hot: bool,
    /// Path prefix → upstream.
    pub proxy: BTreeMap<String, ProxyTarget>,
    /// Serve the entry document for unmatched non-file routes.
    pub history_api_fallback: bool,
    /// Suppress console output except notifications.
    pub quiet: bool,
    /// Gzip responses.
    pub compress: bool,
    pub watch_options: WatchOptions,
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            hot: true,
            proxy: BTreeMap::new(),
            history_api_fallback: true,
            quiet: true,
            compress: true,
            watch_options: WatchOptions::default(),
        }
    }
}

impl DevServerConfig {
    /// Apply `HOST` / `PORT` overrides.
    ///
    /// `HOST` replaces the host when non-empty. `PORT` replaces the port only
    /// when it parses as a non-zero port number; anything else keeps the
    /// configured port.
    #[must_use]
    pub fn with_env_overrides(mut self, host: Option<&str>, port: Option<&str>) -> Self {
        if let Some(host) = host.map(str::trim).filter(|h| !h.is_empty()) {
            self.host = host.to_string();
        }
        if let Some(port) = port {
            match port.trim().parse::<u16>() {
                Ok(p) if p != 0 => self.port = p,
                _ => {
                    tracing::warn!(value = %port, fallback = self.port, "Ignoring non-numeric PORT");
                }
            }
        }
        self
    }

    /// Apply overrides from the process environment.
    #[must_use]
    pub fn with_process_env(self) -> Self {
        let host = std::env::var("HOST").ok();
        let port = std::env::var("PORT").ok();
        self.with_env_overrides(host.as_deref(), port.as_deref())
    }
}

/// An upstream in the proxy table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProxyTarget {
    Url(String),
    #[serde(rename_all = "camelCase")]
    Detailed {
        target: String,
        #[serde(default)]
        path_rewrite: BTreeMap<String, String>,
    },
}

impl ProxyTarget {
    /// Upstream base URL.
    #[must_use]
    pub fn target(&self) -> &str {
        match self {
            Self::Url(url) | Self::Detailed { target: url, .. } => url,
        }
    }
}

/// File watching options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchOptions {
    /// Poll instead of using native events.
    pub poll: bool,
}

/// Asset size hints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PerformanceConfig {
    /// Warn about assets larger than `max_asset_size`. Off by default.
    pub hints: bool,
    pub max_asset_size: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            hints: false,
            max_asset_size: 250_000,
        }
    }
}

/// Find a config file in the given root directory.
#[must_use]
pub fn find_config_file(root: &Path) -> Option<PathBuf> {
    CONFIG_FILES
        .iter()
        .map(|name| root.join(name))
        .find(|path| path.is_file())
}

/// Load configuration for a project root.
///
/// If `explicit` is given that file must exist. Otherwise the root is searched
/// and defaults are used when no file is found. Returns the path the config was
/// read from, if any.
pub fn load_config(
    root: &Path,
    explicit: Option<&Path>,
) -> Result<(Option<PathBuf>, PipelineConfig), Error> {
    let path = match explicit {
        Some(p) => {
            let abs = if p.is_absolute() {
                p.to_path_buf()
            } else {
                root.join(p)
            };
            if !abs.is_file() {
                return Err(Error::ConfigRead {
                    path: abs,
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
                });
            }
            abs
        }
        None => match find_config_file(root) {
            Some(p) => p,
            None => return Ok((None, PipelineConfig::default())),
        },
    };

    let source = std::fs::read_to_string(&path).map_err(|source| Error::ConfigRead {
        path: path.clone(),
        source,
    })?;
    let config: PipelineConfig =
        serde_json::from_str(&source).map_err(|source| Error::ConfigParse {
            path: path.clone(),
            source,
        })?;
    Ok((Some(path), config))
}

/// Project name: configured name, else `package.json` name, else the root
/// directory name.
#[must_use]
pub fn project_name(root: &Path, config: &PipelineConfig) -> String {
    if let Some(name) = &config.name {
        return name.clone();
    }
    let from_pkg = std::fs::read_to_string(root.join("package.json"))
        .ok()
        .and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok())
        .and_then(|v| v.get("name").and_then(|n| n.as_str()).map(String::from));
    from_pkg.unwrap_or_else(|| {
        root.file_name()
            .map_or_else(|| "wirepack".to_string(), |n| n.to_string_lossy().into_owned())
    })
}
