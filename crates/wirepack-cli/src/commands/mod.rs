pub mod build;
pub mod dev;
pub mod version;

use miette::{IntoDiagnostic, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use wirepack_core::plugins::{default_hooks, Notifier};
use wirepack_core::{load_config, project_name, Compiler, LoaderRegistry, PipelineConfig};

/// A loaded project: root, configuration and display name.
#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
    pub config_path: Option<PathBuf>,
    pub config: PipelineConfig,
    pub name: String,
}

impl Project {
    /// Load the configuration for `cwd` (or the explicit file).
    pub fn load(cwd: &Path, explicit: Option<&Path>) -> Result<Self> {
        let root = dunce::canonicalize(cwd).into_diagnostic()?;
        let (config_path, config) = load_config(&root, explicit).into_diagnostic()?;
        let name = project_name(&root, &config);
        Ok(Self {
            root,
            config_path,
            config,
            name,
        })
    }

    /// Compiler with the configured loaders and built-in plugins, cold-started.
    ///
    /// Fails on invalid rules and when the entry cannot be read.
    pub fn compiler(&self, dev: bool, notifier: Arc<dyn Notifier>) -> Result<Compiler> {
        let registry = LoaderRegistry::from_config(&self.config.loaders).into_diagnostic()?;
        let hooks = default_hooks(&self.root, &self.config, &self.name, notifier, dev);
        let mut compiler =
            Compiler::new(&self.root, self.config.clone(), &registry, hooks).into_diagnostic()?;
        let entry = compiler.resolve_entry().into_diagnostic()?;
        tracing::debug!(entry = %entry.display(), "entry resolved");
        compiler.cold_start();
        Ok(compiler)
    }

    /// Output directory.
    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.root.join(&self.config.output.path)
    }
}
