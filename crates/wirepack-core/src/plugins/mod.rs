//! Built-in plugins and the standard hook set.

pub mod copy;
pub mod html;
pub mod notify;

pub use copy::CopyPlugin;
pub use html::{HtmlPlugin, InjectedTags, StaticRenderer, TemplateRenderer, CLIENT_PATH};
pub use notify::{LogNotifier, Notifier, NotifyPlugin};

use crate::config::PipelineConfig;
use crate::plugin::{Hook, HookContext, HookRunner};
use std::path::Path;
use std::sync::Arc;

/// Hook runner with the configured built-ins: copy, html, notify.
///
/// `dev` marks dev-server builds so the entry document carries the
/// live-update client when `devServer.hot` is on.
#[must_use]
pub fn default_hooks(
    root: &Path,
    config: &PipelineConfig,
    project_name: &str,
    notifier: Arc<dyn Notifier>,
    dev: bool,
) -> HookRunner {
    let mut runner = HookRunner::new(HookContext {
        root: root.to_path_buf(),
        project_name: project_name.to_string(),
        output: config.output.clone(),
        dev,
        hot: dev && config.dev_server.hot,
    });
    if !config.plugins.copy.is_empty() {
        runner.register(Hook::BeforeRun(Arc::new(CopyPlugin::new(
            config.plugins.copy.clone(),
        ))));
    }
    if let Some(html) = &config.plugins.html {
        runner.register(Hook::Emit(Arc::new(HtmlPlugin::new(html.clone()))));
    }
    if config.plugins.notify {
        runner.register(Hook::CompileError(Arc::new(NotifyPlugin::new(notifier))));
    }
    runner
}
