//! Error notifications.

use crate::plugin::{CompileErrorHook, HookContext, HookResult, PluginError};
use crate::report::{notification_for, Diagnostic, Notification};
use std::sync::Arc;

/// Where notifications go (desktop, a log, a test recorder).
pub trait Notifier: Send + Sync {
    fn send(&self, notification: &Notification) -> Result<(), String>;
}

/// Logs notifications instead of showing them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, n: &Notification) -> Result<(), String> {
        tracing::error!(
            title = %n.title,
            subtitle = n.subtitle.as_deref().unwrap_or(""),
            "{}",
            n.message
        );
        Ok(())
    }
}

/// Sends one notification per error batch.
pub struct NotifyPlugin {
    notifier: Arc<dyn Notifier>,
}

impl NotifyPlugin {
    #[must_use]
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

impl std::fmt::Debug for NotifyPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyPlugin").finish_non_exhaustive()
    }
}

impl CompileErrorHook for NotifyPlugin {
    fn name(&self) -> &str {
        "notify"
    }

    fn compile_error(&self, diagnostics: &[Diagnostic], ctx: &HookContext) -> HookResult<()> {
        let Some(notification) = notification_for(&ctx.project_name, diagnostics) else {
            return Ok(());
        };
        self.notifier
            .send(&notification)
            .map_err(|e| PluginError::new("notify", "compile-error", e))
    }
}
