//! Plugin hook runner.
//!
//! Hooks are a closed set of extension points, each with a single method:
//!
//! - [`BeforeRunHook`]: cold start only; returns files staged into every build
//! - [`EmitHook`]: after a successful build; returns extra assets
//! - [`CompileSuccessHook`]: after a build without errors
//! - [`CompileErrorHook`]: after a build with errors
//!
//! Hooks run synchronously in registration order. The first hook in a phase
//! that returns an error (or panics) stops that phase; the failure is reported
//! as a [`PluginError`].

use crate::compilation::Compilation;
use crate::config::OutputConfig;
use crate::report::Diagnostic;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

/// Result type for plugin hooks.
pub type HookResult<T> = Result<T, PluginError>;

/// Error from a plugin.
#[derive(Debug, Clone, thiserror::Error)]
#[error("[{plugin}] {hook}: {message}")]
pub struct PluginError {
    /// Plugin name that caused the error.
    pub plugin: String,
    /// Hook that failed.
    pub hook: &'static str,
    /// Error message.
    pub message: String,
}

impl PluginError {
    #[must_use]
    pub fn new(plugin: &str, hook: &'static str, message: impl Into<String>) -> Self {
        Self {
            plugin: plugin.to_string(),
            hook,
            message: message.into(),
        }
    }
}

/// Context shared by all hooks.
#[derive(Debug, Clone)]
pub struct HookContext {
    /// Project root.
    pub root: PathBuf,
    /// Name shown in notifications.
    pub project_name: String,
    pub output: OutputConfig,
    /// Serving from the dev server (inject the live-update client).
    pub dev: bool,
    /// Live module replacement enabled.
    pub hot: bool,
}

/// A file produced by a hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookFile {
    /// Output-relative name.
    pub name: String,
    pub bytes: Vec<u8>,
}

pub trait BeforeRunHook: Send + Sync {
    fn name(&self) -> &str;
    fn before_run(&self, ctx: &HookContext) -> HookResult<Vec<HookFile>>;
}

pub trait EmitHook: Send + Sync {
    fn name(&self) -> &str;
    fn emit(&self, compilation: &Compilation, ctx: &HookContext) -> HookResult<Vec<HookFile>>;
}

pub trait CompileSuccessHook: Send + Sync {
    fn name(&self) -> &str;
    fn compile_success(&self, compilation: &Compilation, ctx: &HookContext) -> HookResult<()>;
}

pub trait CompileErrorHook: Send + Sync {
    fn name(&self) -> &str;
    fn compile_error(&self, diagnostics: &[Diagnostic], ctx: &HookContext) -> HookResult<()>;
}

/// A registered hook.
#[derive(Clone)]
pub enum Hook {
    BeforeRun(Arc<dyn BeforeRunHook>),
    Emit(Arc<dyn EmitHook>),
    CompileSuccess(Arc<dyn CompileSuccessHook>),
    CompileError(Arc<dyn CompileErrorHook>),
}

impl Hook {
    /// Plugin name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::BeforeRun(h) => h.name(),
            Self::Emit(h) => h.name(),
            Self::CompileSuccess(h) => h.name(),
            Self::CompileError(h) => h.name(),
        }
    }
}

impl std::fmt::Debug for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phase = match self {
            Self::BeforeRun(_) => "BeforeRun",
            Self::Emit(_) => "Emit",
            Self::CompileSuccess(_) => "CompileSuccess",
            Self::CompileError(_) => "CompileError",
        };
        write!(f, "{phase}({})", self.name())
    }
}

/// Outputs of one phase, plus the failure that stopped it.
#[derive(Debug)]
pub struct PhaseOutcome<T> {
    /// `(plugin name, output)` of the hooks that ran successfully, in order.
    pub outputs: Vec<(String, T)>,
    pub error: Option<PluginError>,
}

impl<T> PhaseOutcome<T> {
    /// The failure as a diagnostic.
    #[must_use]
    pub fn diagnostic(&self) -> Option<Diagnostic> {
        self.error.as_ref().map(Diagnostic::from_plugin)
    }
}

/// Runs registered hooks phase by phase.
#[derive(Debug, Clone)]
pub struct HookRunner {
    hooks: Vec<Hook>,
    ctx: HookContext,
}

impl HookRunner {
    #[must_use]
    pub fn new(ctx: HookContext) -> Self {
        Self {
            hooks: Vec::new(),
            ctx,
        }
    }

    /// Register a hook. Order of registration is order of execution.
    pub fn register(&mut self, hook: Hook) {
        self.hooks.push(hook);
    }

    #[must_use]
    pub fn context(&self) -> &HookContext {
        &self.ctx
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn run_before_run(&self) -> PhaseOutcome<Vec<HookFile>> {
        self.run_phase("before-run", |hook, ctx| match hook {
            Hook::BeforeRun(h) => Some(h.before_run(ctx)),
            _ => None,
        })
    }

    pub fn run_emit(&self, compilation: &Compilation) -> PhaseOutcome<Vec<HookFile>> {
        self.run_phase("emit", |hook, ctx| match hook {
            Hook::Emit(h) => Some(h.emit(compilation, ctx)),
            _ => None,
        })
    }

    pub fn run_compile_success(&self, compilation: &Compilation) -> PhaseOutcome<()> {
        self.run_phase("compile-success", |hook, ctx| match hook {
            Hook::CompileSuccess(h) => Some(h.compile_success(compilation, ctx)),
            _ => None,
        })
    }

    pub fn run_compile_error(&self, diagnostics: &[Diagnostic]) -> PhaseOutcome<()> {
        self.run_phase("compile-error", |hook, ctx| match hook {
            Hook::CompileError(h) => Some(h.compile_error(diagnostics, ctx)),
            _ => None,
        })
    }

    fn run_phase<T, F>(&self, phase: &'static str, mut call: F) -> PhaseOutcome<T>
    where
        F: FnMut(&Hook, &HookContext) -> Option<HookResult<T>>,
    {
        let mut outputs = Vec::new();
        for hook in &self.hooks {
            let result = catch_unwind(AssertUnwindSafe(|| call(hook, &self.ctx)));
            let error = match result {
                Ok(None) => continue,
                Ok(Some(Ok(output))) => {
                    outputs.push((hook.name().to_string(), output));
                    continue;
                }
                Ok(Some(Err(err))) => err,
                Err(payload) => PluginError::new(hook.name(), phase, panic_message(&*payload)),
            };
            tracing::warn!(plugin = %error.plugin, hook = phase, "{}", error.message);
            return PhaseOutcome {
                outputs,
                error: Some(error),
            };
        }
        PhaseOutcome {
            outputs,
            error: None,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn ctx() -> HookContext {
        HookContext {
            root: PathBuf::from("/p"),
            project_name: "demo".to_string(),
            output: OutputConfig::default(),
            dev: false,
            hot: false,
        }
    }

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
        panic: bool,
    }

    impl EmitHook for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn emit(&self, _c: &Compilation, _ctx: &HookContext) -> HookResult<Vec<HookFile>> {
            self.log.lock().unwrap().push(self.name);
            assert!(!self.panic, "exploded");
            if self.fail {
                return Err(PluginError::new(self.name, "emit", "nope"));
            }
            Ok(vec![HookFile {
                name: format!("{}.txt", self.name),
                bytes: Vec::new(),
            }])
        }
    }

    fn recorder(
        name: &'static str,
        log: &Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
        panic: bool,
    ) -> Hook {
        Hook::Emit(Arc::new(Recorder {
            name,
            log: Arc::clone(log),
            fail,
            panic,
        }))
    }

    #[test]
    fn test_hooks_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut runner = HookRunner::new(ctx());
        runner.register(recorder("first", &log, false, false));
        runner.register(recorder("second", &log, false, false));

        let outcome = runner.run_emit(&Compilation::default());
        assert!(outcome.error.is_none());
        assert_eq!(outcome.outputs.len(), 2);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_error_aborts_rest_of_phase() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut runner = HookRunner::new(ctx());
        runner.register(recorder("ok", &log, false, false));
        runner.register(recorder("bad", &log, true, false));
        runner.register(recorder("never", &log, false, false));

        let outcome = runner.run_emit(&Compilation::default());
        assert_eq!(outcome.outputs.len(), 1);
        let err = outcome.error.as_ref().unwrap();
        assert_eq!(err.plugin, "bad");
        assert_eq!(*log.lock().unwrap(), vec!["ok", "bad"]);
        let diag = outcome.diagnostic().unwrap();
        assert!(diag.is_error());
    }

    #[test]
    fn test_panic_is_isolated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut runner = HookRunner::new(ctx());
        runner.register(recorder("boom", &log, false, true));
        runner.register(recorder("never", &log, false, false));

        let outcome = runner.run_emit(&Compilation::default());
        let err = outcome.error.unwrap();
        assert_eq!(err.plugin, "boom");
        assert_eq!(err.hook, "emit");
        assert!(err.message.contains("exploded"));
        assert_eq!(*log.lock().unwrap(), vec!["boom"]);
    }

    #[test]
    fn test_other_phases_skip_emit_hooks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut runner = HookRunner::new(ctx());
        runner.register(recorder("emit-only", &log, false, false));
        let outcome = runner.run_compile_error(&[]);
        assert!(outcome.outputs.is_empty());
        assert!(log.lock().unwrap().is_empty());
    }
}
