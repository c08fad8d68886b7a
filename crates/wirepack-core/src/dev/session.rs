//! Dev server session state.
//!
//! The session owns the compiler and the last successful [`Compilation`].
//! Rebuilds run one at a time on a staged copy; a successful one is committed
//! under the write lock and only then are its frames broadcast. A failed one
//! leaves the previous compilation serving and remembers the changed paths so
//! the next rebuild covers them again.

use super::hmr::{frames_for, HmrFrame};
use super::routing::{route, ProxyTable, Route, RouteContext};
use crate::compilation::{Asset, Compilation};
use crate::compiler::{Compiler, LiveUpdate, RebuildOutcome};
use crate::plugins::CLIENT_PATH;
use crate::report::{format_human, Diagnostic};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::broadcast;

const FRAME_CAPACITY: usize = 64;

/// What a rebuild did, for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildStatus {
    Unchanged,
    /// Committed; this many frames were broadcast.
    Committed { frames: usize, full_reload: bool },
    /// Not committed; the previous compilation keeps serving.
    Failed { errors: usize },
}

#[derive(Debug, Default)]
struct Served {
    /// Last compilation without errors.
    good: Option<Arc<Compilation>>,
    /// Most recent failed attempt, shown on the error page.
    failed: Option<Arc<Compilation>>,
}

/// Shared state behind the dev server.
#[derive(Debug)]
pub struct DevSession {
    compiler: Compiler,
    served: RwLock<Served>,
    /// Paths from failed rebuilds, retried with the next one.
    dirty: Mutex<BTreeSet<PathBuf>>,
    /// Serializes rebuilds.
    rebuild_lock: Mutex<()>,
    proxy: ProxyTable,
    frames: broadcast::Sender<HmrFrame>,
}

impl DevSession {
    #[must_use]
    pub fn new(compiler: Compiler) -> Self {
        let proxy = ProxyTable::new(&compiler.config().dev_server.proxy);
        let (frames, _) = broadcast::channel(FRAME_CAPACITY);
        Self {
            compiler,
            served: RwLock::new(Served::default()),
            dirty: Mutex::new(BTreeSet::new()),
            rebuild_lock: Mutex::new(()),
            proxy,
            frames,
        }
    }

    #[must_use]
    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    /// Receive frames for every committed rebuild from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HmrFrame> {
        self.frames.subscribe()
    }

    /// Initial full build. Returns the compilation whether or not it is
    /// servable.
    pub fn start(&self) -> Arc<Compilation> {
        let _guard = self.rebuild_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let compilation = Arc::new(self.compiler.build());
        self.store(Arc::clone(&compilation));
        compilation
    }

    /// Rebuild for `changed` paths, commit on success, then broadcast.
    pub fn rebuild(&self, changed: &[PathBuf]) -> RebuildStatus {
        let _guard = self.rebuild_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let paths: Vec<PathBuf> = {
            let mut dirty = self.dirty.lock().unwrap_or_else(PoisonError::into_inner);
            dirty.extend(changed.iter().cloned());
            dirty.iter().cloned().collect()
        };

        let previous = self.current();
        let outcome = match &previous {
            Some(prev) => self.compiler.rebuild(prev, &paths),
            None => {
                let compilation = self.compiler.build();
                if compilation.has_errors() {
                    RebuildOutcome::Failed(compilation)
                } else {
                    RebuildOutcome::Updated {
                        compilation,
                        update: LiveUpdate::FullReload,
                    }
                }
            }
        };

        match outcome {
            RebuildOutcome::Unchanged => {
                self.clear_dirty();
                RebuildStatus::Unchanged
            }
            RebuildOutcome::Failed(compilation) => {
                let errors = compilation.summary().errors;
                self.store(Arc::new(compilation));
                RebuildStatus::Failed { errors }
            }
            RebuildOutcome::Updated {
                compilation,
                update,
            } => {
                self.clear_dirty();
                self.store(Arc::new(compilation));
                let frames = frames_for(&update);
                let count = frames.len();
                for frame in frames {
                    // No receivers is fine
                    let _ = self.frames.send(frame);
                }
                RebuildStatus::Committed {
                    frames: count,
                    full_reload: update == LiveUpdate::FullReload,
                }
            }
        }
    }

    /// The compilation being served.
    #[must_use]
    pub fn current(&self) -> Option<Arc<Compilation>> {
        self.served
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .good
            .clone()
    }

    /// Diagnostics of the latest attempt.
    #[must_use]
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        let served = self.served.read().unwrap_or_else(PoisonError::into_inner);
        served
            .failed
            .as_ref()
            .or(served.good.as_ref())
            .map(|c| c.diagnostics.clone())
            .unwrap_or_default()
    }

    /// Route a request path.
    #[must_use]
    pub fn route(&self, path: &str, query: Option<&str>) -> Route {
        let current = self.current();
        let config = self.compiler.config();
        let ctx = RouteContext {
            proxy: &self.proxy,
            output: &config.output,
            history_fallback: config.dev_server.history_api_fallback,
            servable: current.is_some(),
        };
        route(ctx, path, query, |name| {
            current.as_ref().is_some_and(|c| c.assets.contains_key(name))
        })
    }

    /// An emitted asset of the served compilation.
    #[must_use]
    pub fn asset(&self, name: &str) -> Option<Asset> {
        self.current()?.asset(name).cloned()
    }

    /// The entry document, when the html plugin is configured.
    #[must_use]
    pub fn entry_document(&self) -> Option<Asset> {
        let html = self.compiler.config().plugins.html.as_ref()?;
        self.asset(&html.filename)
    }

    /// Error page listing the latest diagnostics.
    #[must_use]
    pub fn error_page(&self) -> String {
        let report = format_human(&self.diagnostics());
        let client = if self.compiler.hooks().context().hot {
            format!("<script src=\"{CLIENT_PATH}\"></script>\n")
        } else {
            String::new()
        };
        format!(
            "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>Build failed</title></head>\n\
             <body>\n<pre style=\"color:#c00;white-space:pre-wrap\">{}</pre>\n{client}</body>\n</html>\n",
            escape_html(&report)
        )
    }

    fn store(&self, compilation: Arc<Compilation>) {
        let mut served = self.served.write().unwrap_or_else(PoisonError::into_inner);
        if compilation.has_errors() {
            served.failed = Some(compilation);
        } else {
            served.good = Some(compilation);
            served.failed = None;
        }
    }

    fn clear_dirty(&self) {
        self.dirty
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::loader::LoaderRegistry;
    use crate::plugins::{default_hooks, LogNotifier};
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn session(root: &Path) -> DevSession {
        let config = PipelineConfig {
            entry: "./src/main.js".to_string(),
            ..PipelineConfig::default()
        };
        let hooks = default_hooks(root, &config, "demo", Arc::new(LogNotifier), true);
        let compiler =
            Compiler::new(root, config, &LoaderRegistry::with_builtins(), hooks).unwrap();
        DevSession::new(compiler)
    }

    fn project() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/main.js"), "require('./a');").unwrap();
        fs::write(dir.path().join("src/a.js"), "module.exports = 1;").unwrap();
        dir
    }

    #[test]
    fn test_start_serves_entry_document() {
        let dir = project();
        let session = session(dir.path());
        assert!(!session.start().has_errors());

        let html = session.entry_document().unwrap();
        let html = String::from_utf8_lossy(&html.bytes).into_owned();
        assert!(html.contains("/__wirepack/client.js"));
        assert_eq!(session.route("/main.js", None), Route::Asset("main.js".to_string()));
        assert_eq!(session.route("/dashboard", None), Route::Fallback);
    }

    #[test]
    fn test_failed_rebuild_keeps_previous_and_sends_nothing() {
        let dir = project();
        let session = session(dir.path());
        session.start();
        let mut rx = session.subscribe();

        fs::write(dir.path().join("src/a.js"), "require('./missing');").unwrap();
        let status = session.rebuild(&[dir.path().join("src/a.js")]);
        assert_eq!(status, RebuildStatus::Failed { errors: 1 });
        assert!(rx.try_recv().is_err());
        assert!(session.asset("main.js").is_some());
        assert_eq!(session.diagnostics().len(), 1);

        // fixing the file retries the remembered path
        fs::write(dir.path().join("src/a.js"), "module.exports = 2;").unwrap();
        let status = session.rebuild(&[]);
        assert_eq!(
            status,
            RebuildStatus::Committed {
                frames: 1,
                full_reload: false
            }
        );
        match rx.try_recv().unwrap() {
            HmrFrame::Update { module, payload } => {
                assert_eq!(module, "src/a.js");
                assert_eq!(payload, "module.exports = 2;");
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_error_page_without_good_build() {
        let dir = tempdir().unwrap();
        let session = session(dir.path());
        assert!(session.start().has_errors());
        assert!(session.current().is_none());
        assert_eq!(session.route("/", None), Route::ErrorPage);
        let page = session.error_page();
        assert!(page.contains("Module not found: &#39;./src/main.js&#39;"));
        assert!(page.contains("1 error"));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<a href="x">Tom & 'Jerry'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#39;Jerry&#39;&lt;/a&gt;"
        );
    }
}
