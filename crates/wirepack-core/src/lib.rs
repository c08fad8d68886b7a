#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]

//! Build pipeline core for wirepack.
//!
//! Resolves module requests, runs loader chains, assembles bundles into a
//! [`Compilation`], runs plugin hooks, and keeps dev server session state
//! for incremental rebuilds and live updates.

pub mod assets;
pub mod compilation;
pub mod compiler;
pub mod config;
pub mod dev;
pub mod emit;
pub mod error;
pub mod graph;
pub mod imports;
pub mod loader;
pub mod plugin;
pub mod plugins;
pub mod report;
pub mod resolve;
pub mod version;

pub use compilation::{Asset, AssetOrigin, Compilation};
pub use compiler::{Compiler, LiveUpdate, ModuleUpdate, RebuildOutcome};
pub use config::{load_config, project_name, PipelineConfig};
pub use error::{Error, ProxyError, ServerStartError};
pub use loader::LoaderRegistry;
pub use plugin::{Hook, HookContext, HookRunner, PluginError};
pub use report::{Diagnostic, DiagnosticKind, Severity};
pub use resolve::{ResolveError, Resolver};
pub use version::VERSION;
