//! Dev server core: session state, routing and the live-update protocol.
//!
//! The HTTP listener and file watcher live in the CLI; everything here is
//! synchronous and testable without a socket.

pub mod hmr;
pub mod routing;
pub mod session;

pub use hmr::{frames_for, HmrFrame, CLIENT_RUNTIME, WS_PATH};
pub use routing::{route, ProxyTable, Route, RouteContext};
pub use session::{DevSession, RebuildStatus};

/// Directories never watched for changes.
pub const IGNORED_DIRS: &[&str] = &["node_modules", ".git", "target", "dist"];

/// Whether a changed path should be ignored by the watcher.
///
/// Paths inside ignored directories or the output directory, and dotfiles,
/// never trigger a rebuild.
#[must_use]
pub fn should_ignore(path: &std::path::Path, root: &std::path::Path, output_dir: &str) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return true;
    };
    let output_dir = output_dir.trim_matches('/');
    let mut components = relative.components().peekable();
    if let Some(first) = components.peek() {
        if !output_dir.is_empty() && first.as_os_str() == output_dir {
            return true;
        }
    }
    components.any(|c| {
        let name = c.as_os_str().to_string_lossy();
        name.starts_with('.') || IGNORED_DIRS.contains(&name.as_ref())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_should_ignore() {
        let root = Path::new("/p");
        assert!(!should_ignore(Path::new("/p/src/a.js"), root, "dist"));
        assert!(should_ignore(Path::new("/p/node_modules/x/index.js"), root, "dist"));
        assert!(should_ignore(Path::new("/p/build/out.js"), root, "build"));
        assert!(should_ignore(Path::new("/p/src/.a.js.swp"), root, "dist"));
        assert!(should_ignore(Path::new("/elsewhere/a.js"), root, "dist"));
    }
}
