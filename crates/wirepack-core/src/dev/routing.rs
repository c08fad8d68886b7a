//! Request routing for the dev server.
//!
//! Routing is a pure decision over the request path: proxy table first, then
//! emitted assets, then history fallback, then 404. The server turns a
//! [`Route`] into a response.

use crate::config::{OutputConfig, ProxyTarget};
use std::collections::BTreeMap;

/// Where a request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Forward to `url` (upstream base joined with the rewritten path and query).
    Proxy { upstream: String, url: String },
    /// Serve this emitted asset.
    Asset(String),
    /// Serve the entry document with 200.
    Fallback,
    /// No servable compilation yet; serve the error page.
    ErrorPage,
    NotFound,
}

/// One proxy entry.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ProxyRoute {
    prefix: String,
    upstream: String,
    /// `(from prefix, to)` substitutions applied to the path.
    rewrites: Vec<(String, String)>,
}

/// Path prefix → upstream table, matched longest prefix first.
#[derive(Debug, Clone, Default)]
pub struct ProxyTable {
    routes: Vec<ProxyRoute>,
}

impl ProxyTable {
    #[must_use]
    pub fn new(config: &BTreeMap<String, ProxyTarget>) -> Self {
        let mut routes: Vec<ProxyRoute> = config
            .iter()
            .map(|(prefix, target)| ProxyRoute {
                prefix: prefix.clone(),
                upstream: target.target().trim_end_matches('/').to_string(),
                rewrites: match target {
                    ProxyTarget::Url(_) => Vec::new(),
                    ProxyTarget::Detailed { path_rewrite, .. } => path_rewrite
                        .iter()
                        .map(|(from, to)| (from.trim_start_matches('^').to_string(), to.clone()))
                        .collect(),
                },
            })
            .collect();
        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { routes }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Upstream URL for `path` (with optional `query`), if a prefix matches.
    #[must_use]
    pub fn lookup(&self, path: &str, query: Option<&str>) -> Option<Route> {
        let route = self
            .routes
            .iter()
            .find(|r| path.starts_with(&r.prefix))?;
        let mut forwarded = path.to_string();
        if let Some((from, to)) = route
            .rewrites
            .iter()
            .find(|(from, _)| forwarded.starts_with(from.as_str()))
        {
            forwarded = format!("{to}{}", &forwarded[from.len()..]);
        }
        if !forwarded.starts_with('/') {
            forwarded.insert(0, '/');
        }
        let mut url = format!("{}{forwarded}", route.upstream);
        if let Some(q) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(q);
        }
        Some(Route::Proxy {
            upstream: route.upstream.clone(),
            url,
        })
    }
}

/// Everything [`route`] needs to know about the server's state.
#[derive(Debug, Clone, Copy)]
pub struct RouteContext<'a> {
    pub proxy: &'a ProxyTable,
    pub output: &'a OutputConfig,
    pub history_fallback: bool,
    /// A successful compilation is being served.
    pub servable: bool,
}

/// Decide where `path` goes. `has_asset` checks emitted asset names.
pub fn route(
    ctx: RouteContext<'_>,
    path: &str,
    query: Option<&str>,
    has_asset: impl Fn(&str) -> bool,
) -> Route {
    if let Some(proxied) = ctx.proxy.lookup(path, query) {
        return proxied;
    }
    let looks_like_file = last_segment(path).contains('.');

    let asset = asset_name(ctx.output, path);
    if !ctx.servable {
        if asset.is_some() || !looks_like_file {
            return Route::ErrorPage;
        }
        return Route::NotFound;
    }
    if let Some(name) = asset {
        if has_asset(&name) {
            return Route::Asset(name);
        }
    }
    if ctx.history_fallback && !looks_like_file {
        return Route::Fallback;
    }
    Route::NotFound
}

/// Asset name for a request path under the public path.
///
/// `/` maps to `index.html`.
fn asset_name(output: &OutputConfig, path: &str) -> Option<String> {
    let base = output.public_path.trim_end_matches('/');
    let rest = if base.is_empty() {
        path
    } else {
        path.strip_prefix(base)?
    };
    let name = rest.trim_start_matches('/');
    if name.is_empty() {
        return Some("index.html".to_string());
    }
    Some(percent_decode(name))
}

fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Decode `%XX` escapes; invalid sequences are kept as-is.
fn percent_decode(s: &str) -> String {
    percent_encoding::percent_decode_str(s)
        .decode_utf8_lossy()
        .into_owned()
}
