//! Bundle emission.
//!
//! Generates the script bundle (a small module registry plus one definition
//! per module in dependency order) and the style bundle (stylesheet outputs
//! concatenated in the same order).

use crate::graph::ModuleGraph;
use crate::loader::OutputKind;
use std::fmt::Write as _;

/// Module registry prepended to every script bundle.
///
/// Exposes `window.__wirepack__` so the live-update client can swap module
/// definitions in place.
pub const RUNTIME: &str = r#"var __wirepack__ = (function () {
  var modules = {};
  var cache = {};
  var styles = {};
  function define(id, deps, factory) {
    modules[id] = { deps: deps, factory: factory };
  }
  function style(id) {
    styles[id] = true;
  }
  function load(id) {
    if (cache[id]) return cache[id].exports;
    var def = modules[id];
    if (!def) throw new Error("wirepack: module '" + id + "' is not in the bundle");
    var module = (cache[id] = { id: id, exports: {} });
    def.factory.call(module.exports, module, module.exports, function (spec) {
      var target = def.deps[spec];
      return load(target === undefined ? spec : target);
    });
    return module.exports;
  }
  function update(id, code) {
    var def = modules[id];
    if (!def) return false;
    def.factory = new Function("module", "exports", "require", code);
    delete cache[id];
    load(id);
    return true;
  }
  return { define: define, style: style, load: load, update: update, modules: modules, styles: styles };
})();
if (typeof window !== "undefined") window.__wirepack__ = __wirepack__;
"#;

/// A JS string literal.
pub(crate) fn json_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

/// Script bundle for `order` (dependencies first), requiring `entry` last.
#[must_use]
pub fn script_bundle(graph: &ModuleGraph, order: &[String], entry: &str) -> String {
    let mut out = String::from(RUNTIME);
    for id in order {
        let Some(module) = graph.get(id) else {
            continue;
        };
        match module.output_kind {
            OutputKind::Script | OutputKind::Asset => {
                let deps = serde_json::to_string(&module.dependencies)
                    .unwrap_or_else(|_| "{}".to_string());
                let _ = write!(
                    out,
                    "\n__wirepack__.define({}, {deps}, function (module, exports, require) {{\n{}\n}});\n",
                    json_string(id),
                    module.output.trim_end()
                );
            }
            OutputKind::Stylesheet => {
                let _ = writeln!(out, "\n__wirepack__.style({});", json_string(id));
                let _ = writeln!(
                    out,
                    "__wirepack__.define({}, {{}}, function () {{}});",
                    json_string(id)
                );
            }
        }
    }
    let _ = writeln!(out, "\n__wirepack__.load({});", json_string(entry));
    out
}

/// Concatenated stylesheet outputs, or `None` when there are none.
#[must_use]
pub fn style_bundle(graph: &ModuleGraph, order: &[String]) -> Option<String> {
    let mut out = String::new();
    let mut any = false;
    for module in order.iter().filter_map(|id| graph.get(id)) {
        if module.output_kind != OutputKind::Stylesheet {
            continue;
        }
        any = true;
        let _ = writeln!(out, "/* {} */\n{}", module.id, module.output.trim_end());
    }
    any.then_some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Module, ModuleKind};
    use std::collections::{BTreeMap, BTreeSet};
    use std::path::PathBuf;

    fn module(id: &str, kind: OutputKind, output: &str) -> Module {
        Module {
            id: id.to_string(),
            path: PathBuf::from("/p").join(id),
            kind: ModuleKind::Script,
            source: Vec::new(),
            loaders: Vec::new(),
            output: output.to_string(),
            output_kind: kind,
            reference: None,
            emitted: None,
            dependencies: BTreeMap::new(),
            dependents: BTreeSet::new(),
            diagnostics: Vec::new(),
        }
    }

    #[test]
    fn test_script_bundle_order_and_entry() {
        let mut graph = ModuleGraph::new();
        graph.insert(module("src/main.js", OutputKind::Script, "require('./a.css');"));
        graph.insert(module("src/a.css", OutputKind::Stylesheet, ".a{}"));
        graph.link(
            "src/main.js",
            BTreeMap::from([("./a.css".to_string(), "src/a.css".to_string())]),
        );
        let order = graph.toposort();
        let bundle = script_bundle(&graph, &order, "src/main.js");

        let css_def = bundle.find("__wirepack__.style(\"src/a.css\")").unwrap();
        let main_def = bundle
            .find("__wirepack__.define(\"src/main.js\", {\"./a.css\":\"src/a.css\"}")
            .unwrap();
        assert!(css_def < main_def);
        assert!(bundle.trim_end().ends_with("__wirepack__.load(\"src/main.js\");"));
    }

    #[test]
    fn test_style_bundle() {
        let mut graph = ModuleGraph::new();
        graph.insert(module("b.css", OutputKind::Stylesheet, ".b{}"));
        graph.insert(module("a.js", OutputKind::Script, ""));
        let order = graph.toposort();
        assert_eq!(style_bundle(&graph, &order).unwrap(), "/* b.css */\n.b{}\n");

        let mut scripts = ModuleGraph::new();
        scripts.insert(module("a.js", OutputKind::Script, ""));
        assert!(style_bundle(&scripts, &scripts.toposort()).is_none());
    }
}
