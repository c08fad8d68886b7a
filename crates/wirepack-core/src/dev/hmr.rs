//! Live-update protocol.
//!
//! Frames are JSON objects tagged by `type`:
//!
//! - `{"type":"connected"}` on socket open
//! - `{"type":"update","module":"src/a.js","payload":"..."}` per changed module
//! - `{"type":"full-reload"}` when the entry document's asset list changed
//!
//! Stylesheet modules are refreshed by re-fetching the linked stylesheets;
//! anything else is re-evaluated through the bundle's module registry, with
//! a full reload when the registry does not know the module.

use crate::compiler::LiveUpdate;
use serde::{Deserialize, Serialize};

/// WebSocket endpoint.
pub const WS_PATH: &str = "/__wirepack/ws";

/// A frame pushed to live clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HmrFrame {
    Connected,
    Update { module: String, payload: String },
    FullReload,
}

impl HmrFrame {
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"full-reload"}"#.to_string())
    }
}

/// Frames for one committed rebuild, in send order.
#[must_use]
pub fn frames_for(update: &LiveUpdate) -> Vec<HmrFrame> {
    match update {
        LiveUpdate::FullReload => vec![HmrFrame::FullReload],
        LiveUpdate::Modules(modules) => modules
            .iter()
            .map(|m| HmrFrame::Update {
                module: m.id.clone(),
                payload: m.output.clone(),
            })
            .collect(),
    }
}

/// Browser side of the protocol, served at `/__wirepack/client.js`.
pub const CLIENT_RUNTIME: &str = r#"(function () {
  var scheme = location.protocol === "https:" ? "wss://" : "ws://";
  var url = scheme + location.host + "/__wirepack/ws";
  var connected = false;

  function refreshStyles() {
    var links = document.querySelectorAll('link[rel="stylesheet"]');
    for (var i = 0; i < links.length; i++) {
      var href = links[i].getAttribute("href").split("?")[0];
      links[i].setAttribute("href", href + "?t=" + Date.now());
    }
  }

  function apply(frame) {
    var registry = window.__wirepack__;
    if (!registry) return location.reload();
    if (registry.styles[frame.module]) {
      refreshStyles();
      return;
    }
    try {
      if (!registry.update(frame.module, frame.payload)) location.reload();
      else console.log("[wirepack] updated " + frame.module);
    } catch (err) {
      console.error("[wirepack] update failed for " + frame.module, err);
      location.reload();
    }
  }

  function connect() {
    var ws = new WebSocket(url);
    ws.onopen = function () {
      connected = true;
    };
    ws.onmessage = function (event) {
      var frame = JSON.parse(event.data);
      if (frame.type === "update") apply(frame);
      else if (frame.type === "full-reload") location.reload();
    };
    ws.onclose = function () {
      if (connected) {
        connected = false;
        console.log("[wirepack] connection lost, waiting for server");
      }
      setTimeout(connect, 1000);
    };
  }

  connect();
})();
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ModuleUpdate;

    #[test]
    fn test_frame_json() {
        let frame = HmrFrame::Update {
            module: "src/a.js".to_string(),
            payload: "module.exports = 1;".to_string(),
        };
        assert_eq!(
            frame.to_json(),
            r#"{"type":"update","module":"src/a.js","payload":"module.exports = 1;"}"#
        );
        assert_eq!(HmrFrame::FullReload.to_json(), r#"{"type":"full-reload"}"#);
        assert_eq!(HmrFrame::Connected.to_json(), r#"{"type":"connected"}"#);
    }

    #[test]
    fn test_frames_for_update() {
        let update = LiveUpdate::Modules(vec![ModuleUpdate {
            id: "src/a.js".to_string(),
            output: "x".to_string(),
        }]);
        let frames = frames_for(&update);
        assert_eq!(frames.len(), 1);
        assert!(matches!(&frames[0], HmrFrame::Update { module, .. } if module == "src/a.js"));
        assert_eq!(frames_for(&LiveUpdate::FullReload), vec![HmrFrame::FullReload]);
        assert!(frames_for(&LiveUpdate::Modules(Vec::new())).is_empty());
    }
}
