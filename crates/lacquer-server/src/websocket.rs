//! WebSocket live reload.

use std::path::{Path, PathBuf};

use lacquer_pipeline::{Category, ReloadSignal};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// WebSocket endpoint clients connect to.
pub const SOCKET_PATH: &str = "/__lacquer/livereload";

/// Endpoint serving the client script.
pub const SCRIPT_PATH: &str = "/__lacquer/livereload.js";

/// Messages sent to connected browsers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReloadMessage {
    /// Connection established
    Connected,

    /// Full page reload
    Reload,

    /// Stylesheets changed; swap them without reloading
    Css {
        /// URL paths of the changed stylesheets
        paths: Vec<String>,
    },
}

/// Broadcasts reload messages to every connected browser.
#[derive(Debug, Clone)]
pub struct LiveReloadHub {
    sender: broadcast::Sender<ReloadMessage>,
    output_root: PathBuf,
}

impl LiveReloadHub {
    /// Create a hub for assets served from `output_root`.
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        let (sender, _) = broadcast::channel(100);
        Self {
            sender,
            output_root: output_root.into(),
        }
    }

    /// Send a message to all connected clients.
    pub fn send(&self, msg: ReloadMessage) {
        // No receivers just means no browser is open
        let _ = self.sender.send(msg);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReloadMessage> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Pick the message for a set of written files.
    ///
    /// Stylesheet-only changes are swapped in place; anything else reloads.
    pub fn message_for(&self, paths: &[PathBuf]) -> ReloadMessage {
        let all_css = !paths.is_empty()
            && paths
                .iter()
                .all(|p| p.extension().and_then(|e| e.to_str()) == Some("css"));

        if !all_css {
            return ReloadMessage::Reload;
        }

        ReloadMessage::Css {
            paths: paths.iter().map(|p| self.url_path(p)).collect(),
        }
    }

    fn url_path(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.output_root).unwrap_or(path);
        let segments: Vec<_> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect();
        format!("/{}", segments.join("/"))
    }
}

impl ReloadSignal for LiveReloadHub {
    fn assets_changed(&self, category: Category, paths: &[PathBuf]) {
        let msg = self.message_for(paths);
        tracing::debug!(
            "{} changed {} files, notifying {} clients",
            category,
            paths.len(),
            self.subscriber_count()
        );
        self.send(msg);
    }
}

/// The browser side of live reload.
///
/// Connects back to the serving host, so it works unchanged behind the
/// proxy mode.
pub fn client_script() -> String {
    format!(
        r#"
(function() {{
  'use strict';

  var attempts = 0;

  function swapStyles(paths) {{
    var links = document.querySelectorAll('link[rel="stylesheet"]');
    var swapped = 0;
    links.forEach(function(link) {{
      var url = new URL(link.href, location.href);
      if (paths.length && paths.indexOf(url.pathname) === -1) {{
        return;
      }}
      url.searchParams.set('livereload', Date.now());
      link.href = url.toString();
      swapped++;
    }});
    if (!swapped) {{
      location.reload();
    }}
  }}

  function connect() {{
    var scheme = location.protocol === 'https:' ? 'wss://' : 'ws://';
    var ws = new WebSocket(scheme + location.host + '{socket}');

    ws.onopen = function() {{
      attempts = 0;
    }};

    ws.onmessage = function(event) {{
      var msg = JSON.parse(event.data);
      switch (msg.type) {{
        case 'reload':
          location.reload();
          break;
        case 'css':
          swapStyles(msg.paths || []);
          break;
        case 'connected':
          console.log('[lacquer] live reload connected');
          break;
      }}
    }};

    ws.onclose = function() {{
      if (attempts < 10) {{
        attempts++;
        setTimeout(connect, 1000 * attempts);
      }}
    }};
  }}

  connect();
}})();
"#,
        socket = SOCKET_PATH
    )
}
