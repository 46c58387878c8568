//! Live-reload dev server and watch mode for lacquer.
//!
//! Serves the dev output (or proxies a backend), pushes reload messages over
//! a WebSocket, and rebuilds categories as their sources change.

pub mod controller;
pub mod server;
pub mod watcher;
pub mod websocket;

pub use controller::{route, spawn_worker, Mailbox, WatchController, WatchState};
pub use server::{inject_script, DevServer, ServerError};
pub use watcher::{ChangeKind, FileWatcher, WatchEvent};
pub use websocket::{client_script, LiveReloadHub, ReloadMessage, SCRIPT_PATH, SOCKET_PATH};
