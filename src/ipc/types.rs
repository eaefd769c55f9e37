//! Wire types shared by the request loop and the handlers.

use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

/// One stdin line: `{id, method, params}`. Absent params deserialize
/// to JSON null so handlers can probe them uniformly.
#[derive(Debug, Deserialize)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Daemon-lifetime state: the selected workspace directory and the open
/// records database, both absent until `workspace.select` succeeds.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}
