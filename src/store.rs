//! Session store snapshot access.
//!
//! The agent runtime writes a single JSON object mapping session keys to
//! session data. We read it fresh on every request and never write it back.

use fxhash::FxHashMap;
use serde_json::Value;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

static HOME_DIR: OnceLock<String> = OnceLock::new();

#[inline]
fn get_home() -> &'static str {
    HOME_DIR.get_or_init(|| env::var("HOME").unwrap_or_else(|_| ".".to_string()))
}

/// Path under the agent's home directory, e.g. `agent_path("cron")`.
#[inline]
pub fn agent_path(subdir: &str) -> PathBuf {
    PathBuf::from(get_home()).join(".openclaw").join(subdir)
}

pub fn default_store_path() -> PathBuf {
    agent_path("agents/main/sessions/sessions.json")
}

/// The snapshot could not be turned into records at all. Anything less
/// (a malformed field inside one record) is defaulted at normalization
/// instead of surfacing here.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session store unreadable: {0}")]
    Read(#[from] std::io::Error),
    #[error("session store is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Raw snapshot: session key -> untyped session data.
pub type SessionStore = FxHashMap<String, Value>;

pub fn load_store(path: &Path) -> Result<SessionStore, StoreError> {
    let bytes = fs::read(path)?;
    let store: SessionStore = serde_json::from_slice(&bytes)?;
    Ok(store)
}
