//! Runtime configuration.
//!
//! Locations and identifiers shared with the other processes are injected
//! here instead of being baked into the store.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Key holding the host rules as a JSON string array.
pub const HOSTS_KEY: &str = "Hosts";
/// Key holding the element rules as a JSON array of `{domain, selector}`.
pub const ELEMENT_RULES_KEY: &str = "ElementRules";
/// Key of the page-rule payload read by the message channel responder.
pub const PAGE_RULES_KEY: &str = "ElementRulesForExtension";
/// Filter list file name inside the shared group directory.
pub const FILTER_LIST_FILE: &str = "blockerList.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Invalid config '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Private storage of the rule editor.
    pub data_dir: PathBuf,
    /// Directory shared with the content blocker and the page script responder.
    pub group_dir: PathBuf,
    /// Identifier passed to the reload command.
    pub engine_id: String,
    /// Program and leading arguments that ask the engine to reload. The
    /// engine id is appended as the last argument.
    pub reload_command: Option<Vec<String>>,
    pub reload_timeout_ms: u64,
    /// Lowercase host rules on insert so `Example.com` and `example.com`
    /// are the same rule.
    pub normalize_host_case: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("exactblocker/data"),
            group_dir: PathBuf::from("exactblocker/group"),
            engine_id: "com.exactblocker.blocker".to_string(),
            reload_command: None,
            reload_timeout_ms: 5_000,
            normalize_host_case: true,
        }
    }
}

impl SyncConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn filter_list_path(&self) -> PathBuf {
        self.group_dir.join(FILTER_LIST_FILE)
    }

    pub fn reload_timeout(&self) -> Duration {
        Duration::from_millis(self.reload_timeout_ms)
    }
}
