//! Propagation of the rule set to its two consumers.
//!
//! - Sink A: the compiled filter list file read by the content blocker,
//!   followed by a reload signal.
//! - Sink B: the element-rule payload read by the message channel responder.
//!
//! The sinks are independent caches of the same state. A failure in one is
//! reported but never stops the other.

use std::fmt;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eb_compiler::filter_list::{build_filter_list, FilterListError, EMPTY_FILTER_LIST};
use eb_core::types::RuleSet;

use crate::channel::encode_page_rules;
use crate::config::{SyncConfig, PAGE_RULES_KEY};
use crate::storage::{write_atomic, KeyValueStore, StorageError};

// =============================================================================
// Engine Reload
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReloadError {
    #[error("Failed to start reload command: {0}")]
    Spawn(String),
    #[error("Reload command exited with {0}")]
    CommandFailed(String),
    #[error("Reload did not finish within {0}ms")]
    Timeout(u128),
}

/// Asks the content blocker to re-read the filter list.
pub trait EngineReloader {
    fn reload(&self, engine_id: &str) -> impl Future<Output = Result<(), ReloadError>> + Send;

    /// False when there is nothing to signal; `reload` is then never called.
    fn is_configured(&self) -> bool {
        true
    }
}

/// Runs an external program with the engine id appended as last argument.
#[derive(Debug, Clone)]
pub struct CommandReloader {
    program: String,
    args: Vec<String>,
}

impl CommandReloader {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from `[program, args...]`. `None` for an empty command.
    pub fn from_command_line(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }
}

impl EngineReloader for CommandReloader {
    fn reload(&self, engine_id: &str) -> impl Future<Output = Result<(), ReloadError>> + Send {
        let mut command = tokio::process::Command::new(&self.program);
        command.args(&self.args).arg(engine_id).kill_on_drop(true);

        async move {
            let status = command
                .status()
                .await
                .map_err(|e| ReloadError::Spawn(e.to_string()))?;
            if status.success() {
                Ok(())
            } else {
                Err(ReloadError::CommandFailed(status.to_string()))
            }
        }
    }
}

/// Reload mechanism chosen by the configuration.
#[derive(Debug, Clone)]
pub enum ConfiguredReloader {
    Command(CommandReloader),
    /// No reload command; the engine picks the file up on its next start.
    Disabled,
}

impl ConfiguredReloader {
    pub fn from_config(config: &SyncConfig) -> Self {
        match config
            .reload_command
            .as_deref()
            .and_then(CommandReloader::from_command_line)
        {
            Some(command) => Self::Command(command),
            None => Self::Disabled,
        }
    }
}

impl EngineReloader for ConfiguredReloader {
    fn reload(&self, engine_id: &str) -> impl Future<Output = Result<(), ReloadError>> + Send {
        let command = match self {
            Self::Command(command) => Some(command.reload(engine_id)),
            Self::Disabled => None,
        };
        async move {
            match command {
                Some(reload) => reload.await,
                None => Ok(()),
            }
        }
    }

    fn is_configured(&self) -> bool {
        matches!(self, Self::Command(_))
    }
}

/// Outcome of the reload signal. Never fatal for the rule data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadStatus {
    Reloaded,
    Failed(ReloadError),
    /// The filter list was not written, so there was nothing to reload.
    Skipped,
    /// No reload mechanism; the engine reads the list on its next start.
    NotConfigured,
}

// =============================================================================
// Sinks
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("filter list: {0}")]
    Serialize(#[from] FilterListError),
    #[error("filter list: failed to write '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("page rules: failed to encode payload: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("page rules: {0}")]
    Storage(#[from] StorageError),
}

/// Per-sink results of one propagation.
#[derive(Debug)]
pub struct PropagationReport {
    /// Bytes written to the filter list file.
    pub filter_list: Result<usize, SinkError>,
    /// Number of element rules written to the page payload.
    pub page_rules: Result<usize, SinkError>,
    pub reload: ReloadStatus,
}

impl PropagationReport {
    pub fn is_ok(&self) -> bool {
        self.filter_list.is_ok() && self.page_rules.is_ok()
    }

    pub fn errors(&self) -> Vec<&SinkError> {
        [self.filter_list.as_ref().err(), self.page_rules.as_ref().err()]
            .into_iter()
            .flatten()
            .collect()
    }
}

impl fmt::Display for PropagationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let errors: Vec<String> = self.errors().iter().map(|e| e.to_string()).collect();
        if errors.is_empty() {
            write!(f, "all sinks written")
        } else {
            write!(f, "{}", errors.join("; "))
        }
    }
}

/// Writes both sinks for a rule set snapshot.
pub struct Propagator<P, R> {
    filter_list_path: PathBuf,
    page_store: P,
    reloader: R,
    engine_id: String,
    reload_timeout: Duration,
}

impl<P: KeyValueStore, R: EngineReloader> Propagator<P, R> {
    pub fn new(config: &SyncConfig, page_store: P, reloader: R) -> Self {
        Self {
            filter_list_path: config.filter_list_path(),
            page_store,
            reloader,
            engine_id: config.engine_id.clone(),
            reload_timeout: config.reload_timeout(),
        }
    }

    pub fn filter_list_path(&self) -> &Path {
        &self.filter_list_path
    }

    pub fn page_store(&self) -> &P {
        &self.page_store
    }

    /// Write both sinks, then signal the engine once the filter list is written.
    pub async fn propagate(&self, rules: &RuleSet) -> PropagationReport {
        let filter_list = self.write_filter_list(rules);
        if let Err(e) = &filter_list {
            log::warn!("Sink write failed: {}", e);
        }

        let page_rules = self.write_page_rules(rules);
        if let Err(e) = &page_rules {
            log::warn!("Sink write failed: {}", e);
        }

        let reload = if filter_list.is_ok() {
            self.signal_reload().await
        } else {
            ReloadStatus::Skipped
        };

        PropagationReport {
            filter_list,
            page_rules,
            reload,
        }
    }

    fn write_filter_list(&self, rules: &RuleSet) -> Result<usize, SinkError> {
        let json = build_filter_list(rules)?;
        write_atomic(&self.filter_list_path, json.as_bytes()).map_err(|source| SinkError::Write {
            path: self.filter_list_path.clone(),
            source,
        })?;

        log::info!(
            "Wrote filter list '{}' ({} hosts, {} element rules, {} bytes)",
            self.filter_list_path.display(),
            rules.hosts().len(),
            rules.element_rules().len(),
            json.len()
        );
        Ok(json.len())
    }

    fn write_page_rules(&self, rules: &RuleSet) -> Result<usize, SinkError> {
        let payload = encode_page_rules(rules.element_rules()).map_err(SinkError::Encode)?;
        self.page_store.put(PAGE_RULES_KEY, &payload)?;

        log::info!("Saved {} rules for the page script", rules.element_rules().len());
        Ok(rules.element_rules().len())
    }

    async fn signal_reload(&self) -> ReloadStatus {
        if !self.reloader.is_configured() {
            log::debug!("No reload command configured for '{}'", self.engine_id);
            return ReloadStatus::NotConfigured;
        }

        log::info!("Reloading content blocker '{}'", self.engine_id);

        let result = match tokio::time::timeout(self.reload_timeout, self.reloader.reload(&self.engine_id)).await {
            Ok(result) => result,
            Err(_) => Err(ReloadError::Timeout(self.reload_timeout.as_millis())),
        };

        match result {
            Ok(()) => {
                log::info!("Content blocker reloaded");
                ReloadStatus::Reloaded
            }
            Err(e) => {
                log::warn!("Reload failed: {} (rules are saved; make sure the content blocker is enabled)", e);
                ReloadStatus::Failed(e)
            }
        }
    }
}

/// What the content blocker loads: the filter list file, or an empty list
/// when nothing has been written yet.
pub fn load_filter_list(path: &Path) -> io::Result<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::warn!("Filter list '{}' does not exist, loading empty list", path.display());
            Ok(EMPTY_FILTER_LIST.to_string())
        }
        Err(e) => Err(e),
    }
}
