//! Rule Store
//!
//! The single owner of the user's rules. Every change goes through the
//! methods below, which persist the affected part of the store and then
//! propagate the new state to both sinks before returning.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

use eb_compiler::parser::{format_document, parse_document_with_stats};
use eb_core::types::{ElementRule, HostRule, RuleSet};

use crate::config::{SyncConfig, ELEMENT_RULES_KEY, HOSTS_KEY};
use crate::propagate::{EngineReloader, PropagationReport, Propagator, ReloadStatus};
use crate::storage::{KeyValueStore, StorageError};

/// Error type for rule store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to persist rules: {0}")]
    Storage(#[from] StorageError),
    #[error("Failed to encode rules: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("Stored value '{key}' is corrupt: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to read import source '{}': {source}", path.display())]
    ImportSource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The rules were persisted; at least one sink could not be updated.
    #[error("Rules saved, but propagation failed: {0}")]
    Propagation(Box<PropagationReport>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Observer = Box<dyn Fn(&RuleSet) + Send>;

#[derive(Debug, Clone, Copy)]
enum Part {
    Hosts,
    ElementRules,
    All,
}

pub struct RuleStore<S, P, R> {
    rules: RuleSet,
    storage: S,
    propagator: Propagator<P, R>,
    normalize_host_case: bool,
    observers: Vec<(SubscriptionId, Observer)>,
    next_subscription: u64,
    last_reload: Option<ReloadStatus>,
}

impl<S, P, R> RuleStore<S, P, R>
where
    S: KeyValueStore,
    P: KeyValueStore,
    R: EngineReloader,
{
    /// Rehydrate the store from `storage`. Missing keys mean no rules.
    pub fn open(config: &SyncConfig, storage: S, propagator: Propagator<P, R>) -> Result<Self, StoreError> {
        let stored_hosts: Vec<HostRule> = load_value(&storage, HOSTS_KEY)?.unwrap_or_default();
        let element_rules: Vec<ElementRule> = load_value(&storage, ELEMENT_RULES_KEY)?.unwrap_or_default();

        let hosts: Vec<HostRule> = if config.normalize_host_case {
            stored_hosts.iter().map(HostRule::to_ascii_lowercase).collect()
        } else {
            stored_hosts.clone()
        };
        let rules = RuleSet::from_parts(hosts, element_rules);

        log::info!(
            "Loaded {} host rules and {} element rules",
            rules.hosts().len(),
            rules.element_rules().len()
        );

        let store = Self {
            rules,
            storage,
            propagator,
            normalize_host_case: config.normalize_host_case,
            observers: Vec::new(),
            next_subscription: 0,
            last_reload: None,
        };

        // Hosts saved before case normalization was enabled.
        if store.rules.hosts() != stored_hosts.as_slice() {
            log::info!(
                "Normalized stored host rules: {} -> {}",
                stored_hosts.len(),
                store.rules.hosts().len()
            );
            store.persist(Part::Hosts)?;
        }

        Ok(store)
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn propagator(&self) -> &Propagator<P, R> {
        &self.propagator
    }

    /// Reload outcome of the most recent propagation.
    pub fn last_reload(&self) -> Option<&ReloadStatus> {
        self.last_reload.as_ref()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} website rules, {} element rules",
            self.rules.hosts().len(),
            self.rules.element_rules().len()
        )
    }

    /// Register a callback invoked with the new rules after every change.
    pub fn subscribe(&mut self, observer: impl Fn(&RuleSet) + Send + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(existing, _)| *existing != id);
        before != self.observers.len()
    }

    // =========================================================================
    // Host rules
    // =========================================================================

    /// Add a host rule. Empty input and known hosts are ignored.
    pub async fn add_host(&mut self, name: &str) -> Result<bool, StoreError> {
        let Some(host) = self.host_rule(name) else {
            return Ok(false);
        };
        if self.rules.contains_host(&host) {
            return Ok(false);
        }

        let previous = self.rules.clone();
        self.rules.insert_host(host);
        self.commit(previous, Part::Hosts).await?;
        Ok(true)
    }

    pub async fn remove_host(&mut self, name: &str) -> Result<usize, StoreError> {
        let Some(host) = self.host_rule(name) else {
            return Ok(0);
        };

        let previous = self.rules.clone();
        let removed = self.rules.remove_host(&host);
        if removed > 0 {
            self.commit(previous, Part::Hosts).await?;
        }
        Ok(removed)
    }

    // =========================================================================
    // Element rules
    // =========================================================================

    pub async fn add_element_rule(&mut self, rule: ElementRule) -> Result<bool, StoreError> {
        if self.rules.contains_element_rule(&rule) {
            return Ok(false);
        }

        let previous = self.rules.clone();
        self.rules.insert_element_rule(rule);
        self.commit(previous, Part::ElementRules).await?;
        Ok(true)
    }

    pub async fn remove_element_rule(&mut self, rule: &ElementRule) -> Result<usize, StoreError> {
        let previous = self.rules.clone();
        let removed = self.rules.remove_element_rule(rule);
        if removed > 0 {
            self.commit(previous, Part::ElementRules).await?;
        }
        Ok(removed)
    }

    /// Import `domain##selector` lines. Returns how many rules were new.
    pub async fn import_element_rules(&mut self, text: &str) -> Result<usize, StoreError> {
        let report = parse_document_with_stats(text);
        let parsed = report.rules.len();

        let previous = self.rules.clone();
        let mut added = 0usize;
        for rule in report.rules {
            if self.rules.insert_element_rule(rule) {
                added += 1;
            }
        }

        log::info!(
            "Imported {} new rules ({} parsed, {} already present, {} malformed lines skipped)",
            added,
            parsed,
            parsed - added,
            report.malformed
        );

        if added > 0 {
            self.commit(previous, Part::ElementRules).await?;
        }
        Ok(added)
    }

    /// Import from a rule file. The store is untouched if it cannot be read.
    pub async fn import_element_rules_from(&mut self, path: &Path) -> Result<usize, StoreError> {
        let text = fs::read_to_string(path).map_err(|source| StoreError::ImportSource {
            path: path.to_path_buf(),
            source,
        })?;
        self.import_element_rules(&text).await
    }

    /// Remove every element rule. Host rules stay.
    pub async fn clear_element_rules(&mut self) -> Result<usize, StoreError> {
        let previous = self.rules.clone();
        let removed = self.rules.clear_element_rules();
        if removed > 0 {
            self.commit(previous, Part::ElementRules).await?;
        }
        Ok(removed)
    }

    pub fn export_element_rules(&self) -> String {
        format_document(self.rules.element_rules())
    }

    /// Persist and propagate the current state without changing it.
    pub async fn sync(&mut self) -> Result<(), StoreError> {
        self.persist(Part::All)?;
        self.propagate().await
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn host_rule(&self, name: &str) -> Option<HostRule> {
        let host = HostRule::new(name).ok()?;
        if self.normalize_host_case {
            Some(host.to_ascii_lowercase())
        } else {
            Some(host)
        }
    }

    async fn commit(&mut self, previous: RuleSet, part: Part) -> Result<(), StoreError> {
        if let Err(e) = self.persist(part) {
            log::warn!("Keeping previous rules, persisting failed: {}", e);
            self.rules = previous;
            return Err(e);
        }

        for (_, observer) in &self.observers {
            observer(&self.rules);
        }

        self.propagate().await
    }

    fn persist(&self, part: Part) -> Result<(), StoreError> {
        if matches!(part, Part::Hosts | Part::All) {
            let json = serde_json::to_string(self.rules.hosts()).map_err(StoreError::Encode)?;
            self.storage.put(HOSTS_KEY, &json)?;
        }
        if matches!(part, Part::ElementRules | Part::All) {
            let json = serde_json::to_string(self.rules.element_rules()).map_err(StoreError::Encode)?;
            self.storage.put(ELEMENT_RULES_KEY, &json)?;
        }
        Ok(())
    }

    async fn propagate(&mut self) -> Result<(), StoreError> {
        let report = self.propagator.propagate(&self.rules).await;
        self.last_reload = Some(report.reload.clone());

        if report.is_ok() {
            Ok(())
        } else {
            Err(StoreError::Propagation(Box::new(report)))
        }
    }
}

fn load_value<S: KeyValueStore, T: DeserializeOwned>(storage: &S, key: &str) -> Result<Option<T>, StoreError> {
    let Some(text) = storage.get(key)? else {
        return Ok(None);
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|source| StoreError::Corrupt {
            key: key.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use eb_compiler::filter_list::parse_filter_list;

    use super::*;
    use crate::channel::read_page_rules;
    use crate::propagate::ConfiguredReloader;
    use crate::storage::{DirStore, MemoryStore};

    type TestStore = RuleStore<DirStore, MemoryStore, ConfiguredReloader>;

    struct ReadOnlyStore;

    impl KeyValueStore for ReadOnlyStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Ok(None)
        }

        fn put(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("read-only".into()))
        }
    }

    fn config_in(dir: &Path) -> SyncConfig {
        SyncConfig {
            data_dir: dir.join("data"),
            group_dir: dir.join("group"),
            ..SyncConfig::default()
        }
    }

    fn open_store(config: &SyncConfig) -> TestStore {
        let propagator = Propagator::new(config, MemoryStore::new(), ConfiguredReloader::Disabled);
        RuleStore::open(config, DirStore::new(&config.data_dir), propagator).expect("store should open")
    }

    fn rule(domain: &str, selector: &str) -> ElementRule {
        ElementRule::new(domain, selector).unwrap()
    }

    #[tokio::test]
    async fn adds_hosts_once_and_ignores_blank_input() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&config_in(dir.path()));

        assert!(store.add_host("  reddit.com ").await.unwrap());
        assert!(!store.add_host("reddit.com").await.unwrap());
        assert!(!store.add_host("   ").await.unwrap());
        assert!(!store.add_host("Reddit.COM").await.unwrap());

        let hosts: Vec<&str> = store.rules().hosts().iter().map(|h| h.hostname()).collect();
        assert_eq!(hosts, vec!["reddit.com"]);
    }

    #[tokio::test]
    async fn keeps_host_case_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig {
            normalize_host_case: false,
            ..config_in(dir.path())
        };
        let mut store = open_store(&config);

        assert!(store.add_host("Example.com").await.unwrap());
        assert!(store.add_host("example.com").await.unwrap());
        assert_eq!(store.rules().hosts().len(), 2);
    }

    #[tokio::test]
    async fn element_rules_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&config_in(dir.path()));

        assert!(store.add_element_rule(rule("youtube.com", "#content")).await.unwrap());
        assert!(!store.add_element_rule(rule("youtube.com", "#content")).await.unwrap());
        assert_eq!(store.rules().element_rules().len(), 1);

        assert_eq!(store.remove_element_rule(&rule("youtube.com", "#content")).await.unwrap(), 1);
        assert_eq!(store.remove_element_rule(&rule("youtube.com", "#content")).await.unwrap(), 0);
        assert!(store.rules().is_empty());
    }

    #[tokio::test]
    async fn import_counts_only_new_rules() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&config_in(dir.path()));
        let text = "! list\nyoutube.com###content\nreddit.com##.promoted\nyoutube.com###content\nbad line\n";

        assert_eq!(store.import_element_rules(text).await.unwrap(), 2);
        assert_eq!(store.import_element_rules(text).await.unwrap(), 0);

        store.add_element_rule(rule("x.com", ".y")).await.unwrap();
        assert_eq!(store.import_element_rules("x.com##.y\nz.com##.w").await.unwrap(), 1);
        assert_eq!(store.rules().element_rules().len(), 4);
    }

    #[tokio::test]
    async fn import_from_missing_file_leaves_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&config_in(dir.path()));
        store.add_host("a.com").await.unwrap();

        let err = store
            .import_element_rules_from(&dir.path().join("missing.txt"))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::ImportSource { .. }));
        assert!(err.to_string().contains("missing.txt"));
        assert_eq!(store.rules().len(), 1);
    }

    #[tokio::test]
    async fn import_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.txt");
        fs::write(&path, "youtube.com###content\n").unwrap();

        let mut store = open_store(&config_in(dir.path()));
        assert_eq!(store.import_element_rules_from(&path).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn clear_keeps_hosts() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&config_in(dir.path()));
        store.add_host("a.com").await.unwrap();
        store.import_element_rules("x.com##.a\ny.com##.b").await.unwrap();

        assert_eq!(store.clear_element_rules().await.unwrap(), 2);
        assert_eq!(store.clear_element_rules().await.unwrap(), 0);
        assert_eq!(store.rules().hosts().len(), 1);
        assert_eq!(store.summary(), "1 website rules, 0 element rules");
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        {
            let mut store = open_store(&config);
            store.add_host("b.com").await.unwrap();
            store.add_host("a.com").await.unwrap();
            store.add_element_rule(rule("www.example.com", ".ad")).await.unwrap();
            store.remove_host("b.com").await.unwrap();
        }

        let store = open_store(&config);
        let hosts: Vec<&str> = store.rules().hosts().iter().map(|h| h.hostname()).collect();
        assert_eq!(hosts, vec!["a.com"]);
        assert_eq!(store.rules().element_rules(), &[rule("www.example.com", ".ad")]);
    }

    #[tokio::test]
    async fn stored_hosts_are_normalized_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let storage = DirStore::new(&config.data_dir);
        storage.put(HOSTS_KEY, r#"["Reddit.com","reddit.com","News.example.com"]"#).unwrap();

        let mut store = open_store(&config);
        let hosts: Vec<&str> = store.rules().hosts().iter().map(|h| h.hostname()).collect();
        assert_eq!(hosts, vec!["reddit.com", "news.example.com"]);
        assert_eq!(
            storage.get(HOSTS_KEY).unwrap().as_deref(),
            Some(r#"["reddit.com","news.example.com"]"#)
        );

        assert!(!store.add_host("reddit.com").await.unwrap());
        assert_eq!(store.remove_host("Reddit.com").await.unwrap(), 1);
        assert_eq!(store.rules().hosts().len(), 1);
    }

    #[tokio::test]
    async fn stored_host_case_is_kept_when_not_normalizing() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig {
            normalize_host_case: false,
            ..config_in(dir.path())
        };
        let storage = DirStore::new(&config.data_dir);
        storage.put(HOSTS_KEY, r#"["Reddit.com"]"#).unwrap();

        let store = open_store(&config);
        assert_eq!(store.rules().hosts()[0].hostname(), "Reddit.com");
    }

    #[tokio::test]
    async fn mutations_propagate_to_both_sinks() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let mut store = open_store(&config);

        store.add_host("reddit.com").await.unwrap();
        store.add_element_rule(rule("youtube.com", "#content")).await.unwrap();

        let list = fs::read_to_string(config.filter_list_path()).unwrap();
        assert_eq!(parse_filter_list(&list).unwrap().len(), 2);

        let page = read_page_rules(store.propagator().page_store()).unwrap().unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(store.last_reload(), Some(&ReloadStatus::NotConfigured));
    }

    #[tokio::test]
    async fn corrupt_storage_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let storage = DirStore::new(&config.data_dir);
        storage.put(ELEMENT_RULES_KEY, "[{\"domain\": 1}]").unwrap();

        let propagator = Propagator::new(&config, MemoryStore::new(), ConfiguredReloader::Disabled);
        let result = RuleStore::open(&config, storage, propagator);
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn failed_persist_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let propagator = Propagator::new(&config, MemoryStore::new(), ConfiguredReloader::Disabled);
        let mut store = RuleStore::open(&config, ReadOnlyStore, propagator).unwrap();

        let err = store.add_host("a.com").await.unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)));
        assert!(store.rules().is_empty());
        assert!(!config.filter_list_path().exists());
    }

    #[tokio::test]
    async fn propagation_failure_keeps_saved_state() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let propagator = Propagator::new(&config, ReadOnlyStore, ConfiguredReloader::Disabled);
        let mut store = RuleStore::open(&config, DirStore::new(&config.data_dir), propagator).unwrap();

        let err = store.add_element_rule(rule("x.com", ".a")).await.unwrap_err();
        match err {
            StoreError::Propagation(report) => {
                assert!(report.filter_list.is_ok());
                assert!(report.page_rules.is_err());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.rules().element_rules().len(), 1);
        assert!(config.filter_list_path().exists());
    }

    #[tokio::test]
    async fn observers_see_each_change_until_unsubscribed() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&config_in(dir.path()));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let id = store.subscribe(move |rules| sink.lock().unwrap().push(rules.len()));

        store.add_host("a.com").await.unwrap();
        store.add_host("a.com").await.unwrap();
        store.add_element_rule(rule("x.com", ".a")).await.unwrap();
        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store.add_host("b.com").await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn export_matches_text_format() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&config_in(dir.path()));
        store.import_element_rules("youtube.com###content\n").await.unwrap();

        assert_eq!(store.export_element_rules(), "youtube.com###content\n");
    }

    #[tokio::test]
    async fn sync_writes_sinks_for_unchanged_state() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let mut store = open_store(&config);

        store.sync().await.unwrap();
        assert_eq!(fs::read_to_string(config.filter_list_path()).unwrap(), "[]");
    }
}
