//! ExactBlocker rule store and propagation.
//!
//! The editing process owns a [`RuleStore`]. Each change is persisted to
//! private storage and then written to two shared sinks:
//!
//! - the JSON filter list loaded by the content blocker, followed by a
//!   reload signal;
//! - the element-rule payload answered by the page message channel.
//!
//! The three consumers never talk to each other directly; they converge on
//! the last successful write.

pub mod channel;
pub mod config;
pub mod propagate;
pub mod storage;
pub mod store;

pub use channel::{handle_message, PageRule, RulesResponse};
pub use config::SyncConfig;
pub use propagate::{
    load_filter_list, CommandReloader, ConfiguredReloader, EngineReloader, PropagationReport, Propagator,
    ReloadError, ReloadStatus, SinkError,
};
pub use storage::{DirStore, KeyValueStore, MemoryStore, StorageError};
pub use store::{RuleStore, StoreError, SubscriptionId};
