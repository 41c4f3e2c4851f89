//! Content blocker filter list wire format
//!
//! The filter list is a JSON array of `{trigger, action}` objects:
//!
//! ```json
//! [
//!   { "trigger": { "url-filter": "^https?://(www\\.)?example\\.com/?$", "resource-type": ["document"] },
//!     "action": { "type": "block" } },
//!   { "trigger": { "url-filter": ".*", "if-domain": ["*example.com"] },
//!     "action": { "type": "css-display-none", "selector": ".ad-banner" } }
//! ]
//! ```

use serde::{Deserialize, Serialize};

use eb_core::types::RuleSet;

use crate::builder::{compile, url_filter_for_host, CompiledFilterEntry};

/// What the engine loads when no filter list has been written yet.
pub const EMPTY_FILTER_LIST: &str = "[]";

/// `url-filter` used by hide rules: every URL, narrowed by `if-domain`.
pub const MATCH_ALL_URLS: &str = ".*";

/// Resource type blocked by host rules.
pub const DOCUMENT_RESOURCE: &str = "document";

/// Error type for filter list encoding.
#[derive(Debug, thiserror::Error)]
pub enum FilterListError {
    #[error("Failed to serialize filter list: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("Invalid filter list: {0}")]
    Parse(#[source] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    pub trigger: Trigger,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(rename = "url-filter")]
    pub url_filter: String,
    #[serde(rename = "resource-type", skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<Vec<String>>,
    #[serde(rename = "if-domain", skip_serializing_if = "Option::is_none")]
    pub if_domain: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionType {
    Block,
    CssDisplayNone,
}

impl From<&CompiledFilterEntry> for FilterRule {
    fn from(entry: &CompiledFilterEntry) -> Self {
        match entry {
            CompiledFilterEntry::Block { hostname } => Self {
                trigger: Trigger {
                    url_filter: url_filter_for_host(hostname),
                    resource_type: Some(vec![DOCUMENT_RESOURCE.to_string()]),
                    if_domain: None,
                },
                action: Action {
                    kind: ActionType::Block,
                    selector: None,
                },
            },
            CompiledFilterEntry::HideCss { domain_pattern, selector } => Self {
                trigger: Trigger {
                    url_filter: MATCH_ALL_URLS.to_string(),
                    resource_type: None,
                    if_domain: Some(vec![domain_pattern.clone()]),
                },
                action: Action {
                    kind: ActionType::CssDisplayNone,
                    selector: Some(selector.clone()),
                },
            },
        }
    }
}

/// Serialize compiled entries to the pretty-printed JSON filter list.
pub fn serialize_entries(entries: &[CompiledFilterEntry]) -> Result<String, FilterListError> {
    let rules: Vec<FilterRule> = entries.iter().map(FilterRule::from).collect();
    serde_json::to_string_pretty(&rules).map_err(FilterListError::Serialize)
}

/// Compile and serialize a rule set in one step.
pub fn build_filter_list(rules: &RuleSet) -> Result<String, FilterListError> {
    serialize_entries(&compile(rules))
}

/// Read a filter list back, as the content blocker would.
pub fn parse_filter_list(text: &str) -> Result<Vec<FilterRule>, FilterListError> {
    serde_json::from_str(text).map_err(FilterListError::Parse)
}
