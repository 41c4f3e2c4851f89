//! Message channel responder for the in-page script.
//!
//! The page script sends `{ "type": "getRules" }` once per page load and
//! receives the element rules stored by the propagation layer. A missing
//! payload is answered with zero rules, never with an error.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use eb_core::types::ElementRule;

use crate::config::PAGE_RULES_KEY;
use crate::storage::{KeyValueStore, StorageError};

/// Element rule as seen by the page script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PageRule {
    pub domain: String,
    pub selector: String,
}

impl From<&ElementRule> for PageRule {
    fn from(rule: &ElementRule) -> Self {
        Self {
            domain: rule.domain().to_string(),
            selector: rule.selector().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChannelRequest {
    #[serde(rename = "getRules")]
    GetRules,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ResponseStatus {
    Success,
    NoData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RulesResponse {
    pub status: ResponseStatus,
    pub rules: Vec<PageRule>,
}

impl RulesResponse {
    pub fn empty() -> Self {
        Self {
            status: ResponseStatus::NoData,
            rules: Vec::new(),
        }
    }
}

/// Encode element rules as the page payload: `[{domain, selector}, ...]`.
pub fn encode_page_rules(rules: &[ElementRule]) -> Result<String, serde_json::Error> {
    let payload: Vec<PageRule> = rules.iter().map(PageRule::from).collect();
    serde_json::to_string(&payload)
}

/// Read the stored page payload. `Ok(None)` when nothing was written yet.
pub fn read_page_rules<S: KeyValueStore + ?Sized>(
    store: &S,
) -> Result<Option<Vec<PageRule>>, StorageError> {
    let Some(payload) = store.get(PAGE_RULES_KEY)? else {
        return Ok(None);
    };

    match serde_json::from_str(&payload) {
        Ok(rules) => Ok(Some(rules)),
        Err(e) => {
            log::warn!("Ignoring unreadable page rule payload: {}", e);
            Ok(None)
        }
    }
}

/// Answer one channel request. Unknown requests get no response.
pub fn handle_message<S: KeyValueStore + ?Sized>(request: &str, store: &S) -> Option<RulesResponse> {
    let request: ChannelRequest = match serde_json::from_str(request) {
        Ok(request) => request,
        Err(e) => {
            log::debug!("Ignoring channel request: {}", e);
            return None;
        }
    };

    match request {
        ChannelRequest::GetRules => match read_page_rules(store) {
            Ok(Some(rules)) => {
                log::debug!("Answering getRules with {} rules", rules.len());
                Some(RulesResponse {
                    status: ResponseStatus::Success,
                    rules,
                })
            }
            Ok(None) => {
                log::info!("No page rules stored yet");
                Some(RulesResponse::empty())
            }
            Err(e) => {
                log::warn!("Failed to read page rules: {}", e);
                Some(RulesResponse::empty())
            }
        },
    }
}
