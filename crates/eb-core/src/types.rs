//! Core type definitions for ExactBlocker
//!
//! These types are the single vocabulary shared by the parser, the rule
//! store, the filter compiler and the in-page consumer.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Separator between the domain and the selector of an element rule.
pub const RULE_DELIMITER: &str = "##";

/// Error type for rule construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    #[error("Hostname is empty")]
    EmptyHost,
    #[error("Domain is empty")]
    EmptyDomain,
    #[error("Selector is empty")]
    EmptySelector,
    #[error("Domain '{0}' would make the rule key ambiguous")]
    AmbiguousDomain(String),
}

// =============================================================================
// Host Rules
// =============================================================================

/// Block rule for an entire site, identified by its exact hostname.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HostRule(String);

impl HostRule {
    /// Create a host rule from user input. Surrounding whitespace is removed.
    pub fn new(hostname: &str) -> Result<Self, RuleError> {
        let trimmed = hostname.trim();
        if trimmed.is_empty() {
            return Err(RuleError::EmptyHost);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn hostname(&self) -> &str {
        &self.0
    }

    /// Lowercased copy, used when the store folds hostname case.
    pub fn to_ascii_lowercase(&self) -> Self {
        Self(self.0.to_ascii_lowercase())
    }
}

impl TryFrom<String> for HostRule {
    type Error = RuleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<HostRule> for String {
    fn from(rule: HostRule) -> Self {
        rule.0
    }
}

impl fmt::Display for HostRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Element Rules
// =============================================================================

/// Hide rule for elements matching `selector` on pages of `domain`.
///
/// The domain never contains `##` and never ends with `#`, so the key
/// `domain##selector` can always be split back into the original pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawElementRule")]
pub struct ElementRule {
    domain: String,
    selector: String,
}

#[derive(Deserialize)]
struct RawElementRule {
    domain: String,
    selector: String,
}

impl ElementRule {
    /// Create an element rule. Both parts are trimmed and must be non-empty.
    pub fn new(domain: &str, selector: &str) -> Result<Self, RuleError> {
        let domain = domain.trim();
        let selector = selector.trim();

        if domain.is_empty() {
            return Err(RuleError::EmptyDomain);
        }
        if selector.is_empty() {
            return Err(RuleError::EmptySelector);
        }
        if domain.contains(RULE_DELIMITER) || domain.ends_with('#') {
            return Err(RuleError::AmbiguousDomain(domain.to_string()));
        }

        Ok(Self {
            domain: domain.to_string(),
            selector: selector.to_string(),
        })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    /// Stable identifier used for list operations: `domain##selector`.
    pub fn key(&self) -> String {
        format!("{}{}{}", self.domain, RULE_DELIMITER, self.selector)
    }

    /// Rebuild a rule from a key produced by [`ElementRule::key`].
    pub fn from_key(key: &str) -> Option<Self> {
        let (domain, selector) = key.split_once(RULE_DELIMITER)?;
        Self::new(domain, selector).ok()
    }
}

impl TryFrom<RawElementRule> for ElementRule {
    type Error = RuleError;

    fn try_from(raw: RawElementRule) -> Result<Self, Self::Error> {
        Self::new(&raw.domain, &raw.selector)
    }
}

impl fmt::Display for ElementRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.domain, RULE_DELIMITER, self.selector)
    }
}

// =============================================================================
// Rule Set
// =============================================================================

/// Ordered, duplicate-free collection of host and element rules.
///
/// Insertion order is the order entries are compiled in. The hash sets mirror
/// the vectors for membership checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    hosts: Vec<HostRule>,
    element_rules: Vec<ElementRule>,
    host_index: HashSet<HostRule>,
    element_index: HashSet<ElementRule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a rule set from possibly repeated rules, keeping first occurrences.
    pub fn from_parts(
        hosts: impl IntoIterator<Item = HostRule>,
        element_rules: impl IntoIterator<Item = ElementRule>,
    ) -> Self {
        let mut set = Self::new();
        for host in hosts {
            set.insert_host(host);
        }
        for rule in element_rules {
            set.insert_element_rule(rule);
        }
        set
    }

    pub fn hosts(&self) -> &[HostRule] {
        &self.hosts
    }

    pub fn element_rules(&self) -> &[ElementRule] {
        &self.element_rules
    }

    pub fn contains_host(&self, host: &HostRule) -> bool {
        self.host_index.contains(host)
    }

    pub fn contains_element_rule(&self, rule: &ElementRule) -> bool {
        self.element_index.contains(rule)
    }

    /// Append a host rule. Returns false if it was already present.
    pub fn insert_host(&mut self, host: HostRule) -> bool {
        if !self.host_index.insert(host.clone()) {
            return false;
        }
        self.hosts.push(host);
        true
    }

    /// Append an element rule. Returns false if it was already present.
    pub fn insert_element_rule(&mut self, rule: ElementRule) -> bool {
        if !self.element_index.insert(rule.clone()) {
            return false;
        }
        self.element_rules.push(rule);
        true
    }

    /// Remove every host rule equal to `host`. Returns the number removed.
    pub fn remove_host(&mut self, host: &HostRule) -> usize {
        if !self.host_index.remove(host) {
            return 0;
        }
        let before = self.hosts.len();
        self.hosts.retain(|h| h != host);
        before - self.hosts.len()
    }

    /// Remove every element rule equal to `rule`. Returns the number removed.
    pub fn remove_element_rule(&mut self, rule: &ElementRule) -> usize {
        if !self.element_index.remove(rule) {
            return 0;
        }
        let before = self.element_rules.len();
        self.element_rules.retain(|r| r != rule);
        before - self.element_rules.len()
    }

    /// Drop all element rules; host rules are kept. Returns the number removed.
    pub fn clear_element_rules(&mut self) -> usize {
        let removed = self.element_rules.len();
        self.element_rules.clear();
        self.element_index.clear();
        removed
    }

    pub fn len(&self) -> usize {
        self.hosts.len() + self.element_rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.element_rules.is_empty()
    }
}
