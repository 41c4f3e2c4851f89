//! ExactBlocker Core Library
//!
//! This crate holds the rule model shared by every ExactBlocker component and
//! the page-side matching logic used to decide which element rules apply to a
//! loaded page.
//!
//! # Modules
//!
//! - `types`: Host rules, element rules and the ordered rule set
//! - `matcher`: Domain matching and hide-stylesheet generation
//! - `rescan`: Single-slot scheduling for debounced DOM rescans
//! - `url`: Hostname extraction without a full URL parser

pub mod matcher;
pub mod rescan;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use matcher::{applicable_rules, build_hide_css, domain_matches, strip_www};
pub use rescan::RescanSlot;
pub use types::{ElementRule, HostRule, RuleError, RuleSet, RULE_DELIMITER};
