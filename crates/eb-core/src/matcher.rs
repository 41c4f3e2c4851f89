//! Page Rule Matching
//!
//! Decides which element rules apply to the page currently loaded and turns
//! them into the stylesheet injected by the in-page script.

use crate::types::ElementRule;

/// Declaration applied to every hidden selector.
pub const HIDE_DECLARATION: &str = "display: none !important;";

const WWW_PREFIX: &str = "www.";

/// Strip a single leading `www.` label.
#[inline]
pub fn strip_www(host: &str) -> &str {
    match host.get(..WWW_PREFIX.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(WWW_PREFIX) => &host[WWW_PREFIX.len()..],
        _ => host,
    }
}

/// Does a rule for `rule_domain` apply to a page on `hostname`?
///
/// Both sides ignore a leading `www.`. The page matches when it is the rule
/// domain itself or any subdomain of it. Comparison is ASCII case-insensitive.
pub fn domain_matches(rule_domain: &str, hostname: &str) -> bool {
    let domain = strip_www(rule_domain.trim()).to_ascii_lowercase();
    let host = strip_www(hostname.trim()).to_ascii_lowercase();

    if domain.is_empty() || host.is_empty() {
        return false;
    }

    if host == domain {
        return true;
    }

    host.len() > domain.len()
        && host.ends_with(domain.as_str())
        && host.as_bytes()[host.len() - domain.len() - 1] == b'.'
}

/// Rules from `rules` that apply to `hostname`, in their original order.
pub fn applicable_rules<'a>(rules: &'a [ElementRule], hostname: &str) -> Vec<&'a ElementRule> {
    rules
        .iter()
        .filter(|rule| domain_matches(rule.domain(), hostname))
        .collect()
}

/// One `selector { display: none !important; }` line per rule.
pub fn build_hide_css(rules: &[&ElementRule]) -> String {
    rules
        .iter()
        .map(|rule| format!("{} {{ {} }}", rule.selector(), HIDE_DECLARATION))
        .collect::<Vec<_>>()
        .join("\n")
}
