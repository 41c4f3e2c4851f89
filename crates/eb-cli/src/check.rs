//! URL check against a compiled filter list.
//!
//! Mirrors what the content blocker does with the list: block triggers are
//! regexes over the full URL, hide triggers are scoped by `if-domain`.

use regex::Regex;

use eb_compiler::filter_list::{ActionType, FilterRule};
use eb_core::matcher::{applicable_rules, domain_matches};
use eb_core::types::ElementRule;
use eb_core::url::extract_host;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CheckReport {
    pub host: Option<String>,
    /// `url-filter` of every block rule matching the URL.
    pub blocked_by: Vec<String>,
    /// Selectors hidden by the compiled list on this host.
    pub hidden_selectors: Vec<String>,
    /// Stored element rules the page script would apply.
    pub page_rules: Vec<ElementRule>,
}

impl CheckReport {
    pub fn is_blocked(&self) -> bool {
        !self.blocked_by.is_empty()
    }
}

pub fn check_url(
    filter_list: &[FilterRule],
    element_rules: &[ElementRule],
    url: &str,
) -> Result<CheckReport, regex::Error> {
    let host = extract_host(url);
    let mut report = CheckReport {
        host: host.map(str::to_string),
        ..CheckReport::default()
    };

    for rule in filter_list {
        match rule.action.kind {
            ActionType::Block => {
                let pattern = Regex::new(&rule.trigger.url_filter)?;
                if pattern.is_match(url) {
                    report.blocked_by.push(rule.trigger.url_filter.clone());
                }
            }
            ActionType::CssDisplayNone => {
                let (Some(host), Some(selector)) = (host, rule.action.selector.as_ref()) else {
                    continue;
                };
                let in_scope = match &rule.trigger.if_domain {
                    Some(domains) => domains
                        .iter()
                        .any(|domain| domain_matches(domain.trim_start_matches('*'), host)),
                    None => true,
                };
                if in_scope {
                    report.hidden_selectors.push(selector.clone());
                }
            }
        }
    }

    if let Some(host) = host {
        report.page_rules = applicable_rules(element_rules, host).into_iter().cloned().collect();
    }

    Ok(report)
}
