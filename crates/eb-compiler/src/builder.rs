use eb_core::matcher::strip_www;
use eb_core::types::RuleSet;

/// Characters with special meaning in a content blocker `url-filter`.
const REGEX_META: &[char] = &['\\', '^', '$', '.', '|', '?', '*', '+', '(', ')', '[', ']', '{', '}'];

/// One compiled instruction for the content blocker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompiledFilterEntry {
    /// Block the top-level document of exactly this host.
    Block { hostname: String },
    /// Hide `selector` on pages whose domain matches `domain_pattern`.
    HideCss { domain_pattern: String, selector: String },
}

impl CompiledFilterEntry {
    pub fn is_block(&self) -> bool {
        matches!(self, Self::Block { .. })
    }
}

/// Compile a rule set into filter entries.
///
/// All block entries come first, then all hide entries; each group keeps the
/// store's insertion order.
pub fn compile(rules: &RuleSet) -> Vec<CompiledFilterEntry> {
    let mut entries = Vec::with_capacity(rules.len());

    for host in rules.hosts() {
        entries.push(CompiledFilterEntry::Block {
            hostname: host.hostname().to_string(),
        });
    }

    for rule in rules.element_rules() {
        let domain_pattern = if_domain_for(rule.domain());
        log::debug!(
            "Compiling element rule {} -> {} ## {}",
            rule.domain(),
            domain_pattern,
            rule.selector()
        );
        entries.push(CompiledFilterEntry::HideCss {
            domain_pattern,
            selector: rule.selector().to_string(),
        });
    }

    entries
}

/// Escape every regex metacharacter in `literal`.
pub fn escape_pattern(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len() + 8);
    for ch in literal.chars() {
        if REGEX_META.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// `url-filter` matching only the root document of `hostname`, with or
/// without a leading `www.` and an optional trailing slash.
pub fn url_filter_for_host(hostname: &str) -> String {
    format!("^https?://(www\\.)?{}/?$", escape_pattern(hostname))
}

/// `if-domain` pattern for an element rule domain: `*` plus the domain with
/// any leading `www.` removed.
pub fn if_domain_for(domain: &str) -> String {
    format!("*{}", strip_www(domain))
}
