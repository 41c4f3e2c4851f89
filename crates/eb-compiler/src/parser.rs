use eb_core::types::{ElementRule, RULE_DELIMITER};

/// Outcome of parsing a rule document, with counts for what was dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseReport {
    pub rules: Vec<ElementRule>,
    pub lines: usize,
    pub ignored: usize,
    pub malformed: usize,
}

/// Parse a single `domain##selector` line.
///
/// Blank lines, `!` comments and malformed lines yield `None`; parsing never
/// fails hard so a bad line cannot abort an import.
pub fn parse_line(line: &str) -> Option<ElementRule> {
    let line = line.trim();
    if line.is_empty() || is_comment_line(line) {
        return None;
    }
    parse_rule(line)
}

/// Parse every line of `text`, keeping successful rules in source order.
///
/// Duplicates are kept; the rule store drops them on insert.
pub fn parse_document(text: &str) -> Vec<ElementRule> {
    text.lines().filter_map(parse_line).collect()
}

pub fn parse_document_with_stats(text: &str) -> ParseReport {
    let mut report = ParseReport::default();

    for raw_line in text.lines() {
        report.lines += 1;

        let line = raw_line.trim();
        if line.is_empty() || is_comment_line(line) {
            report.ignored += 1;
            continue;
        }

        match parse_rule(line) {
            Some(rule) => report.rules.push(rule),
            None => {
                log::debug!("Skipping malformed rule line {}: {:?}", report.lines, line);
                report.malformed += 1;
            }
        }
    }

    report
}

/// Render rules back to the text format, one per line.
pub fn format_document<'a>(rules: impl IntoIterator<Item = &'a ElementRule>) -> String {
    let mut out = String::new();
    for rule in rules {
        out.push_str(&rule.key());
        out.push('\n');
    }
    out
}

fn is_comment_line(line: &str) -> bool {
    line.starts_with('!')
}

fn parse_rule(line: &str) -> Option<ElementRule> {
    let mut parts = line.split(RULE_DELIMITER);
    let domain = parts.next()?;
    let selector = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    ElementRule::new(domain, selector).ok()
}
