//! ExactBlocker Filter List Compiler
//!
//! This crate parses `domain##selector` rule text and compiles a rule set into
//! the JSON filter list consumed by the platform content blocker.

pub mod builder;
pub mod filter_list;
pub mod parser;

pub use builder::{compile, escape_pattern, if_domain_for, url_filter_for_host, CompiledFilterEntry};
pub use filter_list::{build_filter_list, serialize_entries, FilterListError, EMPTY_FILTER_LIST};
pub use parser::{format_document, parse_document, parse_document_with_stats, parse_line, ParseReport};
