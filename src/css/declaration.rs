//! Declaration blocks (`prop: value; ...`), shared by rule bodies and inline
//! `style` attributes.

use super::{collapse_whitespace, find_unquoted};

/// One `property: value` pair. `value` keeps any `!important` suffix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Declaration {
    pub property: String,
    pub value: String,
}

impl Declaration {
    pub fn new(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            value: value.into(),
        }
    }
}

/// Parse a declaration block. Entries without a property or value are dropped;
/// property names are lower-cased (custom properties keep their case).
pub fn parse_declarations(block: &str) -> Vec<Declaration> {
    let mut declarations = Vec::new();
    let mut rest = block;

    while !rest.trim().is_empty() {
        let end = find_unquoted(rest, &[';']).unwrap_or(rest.len());
        let item = &rest[..end];
        rest = if end < rest.len() { &rest[end + 1..] } else { "" };

        let Some(colon) = item.find(':') else {
            continue;
        };
        let property = item[..colon].trim();
        let value = collapse_whitespace(&item[colon + 1..]);
        if property.is_empty() || value.is_empty() {
            continue;
        }
        let property = if property.starts_with("--") {
            property.to_string()
        } else {
            property.to_ascii_lowercase()
        };
        declarations.push(Declaration { property, value });
    }

    declarations
}

/// Compact `prop:value;prop:value` form without a trailing semicolon.
pub fn serialize_declarations(declarations: &[Declaration]) -> String {
    declarations
        .iter()
        .map(|d| format!("{}:{}", d.property, d.value))
        .collect::<Vec<_>>()
        .join(";")
}
