//! Selector helpers: splitting selector lists, class extraction, resets, and
//! scoping.

use std::sync::LazyLock;

use regex::Regex;

use super::{collapse_whitespace, find_unquoted};

static CLASS_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.(-?[_a-zA-Z][_a-zA-Z0-9-]*)").expect("static regex"));

static ATTRIBUTE_OR_STRING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\[[^\]]*\]|"[^"]*"|'[^']*'"#).expect("static regex"));

const RESET_SELECTORS: &[&str] = &[
    "*", "*::before", "*::after", "*:before", "*:after", "html", "body", ":root",
];

/// Split a selector list on top-level commas, normalizing whitespace.
pub fn split_selectors(prelude: &str) -> Vec<String> {
    let mut selectors = Vec::new();
    let mut rest = prelude;
    loop {
        let end = find_unquoted(rest, &[',']).unwrap_or(rest.len());
        let selector = collapse_whitespace(&rest[..end]);
        if !selector.is_empty() {
            selectors.push(selector);
        }
        if end >= rest.len() {
            break;
        }
        rest = &rest[end + 1..];
    }
    selectors
}

/// Class names referenced by a single selector, ignoring attribute selectors
/// and quoted strings.
pub fn selector_classes(selector: &str) -> Vec<String> {
    let stripped = ATTRIBUTE_OR_STRING.replace_all(selector, "");
    CLASS_NAME
        .captures_iter(&stripped)
        .map(|c| c[1].to_string())
        .collect()
}

/// Universal and document-level resets (`*`, `html`, `body`, ...).
pub fn is_reset_selector(selector: &str) -> bool {
    RESET_SELECTORS
        .iter()
        .any(|r| r.eq_ignore_ascii_case(selector.trim()))
}

/// Rewrite one selector so it only matches inside `scope`.
///
/// `:host`, `:root`, `html`, and `body` map onto the scope element itself.
pub fn scope_selector(selector: &str, scope: &str) -> String {
    let selector = selector.trim();
    for host in [":host", ":root", "html", "body"] {
        if selector.eq_ignore_ascii_case(host) {
            return scope.to_string();
        }
        if let Some(rest) = selector.strip_prefix(host) {
            if rest.starts_with([' ', '>', '+', '~']) {
                return format!("{scope}{rest}");
            }
        }
    }
    format!("{scope} {selector}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_respects_parentheses() {
        assert_eq!(
            split_selectors(".a ,\n .b:not(.c, .d),p"),
            vec![".a", ".b:not(.c, .d)", "p"]
        );
    }

    #[test]
    fn classes_ignore_attribute_values() {
        assert_eq!(selector_classes(r#"a[href$=".pdf"].doc > .x-y"#), vec!["doc", "x-y"]);
        assert!(selector_classes("div > p:first-child").is_empty());
    }

    #[test]
    fn resets() {
        assert!(is_reset_selector("*"));
        assert!(is_reset_selector(" BODY "));
        assert!(!is_reset_selector("body .x"));
    }

    #[test]
    fn scope_maps_host_and_body() {
        assert_eq!(scope_selector(":host", ".s"), ".s");
        assert_eq!(scope_selector("body > p", ".s"), ".s > p");
        assert_eq!(scope_selector(".a", ".s"), ".s .a");
        assert_eq!(scope_selector("bodyx", ".s"), ".s bodyx");
    }
}
