//! Minimal CSS model: enough structure to filter, prune, scope, and
//! re-serialize stylesheets scraped from product pages.
//!
//! The parser understands plain style rules and `@media` blocks (recursively).
//! Every other at-rule (`@font-face`, `@keyframes`, `@import`, ...) is kept
//! verbatim as [`CssRule::Other`].

mod declaration;
mod selector;

pub use declaration::{Declaration, parse_declarations, serialize_declarations};
pub use selector::{is_reset_selector, scope_selector, selector_classes, split_selectors};

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

static BLOCK_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("static regex"));

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("static regex"));

/// Value functions whose rules must survive pruning and de-duplication.
const PRESERVED_VALUE_FUNCTIONS: &[&str] = &["clamp(", "calc(", "var(", "linear-gradient("];

/// One top-level (or media-nested) rule.
#[derive(Clone, Debug, PartialEq)]
pub enum CssRule {
    Style {
        selectors: Vec<String>,
        declarations: Vec<Declaration>,
    },
    Media {
        condition: String,
        rules: Vec<CssRule>,
    },
    /// Any other at-rule, serialized exactly as found (minus comments).
    Other(String),
}

impl CssRule {
    /// Rules using vendor-prefixed or custom properties, or values built from
    /// `clamp()`/`calc()`/`var()`/`linear-gradient()`.
    pub fn is_preserved(&self) -> bool {
        match self {
            CssRule::Style { declarations, .. } => declarations.iter().any(|d| {
                let value = d.value.to_ascii_lowercase();
                d.property.starts_with('-')
                    || value.starts_with('-')
                    || PRESERVED_VALUE_FUNCTIONS.iter().any(|f| value.contains(f))
            }),
            CssRule::Media { rules, .. } => rules.iter().any(CssRule::is_preserved),
            CssRule::Other(_) => false,
        }
    }

    /// Style rules whose every selector is a universal or `html`/`body` reset.
    pub fn is_reset(&self) -> bool {
        match self {
            CssRule::Style { selectors, .. } => {
                !selectors.is_empty() && selectors.iter().all(|s| is_reset_selector(s))
            }
            _ => false,
        }
    }

    fn write(&self, out: &mut String) {
        match self {
            CssRule::Style {
                selectors,
                declarations,
            } => {
                out.push_str(&selectors.join(","));
                out.push('{');
                out.push_str(&serialize_declarations(declarations));
                out.push('}');
            }
            CssRule::Media { condition, rules } => {
                out.push_str("@media ");
                out.push_str(condition);
                out.push('{');
                for rule in rules {
                    rule.write(out);
                }
                out.push('}');
            }
            CssRule::Other(text) => out.push_str(text),
        }
    }

    pub fn to_css(&self) -> String {
        let mut out = String::new();
        self.write(&mut out);
        out
    }
}

/// A parsed stylesheet.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Stylesheet {
    pub rules: Vec<CssRule>,
}

impl Stylesheet {
    /// Parse stylesheet text, discarding malformed trailing input.
    pub fn parse(text: &str) -> Self {
        let (sheet, warnings) = Self::parse_with_warnings(text);
        for warning in warnings {
            tracing::debug!("CSS parse: {warning}");
        }
        sheet
    }

    /// Parse stylesheet text, also returning what the parser had to skip.
    pub fn parse_with_warnings(text: &str) -> (Self, Vec<String>) {
        let cleaned = strip_comments(text);
        let mut warnings = Vec::new();
        let rules = parse_rules(&cleaned, &mut warnings);
        (Self { rules }, warnings)
    }

    /// Compact serialization.
    pub fn to_css(&self) -> String {
        let mut out = String::new();
        for rule in &self.rules {
            rule.write(&mut out);
        }
        out
    }

    /// Keep only selector alternatives that reference no class or at least one
    /// class in `used`. Rules left without selectors are dropped, as are empty
    /// media blocks. Preserved rules pass through untouched and are appended
    /// after the pruned rules; identical pruned rules are emitted once.
    pub fn prune_unused_classes(&self, used: &HashSet<String>) -> Stylesheet {
        let (preserved, normal): (Vec<&CssRule>, Vec<&CssRule>) =
            self.rules.iter().partition(|r| r.is_preserved());

        let mut seen = HashSet::new();
        let mut rules: Vec<CssRule> = normal
            .into_iter()
            .filter_map(|rule| prune_rule(rule, used))
            .filter(|rule| seen.insert(rule.to_css()))
            .collect();
        rules.extend(preserved.into_iter().cloned());
        Stylesheet { rules }
    }

    /// Prefix every style selector with `scope` so the rules only match
    /// inside the scoped wrapper.
    pub fn scoped(&self, scope: &str) -> Stylesheet {
        Stylesheet {
            rules: self.rules.iter().map(|r| scope_rule(r, scope)).collect(),
        }
    }
}

/// Remove `/* ... */` comments.
pub fn strip_comments(text: &str) -> String {
    BLOCK_COMMENT.replace_all(text, "").into_owned()
}

/// Collapse whitespace runs to a single space and trim.
pub(crate) fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

fn prune_rule(rule: &CssRule, used: &HashSet<String>) -> Option<CssRule> {
    match rule {
        CssRule::Style {
            selectors,
            declarations,
        } => {
            let kept: Vec<String> = selectors
                .iter()
                .filter(|s| {
                    let classes = selector_classes(s);
                    classes.is_empty() || classes.iter().any(|c| used.contains(c))
                })
                .cloned()
                .collect();
            (!kept.is_empty()).then(|| CssRule::Style {
                selectors: kept,
                declarations: declarations.clone(),
            })
        }
        CssRule::Media { condition, rules } => {
            let rules: Vec<CssRule> = rules.iter().filter_map(|r| prune_rule(r, used)).collect();
            (!rules.is_empty()).then(|| CssRule::Media {
                condition: condition.clone(),
                rules,
            })
        }
        CssRule::Other(_) => Some(rule.clone()),
    }
}

fn scope_rule(rule: &CssRule, scope: &str) -> CssRule {
    match rule {
        CssRule::Style {
            selectors,
            declarations,
        } => CssRule::Style {
            selectors: selectors.iter().map(|s| scope_selector(s, scope)).collect(),
            declarations: declarations.clone(),
        },
        CssRule::Media { condition, rules } => CssRule::Media {
            condition: condition.clone(),
            rules: rules.iter().map(|r| scope_rule(r, scope)).collect(),
        },
        CssRule::Other(_) => rule.clone(),
    }
}

fn parse_rules(text: &str, warnings: &mut Vec<String>) -> Vec<CssRule> {
    let mut rules = Vec::new();
    let mut rest = text;

    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }

        let Some(stop) = find_unquoted(rest, &['{', ';', '}']) else {
            warnings.push(format!("dangling input without a block: {}", preview(rest)));
            break;
        };

        let prelude = rest[..stop].trim();
        match rest.as_bytes()[stop] {
            b';' => {
                // statement at-rule such as @import or @charset
                if prelude.starts_with('@') {
                    rules.push(CssRule::Other(format!("{};", collapse_whitespace(prelude))));
                } else if !prelude.is_empty() {
                    warnings.push(format!("stray declaration outside a block: {}", preview(prelude)));
                }
                rest = &rest[stop + 1..];
            }
            b'}' => {
                warnings.push("unbalanced closing brace".to_string());
                rest = &rest[stop + 1..];
            }
            _ => {
                let Some(end) = block_end(rest, stop) else {
                    warnings.push(format!("unterminated block: {}", preview(prelude)));
                    break;
                };
                let body = &rest[stop + 1..end];
                if let Some(rule) = build_rule(prelude, body, warnings) {
                    rules.push(rule);
                }
                rest = &rest[end + 1..];
            }
        }
    }

    rules
}

fn build_rule(prelude: &str, body: &str, warnings: &mut Vec<String>) -> Option<CssRule> {
    if prelude.is_empty() {
        warnings.push("rule without selector".to_string());
        return None;
    }

    let lower = prelude.to_ascii_lowercase();
    if lower.starts_with("@media") {
        return Some(CssRule::Media {
            condition: collapse_whitespace(&prelude["@media".len()..]),
            rules: parse_rules(body, warnings),
        });
    }
    if prelude.starts_with('@') {
        return Some(CssRule::Other(format!(
            "{}{{{}}}",
            collapse_whitespace(prelude),
            collapse_whitespace(body)
        )));
    }

    let selectors = split_selectors(prelude);
    if selectors.is_empty() {
        return None;
    }
    Some(CssRule::Style {
        selectors,
        declarations: parse_declarations(body),
    })
}

/// Byte index of the first of `targets` outside quotes and parentheses.
pub(crate) fn find_unquoted(text: &str, targets: &[char]) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    for (i, c) in text.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '"' | '\'' => quote = Some(c),
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                _ if depth == 0 && targets.contains(&c) => return Some(i),
                _ => {}
            },
        }
    }
    None
}

/// Index of the `}` closing the block opened at `open`.
fn block_end(text: &str, open: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    for (i, c) in text[open..].char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '"' | '\'' => quote = Some(c),
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(open + i);
                    }
                }
                _ => {}
            },
        }
    }
    None
}

fn preview(text: &str) -> String {
    text.chars().take(40).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn used(classes: &[&str]) -> HashSet<String> {
        classes.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn parses_style_media_and_other_rules() {
        let css = r#"
            /* header */
            .a { color: red; margin: 0 }
            @media (max-width: 600px) { .a, .b { display: none } }
            @font-face { font-family: "X"; src: url("x.woff2") }
            @import url("other.css");
        "#;
        let sheet = Stylesheet::parse(css);
        assert_eq!(sheet.rules.len(), 4);
        assert_eq!(
            sheet.to_css(),
            concat!(
                ".a{color:red;margin:0}",
                "@media (max-width: 600px){.a,.b{display:none}}",
                r#"@font-face{font-family: "X"; src: url("x.woff2")}"#,
                r#"@import url("other.css");"#,
            )
        );
    }

    #[test]
    fn braces_inside_strings_do_not_end_blocks() {
        let sheet = Stylesheet::parse(r#".q::before { content: "}" } .r { margin: 0 }"#);
        assert_eq!(sheet.rules.len(), 2);
    }

    #[test]
    fn unterminated_block_is_reported() {
        let (sheet, warnings) = Stylesheet::parse_with_warnings(".a{margin:0} .b{color:red");
        assert_eq!(sheet.rules.len(), 1);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn reset_rules_are_detected() {
        let sheet = Stylesheet::parse("* { margin: 0 } html, body { padding: 0 } body .x { margin: 1px }");
        let resets: Vec<bool> = sheet.rules.iter().map(CssRule::is_reset).collect();
        assert_eq!(resets, vec![true, true, false]);
    }

    #[test]
    fn preserved_rules_are_detected() {
        let sheet = Stylesheet::parse(concat!(
            ".a{-webkit-box-flex:1}",
            ".b{width:calc(100% - 10px)}",
            ".c{font-size:clamp(1rem,2vw,2rem)}",
            ".d{background:linear-gradient(red,blue)}",
            ".e{color:var(--main)}",
            ".f{display:-webkit-box}",
            ".g{margin:0}",
        ));
        let preserved: Vec<bool> = sheet.rules.iter().map(CssRule::is_preserved).collect();
        assert_eq!(preserved, vec![true, true, true, true, true, true, false]);
    }

    #[test]
    fn prune_keeps_used_alternatives_only() {
        let sheet = Stylesheet::parse(".a { margin: 0 } .b { padding: 0 } .a, .b { border: 0 }");
        let pruned = sheet.prune_unused_classes(&used(&["a"]));
        assert_eq!(pruned.to_css(), ".a{margin:0}.a{border:0}");
    }

    #[test]
    fn prune_descends_into_media_and_drops_empty_blocks() {
        let sheet = Stylesheet::parse(
            "@media print { .b { display: none } } @media screen { .a .b, p { margin: 0 } }",
        );
        let pruned = sheet.prune_unused_classes(&used(&["a"]));
        assert_eq!(pruned.to_css(), "@media screen{.a .b,p{margin:0}}");
    }

    #[test]
    fn prune_appends_preserved_rules_and_dedupes_the_rest() {
        let sheet = Stylesheet::parse(".x{width:calc(1px + 1px)} .a{margin:0} .a{margin:0}");
        let pruned = sheet.prune_unused_classes(&used(&["a"]));
        assert_eq!(pruned.to_css(), ".a{margin:0}.x{width:calc(1px + 1px)}");
    }

    #[test]
    fn scoping_prefixes_selectors() {
        let sheet = Stylesheet::parse(".a, p > b { margin: 0 } @media print { img { display: none } }");
        let scoped = sheet.scoped(".scope");
        assert_eq!(
            scoped.to_css(),
            ".scope .a,.scope p > b{margin:0}@media print{.scope img{display:none}}"
        );
    }
}
