//! Structural cleanup stages: lazy sources, comments, empty elements, and
//! unwanted attributes.
//!
//! Every stage edits the fragment in place and leaves it in the state the next
//! stage expects.

use crate::css::{Declaration, parse_declarations, serialize_declarations};
use crate::dom::Fragment;

/// Attributes lazy-loading scripts keep the real source in.
const LAZY_SOURCE_ATTRIBUTES: &[&str] = &["data-src", "data-lazy-src", "data-lazy", "data-original"];

const LAZY_SOURCE_ELEMENTS: &[&str] = &["img", "source", "iframe"];

/// Elements that stay even when empty.
const KEEP_WHEN_EMPTY: &[&str] = &["br", "hr"];

/// Reserved custom-data prefix.
const DATA_ATTRIBUTE_PREFIX: &str = "data-";

/// Typography the host shop controls; removed from inline styles.
pub const STRIPPED_STYLE_PROPERTIES: &[&str] = &["color", "font-family", "font-size", "line-height"];

/// Stage 1: promote lazy-load placeholders to `src`.
pub fn promote_lazy_sources(fragment: &mut Fragment) {
    for name in LAZY_SOURCE_ELEMENTS {
        for id in fragment.elements_named(name) {
            fragment.update_element(id, |el| {
                let lazy = LAZY_SOURCE_ATTRIBUTES
                    .iter()
                    .find_map(|attr| el.attr(attr).filter(|v| !v.trim().is_empty()).map(str::to_string));
                if let Some(src) = lazy {
                    el.set_attr("src", src.trim());
                }
            });
        }
    }
}

/// Stage 3: remove all comment nodes.
pub fn strip_comments(fragment: &mut Fragment) {
    for id in fragment.comment_ids() {
        fragment.remove(id);
    }
}

/// Stage 4: remove elements with no text, no child elements, and no `src`.
///
/// Children are visited before their parent so an emptied parent is removed in
/// the same pass. Top-level elements are never removed.
pub fn prune_empty_elements(fragment: &mut Fragment) {
    let top_level = fragment.top_level_elements();
    let mut ids = fragment.element_ids();
    ids.reverse();

    for id in ids {
        if top_level.contains(&id) || !is_empty_element(fragment, id) {
            continue;
        }
        fragment.remove(id);
    }
}

fn is_empty_element(fragment: &Fragment, id: ego_tree::NodeId) -> bool {
    let Some(el) = fragment.element(id) else {
        return false;
    };
    if KEEP_WHEN_EMPTY.contains(&el.name.as_str()) || el.has_attr("src") {
        return false;
    }
    let has_child_elements = !fragment.child_elements(id).is_empty();
    !has_child_elements && fragment.text_content(id).trim().is_empty()
}

/// Stage 5: drop `data-*` attributes, strip host-controlled typography from
/// inline styles, and remove `style` attributes left empty.
pub fn remove_unwanted_attributes(fragment: &mut Fragment) {
    for id in fragment.element_ids() {
        fragment.update_element(id, |el| {
            el.attrs.retain(|(name, _)| !name.starts_with(DATA_ATTRIBUTE_PREFIX));

            let Some(style) = el.attr("style") else {
                return;
            };
            let cleaned = strip_style_properties(style, STRIPPED_STYLE_PROPERTIES);
            if cleaned.is_empty() {
                el.remove_attr("style");
            } else {
                el.set_attr("style", cleaned);
            }
        });
    }
}

/// Parse an inline style, drop `properties`, and re-serialize.
pub fn strip_style_properties(style: &str, properties: &[&str]) -> String {
    let kept: Vec<Declaration> = parse_declarations(style)
        .into_iter()
        .filter(|d| !properties.contains(&d.property.as_str()))
        .collect();
    serialize_declarations(&kept)
}

/// Remove `STRIPPED_STYLE_PROPERTIES` from every inline style and return the
/// fragment's markup.
pub fn clean_styles(html: &str) -> String {
    let mut fragment = Fragment::parse(html);
    for id in fragment.element_ids() {
        fragment.update_element(id, |el| {
            let Some(style) = el.attr("style") else {
                return;
            };
            if style.trim().is_empty() {
                return;
            }
            let cleaned = strip_style_properties(style, STRIPPED_STYLE_PROPERTIES);
            if cleaned.is_empty() {
                el.remove_attr("style");
            } else {
                el.set_attr("style", cleaned);
            }
        });
    }
    fragment.to_html()
}
