//! Characteristic extractor for EKatalog specification tables.

use std::collections::HashSet;
use std::fmt;

use crate::dom::{ElementData, Fragment};
use crate::fetcher::Document;
use crate::site::Locator;

/// Id of the element wrapping the specification table.
pub const SPEC_TABLE_ID: &str = "help_table";

/// Rows whose name mentions the site itself are boilerplate.
const SITE_BRAND: &str = "e-katalog";

const CHECKMARK: &str = "✔";

/// One name/value row of a specification table. `value` may hold inline
/// markup such as links.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProductCharacteristic {
    pub name: String,
    pub value: String,
}

impl ProductCharacteristic {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for ProductCharacteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

/// Extract the characteristics of an EKatalog product page in row order.
///
/// The data table sits two element levels below `#help_table`. Rows with a
/// `valign="top"` layout and exactly two cells are read; rows with an empty
/// name or value, or naming the site itself, are dropped, as are repeats of
/// an identical pair. A page without the expected structure yields nothing.
pub fn parse_characteristics(document: &Document) -> Vec<ProductCharacteristic> {
    let Some(mut table) = locate_table(document.fragment()) else {
        tracing::debug!("No specification table found");
        return Vec::new();
    };
    strip_attributes(&mut table);

    let mut seen = HashSet::new();
    table
        .elements_named("tr")
        .into_iter()
        .filter(|id| {
            table
                .element(*id)
                .and_then(|tr| tr.attr("valign"))
                .is_some_and(|v| v.eq_ignore_ascii_case("top"))
        })
        .filter_map(|id| {
            let cells = table.child_elements(id);
            let [name_cell, value_cell] = cells.as_slice() else {
                return None;
            };
            let name = row_name(&table.text_content(*name_cell));
            let value = row_value(&table.inner_html(*value_cell));
            (!name.is_empty() && !value.is_empty()).then(|| ProductCharacteristic::new(name, value))
        })
        .filter(|characteristic| seen.insert(characteristic.clone()))
        .collect()
}

fn locate_table(page: &Fragment) -> Option<Fragment> {
    let wrapper = page.find(Locator::Id(SPEC_TABLE_ID))?;
    let first = *page.child_elements(wrapper).first()?;
    let table = *page.child_elements(first).get(1)?;
    page.subtree(table)
}

/// Drop every attribute except on rows (`valign` is needed to pick them) and
/// on links, which keep `href` and `target`; a non-standard `link` attribute
/// becomes the `href`.
fn strip_attributes(table: &mut Fragment) {
    for id in table.element_ids() {
        table.update_element(id, |el| match el.name.as_str() {
            "tr" => {}
            "a" => clean_link(el),
            _ => el.attrs.clear(),
        });
    }
}

fn clean_link(el: &mut ElementData) {
    let link = el.remove_attr("link");
    el.attrs.retain(|(name, _)| name == "href" || name == "target");
    if let Some(link) = link {
        el.set_attr("href", link);
    }
}

fn row_name(text: &str) -> String {
    let name = text.trim();
    if name.to_lowercase().contains(SITE_BRAND) {
        return String::new();
    }
    name.to_string()
}

fn row_value(html: &str) -> String {
    let value = html.trim();
    if value.eq_ignore_ascii_case("<img>") || value.eq_ignore_ascii_case(r#"<img alt="">"#) {
        return CHECKMARK.to_string();
    }
    let value = match value.len().checked_sub(4) {
        Some(cut) if value.is_char_boundary(cut) && value[cut..].eq_ignore_ascii_case("<br>") => &value[..cut],
        _ => value,
    };
    value.to_string()
}
