//! Stylesheet stages: inlining external sheets, pruning dead class rules, and
//! rewriting `url(...)` references in `<style>` blocks.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::manifest::{MediaManifest, is_data_url, rewrite_url};
use crate::css::{self, CssRule, Stylesheet};
use crate::dom::{DomNode, ElementData, Fragment};
use crate::error::Result;
use crate::retrieval::Retrieve;

static CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"url\(\s*['"]?([^'")]*?)['"]?\s*\)"#).expect("static regex")
});

/// Stage 2: replace every `<link rel=stylesheet>` with an inline `<style>`
/// holding the fetched rules.
///
/// Universal and `html`/`body` resets are dropped. Rules with vendor prefixes
/// or `clamp()`/`calc()`/`var()`/`linear-gradient()` values are written after
/// the rest. A sheet that cannot be fetched is skipped; a retrieval error is
/// returned to the caller.
pub async fn inline_external_stylesheets<R: Retrieve>(
    fragment: &mut Fragment,
    retrieval: &R,
    cancel: &CancellationToken,
) -> Result<()> {
    let links: Vec<(ego_tree::NodeId, String)> = fragment
        .elements_named("link")
        .into_iter()
        .filter_map(|id| {
            let el = fragment.element(id)?;
            let is_stylesheet = el
                .attr("rel")
                .is_some_and(|rel| rel.split_whitespace().any(|r| r.eq_ignore_ascii_case("stylesheet")));
            let href = el.attr("href")?.trim();
            (is_stylesheet && !href.is_empty()).then(|| (id, href.to_string()))
        })
        .collect();

    for (id, href) in links {
        fragment.remove(id);

        let Some(url) = resolve(fragment.base_url(), &href) else {
            tracing::warn!("Skipping stylesheet with unresolvable href {href}");
            continue;
        };
        let Some(text) = retrieval.get(url.as_str(), cancel).await? else {
            tracing::warn!("Stylesheet {url} returned no content");
            continue;
        };

        let inlined = absolutize_css_urls(&filter_external_rules(&text), &url);
        if inlined.is_empty() {
            continue;
        }

        let parent = fragment
            .top_level_elements()
            .first()
            .copied()
            .unwrap_or_else(|| fragment.root_id());
        if let Some(style) = fragment.append(parent, DomNode::Element(ElementData::new("style"))) {
            fragment.append(style, DomNode::Text(inlined));
        }
        tracing::debug!("Inlined stylesheet {url}");
    }

    Ok(())
}

/// Parse an external sheet, drop resets, and serialize with preserved rules
/// last.
pub(crate) fn filter_external_rules(text: &str) -> String {
    let sheet = Stylesheet::parse(text);
    let rules = drop_resets(sheet.rules);
    let (preserved, normal): (Vec<CssRule>, Vec<CssRule>) = rules.into_iter().partition(CssRule::is_preserved);

    let mut out = Stylesheet { rules: normal }.to_css();
    out.push_str(&Stylesheet { rules: preserved }.to_css());
    out
}

fn drop_resets(rules: Vec<CssRule>) -> Vec<CssRule> {
    rules
        .into_iter()
        .filter(|rule| !rule.is_reset())
        .filter_map(|rule| match rule {
            CssRule::Media { condition, rules } => {
                let rules = drop_resets(rules);
                (!rules.is_empty()).then_some(CssRule::Media { condition, rules })
            }
            other => Some(other),
        })
        .collect()
}

/// Resolve a stylesheet or media reference against the page URL.
/// Protocol-relative references default to https.
pub(crate) fn resolve(base: Option<&Url>, reference: &str) -> Option<Url> {
    if let Some(rest) = reference.strip_prefix("//") {
        return Url::parse(&format!("https://{rest}")).ok();
    }
    match Url::parse(reference) {
        Ok(url) => Some(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => base?.join(reference).ok(),
        Err(_) => None,
    }
}

/// Media reference as it is recorded in the manifest: absolute and
/// protocol-relative references are kept as written, relative ones are
/// resolved against `base` when there is one.
pub(crate) fn absolutize(base: Option<&Url>, reference: &str) -> String {
    if reference.starts_with("//") {
        return reference.to_string();
    }
    match Url::parse(reference) {
        Err(url::ParseError::RelativeUrlWithoutBase) => base
            .and_then(|base| base.join(reference).ok())
            .map(String::from)
            .unwrap_or_else(|| reference.to_string()),
        _ => reference.to_string(),
    }
}

/// Resolve relative `url(...)` references of an inlined sheet against the
/// sheet's own URL.
fn absolutize_css_urls(text: &str, sheet: &Url) -> String {
    CSS_URL
        .replace_all(text, |caps: &Captures| {
            let reference = caps[1].trim();
            if reference.is_empty() || is_data_url(reference) {
                return caps[0].to_string();
            }
            format!("url('{}')", absolutize(Some(sheet), reference))
        })
        .into_owned()
}

/// Stage 6: drop selector alternatives that only reference classes no element
/// in the fragment uses.
pub fn prune_dead_class_rules(fragment: &mut Fragment) {
    let used: HashSet<String> = fragment
        .element_ids()
        .into_iter()
        .filter_map(|id| fragment.element(id))
        .flat_map(|el| el.classes().map(str::to_string).collect::<Vec<_>>())
        .collect();

    for id in fragment.elements_named("style") {
        let text = fragment.text_content(id);
        let pruned = Stylesheet::parse(&text).prune_unused_classes(&used).to_css();
        if pruned.is_empty() {
            fragment.remove(id);
        } else {
            fragment.set_text(id, pruned);
        }
    }
}

/// Stage 7: strip block comments from `<style>` text and, when a target
/// folder is given, rewrite every `url(...)` through the rewrite rule.
pub fn rewrite_style_blocks(fragment: &mut Fragment, folder: Option<&str>, manifest: &mut MediaManifest) {
    let base = fragment.base_url().cloned();
    for id in fragment.elements_named("style") {
        let text = css::strip_comments(&fragment.text_content(id));
        let text = match folder {
            Some(folder) => rewrite_css_urls(&text, base.as_ref(), folder, manifest),
            None => text,
        };
        fragment.set_text(id, text);
    }
}

/// Rewrite every non-`data:` `url(...)` in `text`, resolving relative
/// references against `base`.
pub(crate) fn rewrite_css_urls(text: &str, base: Option<&Url>, folder: &str, manifest: &mut MediaManifest) -> String {
    CSS_URL
        .replace_all(text, |caps: &Captures| {
            let reference = caps[1].trim();
            if reference.is_empty() || is_data_url(reference) {
                return caps[0].to_string();
            }
            format!("url('{}')", rewrite_url(&absolutize(base, reference), folder, manifest))
        })
        .into_owned()
}
