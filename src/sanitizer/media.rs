//! Media stages: video poster generation and media reference rewriting.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::manifest::{MediaManifest, is_data_url, rewrite_url};
use super::stylesheet::{absolutize, resolve, rewrite_css_urls};
use crate::css::{Declaration, parse_declarations, serialize_declarations};
use crate::dom::{ElementData, Fragment};
use crate::media::MediaProcessor;

const MEDIA_ELEMENTS: &[&str] = &["img", "video"];

/// Stage 8: give every `<video>` with a source a generated poster frame.
///
/// The JPEG is embedded in the manifest as a `data:` URL mapped to
/// `poster-<index>.jpg`, where `<index>` is the video's position among all
/// videos in the fragment. Only runs when a target folder is given. A video
/// whose frame cannot be extracted keeps its original poster.
pub async fn generate_video_posters<P: MediaProcessor>(
    fragment: &mut Fragment,
    folder: Option<&str>,
    processor: &P,
    manifest: &mut MediaManifest,
) {
    let Some(folder) = folder else {
        return;
    };

    for (index, id) in fragment.elements_named("video").into_iter().enumerate() {
        let Some(source) = video_source(fragment, id) else {
            continue;
        };
        let Some(url) = resolve(fragment.base_url(), &source) else {
            tracing::warn!("Skipping poster for video with unresolvable source {source}");
            continue;
        };

        let frame = match processor.poster_frame(url.as_str(), "jpg").await {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Failed to extract poster frame from {url}: {e}");
                continue;
            }
        };

        let payload = format!("data:image/jpeg;base64,{}", STANDARD.encode(frame));
        let filename = manifest.register(&payload, &format!("poster-{index}.jpg"));
        let poster = format!("{}/{filename}", folder.trim_end_matches('/'));
        fragment.update_element(id, |el| el.set_attr("poster", poster));
    }
}

/// `src` of the video itself, or of its first `<source>` child.
fn video_source(fragment: &Fragment, id: ego_tree::NodeId) -> Option<String> {
    let own = fragment
        .element(id)
        .and_then(|el| el.attr("src"))
        .filter(|src| !src.trim().is_empty());
    if let Some(src) = own {
        return Some(src.trim().to_string());
    }
    fragment
        .child_elements(id)
        .into_iter()
        .filter_map(|child| fragment.element(child))
        .filter(|el| el.name == "source")
        .find_map(|el| el.attr("src").filter(|s| !s.trim().is_empty()))
        .map(|s| s.trim().to_string())
}

/// Stage 9: rewrite `src` of images and videos (and `<source>` children of
/// videos) when a target folder is given, strip `alt`, move `width`/`height`
/// attributes into the inline style, and mute videos. Then rewrite every
/// `url(...)` in inline `style` attributes.
pub fn rewrite_media_tags(fragment: &mut Fragment, folder: Option<&str>, manifest: &mut MediaManifest) {
    let base = fragment.base_url().cloned();
    for name in MEDIA_ELEMENTS {
        for id in fragment.elements_named(name) {
            let sources: Vec<ego_tree::NodeId> = if *name == "video" {
                let mut ids = vec![id];
                ids.extend(
                    fragment
                        .child_elements(id)
                        .into_iter()
                        .filter(|c| fragment.element(*c).is_some_and(|el| el.name == "source")),
                );
                ids
            } else {
                vec![id]
            };

            if let Some(folder) = folder {
                for source in sources {
                    fragment.update_element(source, |el| rewrite_src(el, base.as_ref(), folder, manifest));
                }
            }

            fragment.update_element(id, |el| {
                el.remove_attr("alt");
                normalize_sizing(el);
                if el.name == "video" {
                    el.set_attr("muted", "");
                }
            });
        }
    }

    let Some(folder) = folder else {
        return;
    };
    for id in fragment.element_ids() {
        fragment.update_element(id, |el| {
            let Some(style) = el.attr("style") else {
                return;
            };
            let rewritten = rewrite_css_urls(style, base.as_ref(), folder, manifest);
            el.set_attr("style", rewritten);
        });
    }
}

fn rewrite_src(el: &mut ElementData, base: Option<&url::Url>, folder: &str, manifest: &mut MediaManifest) {
    let Some(src) = el.attr("src").map(str::trim).filter(|s| !s.is_empty()) else {
        return;
    };
    if is_data_url(src) {
        return;
    }
    let rewritten = rewrite_url(&absolutize(base, src), folder, manifest);
    el.set_attr("src", rewritten);
}

/// Carry `width`/`height` attributes into the inline style (unless the style
/// already sets them) and normalize the declaration list.
fn normalize_sizing(el: &mut ElementData) {
    let mut declarations = parse_declarations(el.attr("style").unwrap_or_default());

    for dimension in ["width", "height"] {
        let Some(value) = el.remove_attr(dimension) else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() || declarations.iter().any(|d| d.property == dimension) {
            continue;
        }
        let length = if value.chars().all(|c| c.is_ascii_digit()) {
            format!("{value}px")
        } else {
            value.to_string()
        };
        declarations.push(Declaration::new(dimension, length));
    }

    if declarations.is_empty() {
        el.remove_attr("style");
    } else {
        el.set_attr("style", serialize_declarations(&declarations));
    }
}
