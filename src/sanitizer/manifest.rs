//! Media manifest and the URL rewrite rule.

use std::collections::{BTreeMap, HashSet};

/// Video containers that keep their extension when rehosted.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "avi", "mov", "mkv", "flv"];

/// Non-raster assets (vector images, fonts) that keep their extension and are
/// never converted.
pub const KEPT_ASSET_EXTENSIONS: &[&str] = &["svg", "woff", "woff2", "ttf", "otf", "eot"];

/// Mapping from original media reference (remote URL or `data:` URL) to the
/// local filename assigned during rewriting.
///
/// Registration is first-writer-wins and filenames are unique: a second URL
/// normalizing to a taken name gets a numeric suffix.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MediaManifest {
    entries: BTreeMap<String, String>,
    filenames: HashSet<String>,
}

impl MediaManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `original` under `filename` unless it is already present.
    /// Returns the filename actually mapped to `original`.
    pub fn register(&mut self, original: &str, filename: &str) -> String {
        if let Some(existing) = self.entries.get(original) {
            return existing.clone();
        }

        let unique = self.unique_filename(filename);
        self.filenames.insert(unique.clone());
        self.entries.insert(original.to_string(), unique.clone());
        unique
    }

    fn unique_filename(&self, filename: &str) -> String {
        if !self.filenames.contains(filename) {
            return filename.to_string();
        }
        let (stem, extension) = split_extension(filename);
        (1..)
            .map(|n| match extension {
                Some(ext) => format!("{stem}-{n}.{ext}"),
                None => format!("{stem}-{n}"),
            })
            .find(|candidate| !self.filenames.contains(candidate))
            .unwrap_or_else(|| filename.to_string())
    }

    pub fn get(&self, original: &str) -> Option<&str> {
        self.entries.get(original).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Entries whose key is a remote URL.
    pub fn remote(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter().filter(|(k, _)| !is_data_url(k))
    }

    /// Entries whose key is an inline `data:` payload (e.g. poster frames).
    pub fn inline(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter().filter(|(k, _)| is_data_url(k))
    }

    pub fn into_map(self) -> BTreeMap<String, String> {
        self.entries
    }
}

pub fn is_data_url(reference: &str) -> bool {
    reference
        .get(..5)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("data:"))
}

fn split_extension(filename: &str) -> (&str, Option<&str>) {
    match filename.rfind('.') {
        Some(dot) if dot > 0 => (&filename[..dot], Some(&filename[dot + 1..])),
        _ => (filename, None),
    }
}

/// Local filename for a remote media URL.
///
/// Query string and fragment are dropped, the name is lower-cased with `_`
/// turned into `-`, `.png`, video, font, and svg extensions are kept, and
/// every other image type becomes `.jpg`.
pub fn normalized_filename(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let basename = path.rsplit('/').next().unwrap_or_default();
    let normalized = basename.to_lowercase().replace('_', "-");

    let (stem, extension) = split_extension(&normalized);
    let stem = if stem.is_empty() { "media" } else { stem };
    match extension {
        Some(ext) if ext == "png" || VIDEO_EXTENSIONS.contains(&ext) || KEPT_ASSET_EXTENSIONS.contains(&ext) => {
            format!("{stem}.{ext}")
        }
        _ => format!("{stem}.jpg"),
    }
}

/// Apply the rewrite rule: register `url` in `manifest` and return the
/// reference to use in markup, `<folder>/<filename>`.
pub fn rewrite_url(url: &str, folder: &str, manifest: &mut MediaManifest) -> String {
    let filename = manifest.register(url, &normalized_filename(url));
    format!("{}/{filename}", folder.trim_end_matches('/'))
}
