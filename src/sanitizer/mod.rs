//! Description sanitizer: turns a scraped product-description fragment into a
//! self-contained, minified snippet whose media references point at a
//! caller-controlled folder.
//!
//! The pipeline runs eleven stages in a fixed order. Each stage is a function
//! that edits the [`Fragment`] in place (and, where media is rewritten, records
//! mappings in a [`MediaManifest`] passed explicitly):
//!
//! 1. [`cleanup::promote_lazy_sources`]
//! 2. [`stylesheet::inline_external_stylesheets`]
//! 3. [`cleanup::strip_comments`]
//! 4. [`cleanup::prune_empty_elements`]
//! 5. [`cleanup::remove_unwanted_attributes`]
//! 6. [`stylesheet::prune_dead_class_rules`]
//! 7. [`stylesheet::rewrite_style_blocks`]
//! 8. [`media::generate_video_posters`]
//! 9. [`media::rewrite_media_tags`]
//! 10. [`inject::inject_styles`]
//! 11. [`minify::minify`]
//!
//! Without a target folder ("preview mode") media URLs are left untouched and
//! the manifest stays empty.

pub mod cleanup;
pub mod inject;
pub mod manifest;
pub mod media;
pub mod minify;
pub mod stylesheet;

pub use cleanup::{STRIPPED_STYLE_PROPERTIES, clean_styles};
pub use inject::{IsolationMode, SHADOW_HOST_ELEMENT, WRAPPER_CLASS};
pub use manifest::{MediaManifest, normalized_filename, rewrite_url};

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cache::ResultCache;
use crate::dom::Fragment;
use crate::error::Result;
use crate::media::MediaProcessor;
use crate::retrieval::Retrieve;
use crate::site::ExternalService;

/// Output of [`DescriptionSanitizer::clean`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CleanDescription {
    /// Minified, self-contained snippet.
    pub html: String,
    /// Original media reference to local filename.
    pub manifest: MediaManifest,
}

impl CleanDescription {
    pub fn is_empty(&self) -> bool {
        self.html.is_empty() && self.manifest.is_empty()
    }
}

/// Runs the sanitizer pipeline with the given collaborators.
///
/// Collaborators are shared through [`Arc`] so one sanitizer can serve many
/// concurrent requests; the only shared mutable state is the [`ResultCache`].
pub struct DescriptionSanitizer<R: Retrieve, P: MediaProcessor> {
    retrieval: Arc<R>,
    processor: Arc<P>,
    cache: ResultCache,
    isolation: IsolationMode,
    cancel: CancellationToken,
}

impl<R: Retrieve, P: MediaProcessor> DescriptionSanitizer<R, P> {
    pub fn new(retrieval: Arc<R>, processor: Arc<P>, cache: ResultCache) -> Self {
        Self {
            retrieval,
            processor,
            cache,
            isolation: IsolationMode::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_isolation(mut self, isolation: IsolationMode) -> Self {
        self.isolation = isolation;
        self
    }

    /// Token passed to every stylesheet retrieval.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn isolation(&self) -> IsolationMode {
        self.isolation
    }

    /// Clean `fragment` for `service`, rewriting media under `folder`.
    ///
    /// A blank `folder` is treated as preview mode. With `use_cache`, an
    /// earlier result for the same service, folder, and markup is returned
    /// without running the pipeline. Any failure is logged and yields an
    /// empty [`CleanDescription`]; failed results are never cached.
    pub async fn clean(
        &self,
        fragment: &Fragment,
        service: ExternalService,
        folder: Option<&str>,
        use_cache: bool,
    ) -> CleanDescription {
        let folder = folder.map(str::trim).filter(|f| !f.is_empty());
        let key = cache_key(fragment, service, folder);

        if use_cache {
            if let Some(hit) = self.cache.get::<CleanDescription>(&key) {
                tracing::debug!("Clean description cache hit for {service}");
                return hit;
            }
        }

        match self.run(fragment.clone(), service, folder).await {
            Ok(result) if use_cache => self.cache.set(&key, result, None),
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Failed to clean {service} description: {e}");
                CleanDescription::default()
            }
        }
    }

    async fn run(
        &self,
        mut fragment: Fragment,
        service: ExternalService,
        folder: Option<&str>,
    ) -> Result<CleanDescription> {
        let mut manifest = MediaManifest::new();

        cleanup::promote_lazy_sources(&mut fragment);
        stylesheet::inline_external_stylesheets(&mut fragment, self.retrieval.as_ref(), &self.cancel).await?;
        cleanup::strip_comments(&mut fragment);
        cleanup::prune_empty_elements(&mut fragment);
        cleanup::remove_unwanted_attributes(&mut fragment);
        stylesheet::prune_dead_class_rules(&mut fragment);
        stylesheet::rewrite_style_blocks(&mut fragment, folder, &mut manifest);
        media::generate_video_posters(&mut fragment, folder, self.processor.as_ref(), &mut manifest).await;
        media::rewrite_media_tags(&mut fragment, folder, &mut manifest);

        let mut injected = inject::inject_styles(&fragment, service.profile().override_css, self.isolation)?;
        let html = minify::minify(&mut injected);

        tracing::debug!(
            "Cleaned {service} description: {} bytes, {} media references",
            html.len(),
            manifest.len()
        );
        Ok(CleanDescription { html, manifest })
    }
}

/// `CleanDescriptionHtml_<service>_<folder>_<fingerprint>`; the fingerprint
/// keeps different descriptions of the same service apart.
fn cache_key(fragment: &Fragment, service: ExternalService, folder: Option<&str>) -> String {
    let mut hasher = DefaultHasher::new();
    fragment.to_html().hash(&mut hasher);
    format!(
        "CleanDescriptionHtml_{service}_{}_{:016x}",
        folder.unwrap_or_default(),
        hasher.finish()
    )
}
