//! Description service: the entry point used by the web layer.
//!
//! Ties the fetcher, characteristic extractor, sanitizer, and media
//! materializer together. Batch-facing operations degrade to empty results
//! instead of failing.

use std::collections::HashMap;

use crate::cache::ResultCache;
use crate::characteristics::{ProductCharacteristic, parse_characteristics};
use crate::error::Result;
use crate::fetcher::{DocumentFetcher, DocumentSource};
use crate::media::{ImageExtension, MediaMaterializer, MediaProcessor};
use crate::retrieval::Retrieve;
use crate::sanitizer::{self, CleanDescription, DescriptionSanitizer, MediaManifest};
use crate::site::{ExternalService, Language};

/// High-level operations over external product pages.
///
/// Created by [`RehostBuilder`](crate::RehostBuilder).
pub struct DescriptionService<R: Retrieve, P: MediaProcessor> {
    fetcher: DocumentFetcher<R>,
    sanitizer: DescriptionSanitizer<R, P>,
    materializer: MediaMaterializer<P>,
    cache: ResultCache,
}

impl<R: Retrieve, P: MediaProcessor> DescriptionService<R, P> {
    pub fn new(
        fetcher: DocumentFetcher<R>,
        sanitizer: DescriptionSanitizer<R, P>,
        materializer: MediaMaterializer<P>,
        cache: ResultCache,
    ) -> Self {
        Self {
            fetcher,
            sanitizer,
            materializer,
            cache,
        }
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn fetcher(&self) -> &DocumentFetcher<R> {
        &self.fetcher
    }

    pub fn sanitizer(&self) -> &DescriptionSanitizer<R, P> {
        &self.sanitizer
    }

    /// Characteristics of the EKatalog page for `product_name`.
    ///
    /// Results are cached under
    /// `Characteristics_EKatalog_<product_name>_<language>`. Any failure is
    /// logged and yields an empty list.
    pub async fn generate_characteristics(&self, product_name: &str, language: Language) -> Vec<ProductCharacteristic> {
        let service = ExternalService::EKatalog;
        let key = format!("Characteristics_{service}_{product_name}_{language}");
        if let Some(cached) = self.cache.get::<Vec<ProductCharacteristic>>(&key) {
            return cached;
        }

        let document = match self.fetcher.fetch_by_name(product_name, language, service).await {
            Ok(document) => document,
            Err(e) => {
                tracing::warn!("Failed to load characteristics for {product_name}: {e}");
                return Vec::new();
            }
        };

        let characteristics = parse_characteristics(&document);
        tracing::info!("Extracted {} characteristics for {product_name}", characteristics.len());
        self.cache.set(&key, characteristics, None)
    }

    /// Fetch the page at `description_url`, locate the description for
    /// `service`, and clean it with media rewritten under `dir`.
    ///
    /// `None` when the URL is blank, the page cannot be loaded, or it has no
    /// description element.
    pub async fn clean_html(
        &self,
        description_url: &str,
        service: ExternalService,
        dir: Option<&str>,
        use_cache: bool,
    ) -> Option<CleanDescription> {
        if description_url.trim().is_empty() {
            return None;
        }
        self.clean_source(DocumentSource::Url(description_url), service, dir, use_cache)
            .await
    }

    /// Same as [`clean_html`](Self::clean_html) for a page the caller already
    /// holds.
    pub async fn clean_markup(
        &self,
        html: &str,
        service: ExternalService,
        dir: Option<&str>,
        use_cache: bool,
    ) -> Option<CleanDescription> {
        self.clean_source(DocumentSource::Html(html), service, dir, use_cache)
            .await
    }

    async fn clean_source(
        &self,
        source: DocumentSource<'_>,
        service: ExternalService,
        dir: Option<&str>,
        use_cache: bool,
    ) -> Option<CleanDescription> {
        let document = match self.fetcher.fetch(source, service, use_cache).await {
            Ok(Some(document)) => document,
            Ok(None) => return None,
            Err(e) => {
                tracing::error!("Failed to load {service} page: {e}");
                return None;
            }
        };

        let Some(description) = document.description(service) else {
            tracing::warn!("No {service} description found on {:?}", document.url().map(|u| u.as_str()));
            return None;
        };

        Some(self.sanitizer.clean(&description, service, dir, use_cache).await)
    }

    /// Zip the media referenced by `manifest` plus the caller's inline images
    /// (`base64 payload -> filename`).
    pub async fn download_media(
        &self,
        manifest: &MediaManifest,
        inline_base64: &HashMap<String, String>,
    ) -> Result<Vec<u8>> {
        self.materializer.download_and_zip(manifest, inline_base64).await
    }

    /// Convert uploaded images to `extension` and zip them.
    pub async fn convert_images(&self, extension: ImageExtension, files: Vec<(String, Vec<u8>)>) -> Result<Vec<u8>> {
        self.materializer.convert_images(extension, files).await
    }

    /// Remove host-controlled typography from every inline style in `html`.
    pub fn clean_styles(&self, html: &str) -> String {
        sanitizer::clean_styles(html)
    }
}
