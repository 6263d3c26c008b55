//! Builder for configuring a [`DescriptionService`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{DEFAULT_TTL, ResultCache};
use crate::description::DescriptionService;
use crate::error::{RehostError, Result};
use crate::fetcher::{ApiKey, DEFAULT_USER_AGENT, DocumentFetcher, HeadlessProxy, browsing_client};
use crate::media::{FfmpegProcessor, MediaMaterializer, MediaProcessor};
use crate::retrieval::{HttpRetrievalClient, Retrieve};
use crate::sanitizer::{DescriptionSanitizer, IsolationMode};

pub const DEFAULT_SCRATCH_ROOT: &str = "/app/shared";
pub const DEFAULT_PROXY_ENDPOINT: &str = "https://api.scraperapi.com/";
pub const DEFAULT_PROXY_KEY_ENV: &str = "SCRAPER_API_KEY";

/// Builder for a [`DescriptionService`].
///
/// # Example
///
/// ```rust,no_run
/// use html_rehost::{ExternalService, IsolationMode, RehostBuilder};
/// use std::time::Duration;
///
/// # async fn example() -> html_rehost::Result<()> {
/// let service = RehostBuilder::new()
///     .max_retries(5)
///     .retry_delay(Duration::from_secs(1))
///     .scratch_root("/tmp/rehost")
///     .isolation(IsolationMode::HeadScript)
///     .build()?;
///
/// let cleaned = service
///     .clean_html("https://allo.ua/ua/products/tv.html", ExternalService::Allo, Some("/media/tv"), true)
///     .await;
/// # Ok(())
/// # }
/// ```
pub struct RehostBuilder {
    max_retries: u32,
    retry_delay: Duration,
    request_timeout: Duration,
    cache_ttl: Duration,
    cache: Option<ResultCache>,
    scratch_root: PathBuf,
    ffmpeg_path: PathBuf,
    user_agent: String,
    proxy_endpoint: String,
    proxy_key: ApiKey,
    isolation: IsolationMode,
}

impl RehostBuilder {
    /// Defaults: 3 attempts 500 ms apart, 30 s request timeout, 30 min cache
    /// TTL, scratch root `/app/shared`, `ffmpeg` from `PATH`, the
    /// ScraperAPI endpoint with its key in `SCRAPER_API_KEY`, shadow-DOM
    /// isolation.
    pub fn new() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            request_timeout: Duration::from_secs(30),
            cache_ttl: DEFAULT_TTL,
            cache: None,
            scratch_root: PathBuf::from(DEFAULT_SCRATCH_ROOT),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            proxy_endpoint: DEFAULT_PROXY_ENDPOINT.to_string(),
            proxy_key: ApiKey::Env(DEFAULT_PROXY_KEY_ENV.to_string()),
            isolation: IsolationMode::default(),
        }
    }

    /// Attempts per retrieval (stylesheets, proxy requests).
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Default expiration for cached documents and results.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Share an existing cache instead of creating one. Its own TTL applies.
    pub fn cache(mut self, cache: ResultCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Directory under which per-call scratch directories are created.
    pub fn scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = root.into();
        self
    }

    pub fn ffmpeg_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg_path = path.into();
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn proxy_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.proxy_endpoint = endpoint.into();
        self
    }

    /// Use this key for the headless proxy instead of reading the environment.
    pub fn proxy_api_key(mut self, key: impl Into<String>) -> Self {
        self.proxy_key = ApiKey::Explicit(key.into());
        self
    }

    /// Read the headless proxy key from this environment variable at first use.
    pub fn proxy_api_key_env(mut self, name: impl Into<String>) -> Self {
        self.proxy_key = ApiKey::Env(name.into());
        self
    }

    pub fn isolation(mut self, isolation: IsolationMode) -> Self {
        self.isolation = isolation;
        self
    }

    /// Build with the HTTP retrieval client and `ffmpeg`.
    pub fn build(mut self) -> Result<DescriptionService<HttpRetrievalClient, FfmpegProcessor>> {
        self.validate()?;
        let client = reqwest::Client::builder()
            .user_agent(self.user_agent.as_str())
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| RehostError::Config(format!("Failed to build HTTP client: {e}")))?;

        let retrieval =
            HttpRetrievalClient::new(client, self.max_retries, self.retry_delay).with_cache(self.resolved_cache());
        let processor = FfmpegProcessor::new(self.ffmpeg_path.clone());
        self.build_with(retrieval, processor)
    }

    /// Build with caller-supplied collaborators.
    pub fn build_with<R: Retrieve, P: MediaProcessor>(
        mut self,
        retrieval: R,
        processor: P,
    ) -> Result<DescriptionService<R, P>> {
        self.validate()?;
        let cache = self.resolved_cache();
        self.cache = Some(cache.clone());

        let browsing = browsing_client(&self.user_agent, self.request_timeout)?;
        let retrieval = Arc::new(retrieval);
        let processor = Arc::new(processor);

        let fetcher = DocumentFetcher::new(
            browsing.clone(),
            retrieval.clone(),
            cache.clone(),
            HeadlessProxy {
                endpoint: self.proxy_endpoint,
                api_key: self.proxy_key,
            },
        );
        let sanitizer =
            DescriptionSanitizer::new(retrieval, processor.clone(), cache.clone()).with_isolation(self.isolation);
        let materializer = MediaMaterializer::new(browsing, processor, self.scratch_root);

        Ok(DescriptionService::new(fetcher, sanitizer, materializer, cache))
    }

    fn resolved_cache(&mut self) -> ResultCache {
        let ttl = self.cache_ttl;
        self.cache.get_or_insert_with(|| ResultCache::with_ttl(ttl)).clone()
    }

    fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(RehostError::Config("max_retries must be at least 1".into()));
        }
        if self.user_agent.trim().is_empty() {
            return Err(RehostError::Config("user agent must not be empty".into()));
        }
        url::Url::parse(&self.proxy_endpoint)
            .map_err(|e| RehostError::Config(format!("Invalid proxy endpoint {}: {e}", self.proxy_endpoint)))?;
        Ok(())
    }
}

impl Default for RehostBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build() {
        let service = RehostBuilder::new().build().unwrap();
        assert!(service.cache().is_empty());
    }

    #[test]
    fn zero_retries_is_rejected() {
        let err = RehostBuilder::new().max_retries(0).build().err().unwrap();
        assert!(matches!(err, RehostError::Config(_)));
    }

    #[test]
    fn bad_proxy_endpoint_is_rejected() {
        let err = RehostBuilder::new().proxy_endpoint("not a url").build().err().unwrap();
        assert!(matches!(err, RehostError::Config(_)));
    }

    #[test]
    fn shared_cache_is_used() {
        let cache = ResultCache::new();
        let service = RehostBuilder::new().cache(cache.clone()).build().unwrap();
        service.cache().set("k", 1u8, None);
        assert_eq!(cache.get::<u8>("k"), Some(1));
    }
}
