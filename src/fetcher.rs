//! Document fetcher: loads product pages into navigable [`Document`]s.
//!
//! Two cache modes coexist and are picked by the call site:
//!
//! - **Replay** ([`DocumentFetcher::fetch`]): the raw markup is cached under
//!   `Document_<service>_<url>` and reparsed on every hit, so callers always
//!   get a fresh tree.
//! - **Live** ([`DocumentFetcher::fetch_by_name`]): the parsed document is
//!   cached as a shared object and handed out as-is.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{ACCEPT, CACHE_CONTROL, HeaderMap, HeaderValue, PRAGMA};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::cache::ResultCache;
use crate::dom::Fragment;
use crate::error::{RehostError, Result};
use crate::retrieval::Retrieve;
use crate::site::{ExternalService, FetchStrategy, Language, Locator, product_url};

pub const DEFAULT_USER_AGENT: &str = concat!("html_rehost/", env!("CARGO_PKG_VERSION"));

const HTML_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

const MAX_REDIRECTS: usize = 10;

/// Shared HTTP client profile for direct browsing: identified user agent,
/// HTML-preferring `Accept`, no caching, cookies kept across redirects.
pub fn browsing_client(user_agent: &str, timeout: Duration) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(HTML_ACCEPT));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));

    reqwest::Client::builder()
        .user_agent(user_agent)
        .default_headers(headers)
        .cookie_store(true)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .timeout(timeout)
        .build()
        .map_err(|e| RehostError::Config(format!("Failed to build HTTP client: {e}")))
}

/// A parsed product page.
#[derive(Clone, Debug)]
pub struct Document {
    root: Fragment,
}

impl Document {
    pub fn parse(html: &str, url: Option<Url>) -> Self {
        Self {
            root: Fragment::parse_document(html).with_base_url(url),
        }
    }

    pub fn url(&self) -> Option<&Url> {
        self.root.base_url()
    }

    pub fn fragment(&self) -> &Fragment {
        &self.root
    }

    /// Copy of the element matched by the first locator that matches.
    pub fn select_first(&self, locators: &[Locator]) -> Option<Fragment> {
        locators
            .iter()
            .find_map(|locator| self.root.find(*locator))
            .and_then(|id| self.root.subtree(id))
    }

    /// The product-description element for `service`.
    pub fn description(&self, service: ExternalService) -> Option<Fragment> {
        self.select_first(service.profile().description_locators)
    }
}

/// What to load: a URL, or markup the caller already has.
#[derive(Clone, Copy, Debug)]
pub enum DocumentSource<'a> {
    Url(&'a str),
    Html(&'a str),
}

/// Where the headless rendering proxy's API key comes from.
#[derive(Clone, Debug)]
pub enum ApiKey {
    Explicit(String),
    /// Read from this environment variable at first use.
    Env(String),
}

impl ApiKey {
    fn resolve(&self) -> Result<String> {
        match self {
            ApiKey::Explicit(key) => Ok(key.clone()),
            ApiKey::Env(name) => std::env::var(name)
                .ok()
                .filter(|key| !key.trim().is_empty())
                .ok_or_else(|| RehostError::MissingEnv(name.clone())),
        }
    }
}

/// Headless rendering proxy endpoint and credentials.
#[derive(Clone, Debug)]
pub struct HeadlessProxy {
    pub endpoint: String,
    pub api_key: ApiKey,
}

impl HeadlessProxy {
    /// `<endpoint>?api_key=<key>&url=<escaped target>&render=true`
    fn request_url(&self, target: &str) -> Result<String> {
        let key = self.api_key.resolve()?;
        let url = Url::parse_with_params(
            &self.endpoint,
            &[("api_key", key.as_str()), ("url", target), ("render", "true")],
        )
        .map_err(|e| RehostError::InvalidUrl(format!("{}: {e}", self.endpoint)))?;
        Ok(url.into())
    }
}

/// Loads pages according to each service's [`FetchStrategy`].
pub struct DocumentFetcher<R: Retrieve> {
    client: reqwest::Client,
    retrieval: Arc<R>,
    cache: ResultCache,
    proxy: HeadlessProxy,
    cancel: CancellationToken,
}

impl<R: Retrieve> DocumentFetcher<R> {
    pub fn new(client: reqwest::Client, retrieval: Arc<R>, cache: ResultCache, proxy: HeadlessProxy) -> Self {
        Self {
            client,
            retrieval,
            cache,
            proxy,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Load `source` for `service` through the replay cache.
    ///
    /// `Ok(None)` means the page could not be retrieved; the caller decides
    /// the fallback. Configuration problems (missing proxy key, bad URL) are
    /// errors.
    pub async fn fetch(
        &self,
        source: DocumentSource<'_>,
        service: ExternalService,
        use_cache: bool,
    ) -> Result<Option<Document>> {
        let url = match source {
            DocumentSource::Html(html) => return Ok(Some(Document::parse(html, None))),
            DocumentSource::Url(url) => url.trim(),
        };
        if url.is_empty() {
            return Ok(None);
        }
        let base = Url::parse(url).map_err(|e| RehostError::InvalidUrl(format!("{url}: {e}")))?;

        let key = format!("Document_{service}_{url}");
        if use_cache {
            if let Some(html) = self.cache.get::<String>(&key) {
                tracing::debug!("Document cache hit for {url}");
                return Ok(Some(Document::parse(&html, Some(base))));
            }
        }

        let Some(html) = self.fetch_markup(&base, service).await? else {
            return Ok(None);
        };
        let document = Document::parse(&html, Some(base));
        if use_cache {
            self.cache.set(&key, html, None);
        }
        Ok(Some(document))
    }

    /// Load the product page found by name through the live-object cache.
    ///
    /// Only services with name-based URLs are accepted; anything else fails
    /// fast with [`RehostError::UnsupportedService`].
    pub async fn fetch_by_name(
        &self,
        product_name: &str,
        language: Language,
        service: ExternalService,
    ) -> Result<Arc<Document>> {
        let url = product_url(product_name, language, service)?;
        let key = format!("LiveDocument_{service}_{url}");
        if let Some(document) = self.cache.get::<Arc<Document>>(&key) {
            tracing::debug!("Live document cache hit for {url}");
            return Ok(document);
        }

        let base = Url::parse(&url).map_err(|e| RehostError::InvalidUrl(format!("{url}: {e}")))?;
        let html = self
            .fetch_markup(&base, service)
            .await?
            .ok_or_else(|| RehostError::Retrieval(format!("no content at {url}")))?;

        let document = Arc::new(Document::parse(&html, Some(base)));
        Ok(self.cache.set(&key, document, None))
    }

    async fn fetch_markup(&self, url: &Url, service: ExternalService) -> Result<Option<String>> {
        match service.profile().fetch_strategy {
            FetchStrategy::HeadlessProxy => {
                let request = self.proxy.request_url(url.as_str())?;
                tracing::debug!("Fetching {url} through the headless proxy");
                self.retrieval.get(&request, &self.cancel).await
            }
            FetchStrategy::Direct => Ok(self.browse(url).await),
        }
    }

    /// One direct request. The markup is taken as served; embedded script
    /// is not run. Failures are logged and yield `None`.
    async fn browse(&self, url: &Url) -> Option<String> {
        let response = match self.client.get(url.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Failed to load {url}: {e}");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            tracing::warn!("Loading {url} returned {status}");
            return None;
        }

        match response.text().await {
            Ok(body) if !body.trim().is_empty() => Some(body),
            Ok(_) => {
                tracing::warn!("Empty page at {url}");
                None
            }
            Err(e) => {
                tracing::warn!("Failed to read {url}: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRetrieval {
        requests: Mutex<Vec<String>>,
    }

    impl Retrieve for RecordingRetrieval {
        async fn get(&self, url: &str, _cancel: &CancellationToken) -> Result<Option<String>> {
            self.requests.lock().unwrap().push(url.to_string());
            Ok(Some(r#"<html><body><div id="description"><p>Rendered</p></div></body></html>"#.into()))
        }
    }

    fn fetcher(api_key: ApiKey) -> DocumentFetcher<RecordingRetrieval> {
        DocumentFetcher::new(
            reqwest::Client::new(),
            Arc::new(RecordingRetrieval::default()),
            ResultCache::new(),
            HeadlessProxy {
                endpoint: "https://proxy.example/".into(),
                api_key,
            },
        )
    }

    #[tokio::test]
    async fn comfy_goes_through_proxy_and_replays_from_cache() {
        let fetcher = fetcher(ApiKey::Explicit("KEY".into()));
        let source = DocumentSource::Url("https://comfy.ua/p.html");

        let first = fetcher.fetch(source, ExternalService::Comfy, true).await.unwrap().unwrap();
        let second = fetcher.fetch(source, ExternalService::Comfy, true).await.unwrap().unwrap();

        let requests = fetcher.retrieval.requests.lock().unwrap().clone();
        assert_eq!(
            requests,
            vec!["https://proxy.example/?api_key=KEY&url=https%3A%2F%2Fcomfy.ua%2Fp.html&render=true"]
        );
        let description = first.description(ExternalService::Comfy).unwrap();
        assert_eq!(description.to_html(), r#"<div id="description"><p>Rendered</p></div>"#);
        assert_eq!(second.url().map(Url::as_str), Some("https://comfy.ua/p.html"));
    }

    #[tokio::test]
    async fn missing_proxy_key_is_a_configuration_error() {
        let fetcher = fetcher(ApiKey::Env("HTML_REHOST_TEST_KEY_THAT_IS_NEVER_SET".into()));
        let err = fetcher
            .fetch(DocumentSource::Url("https://comfy.ua/p.html"), ExternalService::Comfy, false)
            .await
            .unwrap_err();
        assert!(matches!(err, RehostError::MissingEnv(_)));
    }

    #[tokio::test]
    async fn literal_html_needs_no_network() {
        let fetcher = fetcher(ApiKey::Explicit("KEY".into()));
        let html = r#"<div class="product-about__container-for-content">Specs</div>"#;

        let document = fetcher
            .fetch(DocumentSource::Html(html), ExternalService::Foxtrot, true)
            .await
            .unwrap()
            .unwrap();

        let description = document.description(ExternalService::Foxtrot).unwrap();
        assert_eq!(description.to_html(), html);
        assert!(fetcher.retrieval.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn replay_cache_is_served_without_fetching() {
        let fetcher = fetcher(ApiKey::Explicit("KEY".into()));
        fetcher.cache.set(
            "Document_Allo_https://allo.ua/tv.html",
            r#"<div class="p-description__content">Cached</div>"#.to_string(),
            None,
        );

        let document = fetcher
            .fetch(DocumentSource::Url("https://allo.ua/tv.html"), ExternalService::Allo, true)
            .await
            .unwrap()
            .unwrap();

        let description = document.description(ExternalService::Allo).unwrap();
        assert_eq!(description.to_html(), r#"<div class="p-description__content">Cached</div>"#);
    }

    #[tokio::test]
    async fn name_lookup_is_only_for_ekatalog() {
        let fetcher = fetcher(ApiKey::Explicit("KEY".into()));
        let err = fetcher
            .fetch_by_name("Galaxy S24", Language::UA, ExternalService::Brain)
            .await
            .unwrap_err();
        assert!(matches!(err, RehostError::UnsupportedService(ExternalService::Brain)));
    }

    #[tokio::test]
    async fn live_cache_returns_the_same_document() {
        let fetcher = fetcher(ApiKey::Explicit("KEY".into()));
        let cached = Arc::new(Document::parse("<p>live</p>", None));
        fetcher.cache.set(
            "LiveDocument_EKatalog_https://ek.ua/ua/GALAXY-S24.htm",
            cached.clone(),
            None,
        );

        let document = fetcher
            .fetch_by_name("Galaxy S24", Language::UA, ExternalService::EKatalog)
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&document, &cached));
    }

    #[test]
    fn browsing_client_builds() {
        assert!(browsing_client(DEFAULT_USER_AGENT, Duration::from_secs(30)).is_ok());
    }
}
