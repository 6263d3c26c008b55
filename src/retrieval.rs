//! Retrieval client: fetches a URL's text with bounded retries.
//!
//! Used for external stylesheets and for the headless rendering proxy.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::cache::ResultCache;
use crate::error::{RehostError, Result};

/// Trait for collaborators that fetch the raw text behind a URL.
///
/// `Ok(None)` means "no result" (non-success status after all retries, empty
/// body, cancellation). `Err` is reserved for failures the caller must see,
/// such as a URL that cannot be parsed.
///
/// # Implementing a custom client
///
/// ```rust,no_run
/// use html_rehost::{Retrieve, Result};
/// use tokio_util::sync::CancellationToken;
///
/// struct Canned;
///
/// impl Retrieve for Canned {
///     async fn get(&self, _url: &str, _cancel: &CancellationToken) -> Result<Option<String>> {
///         Ok(Some("p{margin:0}".into()))
///     }
/// }
/// ```
pub trait Retrieve: Send + Sync + 'static {
    fn get(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Option<String>>> + Send;
}

/// [`Retrieve`] implementation backed by `reqwest` with a fixed retry budget.
///
/// Non-success statuses and transport errors are retried up to `max_retries`
/// attempts with a fixed delay in between. Cancellation stops immediately and
/// yields `Ok(None)`.
pub struct HttpRetrievalClient {
    client: reqwest::Client,
    max_retries: u32,
    retry_delay: Duration,
    cache: Option<ResultCache>,
}

impl HttpRetrievalClient {
    pub fn new(client: reqwest::Client, max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            client,
            max_retries: max_retries.max(1),
            retry_delay,
            cache: None,
        }
    }

    /// Cache successful bodies under their URL and replay them on later calls.
    pub fn with_cache(mut self, cache: ResultCache) -> Self {
        self.cache = Some(cache);
        self
    }

    async fn fetch(&self, url: reqwest::Url, cancel: &CancellationToken) -> Option<String> {
        for attempt in 1..=self.max_retries {
            if cancel.is_cancelled() {
                return None;
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return None,
                outcome = self.attempt(url.clone()) => outcome,
            };

            match outcome {
                Ok(Some(body)) => return Some(body),
                Ok(None) => {
                    tracing::warn!("Empty response content from {url}");
                    return None;
                }
                Err(reason) => {
                    tracing::warn!("Attempt {attempt}/{} for {url} failed: {reason}", self.max_retries);
                    if attempt == self.max_retries {
                        tracing::error!(
                            "Failed to get a successful response from {url} after {} attempts",
                            self.max_retries
                        );
                        return None;
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(self.retry_delay) => {}
            }
        }
        None
    }

    /// One request. `Err` carries the reason for a retryable failure.
    async fn attempt(&self, url: reqwest::Url) -> std::result::Result<Option<String>, String> {
        let response = self.client.get(url).send().await.map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("non-success status code {status}"));
        }

        let body = response.text().await.map_err(|e| e.to_string())?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(body))
    }
}

impl Retrieve for HttpRetrievalClient {
    async fn get(&self, url: &str, cancel: &CancellationToken) -> Result<Option<String>> {
        if url.trim().is_empty() {
            return Ok(None);
        }

        if let Some(cached) = self.cache.as_ref().and_then(|c| c.get::<String>(url)) {
            return Ok(Some(cached));
        }

        let parsed = reqwest::Url::parse(url).map_err(|e| RehostError::InvalidUrl(format!("{url}: {e}")))?;

        let result = self.fetch(parsed, cancel).await;
        match (&result, &self.cache) {
            (Some(body), Some(cache)) => {
                cache.set(url, body.clone(), None);
            }
            (None, _) => tracing::warn!("Failed to retrieve data from {url}"),
            _ => {}
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> HttpRetrievalClient {
        HttpRetrievalClient::new(reqwest::Client::new(), 3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn blank_url_is_no_result() {
        let result = client().get("   ", &CancellationToken::new()).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn unparsable_url_fails_immediately() {
        let err = client().get("not a url", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, RehostError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn cancelled_token_yields_no_result() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = client().get("http://127.0.0.1:9/style.css", &cancel).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn cached_body_is_replayed_without_network() {
        let cache = ResultCache::new();
        cache.set("http://127.0.0.1:9/style.css", "p{margin:0}".to_string(), None);
        let client = client().with_cache(cache);

        let result = client
            .get("http://127.0.0.1:9/style.css", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.as_deref(), Some("p{margin:0}"));
    }

    #[tokio::test]
    async fn unreachable_host_gives_up_after_retries() {
        let result = client()
            .get("http://127.0.0.1:9/style.css", &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn zero_retries_is_clamped_to_one_attempt() {
        let client = HttpRetrievalClient::new(reqwest::Client::new(), 0, Duration::ZERO);
        assert_eq!(client.max_retries, 1);
    }
}
