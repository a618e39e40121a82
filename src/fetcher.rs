use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Client, Url};
use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::cache::ResponseCache;
use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};

const USER_AGENT: &str = concat!("restaurant-aggregator/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchSource {
    Cache,
    Network,
}

#[derive(Debug, Clone)]
pub struct Fetched {
    pub key: String,
    pub body: String,
    pub source: FetchSource,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FetchStats {
    pub cache_hits: usize,
    pub network_calls: usize,
}

/// GET-only HTTP access through a [`ResponseCache`].
///
/// Hits return the stored text without touching the network. Misses wait a
/// fixed delay, send the request, and store the body of any 2xx response
/// before returning it. Failures are never retried or cached. A body that
/// cannot be written to the cache file is still returned, uncached.
pub struct RateLimitedFetcher {
    http: Client,
    cache: Arc<ResponseCache>,
    delay: Duration,
    cancel_flag: Option<Arc<AtomicBool>>,
    cache_hits: AtomicUsize,
    network_calls: AtomicUsize,
}

impl RateLimitedFetcher {
    pub fn new(cache: Arc<ResponseCache>, delay: Duration, timeout: Duration) -> AppResult<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            cache,
            delay,
            cancel_flag: None,
            cache_hits: AtomicUsize::new(0),
            network_calls: AtomicUsize::new(0),
        })
    }

    pub fn from_config(cache: Arc<ResponseCache>, config: &AppConfig) -> AppResult<Self> {
        Self::new(cache, config.fetch_delay(), config.http_timeout())
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = Some(flag);
        self
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn stats(&self) -> FetchStats {
        FetchStats {
            cache_hits: self.cache_hits.load(Ordering::SeqCst),
            network_calls: self.network_calls.load(Ordering::SeqCst),
        }
    }

    pub async fn fetch(
        &self,
        url: &str,
        params: &[(&str, String)],
        headers: &HeaderMap,
    ) -> AppResult<String> {
        self.fetch_traced(url, params, headers)
            .await
            .map(|fetched| fetched.body)
    }

    pub async fn fetch_traced(
        &self,
        url: &str,
        params: &[(&str, String)],
        headers: &HeaderMap,
    ) -> AppResult<Fetched> {
        let resolved = resolve_url(url, params)?;
        let request = self.http.get(resolved).headers(headers.clone()).build()?;
        let key = request.url().to_string();

        if let Some(body) = self.cache.get(&key) {
            self.cache_hits.fetch_add(1, Ordering::SeqCst);
            debug!(target: "fetcher", %key, "using cache");
            return Ok(Fetched {
                key,
                body,
                source: FetchSource::Cache,
            });
        }

        self.ensure_not_cancelled()?;
        sleep(self.delay).await;
        self.ensure_not_cancelled()?;

        info!(target: "fetcher", %key, "fetching");
        self.network_calls.fetch_add(1, Ordering::SeqCst);
        let response = self.http.execute(request).await?;
        let status = response.status();
        if !status.is_success() {
            warn!(target: "fetcher", %key, status = status.as_u16(), "upstream returned failure status");
            return Err(AppError::Fetch {
                url: key,
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        if let Err(err) = self.cache.put(key.clone(), body.clone()) {
            warn!(target: "fetcher", %key, error = %err, "response not cached");
        }
        Ok(Fetched {
            key,
            body,
            source: FetchSource::Network,
        })
    }

    fn ensure_not_cancelled(&self) -> AppResult<()> {
        match &self.cancel_flag {
            Some(flag) if flag.load(Ordering::SeqCst) => Err(AppError::Cancelled),
            _ => Ok(()),
        }
    }
}

/// Appends `params` to `url` sorted by name then value, so the same logical
/// request always resolves to the same URL regardless of argument order.
pub fn resolve_url(url: &str, params: &[(&str, String)]) -> AppResult<Url> {
    let mut resolved =
        Url::parse(url).map_err(|err| AppError::Config(format!("invalid url {url}: {err}")))?;
    let mut pairs: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
    pairs.sort_unstable();
    if !pairs.is_empty() {
        let mut query = resolved.query_pairs_mut();
        for (name, value) in pairs {
            query.append_pair(name, value);
        }
    }
    Ok(resolved)
}

/// Cache key for a GET of `url` with `params`.
pub fn request_key(url: &str, params: &[(&str, String)]) -> AppResult<String> {
    resolve_url(url, params).map(|resolved| resolved.to_string())
}
