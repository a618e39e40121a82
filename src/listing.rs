use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::fetcher::RateLimitedFetcher;

const SEARCH_PATH: &str = "/businesses/search";
const SORT_BY: &str = "review_count";

/// One business as returned by the listing search endpoint.
///
/// Every field is optional on the wire; the normalizer decides which gaps
/// disqualify a record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawListingRecord {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub review_count: Option<i64>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub location: ListingAddress,
    #[serde(default)]
    pub coordinates: ListingCoordinates,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingAddress {
    #[serde(default)]
    pub address1: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zip_code: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingCoordinates {
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    businesses: Vec<RawListingRecord>,
}

#[async_trait]
pub trait ListingApi: Send + Sync {
    async fn search(
        &self,
        term: &str,
        location: &str,
        limit: u32,
    ) -> AppResult<Vec<RawListingRecord>>;
}

pub struct ListingClient {
    fetcher: Arc<RateLimitedFetcher>,
    search_url: String,
    api_key: Option<SecretString>,
}

impl ListingClient {
    pub fn new(
        fetcher: Arc<RateLimitedFetcher>,
        api_base: &str,
        api_key: Option<SecretString>,
    ) -> Self {
        Self {
            fetcher,
            search_url: format!("{}{SEARCH_PATH}", api_base.trim_end_matches('/')),
            api_key,
        }
    }

    pub fn from_config(fetcher: Arc<RateLimitedFetcher>, config: &AppConfig) -> Self {
        Self::new(
            fetcher,
            &config.listing_api_base,
            config.listing_api_key.clone(),
        )
    }

    fn headers(&self) -> AppResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &self.api_key {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", key.expose_secret()))
                .map_err(|_| AppError::Config("listing API key is not a valid header".into()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }
}

#[async_trait]
impl ListingApi for ListingClient {
    async fn search(
        &self,
        term: &str,
        location: &str,
        limit: u32,
    ) -> AppResult<Vec<RawListingRecord>> {
        let params = [
            ("term", term.to_string()),
            ("location", location.to_string()),
            ("limit", limit.to_string()),
            ("sort_by", SORT_BY.to_string()),
        ];
        let body = self
            .fetcher
            .fetch(&self.search_url, &params, &self.headers()?)
            .await?;
        let records = parse_search_response(&body)?;
        debug!(target: "listing", term, location, count = records.len(), "listing search complete");
        Ok(records)
    }
}

pub fn parse_search_response(body: &str) -> AppResult<Vec<RawListingRecord>> {
    serde_json::from_str::<SearchResponse>(body)
        .map(|response| response.businesses)
        .map_err(|err| AppError::Schema(format!("listing search response: {err}")))
}
