use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::fetcher::RateLimitedFetcher;

const LOCATIONS_PATH: &str = "/locations";
const LOCATION_DETAILS_PATH: &str = "/location_details";
const API_KEY_HEADER: &str = "user-key";

/// A JSON value the lookup API sends as either a number or a numeric string.
///
/// Any other JSON value lands in `Other` and never coerces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Numeric {
    Number(f64),
    Text(String),
    Other(Value),
}

impl Numeric {
    pub fn to_f64(&self) -> Option<f64> {
        let value = match self {
            Numeric::Number(value) => *value,
            Numeric::Text(text) => text.trim().parse::<f64>().ok()?,
            Numeric::Other(_) => return None,
        };
        value.is_finite().then_some(value)
    }
}

impl From<f64> for Numeric {
    fn from(value: f64) -> Self {
        Numeric::Number(value)
    }
}

impl From<&str> for Numeric {
    fn from(value: &str) -> Self {
        Numeric::Text(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationResolution {
    pub entity_id: i64,
    pub entity_type: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// One entry of the `best_rated_restaurant` list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawLookupRecord {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_integer")]
    pub all_reviews_count: Option<i64>,
    #[serde(default)]
    pub user_rating: LookupUserRating,
    #[serde(default, deserialize_with = "lenient_integer")]
    pub price_range: Option<i64>,
    #[serde(default)]
    pub location: LookupLocation,
}

// Integers or integer strings; any other value reads as absent.
fn lenient_integer<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|value| match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LookupUserRating {
    #[serde(default)]
    pub aggregate_rating: Option<Numeric>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LookupLocation {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub latitude: Option<Numeric>,
    #[serde(default)]
    pub longitude: Option<Numeric>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LookupResult {
    pub resolution: LocationResolution,
    pub num_restaurant: Option<u64>,
    pub top_cuisines: Vec<String>,
    pub best_rated: Vec<RawLookupRecord>,
}

#[derive(Debug, Deserialize)]
struct LocationsResponse {
    location_suggestions: Vec<LocationResolution>,
}

#[derive(Debug, Deserialize)]
struct LocationDetailsResponse {
    #[serde(default)]
    num_restaurant: Option<u64>,
    #[serde(default)]
    top_cuisines: Vec<String>,
    best_rated_restaurant: Vec<BestRatedEntry>,
}

#[derive(Debug, Deserialize)]
struct BestRatedEntry {
    restaurant: RawLookupRecord,
}

/// Two-stage lookup: resolve a free-text location, then fetch its best-rated
/// restaurants. The second stage only ever sees what the first produced.
#[async_trait]
pub trait LookupApi: Send + Sync {
    async fn resolve_location(&self, location: &str) -> AppResult<LocationResolution>;

    async fn location_details(&self, resolution: &LocationResolution)
        -> AppResult<LookupResult>;

    async fn search(&self, term: &str, location: &str) -> AppResult<LookupResult> {
        let resolution = self.resolve_location(location).await?;
        debug!(
            target: "lookup",
            term,
            entity_id = resolution.entity_id,
            entity_type = %resolution.entity_type,
            "location resolved"
        );
        self.location_details(&resolution).await
    }
}

pub struct LookupClient {
    fetcher: Arc<RateLimitedFetcher>,
    api_base: String,
    api_key: Option<SecretString>,
}

impl LookupClient {
    pub fn new(
        fetcher: Arc<RateLimitedFetcher>,
        api_base: &str,
        api_key: Option<SecretString>,
    ) -> Self {
        Self {
            fetcher,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn from_config(fetcher: Arc<RateLimitedFetcher>, config: &AppConfig) -> Self {
        Self::new(fetcher, &config.lookup_api_base, config.lookup_api_key.clone())
    }

    fn headers(&self) -> AppResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &self.api_key {
            let mut value = HeaderValue::from_str(key.expose_secret())
                .map_err(|_| AppError::Config("lookup API key is not a valid header".into()))?;
            value.set_sensitive(true);
            headers.insert(API_KEY_HEADER, value);
        }
        Ok(headers)
    }
}

#[async_trait]
impl LookupApi for LookupClient {
    async fn resolve_location(&self, location: &str) -> AppResult<LocationResolution> {
        let url = format!("{}{LOCATIONS_PATH}", self.api_base);
        let body = self
            .fetcher
            .fetch(&url, &[("query", location.to_string())], &self.headers()?)
            .await?;
        parse_locations_response(location, &body)
    }

    async fn location_details(
        &self,
        resolution: &LocationResolution,
    ) -> AppResult<LookupResult> {
        let url = format!("{}{LOCATION_DETAILS_PATH}", self.api_base);
        let params = [
            ("entity_id", resolution.entity_id.to_string()),
            ("entity_type", resolution.entity_type.clone()),
        ];
        let body = self.fetcher.fetch(&url, &params, &self.headers()?).await?;
        parse_details_response(resolution, &body)
    }
}

pub fn parse_locations_response(location: &str, body: &str) -> AppResult<LocationResolution> {
    let parsed: LocationsResponse = serde_json::from_str(body)
        .map_err(|err| AppError::Schema(format!("location suggestions response: {err}")))?;
    parsed
        .location_suggestions
        .into_iter()
        .next()
        .ok_or_else(|| AppError::Resolution(format!("no location suggestions for {location:?}")))
}

pub fn parse_details_response(
    resolution: &LocationResolution,
    body: &str,
) -> AppResult<LookupResult> {
    let parsed: LocationDetailsResponse = serde_json::from_str(body)
        .map_err(|err| AppError::Schema(format!("location details response: {err}")))?;
    Ok(LookupResult {
        resolution: resolution.clone(),
        num_restaurant: parsed.num_restaurant,
        top_cuisines: parsed.top_cuisines,
        best_rated: parsed
            .best_rated_restaurant
            .into_iter()
            .map(|entry| entry.restaurant)
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use httptest::matchers::*;
    use httptest::responders::json_encoded;
    use httptest::{Expectation, Server};
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use tempfile::tempdir;

    use super::*;
    use crate::cache::ResponseCache;
    use crate::fetcher::request_key;
    use crate::normalize::{normalize_batch, RawRecord, SourceKind};

    struct StubLookup {
        resolution: Option<LocationResolution>,
        seen: Mutex<Vec<LocationResolution>>,
    }

    #[async_trait]
    impl LookupApi for StubLookup {
        async fn resolve_location(&self, location: &str) -> AppResult<LocationResolution> {
            self.resolution
                .clone()
                .ok_or_else(|| AppError::Resolution(location.to_string()))
        }

        async fn location_details(
            &self,
            resolution: &LocationResolution,
        ) -> AppResult<LookupResult> {
            self.seen.lock().push(resolution.clone());
            Ok(LookupResult {
                resolution: resolution.clone(),
                num_restaurant: Some(1),
                top_cuisines: vec!["Pizza".into()],
                best_rated: vec![RawLookupRecord::default()],
            })
        }
    }

    fn fixture_resolution() -> LocationResolution {
        LocationResolution {
            entity_id: 285,
            entity_type: "city".into(),
            title: Some("Ann Arbor, MI".into()),
        }
    }

    fn details_body() -> serde_json::Value {
        json!({
            "num_restaurant": 612,
            "top_cuisines": ["American", "Pizza"],
            "best_rated_restaurant": [
                { "restaurant": {
                    "name": "Zingerman's Delicatessen",
                    "all_reviews_count": 1203,
                    "user_rating": { "aggregate_rating": "4.6" },
                    "price_range": 2,
                    "location": {
                        "address": "422 Detroit Street, Ann Arbor 48104",
                        "latitude": "42.2846",
                        "longitude": "-83.7452"
                    }
                }}
            ]
        })
    }

    fn client(cache: Arc<ResponseCache>, base: &str) -> LookupClient {
        let fetcher = Arc::new(
            RateLimitedFetcher::new(cache, Duration::from_millis(1), Duration::from_secs(5))
                .unwrap(),
        );
        LookupClient::new(fetcher, base, Some(SecretString::from("zkey".to_string())))
    }

    #[tokio::test]
    async fn second_stage_receives_resolved_identifiers() {
        let stub = StubLookup {
            resolution: Some(fixture_resolution()),
            seen: Mutex::new(Vec::new()),
        };
        let result = stub.search("pizza", "ann arbor").await.unwrap();
        assert_eq!(result.resolution.entity_id, 285);
        assert_eq!(stub.seen.lock().as_slice(), &[fixture_resolution()]);
    }

    #[tokio::test]
    async fn resolution_failure_skips_second_stage() {
        let stub = StubLookup {
            resolution: None,
            seen: Mutex::new(Vec::new()),
        };
        let err = stub.search("pizza", "atlantis").await.unwrap_err();
        assert!(matches!(err, AppError::Resolution(_)));
        assert!(stub.seen.lock().is_empty());
    }

    #[test]
    fn empty_suggestion_list_is_a_resolution_error() {
        let err = parse_locations_response("atlantis", r#"{"location_suggestions": []}"#)
            .unwrap_err();
        assert!(matches!(err, AppError::Resolution(_)));
    }

    #[test]
    fn takes_first_suggestion() {
        let body = r#"{"location_suggestions": [
            {"entity_id": 285, "entity_type": "city", "title": "Ann Arbor, MI"},
            {"entity_id": 1, "entity_type": "subzone"}
        ]}"#;
        let resolution = parse_locations_response("ann arbor", body).unwrap();
        assert_eq!(resolution, fixture_resolution());
    }

    #[test]
    fn details_missing_restaurant_list_is_a_schema_error() {
        let err = parse_details_response(&fixture_resolution(), r#"{"num_restaurant": 3}"#)
            .unwrap_err();
        assert!(matches!(err, AppError::Schema(_)));
    }

    #[test]
    fn numeric_accepts_numbers_and_numeric_strings() {
        assert_eq!(Numeric::from(4.5).to_f64(), Some(4.5));
        assert_eq!(Numeric::from(" 4.5 ").to_f64(), Some(4.5));
        assert_eq!(Numeric::from("n/a").to_f64(), None);
        assert_eq!(Numeric::from("NaN").to_f64(), None);

        let parsed: Numeric = serde_json::from_str("3").unwrap();
        assert_eq!(parsed.to_f64(), Some(3.0));

        let odd: Numeric = serde_json::from_str("true").unwrap();
        assert_eq!(odd, Numeric::Other(Value::Bool(true)));
        assert_eq!(odd.to_f64(), None);
    }

    #[test]
    fn malformed_entry_does_not_sink_the_details_response() {
        let body = json!({
            "best_rated_restaurant": [
                details_body()["best_rated_restaurant"][0].clone(),
                { "restaurant": {
                    "name": "Broken Entry",
                    "all_reviews_count": "many",
                    "user_rating": { "aggregate_rating": true },
                    "price_range": { "tier": 2 },
                    "location": { "address": "1 Main St", "latitude": {}, "longitude": [] }
                }}
            ]
        });
        let result = parse_details_response(&fixture_resolution(), &body.to_string()).unwrap();
        assert_eq!(result.best_rated.len(), 2);

        let broken = &result.best_rated[1];
        assert_eq!(broken.price_range, None);
        assert_eq!(broken.all_reviews_count, None);

        let batch = normalize_batch(
            SourceKind::Lookup,
            result.best_rated.iter().map(RawRecord::Lookup),
        );
        assert_eq!(batch.dropped, 1);
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].name, "Zingerman's Delicatessen");
        assert_eq!(batch.records[0].rating, 4.6);
    }

    #[test]
    fn integer_fields_accept_numeric_strings() {
        let record: RawLookupRecord =
            serde_json::from_str(r#"{"all_reviews_count": "88", "price_range": " 3 "}"#).unwrap();
        assert_eq!(record.all_reviews_count, Some(88));
        assert_eq!(record.price_range, Some(3));
    }

    #[tokio::test]
    async fn chains_both_calls_through_the_cache() {
        let server = Server::run();
        server.expect(
            Expectation::matching(httptest::all_of![
                request::method_path("GET", "/api/v2.1/locations"),
                request::headers(contains(key("user-key"))),
                request::query(url_decoded(contains(("query", "ann arbor")))),
            ])
            .times(1)
            .respond_with(json_encoded(json!({
                "location_suggestions": [
                    { "entity_id": 285, "entity_type": "city", "title": "Ann Arbor, MI" }
                ]
            }))),
        );
        server.expect(
            Expectation::matching(httptest::all_of![
                request::method_path("GET", "/api/v2.1/location_details"),
                request::query(url_decoded(contains(("entity_id", "285")))),
                request::query(url_decoded(contains(("entity_type", "city")))),
            ])
            .times(1)
            .respond_with(json_encoded(details_body())),
        );

        let dir = tempdir().unwrap();
        let cache = Arc::new(ResponseCache::load(dir.path().join("cache.json")));
        let lookup = client(cache.clone(), &server.url_str("/api/v2.1"));

        let first = lookup.search("pizza", "ann arbor").await.unwrap();
        let second = lookup.search("pizza", "ann arbor").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.num_restaurant, Some(612));
        assert_eq!(first.top_cuisines, vec!["American", "Pizza"]);
        assert_eq!(first.best_rated.len(), 1);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn warm_first_stage_still_runs_second_stage() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/location_details"))
                .times(1)
                .respond_with(json_encoded(details_body())),
        );

        let dir = tempdir().unwrap();
        let cache = Arc::new(ResponseCache::load(dir.path().join("cache.json")));
        let base = server.url_str("");
        let locations_key =
            request_key(&format!("{base}/locations"), &[("query", "ann arbor".to_string())])
                .unwrap();
        cache
            .put(
                locations_key,
                r#"{"location_suggestions":[{"entity_id":285,"entity_type":"city"}]}"#,
            )
            .unwrap();

        let lookup = client(cache.clone(), &base);
        let result = lookup.search("pizza", "ann arbor").await.unwrap();
        assert_eq!(result.best_rated[0].name.as_deref(), Some("Zingerman's Delicatessen"));
        assert_eq!(cache.len(), 2);
    }
}
