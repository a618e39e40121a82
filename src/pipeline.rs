use std::sync::Arc;

use futures_util::future::join;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::DEFAULT_MAX_RESULTS;
use crate::errors::{AppError, AppResult};
use crate::listing::ListingApi;
use crate::lookup::LookupApi;
use crate::normalize::{
    normalize_batch, CanonicalRestaurant, NormalizedBatch, RawRecord, SourceKind,
    SourcedRestaurant,
};

pub const RATING_BUCKET_LABELS: [&str; 5] = [
    "3-3.5 stars",
    "3.5-4 stars",
    "4-4.5 stars",
    "4.5-5 stars",
    "5 stars",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryRequest {
    pub cuisine: String,
    pub city: String,
    pub result_count: u32,
}

impl QueryRequest {
    pub fn new(cuisine: &str, city: &str, result_count: u32, max_results: u32) -> AppResult<Self> {
        let cuisine = cuisine.trim().to_lowercase();
        let city = city.trim().to_lowercase();
        if cuisine.is_empty() {
            return Err(AppError::Config("cuisine must not be empty".into()));
        }
        if city.is_empty() {
            return Err(AppError::Config("city must not be empty".into()));
        }
        if result_count < 1 {
            return Err(AppError::Config("result count must be at least 1".into()));
        }
        if result_count > max_results {
            return Err(AppError::Config(format!(
                "result count must be at most {max_results}"
            )));
        }
        Ok(Self {
            cuisine,
            city,
            result_count,
        })
    }

    pub fn with_default_limit(cuisine: &str, city: &str, result_count: u32) -> AppResult<Self> {
        Self::new(cuisine, city, result_count, DEFAULT_MAX_RESULTS)
    }
}

/// Counts of ratings in `[3,3.5)`, `[3.5,4)`, `[4,4.5)`, `[4.5,5)` and `{5}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RatingHistogram {
    pub counts: [usize; 5],
}

impl RatingHistogram {
    pub fn from_ratings<I: IntoIterator<Item = f64>>(ratings: I) -> Self {
        let mut histogram = Self::default();
        for rating in ratings {
            if let Some(bucket) = rating_bucket(rating) {
                histogram.counts[bucket] += 1;
            }
        }
        histogram
    }

    pub fn labeled(&self) -> impl Iterator<Item = (&'static str, usize)> + '_ {
        RATING_BUCKET_LABELS.iter().copied().zip(self.counts.iter().copied())
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }
}

/// Index into [`RATING_BUCKET_LABELS`]; `None` below 3 or above 5.
pub fn rating_bucket(rating: f64) -> Option<usize> {
    if rating == 5.0 {
        Some(4)
    } else if (4.5..5.0).contains(&rating) {
        Some(3)
    } else if (4.0..4.5).contains(&rating) {
        Some(2)
    } else if (3.5..4.0).contains(&rating) {
        Some(1)
    } else if (3.0..3.5).contains(&rating) {
        Some(0)
    } else {
        None
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BranchOutcome {
    pub records: usize,
    pub dropped: usize,
    pub error: Option<String>,
}

impl BranchOutcome {
    fn failed(err: &AppError) -> Self {
        Self {
            error: Some(err.to_string()),
            ..Self::default()
        }
    }

    fn from_batch(batch: &NormalizedBatch) -> Self {
        Self {
            records: batch.records.len(),
            dropped: batch.dropped,
            error: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationSummary {
    pub entity_id: i64,
    pub entity_type: String,
    pub title: Option<String>,
    pub num_restaurant: Option<u64>,
    pub top_cuisines: Vec<String>,
}

/// Parallel arrays consumed by the chart renderer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChartSeries {
    pub names: Vec<String>,
    pub review_counts: Vec<u64>,
    pub ratings: Vec<f64>,
    pub prices: Vec<String>,
    pub latitudes: Vec<f64>,
    pub longitudes: Vec<f64>,
    pub rating_labels: Vec<&'static str>,
    pub rating_counts: Vec<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateReport {
    pub query: QueryRequest,
    pub restaurants: Vec<SourcedRestaurant>,
    pub histogram: RatingHistogram,
    pub listing: BranchOutcome,
    pub lookup: BranchOutcome,
    pub location: Option<LocationSummary>,
}

impl AggregateReport {
    pub fn records_from(
        &self,
        source: SourceKind,
    ) -> impl Iterator<Item = &CanonicalRestaurant> + '_ {
        self.restaurants
            .iter()
            .filter(move |entry| entry.source == source)
            .map(|entry| &entry.restaurant)
    }

    pub fn chart_series(&self) -> ChartSeries {
        let mut series = ChartSeries {
            rating_labels: RATING_BUCKET_LABELS.to_vec(),
            rating_counts: self.histogram.counts.to_vec(),
            ..ChartSeries::default()
        };
        for entry in &self.restaurants {
            let record = &entry.restaurant;
            series.names.push(record.name.clone());
            series.review_counts.push(record.review_count);
            series.ratings.push(record.rating);
            series.prices.push(record.price_tier.clone());
            series.latitudes.push(record.latitude);
            series.longitudes.push(record.longitude);
        }
        series
    }
}

struct BranchResult {
    outcome: BranchOutcome,
    records: Vec<CanonicalRestaurant>,
    location: Option<LocationSummary>,
}

/// Runs both sources for one query and merges what each of them produced.
///
/// A failing branch contributes no records and an error message; it never
/// aborts the other branch.
pub struct AggregatePipeline {
    listing: Arc<dyn ListingApi>,
    lookup: Arc<dyn LookupApi>,
    parallel: bool,
}

impl AggregatePipeline {
    pub fn new(listing: Arc<dyn ListingApi>, lookup: Arc<dyn LookupApi>) -> Self {
        Self {
            listing,
            lookup,
            parallel: false,
        }
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub async fn run(&self, query: &QueryRequest) -> AggregateReport {
        let (listing, lookup) = if self.parallel {
            join(self.run_listing(query), self.run_lookup(query)).await
        } else {
            let listing = self.run_listing(query).await;
            (listing, self.run_lookup(query).await)
        };

        let restaurants: Vec<SourcedRestaurant> = tag(SourceKind::Listing, listing.records)
            .chain(tag(SourceKind::Lookup, lookup.records))
            .collect();
        let histogram =
            RatingHistogram::from_ratings(restaurants.iter().map(|r| r.restaurant.rating));

        info!(
            target: "pipeline",
            cuisine = %query.cuisine,
            city = %query.city,
            listing = listing.outcome.records,
            lookup = lookup.outcome.records,
            "aggregate query complete"
        );

        AggregateReport {
            query: query.clone(),
            restaurants,
            histogram,
            listing: listing.outcome,
            lookup: lookup.outcome,
            location: lookup.location,
        }
    }

    async fn run_listing(&self, query: &QueryRequest) -> BranchResult {
        match self
            .listing
            .search(&query.cuisine, &query.city, query.result_count)
            .await
        {
            Ok(raw) => {
                let batch = normalize_batch(SourceKind::Listing, raw.iter().map(RawRecord::Listing));
                BranchResult {
                    outcome: BranchOutcome::from_batch(&batch),
                    records: batch.records,
                    location: None,
                }
            }
            Err(err) => {
                warn!(target: "pipeline", error = %err, "listing branch failed");
                BranchResult {
                    outcome: BranchOutcome::failed(&err),
                    records: Vec::new(),
                    location: None,
                }
            }
        }
    }

    async fn run_lookup(&self, query: &QueryRequest) -> BranchResult {
        match self.lookup.search(&query.cuisine, &query.city).await {
            Ok(result) => {
                let batch = normalize_batch(
                    SourceKind::Lookup,
                    result.best_rated.iter().map(RawRecord::Lookup),
                );
                BranchResult {
                    outcome: BranchOutcome::from_batch(&batch),
                    records: batch.records,
                    location: Some(LocationSummary {
                        entity_id: result.resolution.entity_id,
                        entity_type: result.resolution.entity_type,
                        title: result.resolution.title,
                        num_restaurant: result.num_restaurant,
                        top_cuisines: result.top_cuisines,
                    }),
                }
            }
            Err(err) => {
                warn!(target: "pipeline", error = %err, "lookup branch failed");
                BranchResult {
                    outcome: BranchOutcome::failed(&err),
                    records: Vec::new(),
                    location: None,
                }
            }
        }
    }
}

fn tag(
    source: SourceKind,
    records: Vec<CanonicalRestaurant>,
) -> impl Iterator<Item = SourcedRestaurant> {
    records
        .into_iter()
        .map(move |restaurant| SourcedRestaurant { source, restaurant })
}
