mod cache;
mod config;
mod db;
mod errors;
mod fetcher;
mod listing;
mod lookup;
mod normalize;
mod pipeline;

use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use crate::cache::ResponseCache;
pub use crate::config::{AppConfig, PublicAppConfig, DEFAULT_MAX_RESULTS};
pub use crate::db::{
    bootstrap, count_rows, persist_restaurants, DatabaseContext, RestaurantStore, StoreSummary,
};
pub use crate::errors::{AppError, AppResult};
pub use crate::fetcher::{
    request_key, resolve_url, FetchSource, FetchStats, Fetched, RateLimitedFetcher,
};
pub use crate::listing::{
    ListingAddress, ListingApi, ListingClient, ListingCoordinates, RawListingRecord,
};
pub use crate::lookup::{
    LocationResolution, LookupApi, LookupClient, LookupLocation, LookupResult, LookupUserRating,
    Numeric, RawLookupRecord,
};
pub use crate::normalize::{
    normalize, normalize_batch, price_tier_symbol, CanonicalRestaurant, RawRecord, SourceKind,
    SourcedRestaurant,
};
pub use crate::pipeline::{
    rating_bucket, AggregatePipeline, AggregateReport, BranchOutcome, ChartSeries,
    LocationSummary, QueryRequest, RatingHistogram, RATING_BUCKET_LABELS,
};

/// Everything one process needs: the shared cache, both source clients and the store.
pub struct AppState {
    config: AppConfig,
    fetcher: Arc<RateLimitedFetcher>,
    pipeline: AggregatePipeline,
    store: RestaurantStore,
}

impl AppState {
    pub fn initialize(config: AppConfig) -> AppResult<Self> {
        init_tracing();
        std::fs::create_dir_all(&config.data_dir)?;

        let cache = Arc::new(ResponseCache::load(config.cache_path()));
        let fetcher = Arc::new(RateLimitedFetcher::from_config(cache, &config)?);
        let listing = ListingClient::from_config(Arc::clone(&fetcher), &config);
        let lookup = LookupClient::from_config(Arc::clone(&fetcher), &config);
        let pipeline = AggregatePipeline::new(Arc::new(listing), Arc::new(lookup))
            .parallel(config.parallel_sources);
        let store = RestaurantStore::open(&config.data_dir, &config.database_file_name)?;

        info!(
            cache_entries = fetcher.cache().len(),
            database = %store.path().display(),
            "restaurant aggregator ready"
        );

        Ok(Self {
            config,
            fetcher,
            pipeline,
            store,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn query(&self, cuisine: &str, city: &str, result_count: u32) -> AppResult<QueryRequest> {
        QueryRequest::new(cuisine, city, result_count, self.config.max_results)
    }

    pub async fn run_query(&self, query: &QueryRequest) -> AggregateReport {
        self.pipeline.run(query).await
    }

    pub fn persist(&self, report: &AggregateReport) -> AppResult<StoreSummary> {
        self.store.store(&report.restaurants)
    }

    pub fn store(&self) -> &RestaurantStore {
        &self.store
    }

    pub fn fetch_stats(&self) -> FetchStats {
        self.fetcher.stats()
    }
}

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,restaurant_aggregator_lib=debug"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init();
    });
}
