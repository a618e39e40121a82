use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use restaurant_aggregator_lib::{AppConfig, AppState, SourceKind};

/// Compare restaurants from the listing and lookup review APIs for one city.
#[derive(Debug, Parser)]
#[command(name = "restaurant-aggregator")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// City (and state) to search, e.g. "ann arbor, mi".
    #[arg(long, env = "QUERY_CITY")]
    city: String,

    /// Cuisine to search the listing source for.
    #[arg(long, env = "QUERY_CUISINE")]
    cuisine: String,

    /// Number of listing results to request.
    #[arg(long, default_value_t = 10)]
    count: u32,

    /// Write the chart series handed to the plotting tool as JSON.
    #[arg(long)]
    series_out: Option<PathBuf>,

    /// Skip writing results to the database.
    #[arg(long)]
    no_store: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let state = AppState::initialize(AppConfig::from_env())?;
    let query = state.query(&cli.cuisine, &cli.city, cli.count)?;

    let report = state.run_query(&query).await;

    let mut position = 0;
    for kind in SourceKind::all() {
        let outcome = match kind {
            SourceKind::Listing => &report.listing,
            SourceKind::Lookup => &report.lookup,
        };
        println!("-------------------------------");
        println!("{} results for {} in {}:", kind.as_tag(), query.cuisine, query.city);
        if let Some(err) = &outcome.error {
            println!("  unavailable: {err}");
            continue;
        }
        if kind == SourceKind::Lookup {
            if let Some(location) = &report.location {
                if let Some(count) = location.num_restaurant {
                    println!("there are {count} restaurants in {}", query.city);
                }
                if !location.top_cuisines.is_empty() {
                    println!("the top cuisines are {}", location.top_cuisines.join(", "));
                }
            }
        }
        for record in report.records_from(kind) {
            position += 1;
            println!("{}", record.describe(position));
        }
        if outcome.dropped > 0 {
            println!("  ({} records skipped as incomplete)", outcome.dropped);
        }
    }

    println!("-------------------------------");
    for (label, count) in report.histogram.labeled() {
        println!("{label:>12}: {count}");
    }

    if let Some(path) = &cli.series_out {
        let series = serde_json::to_string_pretty(&report.chart_series())?;
        std::fs::write(path, series)
            .with_context(|| format!("writing chart series to {}", path.display()))?;
    }

    if !cli.no_store {
        let summary = state.persist(&report)?;
        println!(
            "stored {} rows in {}",
            summary.total(),
            state.store().path().display()
        );
    }

    let stats = state.fetch_stats();
    tracing::debug!(
        cache_hits = stats.cache_hits,
        network_calls = stats.network_calls,
        "fetch summary"
    );
    Ok(())
}
