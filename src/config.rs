use std::path::PathBuf;
use std::time::Duration;
use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

const DEFAULT_LISTING_API_BASE: &str = "https://api.yelp.com/v3";
const DEFAULT_LOOKUP_API_BASE: &str = "https://developers.zomato.com/api/v2.1";
const DEFAULT_FETCH_DELAY_MS: u64 = 1_000;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_RESULTS: u32 = 50;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub listing_api_base: String,
    pub lookup_api_base: String,
    pub listing_api_key: Option<SecretString>,
    pub lookup_api_key: Option<SecretString>,
    pub data_dir: PathBuf,
    pub cache_file_name: String,
    pub database_file_name: String,
    pub fetch_delay_ms: u64,
    pub http_timeout_secs: u64,
    pub max_results: u32,
    pub parallel_sources: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub listing_api_base: String,
    pub lookup_api_base: String,
    pub data_dir: String,
    pub cache_file_name: String,
    pub database_file_name: String,
    pub fetch_delay_ms: u64,
    pub http_timeout_secs: u64,
    pub max_results: u32,
    pub parallel_sources: bool,
    pub has_listing_key: bool,
    pub has_lookup_key: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            listing_api_base: env::var("LISTING_API_BASE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_LISTING_API_BASE.to_string()),
            lookup_api_base: env::var("LOOKUP_API_BASE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_LOOKUP_API_BASE.to_string()),
            listing_api_key: parse_secret("LISTING_API_KEY"),
            lookup_api_key: parse_secret("LOOKUP_API_KEY"),
            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
            cache_file_name: env::var("CACHE_FILE_NAME")
                .unwrap_or_else(|_| "cache.json".to_string()),
            database_file_name: env::var("DATABASE_FILE_NAME")
                .unwrap_or_else(|_| "restaurants.sqlite".to_string()),
            fetch_delay_ms: parse_u64("FETCH_DELAY_MS", DEFAULT_FETCH_DELAY_MS).max(1),
            http_timeout_secs: parse_u64("HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS).max(1),
            max_results: parse_u32("MAX_RESULTS", DEFAULT_MAX_RESULTS).max(1),
            parallel_sources: parse_bool("PARALLEL_SOURCES", false),
        }
    }

    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join(&self.cache_file_name)
    }

    pub fn fetch_delay(&self) -> Duration {
        Duration::from_millis(self.fetch_delay_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            listing_api_base: self.listing_api_base.clone(),
            lookup_api_base: self.lookup_api_base.clone(),
            data_dir: self.data_dir.to_string_lossy().to_string(),
            cache_file_name: self.cache_file_name.clone(),
            database_file_name: self.database_file_name.clone(),
            fetch_delay_ms: self.fetch_delay_ms,
            http_timeout_secs: self.http_timeout_secs,
            max_results: self.max_results,
            parallel_sources: self.parallel_sources,
            has_listing_key: self.listing_api_key.is_some(),
            has_lookup_key: self.lookup_api_key.is_some(),
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_secret(key: &str) -> Option<SecretString> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(|v| SecretString::from(v.trim().to_string()))
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default)
}
