use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{AppError, AppResult};
use crate::listing::RawListingRecord;
use crate::lookup::{Numeric, RawLookupRecord};

const PRICE_TIERS: [&str; 4] = ["$", "$$", "$$$", "$$$$"];
const MAX_RATING: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Listing,
    Lookup,
}

impl SourceKind {
    pub fn as_tag(&self) -> &'static str {
        match self {
            SourceKind::Listing => "listing",
            SourceKind::Lookup => "lookup",
        }
    }

    pub fn table_name(&self) -> &'static str {
        match self {
            SourceKind::Listing => "Listing",
            SourceKind::Lookup => "Lookup",
        }
    }

    pub fn all() -> [SourceKind; 2] {
        [SourceKind::Listing, SourceKind::Lookup]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalRestaurant {
    pub name: String,
    pub full_address: String,
    pub review_count: u64,
    pub rating: f64,
    pub price_tier: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl CanonicalRestaurant {
    /// One-line listing entry, e.g. `[3] 4.5/5 stars (120 reviews): Name [$$] - Address`.
    pub fn describe(&self, position: usize) -> String {
        format!(
            "[{position}] {:.1}/5 stars ({} reviews): {} [{}] - {}",
            self.rating, self.review_count, self.name, self.price_tier, self.full_address
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourcedRestaurant {
    pub source: SourceKind,
    #[serde(flatten)]
    pub restaurant: CanonicalRestaurant,
}

#[derive(Debug, Clone, Copy)]
pub enum RawRecord<'a> {
    Listing(&'a RawListingRecord),
    Lookup(&'a RawLookupRecord),
}

impl RawRecord<'_> {
    pub fn kind(&self) -> SourceKind {
        match self {
            RawRecord::Listing(_) => SourceKind::Listing,
            RawRecord::Lookup(_) => SourceKind::Lookup,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NormalizedBatch {
    pub kind: SourceKind,
    pub records: Vec<CanonicalRestaurant>,
    pub dropped: usize,
}

pub fn normalize(raw: RawRecord<'_>) -> AppResult<CanonicalRestaurant> {
    match raw {
        RawRecord::Listing(record) => normalize_listing(record),
        RawRecord::Lookup(record) => normalize_lookup(record),
    }
}

/// Normalizes every record, dropping (and logging) the ones that fail.
pub fn normalize_batch<'a, I>(kind: SourceKind, records: I) -> NormalizedBatch
where
    I: IntoIterator<Item = RawRecord<'a>>,
{
    let mut batch = NormalizedBatch {
        kind,
        records: Vec::new(),
        dropped: 0,
    };
    for (index, raw) in records.into_iter().enumerate() {
        match normalize(raw) {
            Ok(record) => batch.records.push(record),
            Err(err) => {
                warn!(target: "normalize", source = kind.as_tag(), index, error = %err, "dropping record");
                batch.dropped += 1;
            }
        }
    }
    batch
}

pub fn normalize_listing(record: &RawListingRecord) -> AppResult<CanonicalRestaurant> {
    let name = required_text(record.name.as_deref(), "name")?;
    let address = &record.location;
    let full_address = format_address(
        address.address1.as_deref(),
        address.city.as_deref(),
        address.state.as_deref(),
        address.zip_code.as_deref(),
        address.country.as_deref(),
    );
    if full_address.is_empty() {
        return Err(rejected(&name, "address has no components"));
    }
    let price_tier = required_text(record.price.as_deref(), "price")
        .map_err(|_| rejected(&name, "missing price"))?;

    Ok(CanonicalRestaurant {
        review_count: review_count(record.review_count, &name)?,
        rating: rating(record.rating, &name)?,
        latitude: coordinate(record.coordinates.latitude, "latitude", &name)?,
        longitude: coordinate(record.coordinates.longitude, "longitude", &name)?,
        name,
        full_address,
        price_tier,
    })
}

pub fn normalize_lookup(record: &RawLookupRecord) -> AppResult<CanonicalRestaurant> {
    let name = required_text(record.name.as_deref(), "name")?;
    let full_address = required_text(record.location.address.as_deref(), "address")
        .map_err(|_| rejected(&name, "missing address"))?;
    let raw_rating = coerce(record.user_rating.aggregate_rating.as_ref())
        .ok_or_else(|| rejected(&name, "rating is not numeric"))?;
    let price_tier = match record.price_range {
        Some(tier) => price_tier_symbol(tier)
            .map_err(|_| rejected(&name, &format!("price range {tier} is outside 1-4")))?,
        None => return Err(rejected(&name, "missing price range")),
    };

    Ok(CanonicalRestaurant {
        review_count: review_count(record.all_reviews_count, &name)?,
        rating: rating(Some(raw_rating), &name)?,
        price_tier: price_tier.to_string(),
        latitude: coordinate(coerce(record.location.latitude.as_ref()), "latitude", &name)?,
        longitude: coordinate(coerce(record.location.longitude.as_ref()), "longitude", &name)?,
        name,
        full_address,
    })
}

/// Maps a 1–4 price range onto `$`..`$$$$`.
pub fn price_tier_symbol(tier: i64) -> AppResult<&'static str> {
    usize::try_from(tier)
        .ok()
        .and_then(|tier| tier.checked_sub(1))
        .and_then(|index| PRICE_TIERS.get(index).copied())
        .ok_or_else(|| AppError::Normalization(format!("price range {tier} is outside 1-4")))
}

/// Joins address parts as `street city, state postal country`, skipping blanks.
pub fn format_address(
    street: Option<&str>,
    city: Option<&str>,
    state: Option<&str>,
    postal: Option<&str>,
    country: Option<&str>,
) -> String {
    let head = join_present(&[street, city]);
    let tail = join_present(&[state, postal, country]);
    match (head.is_empty(), tail.is_empty()) {
        (false, false) => format!("{head}, {tail}"),
        (false, true) => head,
        _ => tail,
    }
}

fn join_present(parts: &[Option<&str>]) -> String {
    parts
        .iter()
        .filter_map(|part| part.map(str::trim).filter(|p| !p.is_empty()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn coerce(value: Option<&Numeric>) -> Option<f64> {
    value.and_then(Numeric::to_f64)
}

fn required_text(value: Option<&str>, field: &str) -> AppResult<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::Normalization(format!("missing {field}")))
}

fn review_count(value: Option<i64>, name: &str) -> AppResult<u64> {
    let count = value.ok_or_else(|| rejected(name, "missing review count"))?;
    u64::try_from(count).map_err(|_| rejected(name, "negative review count"))
}

fn rating(value: Option<f64>, name: &str) -> AppResult<f64> {
    match value {
        Some(rating) if rating.is_finite() && (0.0..=MAX_RATING).contains(&rating) => Ok(rating),
        Some(rating) => Err(rejected(name, &format!("rating {rating} is outside 0-5"))),
        None => Err(rejected(name, "missing rating")),
    }
}

fn coordinate(value: Option<f64>, field: &str, name: &str) -> AppResult<f64> {
    value
        .filter(|v| v.is_finite())
        .ok_or_else(|| rejected(name, &format!("missing {field}")))
}

fn rejected(name: &str, reason: &str) -> AppError {
    AppError::Normalization(format!("{name}: {reason}"))
}
