use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use serde::Serialize;
use tracing::info;

use crate::errors::AppResult;
use crate::normalize::{SourceKind, SourcedRestaurant};

pub struct DatabaseContext {
    pub connection: Connection,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreSummary {
    pub listing_rows: usize,
    pub lookup_rows: usize,
}

impl StoreSummary {
    pub fn total(&self) -> usize {
        self.listing_rows + self.lookup_rows
    }
}

pub fn bootstrap<P: AsRef<Path>>(data_dir: P, database_file: &str) -> AppResult<DatabaseContext> {
    let data_dir = data_dir.as_ref();
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join(database_file);

    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
    let connection = Connection::open_with_flags(&db_path, flags)?;
    connection.execute_batch("PRAGMA journal_mode = WAL;")?;
    run_migrations(&connection)?;

    info!(
        target: "database_bootstrap",
        path = %db_path.display(),
        "restaurant store ready"
    );
    Ok(DatabaseContext {
        connection,
        path: db_path,
    })
}

fn run_migrations(connection: &Connection) -> AppResult<()> {
    for kind in SourceKind::all() {
        connection.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{table}" (
                "Id" INTEGER PRIMARY KEY AUTOINCREMENT,
                "Name" TEXT NOT NULL,
                "Address" TEXT NOT NULL,
                "Reviews" INTEGER NOT NULL,
                "Ratings" REAL NOT NULL,
                "Price" TEXT NOT NULL,
                "Latitude" REAL NOT NULL,
                "Longitude" REAL NOT NULL
            );
            "#,
            table = kind.table_name()
        ))?;
    }
    Ok(())
}

/// Appends each record to its source's table in a single transaction.
///
/// Rows are never deduplicated; running the same query twice stores it twice.
pub fn persist_restaurants(
    connection: &mut Connection,
    records: &[SourcedRestaurant],
) -> AppResult<StoreSummary> {
    let tx = connection.transaction()?;
    let mut summary = StoreSummary::default();
    for kind in SourceKind::all() {
        let mut stmt = tx.prepare(&format!(
            r#"INSERT INTO "{}" ("Name", "Address", "Reviews", "Ratings", "Price", "Latitude", "Longitude")
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            kind.table_name()
        ))?;
        for entry in records.iter().filter(|entry| entry.source == kind) {
            let record = &entry.restaurant;
            stmt.execute(params![
                record.name,
                record.full_address,
                record.review_count as i64,
                record.rating,
                record.price_tier,
                record.latitude,
                record.longitude,
            ])?;
            match kind {
                SourceKind::Listing => summary.listing_rows += 1,
                SourceKind::Lookup => summary.lookup_rows += 1,
            }
        }
    }
    tx.commit()?;
    Ok(summary)
}

pub fn count_rows(connection: &Connection, kind: SourceKind) -> AppResult<i64> {
    let count = connection.query_row(
        &format!(r#"SELECT COUNT(*) FROM "{}""#, kind.table_name()),
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Shared handle to the restaurant database.
#[derive(Clone)]
pub struct RestaurantStore {
    db: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl RestaurantStore {
    pub fn open<P: AsRef<Path>>(data_dir: P, database_file: &str) -> AppResult<Self> {
        let DatabaseContext { connection, path } = bootstrap(data_dir, database_file)?;
        Ok(Self {
            db: Arc::new(Mutex::new(connection)),
            path,
        })
    }

    pub fn store(&self, records: &[SourcedRestaurant]) -> AppResult<StoreSummary> {
        let mut conn = self.db.lock();
        persist_restaurants(&mut conn, records)
    }

    pub fn row_count(&self, kind: SourceKind) -> AppResult<i64> {
        count_rows(&self.db.lock(), kind)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::CanonicalRestaurant;
    use tempfile::tempdir;

    fn sourced(source: SourceKind, name: &str) -> SourcedRestaurant {
        SourcedRestaurant {
            source,
            restaurant: CanonicalRestaurant {
                name: name.into(),
                full_address: "1 Main St Ann Arbor, MI 48104 US".into(),
                review_count: 12,
                rating: 4.5,
                price_tier: "$$".into(),
                latitude: 42.28,
                longitude: -83.74,
            },
        }
    }

    #[test]
    fn runs_migrations_and_creates_tables() {
        let dir = tempdir().unwrap();
        let ctx = bootstrap(dir.path(), "test.sqlite").unwrap();

        let mut stmt = ctx
            .connection
            .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name IN ('Listing','Lookup')")
            .unwrap();
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .count();
        assert_eq!(rows, 2);
        assert!(ctx.path.ends_with("test.sqlite"));
    }

    #[test]
    fn routes_rows_to_source_tables() {
        let dir = tempdir().unwrap();
        let mut ctx = bootstrap(dir.path(), "route.sqlite").unwrap();
        let records = vec![
            sourced(SourceKind::Listing, "A"),
            sourced(SourceKind::Lookup, "B"),
            sourced(SourceKind::Listing, "C"),
        ];

        let summary = persist_restaurants(&mut ctx.connection, &records).unwrap();
        assert_eq!(summary.listing_rows, 2);
        assert_eq!(summary.lookup_rows, 1);
        assert_eq!(summary.total(), 3);

        let (name, price, rating): (String, String, f64) = ctx
            .connection
            .query_row(
                r#"SELECT "Name", "Price", "Ratings" FROM "Lookup" LIMIT 1"#,
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!((name.as_str(), price.as_str(), rating), ("B", "$$", 4.5));
    }

    #[test]
    fn repeated_runs_append_duplicates() {
        let dir = tempdir().unwrap();
        let store = RestaurantStore::open(dir.path(), "dupes.sqlite").unwrap();
        let records = vec![sourced(SourceKind::Listing, "Same")];
        store.store(&records).unwrap();
        store.store(&records).unwrap();
        assert_eq!(store.row_count(SourceKind::Listing).unwrap(), 2);
        assert_eq!(store.row_count(SourceKind::Lookup).unwrap(), 0);

        drop(store);
        let reopened = RestaurantStore::open(dir.path(), "dupes.sqlite").unwrap();
        assert_eq!(reopened.row_count(SourceKind::Listing).unwrap(), 2);
    }
}
