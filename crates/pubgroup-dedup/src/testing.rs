use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{Duration, NaiveDate, Utc};
use rusqlite::Connection;

use pubgroup_core::{
    Import, ImportSource, Publication, PublicationAttributes, PublicationId, PublicationRepository,
    Repository, SqliteImportRepository, SqlitePublicationRepository,
};

static TICK: AtomicI64 = AtomicI64::new(0);

pub fn attributes(title: &str, year: Option<i32>, doi: Option<&str>) -> PublicationAttributes {
    let mut attrs = PublicationAttributes::new(title);
    attrs.publication_date = year.and_then(|y| NaiveDate::from_ymd_opt(y, 6, 1));
    attrs.doi = doi.map(str::to_string);
    attrs
}

/// Saves a publication whose `created_at` is strictly later than any earlier seed.
pub fn seed(conn: &Connection, title: &str, year: Option<i32>, doi: Option<&str>) -> Publication {
    let mut publication = Publication::new(attributes(title, year, doi));
    let tick = TICK.fetch_add(1, Ordering::SeqCst);
    publication.created_at = Utc::now() + Duration::milliseconds(tick);
    publication.updated_at = publication.created_at;
    SqlitePublicationRepository::new(conn).save(&publication).unwrap();
    publication
}

pub fn add_import(conn: &Connection, publication_id: &PublicationId, source: ImportSource, ident: &str) -> Import {
    let import = Import::new(*publication_id, source, ident);
    SqliteImportRepository::new(conn).save(&import).unwrap();
    import
}

pub fn reload(conn: &Connection, id: &PublicationId) -> Publication {
    SqlitePublicationRepository::new(conn).get(id).unwrap()
}
