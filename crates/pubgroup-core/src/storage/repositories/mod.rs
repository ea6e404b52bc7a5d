mod contributor_repository;
mod duplicate_group_repository;
mod import_repository;
mod non_duplicate_group_repository;
mod publication_repository;
mod user_repository;

pub use contributor_repository::{ContributorRepository, SqliteContributorRepository};
pub use duplicate_group_repository::{DuplicateGroupRepository, SqliteDuplicateGroupRepository};
pub use import_repository::{ImportRepository, SqliteImportRepository};
pub use non_duplicate_group_repository::{
    NonDuplicateGroupRepository, SqliteNonDuplicateGroupRepository,
};
pub use publication_repository::{PublicationRepository, SqlitePublicationRepository};
pub use user_repository::{SqliteUserRepository, UserRepository};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use crate::error::Result;

pub trait Repository {
    type Entity;
    type Id;

    fn find_by_id(&self, id: &Self::Id) -> Result<Option<Self::Entity>>;
    fn save(&self, entity: &Self::Entity) -> Result<()>;
    fn delete(&self, id: &Self::Id) -> Result<bool>;
}

/// Fixed-width RFC 3339 so that timestamps sort lexicographically in SQL.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn uuid_column(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn opt_uuid_column(row: &Row, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => Uuid::parse_str(&raw)
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        None => Ok(None),
    }
}

pub(crate) fn timestamp_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(idx, &raw)
}

pub(crate) fn opt_timestamp_column(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => parse_timestamp(idx, &raw).map(Some),
        None => Ok(None),
    }
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// `?1, ?2, ...` for an `IN (...)` clause of the given arity.
pub(crate) fn placeholders(count: usize) -> String {
    placeholders_from(1, count)
}

/// Like [`placeholders`], numbering from `first`.
pub(crate) fn placeholders_from(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}
