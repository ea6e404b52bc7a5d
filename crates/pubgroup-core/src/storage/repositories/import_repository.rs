use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, params};

use crate::error::Result;
use crate::models::{Import, ImportId, ImportSource, PublicationId};

use super::{Repository, format_timestamp, opt_timestamp_column, timestamp_column, uuid_column};

const IMPORT_COLUMNS: &str =
    "id, publication_id, source, source_identifier, source_updated_at, auto_merged, created_at";

pub trait ImportRepository: Repository<Entity = Import, Id = ImportId> {
    fn find_by_source(&self, source: ImportSource, source_identifier: &str) -> Result<Option<Import>>;
    fn list_for_publication(&self, publication_id: &PublicationId) -> Result<Vec<Import>>;
    /// Re-parents every import of `from` onto `to`.
    fn reassign(&self, from: &PublicationId, to: &PublicationId) -> Result<usize>;
    fn set_auto_merged(&self, id: &ImportId, auto_merged: bool) -> Result<()>;
    fn touch_source_updated_at(&self, id: &ImportId, at: Option<DateTime<Utc>>) -> Result<()>;
}

pub struct SqliteImportRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteImportRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn row_to_import(row: &rusqlite::Row) -> rusqlite::Result<Import> {
        let source_str: String = row.get(2)?;
        let source = ImportSource::from_str(&source_str)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;

        Ok(Import {
            id: uuid_column(row, 0)?,
            publication_id: uuid_column(row, 1)?,
            source,
            source_identifier: row.get(3)?,
            source_updated_at: opt_timestamp_column(row, 4)?,
            auto_merged: row.get(5)?,
            created_at: timestamp_column(row, 6)?,
        })
    }
}

impl<'a> Repository for SqliteImportRepository<'a> {
    type Entity = Import;
    type Id = ImportId;

    fn find_by_id(&self, id: &Self::Id) -> Result<Option<Self::Entity>> {
        let sql = format!("SELECT {IMPORT_COLUMNS} FROM imports WHERE id = ?1");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id.to_string()], Self::row_to_import)?;
        Ok(rows.next().transpose()?)
    }

    /// A second row for the same (source, source_identifier) fails with a
    /// constraint violation; callers treat that as "already imported".
    fn save(&self, import: &Self::Entity) -> Result<()> {
        self.conn.execute(
            "INSERT INTO imports
                (id, publication_id, source, source_identifier, source_updated_at, auto_merged, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                publication_id = excluded.publication_id,
                source_updated_at = excluded.source_updated_at,
                auto_merged = excluded.auto_merged",
            params![
                import.id.to_string(),
                import.publication_id.to_string(),
                import.source.as_str(),
                import.source_identifier,
                import.source_updated_at.as_ref().map(format_timestamp),
                import.auto_merged,
                format_timestamp(&import.created_at),
            ],
        )?;
        Ok(())
    }

    fn delete(&self, id: &Self::Id) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM imports WHERE id = ?1", params![id.to_string()])?;
        Ok(deleted > 0)
    }
}

impl<'a> ImportRepository for SqliteImportRepository<'a> {
    fn find_by_source(&self, source: ImportSource, source_identifier: &str) -> Result<Option<Import>> {
        let sql = format!(
            "SELECT {IMPORT_COLUMNS} FROM imports WHERE source = ?1 AND source_identifier = ?2"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![source.as_str(), source_identifier], Self::row_to_import)?;
        Ok(rows.next().transpose()?)
    }

    fn list_for_publication(&self, publication_id: &PublicationId) -> Result<Vec<Import>> {
        let sql = format!(
            "SELECT {IMPORT_COLUMNS} FROM imports WHERE publication_id = ?1 ORDER BY created_at, id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![publication_id.to_string()], Self::row_to_import)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn reassign(&self, from: &PublicationId, to: &PublicationId) -> Result<usize> {
        let moved = self.conn.execute(
            "UPDATE imports SET publication_id = ?2 WHERE publication_id = ?1",
            params![from.to_string(), to.to_string()],
        )?;
        Ok(moved)
    }

    fn set_auto_merged(&self, id: &ImportId, auto_merged: bool) -> Result<()> {
        self.conn.execute(
            "UPDATE imports SET auto_merged = ?2 WHERE id = ?1",
            params![id.to_string(), auto_merged],
        )?;
        Ok(())
    }

    fn touch_source_updated_at(&self, id: &ImportId, at: Option<DateTime<Utc>>) -> Result<()> {
        let at = at.unwrap_or_else(Utc::now);
        self.conn.execute(
            "UPDATE imports SET source_updated_at = ?2 WHERE id = ?1",
            params![id.to_string(), format_timestamp(&at)],
        )?;
        Ok(())
    }
}
