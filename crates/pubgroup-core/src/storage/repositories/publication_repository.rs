use std::str::FromStr;

use chrono::NaiveDate;
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, params, params_from_iter};

use crate::error::{CoreError, Result};
use crate::models::{DuplicateGroupId, Publication, PublicationAttributes, PublicationId, PublicationType};

use super::{
    Repository, format_timestamp, opt_timestamp_column, opt_uuid_column, placeholders,
    placeholders_from, timestamp_column, uuid_column,
};

const PUBLICATION_COLUMNS: &str = "id, title, secondary_title, publication_type, journal, volume,
     issue, page_range, issn, isbn, doi, publication_date, citation_count, visible,
     updated_by_user_at, duplicate_group_id, created_at, updated_at";

pub trait PublicationRepository: Repository<Entity = Publication, Id = PublicationId> {
    fn get(&self, id: &PublicationId) -> Result<Publication>;
    fn find_many(&self, ids: &[PublicationId]) -> Result<Vec<Publication>>;
    fn list(&self, visible_only: bool, limit: usize, offset: usize) -> Result<Vec<Publication>>;
    fn list_ids(&self) -> Result<Vec<PublicationId>>;
    /// Publications whose year equals `year`, or that have no date. A `None` year
    /// is compatible with every publication.
    fn list_year_compatible(&self, year: Option<i32>, exclude: &PublicationId) -> Result<Vec<Publication>>;
    fn set_visible(&self, ids: &[PublicationId], visible: bool) -> Result<usize>;
    fn set_duplicate_group(&self, ids: &[PublicationId], group: Option<&DuplicateGroupId>) -> Result<usize>;
    fn count(&self) -> Result<usize>;
}

pub struct SqlitePublicationRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqlitePublicationRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn row_to_publication(row: &rusqlite::Row) -> rusqlite::Result<Publication> {
        let type_str: String = row.get(3)?;
        let publication_type = PublicationType::from_str(&type_str)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;
        let date_str: Option<String> = row.get(11)?;
        let publication_date = match date_str {
            Some(raw) => Some(
                NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(11, Type::Text, Box::new(e))
                })?,
            ),
            None => None,
        };

        Ok(Publication {
            id: uuid_column(row, 0)?,
            attributes: PublicationAttributes {
                title: row.get(1)?,
                secondary_title: row.get(2)?,
                publication_type,
                journal: row.get(4)?,
                volume: row.get(5)?,
                issue: row.get(6)?,
                page_range: row.get(7)?,
                issn: row.get(8)?,
                isbn: row.get(9)?,
                doi: row.get(10)?,
                publication_date,
                citation_count: row.get(12)?,
            },
            visible: row.get(13)?,
            updated_by_user_at: opt_timestamp_column(row, 14)?,
            duplicate_group_id: opt_uuid_column(row, 15)?,
            created_at: timestamp_column(row, 16)?,
            updated_at: timestamp_column(row, 17)?,
        })
    }

    /// Runs `sql_prefix` (which binds `?1` to `value`) for every id in `ids`.
    fn update_ids(&self, sql_prefix: &str, value: Value, ids: &[PublicationId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "{sql_prefix} WHERE id IN ({})",
            placeholders_from(2, ids.len())
        );
        let mut values: Vec<Value> = Vec::with_capacity(ids.len() + 1);
        values.push(value);
        values.extend(ids.iter().map(|id| Value::Text(id.to_string())));
        Ok(self.conn.execute(&sql, params_from_iter(values))?)
    }
}

impl<'a> Repository for SqlitePublicationRepository<'a> {
    type Entity = Publication;
    type Id = PublicationId;

    fn find_by_id(&self, id: &Self::Id) -> Result<Option<Self::Entity>> {
        let sql = format!("SELECT {PUBLICATION_COLUMNS} FROM publications WHERE id = ?1");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id.to_string()], Self::row_to_publication)?;
        Ok(rows.next().transpose()?)
    }

    fn save(&self, publication: &Self::Entity) -> Result<()> {
        let attrs = &publication.attributes;
        self.conn.execute(
            "INSERT INTO publications
                (id, title, secondary_title, publication_type, journal, volume, issue,
                 page_range, issn, isbn, doi, publication_date, citation_count, visible,
                 updated_by_user_at, duplicate_group_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                secondary_title = excluded.secondary_title,
                publication_type = excluded.publication_type,
                journal = excluded.journal,
                volume = excluded.volume,
                issue = excluded.issue,
                page_range = excluded.page_range,
                issn = excluded.issn,
                isbn = excluded.isbn,
                doi = excluded.doi,
                publication_date = excluded.publication_date,
                citation_count = excluded.citation_count,
                visible = excluded.visible,
                updated_by_user_at = excluded.updated_by_user_at,
                duplicate_group_id = excluded.duplicate_group_id,
                updated_at = excluded.updated_at",
            params![
                publication.id.to_string(),
                attrs.title,
                attrs.secondary_title,
                attrs.publication_type.to_string(),
                attrs.journal,
                attrs.volume,
                attrs.issue,
                attrs.page_range,
                attrs.issn,
                attrs.isbn,
                attrs.doi,
                attrs.publication_date.map(|d| d.format("%Y-%m-%d").to_string()),
                attrs.citation_count,
                publication.visible,
                publication.updated_by_user_at.as_ref().map(format_timestamp),
                publication.duplicate_group_id.map(|g| g.to_string()),
                format_timestamp(&publication.created_at),
                format_timestamp(&publication.updated_at),
            ],
        )?;
        Ok(())
    }

    fn delete(&self, id: &Self::Id) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM publications WHERE id = ?1", params![id.to_string()])?;
        Ok(deleted > 0)
    }
}

impl<'a> PublicationRepository for SqlitePublicationRepository<'a> {
    fn get(&self, id: &PublicationId) -> Result<Publication> {
        self.find_by_id(id)?
            .ok_or_else(|| CoreError::PublicationNotFound(id.to_string()))
    }

    fn find_many(&self, ids: &[PublicationId]) -> Result<Vec<Publication>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {PUBLICATION_COLUMNS} FROM publications WHERE id IN ({})
             ORDER BY created_at, id",
            placeholders(ids.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params_from_iter(ids.iter().map(|id| id.to_string())),
                Self::row_to_publication,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn list(&self, visible_only: bool, limit: usize, offset: usize) -> Result<Vec<Publication>> {
        let sql = format!(
            "SELECT {PUBLICATION_COLUMNS} FROM publications
             WHERE (?1 = 0 OR visible = 1)
             ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![visible_only, limit as i64, offset as i64],
                Self::row_to_publication,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn list_ids(&self) -> Result<Vec<PublicationId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM publications ORDER BY created_at, id")?;
        let ids = stmt
            .query_map([], |row| uuid_column(row, 0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn list_year_compatible(&self, year: Option<i32>, exclude: &PublicationId) -> Result<Vec<Publication>> {
        let sql = format!(
            "SELECT {PUBLICATION_COLUMNS} FROM publications
             WHERE id != ?1
               AND (?2 IS NULL OR publication_year IS NULL OR publication_year = ?2)
             ORDER BY created_at, id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![exclude.to_string(), year], Self::row_to_publication)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn set_visible(&self, ids: &[PublicationId], visible: bool) -> Result<usize> {
        self.update_ids(
            "UPDATE publications SET visible = ?1",
            Value::Integer(i64::from(visible)),
            ids,
        )
    }

    fn set_duplicate_group(&self, ids: &[PublicationId], group: Option<&DuplicateGroupId>) -> Result<usize> {
        self.update_ids(
            "UPDATE publications SET duplicate_group_id = ?1",
            group.map_or(Value::Null, |g| Value::Text(g.to_string())),
            ids,
        )
    }

    fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM publications", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
