use std::collections::BTreeSet;

use rusqlite::{Connection, params};

use crate::error::Result;
use crate::models::{NonDuplicateGroup, NonDuplicateGroupId, PublicationId};

use super::{Repository, format_timestamp, timestamp_column, uuid_column};

pub trait NonDuplicateGroupRepository:
    Repository<Entity = NonDuplicateGroup, Id = NonDuplicateGroupId>
{
    /// Every publication sharing at least one non-duplicate group with `publication_id`,
    /// excluding `publication_id` itself.
    fn excluded_for(&self, publication_id: &PublicationId) -> Result<BTreeSet<PublicationId>>;
    fn groups_containing(&self, publication_id: &PublicationId) -> Result<Vec<NonDuplicateGroup>>;
    fn list(&self) -> Result<Vec<NonDuplicateGroup>>;
    /// Deletes groups left with fewer than two members. Returns how many were removed.
    fn prune_undersized(&self) -> Result<usize>;
}

pub struct SqliteNonDuplicateGroupRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteNonDuplicateGroupRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn members(&self, id: &NonDuplicateGroupId) -> Result<Vec<PublicationId>> {
        let mut stmt = self.conn.prepare(
            "SELECT m.publication_id FROM non_duplicate_members m
             JOIN publications p ON p.id = m.publication_id
             WHERE m.group_id = ?1 ORDER BY p.created_at, p.id",
        )?;
        let ids = stmt
            .query_map(params![id.to_string()], |row| uuid_column(row, 0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn hydrate(&self, heads: Vec<(NonDuplicateGroupId, chrono::DateTime<chrono::Utc>)>) -> Result<Vec<NonDuplicateGroup>> {
        let mut groups = Vec::with_capacity(heads.len());
        for (id, created_at) in heads {
            groups.push(NonDuplicateGroup {
                members: self.members(&id)?,
                id,
                created_at,
            });
        }
        Ok(groups)
    }
}

impl<'a> Repository for SqliteNonDuplicateGroupRepository<'a> {
    type Entity = NonDuplicateGroup;
    type Id = NonDuplicateGroupId;

    fn find_by_id(&self, id: &Self::Id) -> Result<Option<Self::Entity>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, created_at FROM non_duplicate_groups WHERE id = ?1")?;
        let heads = stmt
            .query_map(params![id.to_string()], |row| {
                Ok((uuid_column(row, 0)?, timestamp_column(row, 1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(self.hydrate(heads)?.into_iter().next())
    }

    fn save(&self, group: &Self::Entity) -> Result<()> {
        self.conn.execute(
            "INSERT INTO non_duplicate_groups (id, created_at) VALUES (?1, ?2)
             ON CONFLICT(id) DO NOTHING",
            params![group.id.to_string(), format_timestamp(&group.created_at)],
        )?;
        for member in &group.members {
            self.conn.execute(
                "INSERT OR IGNORE INTO non_duplicate_members (group_id, publication_id) VALUES (?1, ?2)",
                params![group.id.to_string(), member.to_string()],
            )?;
        }
        Ok(())
    }

    fn delete(&self, id: &Self::Id) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM non_duplicate_groups WHERE id = ?1", params![id.to_string()])?;
        Ok(deleted > 0)
    }
}

impl<'a> NonDuplicateGroupRepository for SqliteNonDuplicateGroupRepository<'a> {
    fn excluded_for(&self, publication_id: &PublicationId) -> Result<BTreeSet<PublicationId>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT other.publication_id
             FROM non_duplicate_members pivot
             JOIN non_duplicate_members other ON other.group_id = pivot.group_id
             WHERE pivot.publication_id = ?1 AND other.publication_id != ?1",
        )?;
        let ids = stmt
            .query_map(params![publication_id.to_string()], |row| uuid_column(row, 0))?
            .collect::<std::result::Result<BTreeSet<_>, _>>()?;
        Ok(ids)
    }

    fn groups_containing(&self, publication_id: &PublicationId) -> Result<Vec<NonDuplicateGroup>> {
        let mut stmt = self.conn.prepare(
            "SELECT g.id, g.created_at FROM non_duplicate_groups g
             JOIN non_duplicate_members m ON m.group_id = g.id
             WHERE m.publication_id = ?1 ORDER BY g.created_at, g.id",
        )?;
        let heads = stmt
            .query_map(params![publication_id.to_string()], |row| {
                Ok((uuid_column(row, 0)?, timestamp_column(row, 1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.hydrate(heads)
    }

    fn list(&self) -> Result<Vec<NonDuplicateGroup>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, created_at FROM non_duplicate_groups ORDER BY created_at, id")?;
        let heads = stmt
            .query_map([], |row| Ok((uuid_column(row, 0)?, timestamp_column(row, 1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.hydrate(heads)
    }

    fn prune_undersized(&self) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM non_duplicate_groups
             WHERE (SELECT COUNT(*) FROM non_duplicate_members m WHERE m.group_id = non_duplicate_groups.id) < 2",
            [],
        )?;
        Ok(removed)
    }
}
