use rusqlite::{Connection, params, params_from_iter};

use crate::error::Result;
use crate::models::{DuplicateGroup, DuplicateGroupId, PublicationId};

use super::{Repository, format_timestamp, placeholders_from, timestamp_column, uuid_column};

pub trait DuplicateGroupRepository: Repository<Entity = DuplicateGroup, Id = DuplicateGroupId> {
    /// Member ids, oldest publication first.
    fn members(&self, id: &DuplicateGroupId) -> Result<Vec<PublicationId>>;
    fn group_of(&self, publication_id: &PublicationId) -> Result<Option<DuplicateGroupId>>;
    fn add_members(&self, id: &DuplicateGroupId, publication_ids: &[PublicationId]) -> Result<usize>;
    /// Moves every member of `from` into `into`, leaving `from` empty.
    fn move_members(&self, from: &DuplicateGroupId, into: &DuplicateGroupId) -> Result<usize>;
    fn list(&self) -> Result<Vec<DuplicateGroup>>;
    fn count(&self) -> Result<usize>;
}

pub struct SqliteDuplicateGroupRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteDuplicateGroupRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl<'a> Repository for SqliteDuplicateGroupRepository<'a> {
    type Entity = DuplicateGroup;
    type Id = DuplicateGroupId;

    fn find_by_id(&self, id: &Self::Id) -> Result<Option<Self::Entity>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, created_at FROM duplicate_groups WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id.to_string()], |row| {
            Ok((uuid_column(row, 0)?, timestamp_column(row, 1)?))
        })?;
        match rows.next().transpose()? {
            Some((id, created_at)) => Ok(Some(DuplicateGroup {
                members: self.members(&id)?,
                id,
                created_at,
            })),
            None => Ok(None),
        }
    }

    /// Creates the group row (if new) and points every listed member at it.
    fn save(&self, group: &Self::Entity) -> Result<()> {
        self.conn.execute(
            "INSERT INTO duplicate_groups (id, created_at) VALUES (?1, ?2)
             ON CONFLICT(id) DO NOTHING",
            params![group.id.to_string(), format_timestamp(&group.created_at)],
        )?;
        self.add_members(&group.id, &group.members)?;
        Ok(())
    }

    fn delete(&self, id: &Self::Id) -> Result<bool> {
        self.conn.execute(
            "UPDATE publications SET duplicate_group_id = NULL WHERE duplicate_group_id = ?1",
            params![id.to_string()],
        )?;
        let deleted = self
            .conn
            .execute("DELETE FROM duplicate_groups WHERE id = ?1", params![id.to_string()])?;
        Ok(deleted > 0)
    }
}

impl<'a> DuplicateGroupRepository for SqliteDuplicateGroupRepository<'a> {
    fn members(&self, id: &DuplicateGroupId) -> Result<Vec<PublicationId>> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM publications WHERE duplicate_group_id = ?1 ORDER BY created_at, id",
        )?;
        let ids = stmt
            .query_map(params![id.to_string()], |row| uuid_column(row, 0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn group_of(&self, publication_id: &PublicationId) -> Result<Option<DuplicateGroupId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT duplicate_group_id FROM publications WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![publication_id.to_string()], |row| {
            super::opt_uuid_column(row, 0)
        })?;
        Ok(rows.next().transpose()?.flatten())
    }

    fn add_members(&self, id: &DuplicateGroupId, publication_ids: &[PublicationId]) -> Result<usize> {
        if publication_ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "UPDATE publications SET duplicate_group_id = ?1 WHERE id IN ({})",
            placeholders_from(2, publication_ids.len())
        );
        let values = std::iter::once(id.to_string())
            .chain(publication_ids.iter().map(|p| p.to_string()));
        Ok(self.conn.execute(&sql, params_from_iter(values))?)
    }

    fn move_members(&self, from: &DuplicateGroupId, into: &DuplicateGroupId) -> Result<usize> {
        let moved = self.conn.execute(
            "UPDATE publications SET duplicate_group_id = ?2 WHERE duplicate_group_id = ?1",
            params![from.to_string(), into.to_string()],
        )?;
        Ok(moved)
    }

    fn list(&self) -> Result<Vec<DuplicateGroup>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, created_at FROM duplicate_groups ORDER BY created_at, id")?;
        let heads = stmt
            .query_map([], |row| Ok((uuid_column(row, 0)?, timestamp_column(row, 1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut groups = Vec::with_capacity(heads.len());
        for (id, created_at) in heads {
            groups.push(DuplicateGroup {
                members: self.members(&id)?,
                id,
                created_at,
            });
        }
        Ok(groups)
    }

    fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM duplicate_groups", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Publication, PublicationAttributes};
    use crate::storage::database::Database;
    use crate::storage::repositories::{PublicationRepository, SqlitePublicationRepository};

    #[test]
    fn test_delete_clears_membership() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let publications = SqlitePublicationRepository::new(&conn);
        let a = Publication::new(PublicationAttributes::new("A"));
        let b = Publication::new(PublicationAttributes::new("B"));
        publications.save(&a).unwrap();
        publications.save(&b).unwrap();

        let groups = SqliteDuplicateGroupRepository::new(&conn);
        let group = DuplicateGroup::new(vec![a.id, b.id]);
        groups.save(&group).unwrap();
        assert_eq!(groups.group_of(&a.id).unwrap(), Some(group.id));
        assert_eq!(groups.members(&group.id).unwrap().len(), 2);

        assert!(groups.delete(&group.id).unwrap());
        assert_eq!(groups.group_of(&a.id).unwrap(), None);
        assert!(publications.get(&b.id).unwrap().duplicate_group_id.is_none());
        assert_eq!(groups.count().unwrap(), 0);
    }

    #[test]
    fn test_move_members_between_groups() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let publications = SqlitePublicationRepository::new(&conn);
        let ids: Vec<_> = (0..4)
            .map(|i| {
                let p = Publication::new(PublicationAttributes::new(format!("P{i}")));
                publications.save(&p).unwrap();
                p.id
            })
            .collect();

        let groups = SqliteDuplicateGroupRepository::new(&conn);
        let keep = DuplicateGroup::new(vec![ids[0], ids[1]]);
        let absorbed = DuplicateGroup::new(vec![ids[2], ids[3]]);
        groups.save(&keep).unwrap();
        groups.save(&absorbed).unwrap();

        assert_eq!(groups.move_members(&absorbed.id, &keep.id).unwrap(), 2);
        assert_eq!(groups.members(&keep.id).unwrap().len(), 4);
        assert!(groups.members(&absorbed.id).unwrap().is_empty());
    }
}
