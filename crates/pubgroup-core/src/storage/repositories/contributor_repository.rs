use rusqlite::{Connection, params};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Authorship, ContributorName, PublicationId};

use super::{Repository, opt_uuid_column, uuid_column};

pub trait ContributorRepository: Repository<Entity = ContributorName, Id = Uuid> {
    fn list_names(&self, publication_id: &PublicationId) -> Result<Vec<ContributorName>>;
    fn list_authorships(&self, publication_id: &PublicationId) -> Result<Vec<Authorship>>;
    fn save_authorship(&self, authorship: &Authorship) -> Result<()>;
    /// Deletes every contributor name and authorship of a publication.
    fn clear_publication(&self, publication_id: &PublicationId) -> Result<()>;
    fn reassign_names(&self, from: &PublicationId, to: &PublicationId) -> Result<usize>;
    /// Re-parents authorships of `from` onto `to`. Where `to` already has an
    /// authorship for the same user, the existing one is kept and the moving
    /// one discarded. Returns (moved, discarded).
    fn reassign_authorships(&self, from: &PublicationId, to: &PublicationId) -> Result<(usize, usize)>;
}

pub struct SqliteContributorRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteContributorRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn row_to_name(row: &rusqlite::Row) -> rusqlite::Result<ContributorName> {
        Ok(ContributorName {
            id: uuid_column(row, 0)?,
            publication_id: uuid_column(row, 1)?,
            position: row.get(2)?,
            first_name: row.get(3)?,
            middle_name: row.get(4)?,
            last_name: row.get(5)?,
            user_id: opt_uuid_column(row, 6)?,
        })
    }

    fn row_to_authorship(row: &rusqlite::Row) -> rusqlite::Result<Authorship> {
        Ok(Authorship {
            id: uuid_column(row, 0)?,
            user_id: uuid_column(row, 1)?,
            publication_id: uuid_column(row, 2)?,
            author_number: row.get(3)?,
            confirmed: row.get(4)?,
        })
    }
}

impl<'a> Repository for SqliteContributorRepository<'a> {
    type Entity = ContributorName;
    type Id = Uuid;

    fn find_by_id(&self, id: &Self::Id) -> Result<Option<Self::Entity>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, publication_id, position, first_name, middle_name, last_name, user_id
             FROM contributor_names WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id.to_string()], Self::row_to_name)?;
        Ok(rows.next().transpose()?)
    }

    fn save(&self, name: &Self::Entity) -> Result<()> {
        name.validate()?;
        self.conn.execute(
            "INSERT INTO contributor_names
                (id, publication_id, position, first_name, middle_name, last_name, user_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                publication_id = excluded.publication_id,
                position = excluded.position,
                first_name = excluded.first_name,
                middle_name = excluded.middle_name,
                last_name = excluded.last_name,
                user_id = excluded.user_id",
            params![
                name.id.to_string(),
                name.publication_id.to_string(),
                name.position,
                name.first_name,
                name.middle_name,
                name.last_name,
                name.user_id.map(|u| u.to_string()),
            ],
        )?;
        Ok(())
    }

    fn delete(&self, id: &Self::Id) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM contributor_names WHERE id = ?1", params![id.to_string()])?;
        Ok(deleted > 0)
    }
}

impl<'a> ContributorRepository for SqliteContributorRepository<'a> {
    fn list_names(&self, publication_id: &PublicationId) -> Result<Vec<ContributorName>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, publication_id, position, first_name, middle_name, last_name, user_id
             FROM contributor_names WHERE publication_id = ?1 ORDER BY position, id",
        )?;
        let rows = stmt
            .query_map(params![publication_id.to_string()], Self::row_to_name)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn list_authorships(&self, publication_id: &PublicationId) -> Result<Vec<Authorship>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, publication_id, author_number, confirmed
             FROM authorships WHERE publication_id = ?1 ORDER BY author_number, id",
        )?;
        let rows = stmt
            .query_map(params![publication_id.to_string()], Self::row_to_authorship)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn save_authorship(&self, authorship: &Authorship) -> Result<()> {
        self.conn.execute(
            "INSERT INTO authorships (id, user_id, publication_id, author_number, confirmed)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                author_number = excluded.author_number,
                confirmed = excluded.confirmed",
            params![
                authorship.id.to_string(),
                authorship.user_id.to_string(),
                authorship.publication_id.to_string(),
                authorship.author_number,
                authorship.confirmed,
            ],
        )?;
        Ok(())
    }

    fn clear_publication(&self, publication_id: &PublicationId) -> Result<()> {
        let id = publication_id.to_string();
        self.conn
            .execute("DELETE FROM authorships WHERE publication_id = ?1", params![id])?;
        self.conn
            .execute("DELETE FROM contributor_names WHERE publication_id = ?1", params![id])?;
        Ok(())
    }

    fn reassign_names(&self, from: &PublicationId, to: &PublicationId) -> Result<usize> {
        let moved = self.conn.execute(
            "UPDATE contributor_names SET publication_id = ?2 WHERE publication_id = ?1",
            params![from.to_string(), to.to_string()],
        )?;
        Ok(moved)
    }

    fn reassign_authorships(&self, from: &PublicationId, to: &PublicationId) -> Result<(usize, usize)> {
        let discarded = self.conn.execute(
            "DELETE FROM authorships
             WHERE publication_id = ?1
               AND user_id IN (SELECT user_id FROM authorships WHERE publication_id = ?2)",
            params![from.to_string(), to.to_string()],
        )?;
        let moved = self.conn.execute(
            "UPDATE authorships SET publication_id = ?2 WHERE publication_id = ?1",
            params![from.to_string(), to.to_string()],
        )?;
        Ok((moved, discarded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Publication, PublicationAttributes, User};
    use crate::storage::database::Database;
    use crate::storage::repositories::{SqlitePublicationRepository, SqliteUserRepository};

    #[test]
    fn test_reassign_authorships_keeps_target_on_collision() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();

        let publications = SqlitePublicationRepository::new(&conn);
        let target = Publication::new(PublicationAttributes::new("Target"));
        let source = Publication::new(PublicationAttributes::new("Source"));
        publications.save(&target).unwrap();
        publications.save(&source).unwrap();

        let users = SqliteUserRepository::new(&conn);
        let shared = User::new("Mira", "Sol");
        let other = User::new("Jon", "Berg");
        users.save(&shared).unwrap();
        users.save(&other).unwrap();

        let contributors = SqliteContributorRepository::new(&conn);
        let kept = Authorship::confirmed(shared.id, target.id, 1);
        contributors.save_authorship(&kept).unwrap();
        contributors
            .save_authorship(&Authorship::confirmed(shared.id, source.id, 2))
            .unwrap();
        contributors
            .save_authorship(&Authorship::confirmed(other.id, source.id, 1))
            .unwrap();

        let (moved, discarded) = contributors.reassign_authorships(&source.id, &target.id).unwrap();
        assert_eq!((moved, discarded), (1, 1));

        let authorships = contributors.list_authorships(&target.id).unwrap();
        assert_eq!(authorships.len(), 2);
        let for_shared: Vec<_> = authorships.iter().filter(|a| a.user_id == shared.id).collect();
        assert_eq!(for_shared.len(), 1);
        assert_eq!(for_shared[0].id, kept.id);
    }

    #[test]
    fn test_nameless_contributor_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let publication = Publication::new(PublicationAttributes::new("P"));
        SqlitePublicationRepository::new(&conn).save(&publication).unwrap();

        let contributors = SqliteContributorRepository::new(&conn);
        let name = ContributorName::new(publication.id, 1);
        assert!(contributors.save(&name).is_err());
        assert!(contributors.list_names(&publication.id).unwrap().is_empty());
    }
}
