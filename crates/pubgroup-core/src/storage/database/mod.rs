mod connection;
mod migrations;
mod schema;

pub use connection::ConnectionPool;
pub use migrations::{Migration, get_applied_versions, run_migrations};
pub use schema::{SCHEMA_VERSION, init_schema};

use std::path::Path;
use std::sync::MutexGuard;

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::error::{CoreError, Result};
use crate::models::{
    Authorship, ContributorName, DuplicateGroup, DuplicateGroupId, Import, NonDuplicateGroup,
    Publication, PublicationId, User,
};

use super::repositories::{
    ContributorRepository, DuplicateGroupRepository, ImportRepository, NonDuplicateGroupRepository,
    PublicationRepository, Repository, SqliteContributorRepository, SqliteDuplicateGroupRepository,
    SqliteImportRepository, SqliteNonDuplicateGroupRepository, SqlitePublicationRepository,
    SqliteUserRepository, UserRepository,
};

pub fn open_database(path: &Path) -> Result<ConnectionPool> {
    let pool = ConnectionPool::open(path)?;
    {
        let conn = pool.get_connection();
        migrations::run_migrations(&conn)?;
    }
    Ok(pool)
}

pub fn open_in_memory() -> Result<ConnectionPool> {
    let pool = ConnectionPool::open_in_memory()?;
    {
        let conn = pool.get_connection();
        migrations::run_migrations(&conn)?;
    }
    Ok(pool)
}

/// A publication together with everything it owns.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PublicationDetail {
    pub publication: Publication,
    pub imports: Vec<Import>,
    pub contributors: Vec<ContributorName>,
    pub authorships: Vec<Authorship>,
}

/// A duplicate group with its member records and any non-duplicate assertions
/// touching those members.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GroupView {
    pub group: DuplicateGroup,
    pub members: Vec<Publication>,
    pub non_duplicate_groups: Vec<NonDuplicateGroup>,
}

/// The process-wide storage handle. Jobs and actions receive it explicitly.
pub struct Database {
    pool: ConnectionPool,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let pool = open_database(path)?;
        Ok(Self { pool })
    }

    pub fn open_in_memory() -> Result<Self> {
        let pool = open_in_memory()?;
        Ok(Self { pool })
    }

    pub fn path(&self) -> Option<&str> {
        self.pool.path()
    }

    /// Direct access to the connection, for reads.
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.pool.get_connection()
    }

    /// Runs `f` inside an IMMEDIATE transaction: the write lock is taken up
    /// front, so the read-modify-write inside `f` cannot interleave with another
    /// writer. Commits on `Ok`, rolls back on `Err`.
    pub fn transaction<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Transaction<'_>) -> std::result::Result<T, E>,
        E: From<CoreError>,
    {
        let mut conn = self.pool.get_connection();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(CoreError::from)?;
        let value = f(&tx)?;
        tx.commit().map_err(CoreError::from)?;
        Ok(value)
    }

    // ─── Read views ─────────────────────────────────────────

    pub fn get_publication(&self, id: &PublicationId) -> Result<Publication> {
        let conn = self.connection();
        SqlitePublicationRepository::new(&conn).get(id)
    }

    pub fn get_publication_detail(&self, id: &PublicationId) -> Result<PublicationDetail> {
        let conn = self.connection();
        let publication = SqlitePublicationRepository::new(&conn).get(id)?;
        let contributors = SqliteContributorRepository::new(&conn);
        Ok(PublicationDetail {
            imports: SqliteImportRepository::new(&conn).list_for_publication(id)?,
            contributors: contributors.list_names(id)?,
            authorships: contributors.list_authorships(id)?,
            publication,
        })
    }

    pub fn list_publications(&self, visible_only: bool, limit: usize, offset: usize) -> Result<Vec<Publication>> {
        let conn = self.connection();
        SqlitePublicationRepository::new(&conn).list(visible_only, limit, offset)
    }

    pub fn count_publications(&self) -> Result<usize> {
        let conn = self.connection();
        SqlitePublicationRepository::new(&conn).count()
    }

    pub fn list_imports(&self, publication_id: &PublicationId) -> Result<Vec<Import>> {
        let conn = self.connection();
        SqliteImportRepository::new(&conn).list_for_publication(publication_id)
    }

    pub fn list_duplicate_groups(&self) -> Result<Vec<DuplicateGroup>> {
        let conn = self.connection();
        SqliteDuplicateGroupRepository::new(&conn).list()
    }

    pub fn get_duplicate_group(&self, id: &DuplicateGroupId) -> Result<DuplicateGroup> {
        let conn = self.connection();
        SqliteDuplicateGroupRepository::new(&conn)
            .find_by_id(id)?
            .ok_or_else(|| CoreError::DuplicateGroupNotFound(id.to_string()))
    }

    pub fn get_group_view(&self, id: &DuplicateGroupId) -> Result<GroupView> {
        let conn = self.connection();
        let group = SqliteDuplicateGroupRepository::new(&conn)
            .find_by_id(id)?
            .ok_or_else(|| CoreError::DuplicateGroupNotFound(id.to_string()))?;
        let members = SqlitePublicationRepository::new(&conn).find_many(&group.members)?;

        let non_duplicates = SqliteNonDuplicateGroupRepository::new(&conn);
        let mut non_duplicate_groups: Vec<NonDuplicateGroup> = Vec::new();
        for member in &group.members {
            for ndg in non_duplicates.groups_containing(member)? {
                if !non_duplicate_groups.iter().any(|g| g.id == ndg.id) {
                    non_duplicate_groups.push(ndg);
                }
            }
        }

        Ok(GroupView {
            group,
            members,
            non_duplicate_groups,
        })
    }

    pub fn list_non_duplicate_groups(&self) -> Result<Vec<NonDuplicateGroup>> {
        let conn = self.connection();
        SqliteNonDuplicateGroupRepository::new(&conn).list()
    }

    pub fn save_user(&self, user: &User) -> Result<()> {
        self.transaction(|tx| SqliteUserRepository::new(tx).save(user))
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.connection();
        SqliteUserRepository::new(&conn).list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PublicationAttributes;

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        let publication = Publication::new(PublicationAttributes::new("Rolled back"));

        let result: Result<()> = db.transaction(|tx| {
            SqlitePublicationRepository::new(tx).save(&publication)?;
            Err(CoreError::ValidationError("abort".into()))
        });

        assert!(result.is_err());
        assert_eq!(db.count_publications().unwrap(), 0);
    }

    #[test]
    fn test_transaction_commits_on_ok() {
        let db = Database::open_in_memory().unwrap();
        let publication = Publication::new(PublicationAttributes::new("Kept"));

        db.transaction(|tx| SqlitePublicationRepository::new(tx).save(&publication))
            .unwrap();

        assert_eq!(db.get_publication(&publication.id).unwrap().title(), "Kept");
    }

    #[test]
    fn test_open_on_disk_runs_migrations() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("pubgroup.db");
        let db = Database::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(db.count_publications().unwrap(), 0);

        let conn = db.connection();
        assert_eq!(get_applied_versions(&conn).unwrap().len() as u32, SCHEMA_VERSION);
    }
}
