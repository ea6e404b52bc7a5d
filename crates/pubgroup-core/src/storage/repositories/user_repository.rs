use rusqlite::{Connection, params};

use crate::error::Result;
use crate::models::{User, UserId, UserIdentifier};

use super::{Repository, format_timestamp, timestamp_column, uuid_column};

pub trait UserRepository: Repository<Entity = User, Id = UserId> {
    fn find_by_identifier(&self, identifier: &UserIdentifier) -> Result<Option<User>>;
    fn list(&self) -> Result<Vec<User>>;
}

pub struct SqliteUserRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteUserRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
        Ok(User {
            id: uuid_column(row, 0)?,
            first_name: row.get(1)?,
            last_name: row.get(2)?,
            identifiers: Vec::new(),
            created_at: timestamp_column(row, 3)?,
        })
    }

    fn load_identifiers(&self, user: &mut User) -> Result<()> {
        let mut stmt = self.conn.prepare(
            "SELECT scheme, value FROM user_identifiers WHERE user_id = ?1 ORDER BY scheme, value",
        )?;
        user.identifiers = stmt
            .query_map(params![user.id.to_string()], |row| {
                Ok(UserIdentifier {
                    scheme: row.get(0)?,
                    value: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(())
    }
}

impl<'a> Repository for SqliteUserRepository<'a> {
    type Entity = User;
    type Id = UserId;

    fn find_by_id(&self, id: &Self::Id) -> Result<Option<Self::Entity>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, first_name, last_name, created_at FROM users WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id.to_string()], Self::row_to_user)?;
        match rows.next().transpose()? {
            Some(mut user) => {
                self.load_identifiers(&mut user)?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    fn save(&self, user: &Self::Entity) -> Result<()> {
        self.conn.execute(
            "INSERT INTO users (id, first_name, last_name, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                first_name = excluded.first_name,
                last_name = excluded.last_name",
            params![
                user.id.to_string(),
                user.first_name,
                user.last_name,
                format_timestamp(&user.created_at),
            ],
        )?;

        self.conn.execute(
            "DELETE FROM user_identifiers WHERE user_id = ?1",
            params![user.id.to_string()],
        )?;
        for identifier in &user.identifiers {
            self.conn.execute(
                "INSERT INTO user_identifiers (user_id, scheme, value) VALUES (?1, ?2, ?3)",
                params![user.id.to_string(), identifier.scheme, identifier.value],
            )?;
        }
        Ok(())
    }

    fn delete(&self, id: &Self::Id) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM users WHERE id = ?1", params![id.to_string()])?;
        Ok(deleted > 0)
    }
}

impl<'a> UserRepository for SqliteUserRepository<'a> {
    fn find_by_identifier(&self, identifier: &UserIdentifier) -> Result<Option<User>> {
        let mut stmt = self.conn.prepare(
            "SELECT u.id, u.first_name, u.last_name, u.created_at
             FROM users u JOIN user_identifiers i ON i.user_id = u.id
             WHERE i.scheme = ?1 AND i.value = ?2",
        )?;
        let mut rows = stmt.query_map(
            params![identifier.scheme, identifier.value],
            Self::row_to_user,
        )?;
        match rows.next().transpose()? {
            Some(mut user) => {
                self.load_identifiers(&mut user)?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    fn list(&self) -> Result<Vec<User>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, first_name, last_name, created_at FROM users ORDER BY last_name, first_name",
        )?;
        let mut users = stmt
            .query_map([], Self::row_to_user)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for user in &mut users {
            self.load_identifiers(user)?;
        }
        Ok(users)
    }
}
