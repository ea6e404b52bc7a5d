//! Publication model, SQLite storage and configuration for pubgroup.

pub mod config;
pub mod error;
pub mod models;
pub mod storage;

pub use config::{AppConfig, AutoMergeConfig, LoggingConfig, MatchingConfig};
pub use error::{CoreError, Result};
pub use models::*;

pub use storage::database::{ConnectionPool, open_database, open_in_memory};
pub use storage::{Database, GroupView, PublicationDetail};

pub use storage::repositories::{
    ContributorRepository, DuplicateGroupRepository, ImportRepository, NonDuplicateGroupRepository,
    PublicationRepository, Repository, SqliteContributorRepository, SqliteDuplicateGroupRepository,
    SqliteImportRepository, SqliteNonDuplicateGroupRepository, SqlitePublicationRepository,
    SqliteUserRepository, UserRepository,
};
