use pubgroup_core::{CoreError, DuplicateGroupId, ImportSource, PublicationId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DedupError {
    /// A merge was requested without a duplicate relationship backing it.
    #[error("cannot merge {offending:?} into {target}: not sanctioned duplicates")]
    NonDuplicateMerge {
        target: PublicationId,
        offending: Vec<PublicationId>,
    },

    /// An action named a duplicate group that the publications are not in.
    #[error("{publications:?} not in duplicate group {group}")]
    NotInGroup {
        group: DuplicateGroupId,
        publications: Vec<PublicationId>,
    },

    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("import {import_source}/{source_identifier} already exists")]
    ImportAlreadyExists {
        import_source: ImportSource,
        source_identifier: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<rusqlite::Error> for DedupError {
    fn from(err: rusqlite::Error) -> Self {
        DedupError::Core(CoreError::Database(err))
    }
}

pub type Result<T> = std::result::Result<T, DedupError>;
