use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::PublicationId;

pub type DuplicateGroupId = Uuid;
pub type NonDuplicateGroupId = Uuid;

/// A set of two or more publications currently believed to be one work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub id: DuplicateGroupId,
    pub created_at: DateTime<Utc>,
    /// Members ordered oldest first.
    pub members: Vec<PublicationId>,
}

impl DuplicateGroup {
    pub fn new(members: Vec<PublicationId>) -> Self {
        Self {
            id: Uuid::now_v7(),
            created_at: Utc::now(),
            members,
        }
    }

    pub fn contains(&self, id: &PublicationId) -> bool {
        self.members.contains(id)
    }
}

/// A human assertion that its members are *not* duplicates of one another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonDuplicateGroup {
    pub id: NonDuplicateGroupId,
    pub created_at: DateTime<Utc>,
    pub members: Vec<PublicationId>,
}

impl NonDuplicateGroup {
    pub fn new(members: Vec<PublicationId>) -> Self {
        Self {
            id: Uuid::now_v7(),
            created_at: Utc::now(),
            members,
        }
    }

    pub fn contains(&self, id: &PublicationId) -> bool {
        self.members.contains(id)
    }
}
