use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{PublicationId, UserId};
use crate::error::{CoreError, Result};

/// A named contributor position (1..N) on a publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributorName {
    pub id: Uuid,
    pub publication_id: PublicationId,
    pub position: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,

    /// Internal user this contributor has been matched to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

impl ContributorName {
    pub fn new(publication_id: PublicationId, position: u32) -> Self {
        Self {
            id: Uuid::now_v7(),
            publication_id,
            position,
            first_name: None,
            middle_name: None,
            last_name: None,
            user_id: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.position == 0 {
            return Err(CoreError::ValidationError(
                "contributor position starts at 1".into(),
            ));
        }
        let has_name = [&self.first_name, &self.middle_name, &self.last_name]
            .into_iter()
            .flatten()
            .any(|part| !part.trim().is_empty());
        if !has_name {
            return Err(CoreError::ValidationError(format!(
                "contributor at position {} has no name",
                self.position
            )));
        }
        Ok(())
    }

    pub fn display_name(&self) -> String {
        [&self.first_name, &self.middle_name, &self.last_name]
            .into_iter()
            .flatten()
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Confirms that an internal user is author number K on a publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorship {
    pub id: Uuid,
    pub user_id: UserId,
    pub publication_id: PublicationId,
    pub author_number: u32,
    pub confirmed: bool,
}

impl Authorship {
    pub fn confirmed(user_id: UserId, publication_id: PublicationId, author_number: u32) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            publication_id,
            author_number,
            confirmed: true,
        }
    }
}
