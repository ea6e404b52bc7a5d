use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::PublicationId;
use crate::error::CoreError;

pub type ImportId = Uuid;

/// External system a publication record was ingested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportSource {
    ActivityReporting,
    ResearchInfo,
    CitationIndex,
    Manual,
}

impl ImportSource {
    pub const ALL: [ImportSource; 4] = [
        ImportSource::ActivityReporting,
        ImportSource::ResearchInfo,
        ImportSource::CitationIndex,
        ImportSource::Manual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImportSource::ActivityReporting => "activity_reporting",
            ImportSource::ResearchInfo => "research_info",
            ImportSource::CitationIndex => "citation_index",
            ImportSource::Manual => "manual",
        }
    }
}

impl std::fmt::Display for ImportSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportSource {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace('-', "_");
        ImportSource::ALL
            .into_iter()
            .find(|source| source.as_str() == key)
            .ok_or_else(|| CoreError::UnknownSource(s.to_string()))
    }
}

/// One row per (source, source_identifier), pointing at exactly one publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Import {
    pub id: ImportId,
    pub publication_id: PublicationId,
    pub source: ImportSource,
    pub source_identifier: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_updated_at: Option<DateTime<Utc>>,

    /// Set when this import was absorbed by the auto-merge job rather than a human.
    #[serde(default)]
    pub auto_merged: bool,

    pub created_at: DateTime<Utc>,
}

impl Import {
    pub fn new(
        publication_id: PublicationId,
        source: ImportSource,
        source_identifier: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            publication_id,
            source,
            source_identifier: source_identifier.into(),
            source_updated_at: None,
            auto_merged: false,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_parse_accepts_dashes_and_case() {
        assert_eq!(
            "Activity-Reporting".parse::<ImportSource>().unwrap(),
            ImportSource::ActivityReporting
        );
        assert_eq!(
            "research_info".parse::<ImportSource>().unwrap(),
            ImportSource::ResearchInfo
        );
        assert!(matches!(
            "scopus".parse::<ImportSource>(),
            Err(CoreError::UnknownSource(_))
        ));
    }

    #[test]
    fn test_source_display_matches_storage_key() {
        for source in ImportSource::ALL {
            assert_eq!(source.to_string().parse::<ImportSource>().unwrap(), source);
        }
    }
}
