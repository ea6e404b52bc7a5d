use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::DuplicateGroupId;
use crate::error::{CoreError, Result};

pub type PublicationId = Uuid;

/// Closed vocabulary of research-output types.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicationType {
    JournalArticle,
    Book,
    BookChapter,
    ConferencePaper,
    Report,
    Thesis,
    Editorial,
    Review,
    #[default]
    Other,
}

impl std::fmt::Display for PublicationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use PublicationType::*;
        let s = match self {
            JournalArticle => "journal_article",
            Book => "book",
            BookChapter => "book_chapter",
            ConferencePaper => "conference_paper",
            Report => "report",
            Thesis => "thesis",
            Editorial => "editorial",
            Review => "review",
            Other => "other",
        };
        write!(f, "{s}")
    }
}

impl FromStr for PublicationType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        use PublicationType::*;
        match s.trim().to_ascii_lowercase().as_str() {
            "journal_article" => Ok(JournalArticle),
            "book" => Ok(Book),
            "book_chapter" => Ok(BookChapter),
            "conference_paper" => Ok(ConferencePaper),
            "report" => Ok(Report),
            "thesis" => Ok(Thesis),
            "editorial" => Ok(Editorial),
            "review" => Ok(Review),
            "other" => Ok(Other),
            other => Err(CoreError::ValidationError(format!(
                "unknown publication type: {other}"
            ))),
        }
    }
}

/// The normalized attribute set a source importer hands over for one record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublicationAttributes {
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_title: Option<String>,

    #[serde(default)]
    pub publication_type: PublicationType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_range: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issn: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isbn: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_date: Option<NaiveDate>,

    #[serde(default)]
    pub citation_count: u32,
}

impl PublicationAttributes {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(CoreError::ValidationError("title must not be blank".into()));
        }
        Ok(())
    }

    pub fn publication_year(&self) -> Option<i32> {
        self.publication_date.map(|d| d.year())
    }

    /// Title and secondary title joined, the text used for similarity matching.
    pub fn matching_text(&self) -> String {
        match self.secondary_title.as_deref().map(str::trim) {
            Some(secondary) if !secondary.is_empty() => {
                format!("{} {}", self.title.trim(), secondary)
            }
            _ => self.title.trim().to_string(),
        }
    }

    pub fn has_doi(&self) -> bool {
        self.doi.as_deref().is_some_and(|d| !d.trim().is_empty())
    }
}

/// Canonical research-output record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publication {
    pub id: PublicationId,

    #[serde(flatten)]
    pub attributes: PublicationAttributes,

    pub visible: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by_user_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_group_id: Option<DuplicateGroupId>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Publication {
    pub fn new(attributes: PublicationAttributes) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            attributes,
            visible: true,
            updated_by_user_at: None,
            duplicate_group_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a human has edited this record; such records are protected
    /// from most import overwrites.
    pub fn is_user_modified(&self) -> bool {
        self.updated_by_user_at.is_some()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn title(&self) -> &str {
        &self.attributes.title
    }
}
