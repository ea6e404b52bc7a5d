use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = Uuid;

/// A stable cross-reference identifier, e.g. `orcid:0000-0002-1825-0097`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserIdentifier {
    pub scheme: String,
    pub value: String,
}

impl UserIdentifier {
    pub fn new(scheme: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into().trim().to_ascii_lowercase(),
            value: value.into().trim().to_string(),
        }
    }
}

impl std::str::FromStr for UserIdentifier {
    type Err = crate::error::CoreError;

    /// Parses `scheme:value`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((scheme, value)) if !scheme.trim().is_empty() && !value.trim().is_empty() => {
                Ok(Self::new(scheme, value))
            }
            _ => Err(crate::error::CoreError::ValidationError(format!(
                "identifier must look like scheme:value, got {s:?}"
            ))),
        }
    }
}

/// An internal user (researcher) publications can be attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,

    #[serde(default)]
    pub identifiers: Vec<UserIdentifier>,

    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            identifiers: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_identifier(mut self, identifier: UserIdentifier) -> Self {
        if !self.identifiers.contains(&identifier) {
            self.identifiers.push(identifier);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_parse_normalizes_scheme() {
        let id: UserIdentifier = "ORCID: 0000-0001".parse().unwrap();
        assert_eq!(id.scheme, "orcid");
        assert_eq!(id.value, "0000-0001");
        assert!("nocolon".parse::<UserIdentifier>().is_err());
    }
}
