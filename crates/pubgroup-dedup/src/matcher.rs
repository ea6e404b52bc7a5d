use rusqlite::Connection;
use tracing::debug;

use pubgroup_core::{
    ImportRepository, ImportSource, MatchingConfig, NonDuplicateGroupRepository, Publication,
    PublicationId, PublicationRepository, SqliteImportRepository, SqliteNonDuplicateGroupRepository,
    SqlitePublicationRepository,
};

use crate::Result;
use crate::similarity::{dois_compatible, set_similarity, trigrams};

/// Finds candidate duplicates of a pivot publication.
#[derive(Debug, Clone)]
pub struct SimilarityMatcher {
    threshold: f64,
    doi_unreliable_sources: Vec<ImportSource>,
}

impl Default for SimilarityMatcher {
    fn default() -> Self {
        Self::from_config(&MatchingConfig::default())
    }
}

impl SimilarityMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &MatchingConfig) -> Self {
        Self {
            threshold: config.similarity_threshold,
            doi_unreliable_sources: config.doi_unreliable_sources.clone(),
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Candidate duplicates of `pivot`, pivot first, then oldest first.
    ///
    /// A candidate scores at least the threshold on title + secondary title, has a
    /// compatible year, a compatible DOI (unless the pivot's only import comes from
    /// an unreliable-DOI source) and shares no non-duplicate group with the pivot.
    pub fn find_candidates(&self, conn: &Connection, pivot: &Publication) -> Result<Vec<PublicationId>> {
        let publications = SqlitePublicationRepository::new(conn);
        let corpus =
            publications.list_year_compatible(pivot.attributes.publication_year(), &pivot.id)?;

        let compare_doi = self.compares_doi(conn, &pivot.id)?;
        let excluded = SqliteNonDuplicateGroupRepository::new(conn).excluded_for(&pivot.id)?;
        let pivot_grams = trigrams(&pivot.attributes.matching_text());
        let pivot_doi = pivot.attributes.doi.as_deref();

        let mut candidates = vec![pivot.id];
        for other in corpus {
            if excluded.contains(&other.id) {
                continue;
            }
            if compare_doi && !dois_compatible(pivot_doi, other.attributes.doi.as_deref()) {
                continue;
            }
            let score = set_similarity(&pivot_grams, &trigrams(&other.attributes.matching_text()));
            if score >= self.threshold {
                candidates.push(other.id);
            }
        }

        debug!(
            pivot = %pivot.id,
            candidates = candidates.len() - 1,
            compare_doi,
            "similarity scan"
        );
        Ok(candidates)
    }

    fn compares_doi(&self, conn: &Connection, pivot: &PublicationId) -> Result<bool> {
        let imports = SqliteImportRepository::new(conn).list_for_publication(pivot)?;
        let only_unreliable = matches!(
            imports.as_slice(),
            [only] if self.doi_unreliable_sources.contains(&only.source)
        );
        Ok(!only_unreliable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{add_import, seed};
    use pubgroup_core::{Database, NonDuplicateGroup, Repository};

    #[test]
    fn test_candidates_include_pivot_and_similar_titles() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let a = seed(&conn, "Soil carbon dynamics in boreal forests", Some(2020), None);
        let b = seed(&conn, "Soil carbon dynamics in boreal forest", Some(2020), None);
        let _c = seed(&conn, "Quantum error correction with surface codes", Some(2020), None);

        let found = SimilarityMatcher::new().find_candidates(&conn, &a).unwrap();
        assert_eq!(found, vec![a.id, b.id]);
    }

    #[test]
    fn test_year_mismatch_excludes_but_missing_year_matches() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let a = seed(&conn, "Glacier retreat in the Alps", Some(2019), None);
        let other_year = seed(&conn, "Glacier retreat in the Alps", Some(2021), None);
        let undated = seed(&conn, "Glacier retreat in the Alps", None, None);

        let found = SimilarityMatcher::new().find_candidates(&conn, &a).unwrap();
        assert!(found.contains(&undated.id));
        assert!(!found.contains(&other_year.id));
    }

    #[test]
    fn test_conflicting_doi_excludes_candidate() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let a = seed(&conn, "Glacier retreat in the Alps", Some(2019), Some("10.1/a"));
        add_import(&conn, &a.id, ImportSource::ResearchInfo, "ri-1");
        let same = seed(&conn, "Glacier retreat in the Alps", Some(2019), Some("https://doi.org/10.1/A"));
        let blank = seed(&conn, "Glacier retreat in the Alps", Some(2019), None);
        let conflicting = seed(&conn, "Glacier retreat in the Alps", Some(2019), Some("10.1/b"));

        let found = SimilarityMatcher::new().find_candidates(&conn, &a).unwrap();
        assert!(found.contains(&same.id));
        assert!(found.contains(&blank.id));
        assert!(!found.contains(&conflicting.id));
    }

    #[test]
    fn test_activity_reporting_pivot_skips_doi_comparison() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let a = seed(&conn, "Glacier retreat in the Alps", Some(2019), Some("10.1/a"));
        add_import(&conn, &a.id, ImportSource::ActivityReporting, "ar-1");
        let conflicting = seed(&conn, "Glacier retreat in the Alps", Some(2019), Some("10.1/b"));

        let found = SimilarityMatcher::new().find_candidates(&conn, &a).unwrap();
        assert!(found.contains(&conflicting.id));
    }

    #[test]
    fn test_non_duplicate_members_are_excluded() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let a = seed(&conn, "Glacier retreat in the Alps", Some(2019), None);
        let b = seed(&conn, "Glacier retreat in the Alps", Some(2019), None);
        SqliteNonDuplicateGroupRepository::new(&conn)
            .save(&NonDuplicateGroup::new(vec![a.id, b.id]))
            .unwrap();

        let found = SimilarityMatcher::new().find_candidates(&conn, &a).unwrap();
        assert_eq!(found, vec![a.id]);
    }
}
