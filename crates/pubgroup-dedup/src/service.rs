use chrono::Utc;
use tracing::info;

use pubgroup_core::{
    Database, Publication, PublicationAttributes, PublicationId, PublicationRepository, Repository,
    SqlitePublicationRepository,
};

use crate::Result;
use crate::groups::{DuplicateGroupManager, GroupingOutcome};
use crate::import::{NormalizedContributor, write_contributors};

/// Manual entry and human edits.
#[derive(Debug, Clone, Default)]
pub struct PublicationService {
    manager: DuplicateGroupManager,
}

impl PublicationService {
    pub fn new(manager: DuplicateGroupManager) -> Self {
        Self { manager }
    }

    /// Creates a publication without any import and groups it like an imported one.
    pub fn create_manual(
        &self,
        db: &Database,
        attributes: PublicationAttributes,
        contributors: &[NormalizedContributor],
    ) -> Result<(Publication, GroupingOutcome)> {
        attributes.validate()?;
        db.transaction(|tx| {
            let publication = Publication::new(attributes);
            SqlitePublicationRepository::new(tx).save(&publication)?;
            write_contributors(tx, &publication.id, contributors)?;
            let grouping = self.manager.group_duplicates_of(tx, &publication.id)?;
            info!(publication = %publication.id, "manual publication created");
            Ok((publication, grouping))
        })
    }

    /// Replaces the attributes and marks the publication as human-edited, which
    /// protects it from later import overwrites.
    pub fn edit(&self, db: &Database, id: &PublicationId, attributes: PublicationAttributes) -> Result<Publication> {
        attributes.validate()?;
        db.transaction(|tx| {
            let publications = SqlitePublicationRepository::new(tx);
            let mut publication = publications.get(id)?;
            publication.attributes = attributes;
            publication.updated_by_user_at = Some(Utc::now());
            publication.touch();
            publications.save(&publication)?;
            info!(publication = %id, "publication edited");
            Ok(publication)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::{ImportReconciler, NormalizedRecord, RecordOutcome};
    use crate::testing::attributes;
    use crate::DedupError;
    use pubgroup_core::{CoreError, ImportSource};

    const TITLE: &str = "Glacier retreat in the European Alps";

    #[test]
    fn test_manual_publication_is_grouped_with_imported_twin() {
        let db = Database::open_in_memory().unwrap();
        ImportReconciler::new(ImportSource::ResearchInfo, DuplicateGroupManager::default())
            .reconcile(&db, &NormalizedRecord::new("ri-1", attributes(TITLE, Some(2019), None)))
            .unwrap();

        let contributors = [NormalizedContributor {
            position: 1,
            last_name: Some("Lovelace".into()),
            ..Default::default()
        }];
        let (publication, grouping) = PublicationService::default()
            .create_manual(&db, attributes(TITLE, Some(2019), None), &contributors)
            .unwrap();

        assert!(matches!(grouping, GroupingOutcome::Created { .. }));
        let detail = db.get_publication_detail(&publication.id).unwrap();
        assert!(detail.imports.is_empty());
        assert_eq!(detail.contributors.len(), 1);
        assert!(!detail.publication.is_user_modified());
    }

    #[test]
    fn test_edit_marks_publication_as_human_modified() {
        let db = Database::open_in_memory().unwrap();
        let importer = ImportReconciler::new(ImportSource::ResearchInfo, DuplicateGroupManager::default());
        let RecordOutcome::Created(id) = importer
            .reconcile(&db, &NormalizedRecord::new("ri-1", attributes(TITLE, Some(2019), None)))
            .unwrap()
        else {
            panic!("expected a new publication");
        };

        let edited = PublicationService::default()
            .edit(&db, &id, attributes("Curated", Some(2019), None))
            .unwrap();
        assert!(edited.is_user_modified());

        let outcome = importer
            .reconcile(&db, &NormalizedRecord::new("ri-1", attributes(TITLE, Some(2019), None)))
            .unwrap();
        assert_eq!(outcome, RecordOutcome::Protected(id));
        assert_eq!(db.get_publication(&id).unwrap().title(), "Curated");
    }

    #[test]
    fn test_blank_title_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let err = PublicationService::default()
            .create_manual(&db, attributes("  ", None, None), &[])
            .unwrap_err();
        assert!(matches!(err, DedupError::Core(CoreError::ValidationError(_))));
        assert_eq!(db.count_publications().unwrap(), 0);
    }

    #[test]
    fn test_edit_unknown_publication() {
        let db = Database::open_in_memory().unwrap();
        let err = PublicationService::default()
            .edit(&db, &uuid::Uuid::now_v7(), attributes("X", None, None))
            .unwrap_err();
        assert!(matches!(err, DedupError::Core(CoreError::PublicationNotFound(_))));
    }
}
