use std::io::BufRead;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use pubgroup_core::{
    Authorship, ContributorName, ContributorRepository, Database, Import, ImportRepository,
    ImportSource, Publication, PublicationAttributes, PublicationId, PublicationRepository,
    Repository, SqliteContributorRepository, SqliteImportRepository, SqlitePublicationRepository,
    SqliteUserRepository, UserIdentifier, UserRepository,
};

use crate::groups::DuplicateGroupManager;
use crate::{DedupError, Result};

/// One contributor as a source parser hands it over.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedContributor {
    pub position: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,

    /// Stable cross reference to an internal user, e.g. `orcid:0000-0002-1825-0097`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_ref: Option<UserIdentifier>,
}

/// One normalized record from a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub source_identifier: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_updated_at: Option<DateTime<Utc>>,

    pub attributes: PublicationAttributes,

    #[serde(default)]
    pub contributors: Vec<NormalizedContributor>,
}

impl NormalizedRecord {
    pub fn new(source_identifier: impl Into<String>, attributes: PublicationAttributes) -> Self {
        Self {
            source_identifier: source_identifier.into(),
            source_updated_at: None,
            attributes,
            contributors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordError {
    /// 1-based position of the record in the run.
    pub record: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_identifier: Option<String>,

    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "publication_id", rename_all = "snake_case")]
pub enum RecordOutcome {
    Created(PublicationId),
    Updated(PublicationId),
    /// Existing record is human-edited; only protected fields were refreshed.
    Protected(PublicationId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub source: ImportSource,
    pub created: usize,
    pub updated: usize,
    pub protected: usize,
    pub errors: Vec<RecordError>,
}

impl ImportReport {
    pub fn new(source: ImportSource) -> Self {
        Self {
            source,
            created: 0,
            updated: 0,
            protected: 0,
            errors: Vec::new(),
        }
    }

    pub fn processed(&self) -> usize {
        self.created + self.updated + self.protected + self.errors.len()
    }

    fn count(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Created(_) => self.created += 1,
            RecordOutcome::Updated(_) => self.updated += 1,
            RecordOutcome::Protected(_) => self.protected += 1,
        }
    }
}

/// Reads a JSON Lines stream of `NormalizedRecord`s. Blank lines are skipped and
/// not counted; unreadable or malformed lines come back as `RecordError`s.
pub fn read_jsonl<R: BufRead>(reader: R) -> impl Iterator<Item = std::result::Result<NormalizedRecord, RecordError>> {
    reader
        .lines()
        .filter(|line| !matches!(line, Ok(l) if l.trim().is_empty()))
        .enumerate()
        .map(|(idx, line)| {
            let record = idx + 1;
            let line = line.map_err(|e| RecordError {
                record,
                source_identifier: None,
                message: format!("unreadable line: {e}"),
            })?;
            serde_json::from_str::<NormalizedRecord>(&line).map_err(|e| RecordError {
                record,
                source_identifier: None,
                message: format!("malformed record: {e}"),
            })
        })
}

/// Per-source upsert policy: create, fully update, or refresh only protected
/// fields of a human-edited publication.
#[derive(Debug, Clone)]
pub struct ImportReconciler {
    source: ImportSource,
    manager: DuplicateGroupManager,
}

impl ImportReconciler {
    pub fn new(source: ImportSource, manager: DuplicateGroupManager) -> Self {
        Self { source, manager }
    }

    pub fn source(&self) -> ImportSource {
        self.source
    }

    /// Processes every record in its own transaction. A failing record is
    /// rolled back and reported; the run continues.
    pub fn run<I>(&self, db: &Database, records: I) -> Result<ImportReport>
    where
        I: IntoIterator<Item = std::result::Result<NormalizedRecord, RecordError>>,
    {
        let mut report = ImportReport::new(self.source);
        info!(source = %self.source, "import run started");

        for (idx, record) in records.into_iter().enumerate() {
            let record = match record {
                Ok(record) => record,
                Err(err) => {
                    warn!(source = %self.source, record = err.record, "{}", err.message);
                    report.errors.push(err);
                    continue;
                }
            };

            match self.reconcile(db, &record) {
                Ok(outcome) => report.count(outcome),
                Err(err) => {
                    warn!(
                        source = %self.source,
                        source_identifier = %record.source_identifier,
                        error = %err,
                        "import record failed"
                    );
                    report.errors.push(RecordError {
                        record: idx + 1,
                        source_identifier: Some(record.source_identifier.clone()),
                        message: err.to_string(),
                    });
                }
            }
        }

        info!(
            source = %self.source,
            created = report.created,
            updated = report.updated,
            protected = report.protected,
            errors = report.errors.len(),
            "import run finished"
        );
        Ok(report)
    }

    /// Upserts one record. A concurrent insert of the same import surfaces as
    /// `ImportAlreadyExists` and is retried once through the update path.
    pub fn reconcile(&self, db: &Database, record: &NormalizedRecord) -> Result<RecordOutcome> {
        self.reconcile_with(db, record, |conn| self.apply(conn, record))
    }

    fn reconcile_with<F>(&self, db: &Database, record: &NormalizedRecord, first: F) -> Result<RecordOutcome>
    where
        F: FnOnce(&Connection) -> Result<RecordOutcome>,
    {
        match db.transaction(|tx| first(tx)) {
            Err(DedupError::ImportAlreadyExists { .. }) => {
                debug!(
                    source = %self.source,
                    source_identifier = %record.source_identifier,
                    "import appeared concurrently, retrying as update"
                );
                db.transaction(|tx| self.apply(tx, record))
            }
            other => other,
        }
    }

    fn apply(&self, conn: &Connection, record: &NormalizedRecord) -> Result<RecordOutcome> {
        if record.source_identifier.trim().is_empty() {
            return Err(DedupError::Validation("source identifier must not be blank".into()));
        }
        record.attributes.validate()?;

        let imports = SqliteImportRepository::new(conn);
        match imports.find_by_source(self.source, &record.source_identifier)? {
            None => self.create(conn, record),
            Some(import) => self.update(conn, &import, record),
        }
    }

    fn create(&self, conn: &Connection, record: &NormalizedRecord) -> Result<RecordOutcome> {
        let publication = Publication::new(record.attributes.clone());
        SqlitePublicationRepository::new(conn).save(&publication)?;

        let mut import = Import::new(publication.id, self.source, record.source_identifier.clone());
        import.source_updated_at = Some(record.source_updated_at.unwrap_or_else(Utc::now));
        SqliteImportRepository::new(conn).save(&import).map_err(|err| {
            if err.is_constraint_violation() {
                DedupError::ImportAlreadyExists {
                    import_source: self.source,
                    source_identifier: record.source_identifier.clone(),
                }
            } else {
                err.into()
            }
        })?;

        write_contributors(conn, &publication.id, &record.contributors)?;
        self.manager.group_duplicates_of(conn, &publication.id)?;

        debug!(publication = %publication.id, source_identifier = %record.source_identifier, "publication created");
        Ok(RecordOutcome::Created(publication.id))
    }

    fn update(&self, conn: &Connection, import: &Import, record: &NormalizedRecord) -> Result<RecordOutcome> {
        let publications = SqlitePublicationRepository::new(conn);
        let mut publication = publications.get(&import.publication_id)?;

        let outcome = if publication.is_user_modified() {
            let attrs = &mut publication.attributes;
            attrs.citation_count = record.attributes.citation_count;
            if !attrs.has_doi() && record.attributes.has_doi() {
                attrs.doi = record.attributes.doi.clone();
            }
            RecordOutcome::Protected(publication.id)
        } else {
            publication.attributes = record.attributes.clone();
            let contributors = SqliteContributorRepository::new(conn);
            contributors.clear_publication(&publication.id)?;
            write_contributors(conn, &publication.id, &record.contributors)?;
            RecordOutcome::Updated(publication.id)
        };

        publication.touch();
        publications.save(&publication)?;
        SqliteImportRepository::new(conn).touch_source_updated_at(&import.id, record.source_updated_at)?;
        Ok(outcome)
    }
}

/// Creates contributor names and, for contributors resolving to a known user,
/// confirmed authorships.
pub(crate) fn write_contributors(
    conn: &Connection,
    publication_id: &PublicationId,
    contributors: &[NormalizedContributor],
) -> Result<()> {
    let names = SqliteContributorRepository::new(conn);
    let users = SqliteUserRepository::new(conn);

    for contributor in contributors {
        let mut name = ContributorName::new(*publication_id, contributor.position);
        name.first_name = contributor.first_name.clone();
        name.middle_name = contributor.middle_name.clone();
        name.last_name = contributor.last_name.clone();

        let user = match &contributor.user_ref {
            Some(identifier) => users.find_by_identifier(&UserIdentifier::new(
                identifier.scheme.as_str(),
                identifier.value.as_str(),
            ))?,
            None => None,
        };
        name.user_id = user.as_ref().map(|u| u.id);
        names.save(&name)?;

        if let Some(user) = user {
            let already = names
                .list_authorships(publication_id)?
                .iter()
                .any(|a| a.user_id == user.id);
            if !already {
                names.save_authorship(&Authorship::confirmed(user.id, *publication_id, contributor.position))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::attributes;
    use pubgroup_core::{NonDuplicateGroup, SqliteNonDuplicateGroupRepository, User};
    use chrono::NaiveDate;

    const TITLE: &str = "Glacier retreat in the European Alps";

    fn record(ident: &str, title: &str) -> NormalizedRecord {
        NormalizedRecord::new(ident, attributes(title, Some(2019), None))
    }

    fn author(position: u32, last: &str) -> NormalizedContributor {
        NormalizedContributor {
            position,
            last_name: Some(last.to_string()),
            ..Default::default()
        }
    }

    fn reconciler(source: ImportSource) -> ImportReconciler {
        ImportReconciler::new(source, DuplicateGroupManager::default())
    }

    #[test]
    fn test_first_import_creates_publication_and_import() {
        let db = Database::open_in_memory().unwrap();
        let mut rec = record("ri-1", TITLE);
        rec.contributors = vec![author(1, "Lovelace"), author(2, "Hopper")];

        let outcome = reconciler(ImportSource::ResearchInfo).reconcile(&db, &rec).unwrap();
        let RecordOutcome::Created(id) = outcome else {
            panic!("expected a new publication");
        };

        let detail = db.get_publication_detail(&id).unwrap();
        assert_eq!(detail.publication.title(), TITLE);
        assert_eq!(detail.imports.len(), 1);
        assert_eq!(detail.imports[0].source, ImportSource::ResearchInfo);
        assert!(detail.imports[0].source_updated_at.is_some());
        assert_eq!(detail.contributors.len(), 2);
    }

    #[test]
    fn test_reimport_overwrites_unedited_publication() {
        let db = Database::open_in_memory().unwrap();
        let importer = reconciler(ImportSource::ResearchInfo);
        let mut rec = record("ri-1", TITLE);
        rec.contributors = vec![author(1, "Lovelace"), author(2, "Hopper")];
        let RecordOutcome::Created(id) = importer.reconcile(&db, &rec).unwrap() else {
            panic!("expected a new publication");
        };

        let mut newer = record("ri-1", "Glacier retreat in the Alps, revised");
        newer.attributes.journal = Some("Cryosphere".into());
        newer.contributors = vec![author(1, "Curie")];
        assert_eq!(importer.reconcile(&db, &newer).unwrap(), RecordOutcome::Updated(id));

        let detail = db.get_publication_detail(&id).unwrap();
        assert_eq!(detail.publication.title(), "Glacier retreat in the Alps, revised");
        assert_eq!(detail.publication.attributes.journal.as_deref(), Some("Cryosphere"));
        assert_eq!(detail.contributors.len(), 1);
        assert_eq!(detail.contributors[0].last_name.as_deref(), Some("Curie"));
        assert_eq!(db.count_publications().unwrap(), 1);
    }

    #[test]
    fn test_insert_race_is_retried_as_update() {
        let db = Database::open_in_memory().unwrap();
        let importer = reconciler(ImportSource::ResearchInfo);
        let RecordOutcome::Created(id) = importer.reconcile(&db, &record("ri-1", TITLE)).unwrap() else {
            panic!("expected a new publication");
        };

        // A stale lookup sends the record down the create path although the import exists.
        let newer = record("ri-1", "Glacier retreat in the Alps, revised");
        let outcome = importer
            .reconcile_with(&db, &newer, |conn| importer.create(conn, &newer))
            .unwrap();

        assert_eq!(outcome, RecordOutcome::Updated(id));
        assert_eq!(db.count_publications().unwrap(), 1);
        assert_eq!(db.get_publication(&id).unwrap().title(), "Glacier retreat in the Alps, revised");
        assert_eq!(db.list_imports(&id).unwrap().len(), 1);
    }

    #[test]
    fn test_human_edited_publication_is_protected() {
        let db = Database::open_in_memory().unwrap();
        let importer = reconciler(ImportSource::ResearchInfo);
        let mut rec = record("ri-1", TITLE);
        rec.contributors = vec![author(1, "Lovelace")];
        let RecordOutcome::Created(id) = importer.reconcile(&db, &rec).unwrap() else {
            panic!("expected a new publication");
        };

        db.transaction(|tx| -> pubgroup_core::Result<()> {
            let publications = SqlitePublicationRepository::new(tx);
            let mut p = publications.get(&id)?;
            p.attributes.title = "Curated title".into();
            p.updated_by_user_at = Some(Utc::now());
            publications.save(&p)
        })
        .unwrap();

        let mut newer = record("ri-1", "Something else entirely");
        newer.attributes.journal = Some("Other journal".into());
        newer.attributes.publication_date = NaiveDate::from_ymd_opt(2001, 1, 1);
        newer.attributes.citation_count = 42;
        newer.attributes.doi = Some("10.1/backfilled".into());
        newer.contributors = vec![author(1, "Curie"), author(2, "Noether")];
        assert_eq!(importer.reconcile(&db, &newer).unwrap(), RecordOutcome::Protected(id));

        let detail = db.get_publication_detail(&id).unwrap();
        let attrs = &detail.publication.attributes;
        assert_eq!(attrs.title, "Curated title");
        assert!(attrs.journal.is_none());
        assert_eq!(attrs.publication_year(), Some(2019));
        assert_eq!(attrs.citation_count, 42);
        assert_eq!(attrs.doi.as_deref(), Some("10.1/backfilled"));
        assert_eq!(detail.contributors.len(), 1);
        assert_eq!(detail.contributors[0].last_name.as_deref(), Some("Lovelace"));

        // An existing DOI is never replaced.
        let mut again = record("ri-1", "Something else entirely");
        again.attributes.doi = Some("10.1/other".into());
        importer.reconcile(&db, &again).unwrap();
        let p = db.get_publication(&id).unwrap();
        assert_eq!(p.attributes.doi.as_deref(), Some("10.1/backfilled"));
    }

    #[test]
    fn test_contributor_matching_creates_authorship() {
        let db = Database::open_in_memory().unwrap();
        let orcid = UserIdentifier::new("orcid", "0000-0002-1825-0097");
        let user = User::new("Ada", "Lovelace").with_identifier(orcid.clone());
        db.save_user(&user).unwrap();

        let mut rec = record("ar-1", TITLE);
        rec.contributors = vec![
            NormalizedContributor {
                position: 2,
                first_name: Some("Ada".into()),
                last_name: Some("Lovelace".into()),
                user_ref: Some(orcid),
                ..Default::default()
            },
            NormalizedContributor {
                position: 1,
                last_name: Some("Babbage".into()),
                user_ref: Some(UserIdentifier::new("orcid", "unknown")),
                ..Default::default()
            },
        ];

        let RecordOutcome::Created(id) = reconciler(ImportSource::ActivityReporting)
            .reconcile(&db, &rec)
            .unwrap()
        else {
            panic!("expected a new publication");
        };
        let detail = db.get_publication_detail(&id).unwrap();
        assert_eq!(detail.authorships.len(), 1);
        assert_eq!(detail.authorships[0].user_id, user.id);
        assert_eq!(detail.authorships[0].author_number, 2);
        assert!(detail.authorships[0].confirmed);
        let matched = detail.contributors.iter().find(|c| c.position == 2).unwrap();
        assert_eq!(matched.user_id, Some(user.id));
    }

    #[test]
    fn test_bad_record_is_reported_and_run_continues() {
        let db = Database::open_in_memory().unwrap();
        let mut broken = record("ri-2", "Broken authors");
        broken.contributors = vec![NormalizedContributor {
            position: 1,
            ..Default::default()
        }];
        let records = vec![
            Ok(record("ri-1", TITLE)),
            Ok(broken),
            Ok(record("ri-3", "Quantum error correction with surface codes")),
        ];

        let report = reconciler(ImportSource::ResearchInfo).run(&db, records).unwrap();
        assert_eq!(report.created, 2);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].record, 2);
        assert_eq!(report.errors[0].source_identifier.as_deref(), Some("ri-2"));
        // The failed record left nothing behind.
        assert_eq!(db.count_publications().unwrap(), 2);
    }

    #[test]
    fn test_new_publication_is_grouped() {
        let db = Database::open_in_memory().unwrap();
        reconciler(ImportSource::ResearchInfo)
            .reconcile(&db, &record("ri-1", TITLE))
            .unwrap();
        let RecordOutcome::Created(second) = reconciler(ImportSource::ActivityReporting)
            .reconcile(&db, &record("ar-1", TITLE))
            .unwrap()
        else {
            panic!("expected a new publication");
        };

        let groups = db.list_duplicate_groups().unwrap();
        assert_eq!(groups.len(), 1);
        assert!(groups[0].contains(&second));
    }

    #[test]
    fn test_ignored_pair_is_not_regrouped_on_reimport() {
        let db = Database::open_in_memory().unwrap();
        let ri = reconciler(ImportSource::ResearchInfo);
        let RecordOutcome::Created(a) = ri.reconcile(&db, &record("ri-1", TITLE)).unwrap() else {
            panic!("expected a new publication");
        };
        {
            let conn = db.connection();
            let b = crate::testing::seed(&conn, TITLE, Some(2019), None);
            SqliteNonDuplicateGroupRepository::new(&conn)
                .save(&NonDuplicateGroup::new(vec![a, b.id]))
                .unwrap();
        }

        ri.reconcile(&db, &record("ri-1", TITLE)).unwrap();
        let report = DuplicateGroupManager::default().regroup_all(&db).unwrap();
        assert_eq!(report.created + report.extended, 0);
        assert!(db.list_duplicate_groups().unwrap().is_empty());
    }

    #[test]
    fn test_read_jsonl_reports_malformed_lines() {
        let input = concat!(
            r#"{"source_identifier":"ri-1","attributes":{"title":"First"}}"#,
            "\n\n",
            "not json\n",
            r#"{"source_identifier":"ri-2","attributes":{"title":"Second","publication_date":"2020-02-01"},"contributors":[{"position":1,"last_name":"Noether","user_ref":{"scheme":"orcid","value":"x"}}]}"#,
            "\n",
        );

        let parsed: Vec<_> = read_jsonl(input.as_bytes()).collect();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].as_ref().unwrap().source_identifier, "ri-1");
        assert_eq!(parsed[1].as_ref().unwrap_err().record, 2);
        let second = parsed[2].as_ref().unwrap();
        assert_eq!(second.attributes.publication_year(), Some(2020));
        assert_eq!(second.contributors[0].user_ref.as_ref().unwrap().scheme, "orcid");
    }
}
