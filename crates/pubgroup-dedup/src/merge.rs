use std::collections::BTreeSet;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

use pubgroup_core::{
    ContributorRepository, ImportRepository, NonDuplicateGroupRepository, PublicationId,
    PublicationRepository, Repository, SqliteContributorRepository, SqliteImportRepository,
    SqliteNonDuplicateGroupRepository, SqlitePublicationRepository,
};

use crate::{DedupError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    pub target: PublicationId,
    pub absorbed: Vec<PublicationId>,
    pub imports_moved: usize,
    pub contributors_moved: usize,
    pub authorships_moved: usize,
    pub authorships_discarded: usize,
}

/// Collapses publications into a surviving target.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeEngine;

impl MergeEngine {
    pub fn new() -> Self {
        Self
    }

    /// Moves every import, contributor and authorship of `sources` onto `target`
    /// and deletes the sources.
    ///
    /// A source is mergeable when it shares `target`'s duplicate group and no
    /// non-duplicate group with it, or when it is listed in `confirmed` (a human
    /// override). Otherwise fails with `NonDuplicateMerge` before any write.
    /// The target's duplicate group is left untouched.
    pub fn merge(
        &self,
        conn: &Connection,
        target: &PublicationId,
        sources: &[PublicationId],
        confirmed: &[PublicationId],
    ) -> Result<MergeSummary> {
        let publications = SqlitePublicationRepository::new(conn);
        let target_publication = publications.get(target)?;

        let sources: Vec<PublicationId> = sources
            .iter()
            .copied()
            .filter(|id| id != target)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if sources.is_empty() {
            return Err(DedupError::Validation("nothing to merge into the target".into()));
        }

        let excluded = SqliteNonDuplicateGroupRepository::new(conn).excluded_for(target)?;
        let mut offending = Vec::new();
        for id in &sources {
            let source = publications.get(id)?;
            let co_resident = target_publication.duplicate_group_id.is_some()
                && source.duplicate_group_id == target_publication.duplicate_group_id;
            let sanctioned = co_resident && !excluded.contains(id);
            if !sanctioned && !confirmed.contains(id) {
                offending.push(*id);
            }
        }
        if !offending.is_empty() {
            return Err(DedupError::NonDuplicateMerge {
                target: *target,
                offending,
            });
        }

        let imports = SqliteImportRepository::new(conn);
        let contributors = SqliteContributorRepository::new(conn);
        let mut summary = MergeSummary {
            target: *target,
            ..Default::default()
        };

        for id in &sources {
            summary.imports_moved += imports.reassign(id, target)?;
            summary.contributors_moved += contributors.reassign_names(id, target)?;
            let (moved, discarded) = contributors.reassign_authorships(id, target)?;
            summary.authorships_moved += moved;
            summary.authorships_discarded += discarded;
            publications.delete(id)?;
            debug!(source = %id, target = %target, "publication absorbed");
        }
        summary.absorbed = sources;

        let pruned = SqliteNonDuplicateGroupRepository::new(conn).prune_undersized()?;
        info!(
            target = %target,
            absorbed = summary.absorbed.len(),
            imports = summary.imports_moved,
            pruned_non_duplicate_groups = pruned,
            "publications merged"
        );
        Ok(summary)
    }
}
