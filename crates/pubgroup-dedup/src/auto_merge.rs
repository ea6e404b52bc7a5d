use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info, warn};

use pubgroup_core::{
    AutoMergeConfig, Database, DuplicateGroupId, DuplicateGroupRepository, Import, ImportRepository,
    ImportSource, PublicationId, SqliteDuplicateGroupRepository, SqliteImportRepository,
};

use crate::groups::prune_group;
use crate::merge::MergeEngine;
use crate::{DedupError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AutoMerged {
    pub group_id: DuplicateGroupId,
    pub target: PublicationId,
    pub absorbed: PublicationId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AutoMergeReport {
    pub examined: usize,
    pub merged: Vec<AutoMerged>,
    pub skipped: usize,
}

/// Resolves the unambiguous two-source pair without human review: a group of
/// exactly two publications, each carrying exactly one import, one from the
/// target source and one from the absorbed source.
#[derive(Debug, Clone)]
pub struct AutoMergePolicy {
    target_source: ImportSource,
    absorbed_source: ImportSource,
    engine: MergeEngine,
}

impl Default for AutoMergePolicy {
    fn default() -> Self {
        Self::from_config(&AutoMergeConfig::default())
    }
}

impl AutoMergePolicy {
    pub fn from_config(config: &AutoMergeConfig) -> Self {
        Self {
            target_source: config.target_source,
            absorbed_source: config.absorbed_source,
            engine: MergeEngine::new(),
        }
    }

    /// Examines every duplicate group, one transaction per group.
    pub fn run(&self, db: &Database) -> Result<AutoMergeReport> {
        let group_ids: Vec<DuplicateGroupId> = db
            .list_duplicate_groups()?
            .into_iter()
            .map(|g| g.id)
            .collect();

        let mut report = AutoMergeReport::default();
        for group_id in group_ids {
            report.examined += 1;
            match db.transaction(|tx| self.resolve_group(tx, &group_id))? {
                Some(merged) => report.merged.push(merged),
                None => report.skipped += 1,
            }
        }

        info!(
            examined = report.examined,
            merged = report.merged.len(),
            skipped = report.skipped,
            "auto-merge finished"
        );
        Ok(report)
    }

    /// Merges the group's pair when it qualifies. Returns `None` and leaves the
    /// group untouched otherwise.
    pub fn resolve_group(&self, conn: &Connection, group_id: &DuplicateGroupId) -> Result<Option<AutoMerged>> {
        let members = SqliteDuplicateGroupRepository::new(conn).members(group_id)?;
        let [first, second] = members.as_slice() else {
            debug!(group = %group_id, members = members.len(), "auto-merge skipped: not a pair");
            return Ok(None);
        };

        let imports = SqliteImportRepository::new(conn);
        let first_imports = imports.list_for_publication(first)?;
        let second_imports = imports.list_for_publication(second)?;

        let pair = match (self.single(&first_imports), self.single(&second_imports)) {
            (Some(a), Some(b)) if a.source == self.target_source && b.source == self.absorbed_source => {
                Some((a, b))
            }
            (Some(a), Some(b)) if b.source == self.target_source && a.source == self.absorbed_source => {
                Some((b, a))
            }
            _ => None,
        };
        let Some((target_import, absorbed_import)) = pair else {
            debug!(group = %group_id, "auto-merge skipped: sources do not qualify");
            return Ok(None);
        };

        let target = target_import.publication_id;
        let absorbed = absorbed_import.publication_id;
        match self.engine.merge(conn, &target, &[absorbed], &[]) {
            Ok(_) => {}
            Err(DedupError::NonDuplicateMerge { .. }) => {
                warn!(group = %group_id, "auto-merge skipped: pair marked as not duplicates");
                return Ok(None);
            }
            Err(err) => return Err(err),
        }
        imports.set_auto_merged(&absorbed_import.id, true)?;
        prune_group(conn, group_id)?;

        info!(group = %group_id, target = %target, absorbed = %absorbed, "pair auto-merged");
        Ok(Some(AutoMerged {
            group_id: *group_id,
            target,
            absorbed,
        }))
    }

    fn single<'i>(&self, imports: &'i [Import]) -> Option<&'i Import> {
        match imports {
            [only] => Some(only),
            _ => None,
        }
    }
}
