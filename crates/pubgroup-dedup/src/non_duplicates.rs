use std::collections::BTreeSet;

use rusqlite::Connection;
use tracing::info;

use pubgroup_core::{
    NonDuplicateGroup, NonDuplicateGroupId, NonDuplicateGroupRepository, PublicationId,
    PublicationRepository, Repository, SqliteNonDuplicateGroupRepository,
    SqlitePublicationRepository,
};

use crate::groups::prune_group;
use crate::{DedupError, Result};

/// Records human assertions that publications are not duplicates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonDuplicateRegistry;

impl NonDuplicateRegistry {
    pub fn new() -> Self {
        Self
    }

    /// Takes `selected` out of their duplicate groups and records them as a
    /// non-duplicate group. Groups left with fewer than two members are dissolved.
    pub fn ignore(&self, conn: &Connection, selected: &[PublicationId]) -> Result<NonDuplicateGroup> {
        let unique: BTreeSet<PublicationId> = selected.iter().copied().collect();
        if unique.len() < 2 {
            return Err(DedupError::Validation(
                "select at least two publications to mark as not duplicates".into(),
            ));
        }

        let ids: Vec<PublicationId> = unique.into_iter().collect();
        let publications = SqlitePublicationRepository::new(conn);
        let found = publications.find_many(&ids)?;
        if found.len() != ids.len() {
            let missing: Vec<String> = ids
                .iter()
                .filter(|id| !found.iter().any(|p| p.id == **id))
                .map(ToString::to_string)
                .collect();
            return Err(DedupError::NotFound(format!("publications {}", missing.join(", "))));
        }

        let touched: BTreeSet<_> = found.iter().filter_map(|p| p.duplicate_group_id).collect();
        publications.set_duplicate_group(&ids, None)?;
        publications.set_visible(&ids, true)?;
        for group_id in &touched {
            prune_group(conn, group_id)?;
        }

        let group = NonDuplicateGroup::new(ids);
        SqliteNonDuplicateGroupRepository::new(conn).save(&group)?;
        info!(
            group = %group.id,
            members = group.members.len(),
            left_groups = touched.len(),
            "non-duplicate group recorded"
        );
        Ok(group)
    }

    /// Every publication sharing a non-duplicate group with `publication_id`.
    pub fn excluded_for(&self, conn: &Connection, publication_id: &PublicationId) -> Result<BTreeSet<PublicationId>> {
        Ok(SqliteNonDuplicateGroupRepository::new(conn).excluded_for(publication_id)?)
    }

    /// Non-duplicate groups that put `target` together with any of `others`.
    pub fn conflicts(
        &self,
        conn: &Connection,
        target: &PublicationId,
        others: &[PublicationId],
    ) -> Result<Vec<NonDuplicateGroup>> {
        let conflicts = SqliteNonDuplicateGroupRepository::new(conn)
            .groups_containing(target)?
            .into_iter()
            .filter(|g| others.iter().any(|o| o != target && g.contains(o)))
            .collect();
        Ok(conflicts)
    }

    pub fn remove(&self, conn: &Connection, id: &NonDuplicateGroupId) -> Result<()> {
        if !SqliteNonDuplicateGroupRepository::new(conn).delete(id)? {
            return Err(DedupError::NotFound(format!("non-duplicate group {id}")));
        }
        info!(group = %id, "non-duplicate group removed");
        Ok(())
    }
}
