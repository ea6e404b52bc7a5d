use std::collections::BTreeSet;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

use pubgroup_core::{
    Database, DuplicateGroup, DuplicateGroupId, DuplicateGroupRepository, PublicationId,
    PublicationRepository, Repository, SqliteDuplicateGroupRepository, SqlitePublicationRepository,
};

use crate::Result;
use crate::matcher::SimilarityMatcher;

/// What a grouping pass did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GroupingOutcome {
    /// Fewer than two candidates, or every candidate already in the same group.
    Unchanged,
    Created { group_id: DuplicateGroupId },
    Extended {
        group_id: DuplicateGroupId,
        joined: Vec<PublicationId>,
        absorbed_groups: Vec<DuplicateGroupId>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegroupReport {
    pub scanned: usize,
    pub created: usize,
    pub extended: usize,
}

/// Maintains the partition of publications into duplicate groups.
///
/// Methods taking a `&Connection` expect to run inside `Database::transaction`.
#[derive(Debug, Clone, Default)]
pub struct DuplicateGroupManager {
    matcher: SimilarityMatcher,
}

impl DuplicateGroupManager {
    pub fn new(matcher: SimilarityMatcher) -> Self {
        Self { matcher }
    }

    pub fn matcher(&self) -> &SimilarityMatcher {
        &self.matcher
    }

    pub fn group_duplicates_of(&self, conn: &Connection, publication_id: &PublicationId) -> Result<GroupingOutcome> {
        let pivot = SqlitePublicationRepository::new(conn).get(publication_id)?;
        let candidates = self.matcher.find_candidates(conn, &pivot)?;
        self.group_publications(conn, &candidates)
    }

    /// Transitively unions `ids` and every group any of them already belongs to.
    ///
    /// The oldest existing group survives. Newly joining members (ungrouped ids and
    /// members of absorbed groups) trigger the visibility rule: the most recently
    /// created joiner keeps its visibility, every other member is hidden.
    pub fn group_publications(&self, conn: &Connection, ids: &[PublicationId]) -> Result<GroupingOutcome> {
        let unique: BTreeSet<PublicationId> = ids.iter().copied().collect();
        if unique.len() < 2 {
            return Ok(GroupingOutcome::Unchanged);
        }

        let publications = SqlitePublicationRepository::new(conn);
        let groups = SqliteDuplicateGroupRepository::new(conn);
        let ids: Vec<PublicationId> = unique.into_iter().collect();
        let members = publications.find_many(&ids)?;
        if members.len() < 2 {
            return Ok(GroupingOutcome::Unchanged);
        }

        let mut existing: Vec<DuplicateGroup> = Vec::new();
        for group_id in members
            .iter()
            .filter_map(|p| p.duplicate_group_id)
            .collect::<BTreeSet<_>>()
        {
            if let Some(group) = groups.find_by_id(&group_id)? {
                existing.push(group);
            }
        }

        existing.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        let mut existing = existing.into_iter();
        let Some(keep) = existing.next() else {
            let ids: Vec<PublicationId> = members.iter().map(|p| p.id).collect();
            let group = DuplicateGroup::new(ids);
            groups.save(&group)?;
            info!(group = %group.id, members = group.members.len(), "duplicate group created");
            return Ok(GroupingOutcome::Created { group_id: group.id });
        };

        let mut joined: Vec<PublicationId> = members
            .iter()
            .filter(|p| p.duplicate_group_id.is_none())
            .map(|p| p.id)
            .collect();
        groups.add_members(&keep.id, &joined)?;

        let mut absorbed_groups = Vec::new();
        for absorbed in existing {
            joined.extend(absorbed.members.iter().copied());
            groups.move_members(&absorbed.id, &keep.id)?;
            groups.delete(&absorbed.id)?;
            absorbed_groups.push(absorbed.id);
        }

        if joined.is_empty() {
            return Ok(GroupingOutcome::Unchanged);
        }

        self.apply_visibility(conn, &keep.id, &joined)?;
        info!(
            group = %keep.id,
            joined = joined.len(),
            absorbed = absorbed_groups.len(),
            "duplicate group extended"
        );
        Ok(GroupingOutcome::Extended {
            group_id: keep.id,
            joined,
            absorbed_groups,
        })
    }

    fn apply_visibility(&self, conn: &Connection, group_id: &DuplicateGroupId, joined: &[PublicationId]) -> Result<()> {
        let publications = SqlitePublicationRepository::new(conn);
        let newest = publications
            .find_many(joined)?
            .into_iter()
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .map(|p| p.id);

        let hidden: Vec<PublicationId> = SqliteDuplicateGroupRepository::new(conn)
            .members(group_id)?
            .into_iter()
            .filter(|id| Some(*id) != newest)
            .collect();
        publications.set_visible(&hidden, false)?;
        debug!(group = %group_id, hidden = hidden.len(), "group visibility updated");
        Ok(())
    }

    /// Runs `group_duplicates_of` for every publication, oldest first, one
    /// transaction per publication.
    pub fn regroup_all(&self, db: &Database) -> Result<RegroupReport> {
        let ids = {
            let conn = db.connection();
            SqlitePublicationRepository::new(&conn).list_ids()?
        };

        let mut report = RegroupReport::default();
        for id in ids {
            let outcome = db.transaction(|tx| {
                if SqlitePublicationRepository::new(tx).find_by_id(&id)?.is_none() {
                    return Ok(GroupingOutcome::Unchanged);
                }
                self.group_duplicates_of(tx, &id)
            })?;
            report.scanned += 1;
            match outcome {
                GroupingOutcome::Created { .. } => report.created += 1,
                GroupingOutcome::Extended { .. } => report.extended += 1,
                GroupingOutcome::Unchanged => {}
            }
        }

        info!(
            scanned = report.scanned,
            created = report.created,
            extended = report.extended,
            "regroup finished"
        );
        Ok(report)
    }
}

/// Destroys `group_id` when it has fewer than two members left; the remaining
/// member, if any, leaves the group and becomes visible again.
pub fn prune_group(conn: &Connection, group_id: &DuplicateGroupId) -> Result<bool> {
    let groups = SqliteDuplicateGroupRepository::new(conn);
    if groups.find_by_id(group_id)?.is_none() {
        return Ok(false);
    }

    let members = groups.members(group_id)?;
    if members.len() >= 2 {
        return Ok(false);
    }

    SqlitePublicationRepository::new(conn).set_visible(&members, true)?;
    groups.delete(group_id)?;
    debug!(group = %group_id, "undersized duplicate group removed");
    Ok(true)
}
