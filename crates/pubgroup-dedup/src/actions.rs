//! Administrative merge and ignore actions, as driven by a group review screen.
//!
//! Every action validates its parameters before touching storage and either
//! commits fully or rolls back. Outcomes tell the presentation layer where to go
//! next and which notice to show.

use std::collections::BTreeSet;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use pubgroup_core::{
    Database, DuplicateGroupId, DuplicateGroupRepository, NonDuplicateGroup, NonDuplicateGroupId,
    PublicationId, PublicationRepository, SqliteDuplicateGroupRepository, SqlitePublicationRepository,
};

use crate::groups::prune_group;
use crate::merge::{MergeEngine, MergeSummary};
use crate::non_duplicates::NonDuplicateRegistry;
use crate::{DedupError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub group_id: DuplicateGroupId,

    #[serde(default)]
    pub target_publication_id: Option<PublicationId>,

    #[serde(default)]
    pub selected_publication_ids: Vec<PublicationId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoreRequest {
    pub group_id: DuplicateGroupId,

    #[serde(default)]
    pub selected_publication_ids: Vec<PublicationId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum Notice {
    Merged {
        target: PublicationId,
        absorbed: Vec<PublicationId>,
    },
    Ignored {
        non_duplicate_group_id: NonDuplicateGroupId,
    },
    NonDuplicateMerge {
        offending: Vec<PublicationId>,
    },
    NotInGroup {
        publications: Vec<PublicationId>,
    },
    MissingParameter {
        parameter: &'static str,
    },
}

impl Notice {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Notice::NonDuplicateMerge { .. } | Notice::NotInGroup { .. } | Notice::MissingParameter { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// Back to the group view with a notice.
    Redirect {
        group_id: DuplicateGroupId,
        notice: Notice,
    },
    /// The merge is blocked only by non-duplicate assertions; a human may
    /// confirm deleting them and retry.
    ConfirmOverride {
        group_id: DuplicateGroupId,
        request: MergeRequest,
        conflicting: Vec<NonDuplicateGroupId>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct AdminActions {
    engine: MergeEngine,
    registry: NonDuplicateRegistry,
}

impl AdminActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&self, db: &Database, request: &MergeRequest) -> Result<ActionOutcome> {
        let (target, sources) = match merge_parameters(request) {
            Ok(params) => params,
            Err(parameter) => return Ok(missing(request.group_id, parameter)),
        };

        let attempt: Result<MergeSummary> =
            db.transaction(|tx| self.merge_within(tx, &request.group_id, &target, &sources, &[]));

        match attempt {
            Ok(summary) => Ok(ActionOutcome::Redirect {
                group_id: request.group_id,
                notice: Notice::Merged {
                    target: summary.target,
                    absorbed: summary.absorbed,
                },
            }),
            Err(DedupError::NonDuplicateMerge { offending, .. }) => {
                warn!(group = %request.group_id, target = %target, "merge refused");
                let conflicts = {
                    let conn = db.connection();
                    self.registry.conflicts(&conn, &target, &offending)?
                };
                let covered = offending
                    .iter()
                    .all(|id| conflicts.iter().any(|g| g.contains(id)));
                if covered && !conflicts.is_empty() {
                    Ok(ActionOutcome::ConfirmOverride {
                        group_id: request.group_id,
                        request: request.clone(),
                        conflicting: conflicts.into_iter().map(|g| g.id).collect(),
                    })
                } else {
                    Ok(ActionOutcome::Redirect {
                        group_id: request.group_id,
                        notice: Notice::NonDuplicateMerge { offending },
                    })
                }
            }
            Err(err) => rejected(request.group_id, err),
        }
    }

    /// Deletes the confirmed non-duplicate groups and retries the merge, treating
    /// their members as sanctioned. Only groups that actually put the target
    /// together with a selected source are deleted; other ids are ignored. All of
    /// it rolls back if the merge still fails.
    pub fn confirm_override(
        &self,
        db: &Database,
        request: &MergeRequest,
        conflicting: &[NonDuplicateGroupId],
    ) -> Result<ActionOutcome> {
        let (target, sources) = match merge_parameters(request) {
            Ok(params) => params,
            Err(parameter) => return Ok(missing(request.group_id, parameter)),
        };

        let attempt: Result<(MergeSummary, usize)> = db.transaction(|tx| {
            let mut confirmed = BTreeSet::new();
            let mut removed = 0;
            for group in self.registry.conflicts(tx, &target, &sources)? {
                if !conflicting.contains(&group.id) {
                    continue;
                }
                confirmed.extend(group.members.iter().copied().filter(|m| sources.contains(m)));
                self.registry.remove(tx, &group.id)?;
                removed += 1;
            }
            let confirmed: Vec<PublicationId> = confirmed.into_iter().collect();

            let summary = self.merge_within(tx, &request.group_id, &target, &sources, &confirmed)?;
            Ok((summary, removed))
        });

        match attempt {
            Ok((summary, removed)) => {
                info!(
                    group = %request.group_id,
                    removed_non_duplicate_groups = removed,
                    "merge confirmed over non-duplicate assertion"
                );
                Ok(ActionOutcome::Redirect {
                    group_id: request.group_id,
                    notice: Notice::Merged {
                        target: summary.target,
                        absorbed: summary.absorbed,
                    },
                })
            }
            Err(DedupError::NonDuplicateMerge { offending, .. }) => Ok(ActionOutcome::Redirect {
                group_id: request.group_id,
                notice: Notice::NonDuplicateMerge { offending },
            }),
            Err(err) => rejected(request.group_id, err),
        }
    }

    pub fn ignore(&self, db: &Database, request: &IgnoreRequest) -> Result<ActionOutcome> {
        let selected: BTreeSet<PublicationId> = request.selected_publication_ids.iter().copied().collect();
        if selected.len() < 2 {
            return Ok(missing(request.group_id, "selected_publication_ids"));
        }
        let selected: Vec<PublicationId> = selected.into_iter().collect();

        let attempt: Result<NonDuplicateGroup> = db.transaction(|tx| {
            let members = SqliteDuplicateGroupRepository::new(tx).members(&request.group_id)?;
            let outside: Vec<PublicationId> = selected
                .iter()
                .copied()
                .filter(|id| !members.contains(id))
                .collect();
            if !outside.is_empty() {
                return Err(DedupError::NotInGroup {
                    group: request.group_id,
                    publications: outside,
                });
            }
            self.registry.ignore(tx, &selected)
        });

        match attempt {
            Ok(group) => Ok(ActionOutcome::Redirect {
                group_id: request.group_id,
                notice: Notice::Ignored {
                    non_duplicate_group_id: group.id,
                },
            }),
            Err(err) => rejected(request.group_id, err),
        }
    }

    /// Merges inside `group_id` and cleans up after it: a visible source hands
    /// its visibility to the target, and every group that lost members is pruned.
    fn merge_within(
        &self,
        conn: &Connection,
        group_id: &DuplicateGroupId,
        target: &PublicationId,
        sources: &[PublicationId],
        confirmed: &[PublicationId],
    ) -> Result<MergeSummary> {
        let publications = SqlitePublicationRepository::new(conn);
        let target_group = publications.get(target)?.duplicate_group_id;
        if target_group.is_some_and(|g| g != *group_id) {
            return Err(DedupError::NotInGroup {
                group: *group_id,
                publications: vec![*target],
            });
        }

        let before = publications.find_many(sources)?;
        let hands_over_visibility = before.iter().any(|p| p.visible);
        let touched: BTreeSet<DuplicateGroupId> = before
            .iter()
            .filter_map(|p| p.duplicate_group_id)
            .chain(target_group)
            .collect();

        let summary = self.engine.merge(conn, target, sources, confirmed)?;
        if hands_over_visibility {
            publications.set_visible(&[*target], true)?;
        }
        for group in &touched {
            prune_group(conn, group)?;
        }
        Ok(summary)
    }
}

/// Turns a refused action into a redirect with an error notice; other errors propagate.
fn rejected(group_id: DuplicateGroupId, err: DedupError) -> Result<ActionOutcome> {
    match err {
        DedupError::NotInGroup { publications, .. } => Ok(ActionOutcome::Redirect {
            group_id,
            notice: Notice::NotInGroup { publications },
        }),
        err => Err(err),
    }
}

/// Target plus the distinct selected ids other than the target.
fn merge_parameters(request: &MergeRequest) -> std::result::Result<(PublicationId, Vec<PublicationId>), &'static str> {
    let target = request
        .target_publication_id
        .ok_or("target_publication_id")?;
    let sources: Vec<PublicationId> = request
        .selected_publication_ids
        .iter()
        .copied()
        .filter(|id| *id != target)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if sources.is_empty() {
        return Err("selected_publication_ids");
    }
    Ok((target, sources))
}

fn missing(group_id: DuplicateGroupId, parameter: &'static str) -> ActionOutcome {
    ActionOutcome::Redirect {
        group_id,
        notice: Notice::MissingParameter { parameter },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groups::{DuplicateGroupManager, GroupingOutcome};
    use crate::testing::{reload, seed};
    use pubgroup_core::{DuplicateGroupRepository, SqliteDuplicateGroupRepository};

    fn grouped(db: &Database, n: usize) -> (DuplicateGroupId, Vec<PublicationId>) {
        let conn = db.connection();
        let ids: Vec<PublicationId> = (0..n)
            .map(|i| seed(&conn, &format!("P{i}"), None, None).id)
            .collect();
        let GroupingOutcome::Created { group_id } = DuplicateGroupManager::default()
            .group_publications(&conn, &ids)
            .unwrap()
        else {
            panic!("expected a new group");
        };
        (group_id, ids)
    }

    #[test]
    fn test_merge_selecting_only_target_changes_nothing() {
        let db = Database::open_in_memory().unwrap();
        let (group_id, ids) = grouped(&db, 3);
        let request = MergeRequest {
            group_id,
            target_publication_id: Some(ids[0]),
            selected_publication_ids: vec![ids[0]],
        };

        let outcome = AdminActions::new().merge(&db, &request).unwrap();
        assert_eq!(
            outcome,
            ActionOutcome::Redirect {
                group_id,
                notice: Notice::MissingParameter { parameter: "selected_publication_ids" },
            }
        );
        assert_eq!(db.get_duplicate_group(&group_id).unwrap().members, ids);
    }

    #[test]
    fn test_merge_without_target_fails_fast() {
        let db = Database::open_in_memory().unwrap();
        let (group_id, ids) = grouped(&db, 2);
        let request = MergeRequest {
            group_id,
            target_publication_id: None,
            selected_publication_ids: ids.clone(),
        };

        let ActionOutcome::Redirect { notice, .. } = AdminActions::new().merge(&db, &request).unwrap() else {
            panic!("expected a redirect");
        };
        assert!(notice.is_error());
        assert_eq!(db.get_duplicate_group(&group_id).unwrap().members, ids);
    }

    #[test]
    fn test_partial_merge_keeps_group_of_remaining_members() {
        let db = Database::open_in_memory().unwrap();
        let (group_id, ids) = grouped(&db, 3);
        let request = MergeRequest {
            group_id,
            target_publication_id: Some(ids[0]),
            selected_publication_ids: vec![ids[0], ids[1]],
        };

        let outcome = AdminActions::new().merge(&db, &request).unwrap();
        assert!(matches!(
            outcome,
            ActionOutcome::Redirect { notice: Notice::Merged { .. }, .. }
        ));
        assert_eq!(db.get_duplicate_group(&group_id).unwrap().members, vec![ids[0], ids[2]]);
    }

    #[test]
    fn test_full_merge_dissolves_group() {
        let db = Database::open_in_memory().unwrap();
        let (group_id, ids) = grouped(&db, 3);
        let request = MergeRequest {
            group_id,
            target_publication_id: Some(ids[1]),
            selected_publication_ids: ids.clone(),
        };

        AdminActions::new().merge(&db, &request).unwrap();
        assert!(db.get_duplicate_group(&group_id).is_err());
        let conn = db.connection();
        let survivor = reload(&conn, &ids[1]);
        assert!(survivor.duplicate_group_id.is_none());
        assert!(survivor.visible);
    }

    #[test]
    fn test_ignored_pair_needs_confirmation_to_merge() {
        let db = Database::open_in_memory().unwrap();
        let (group_id, ids) = grouped(&db, 3);
        let actions = AdminActions::new();

        let ignored = actions
            .ignore(&db, &IgnoreRequest { group_id, selected_publication_ids: vec![ids[0], ids[1]] })
            .unwrap();
        assert!(matches!(ignored, ActionOutcome::Redirect { notice: Notice::Ignored { .. }, .. }));

        let request = MergeRequest {
            group_id,
            target_publication_id: Some(ids[0]),
            selected_publication_ids: vec![ids[0], ids[1]],
        };
        let ActionOutcome::ConfirmOverride { conflicting, .. } = actions.merge(&db, &request).unwrap() else {
            panic!("expected a confirmation step");
        };
        assert_eq!(conflicting.len(), 1);
        assert_eq!(db.count_publications().unwrap(), 3);

        let outcome = actions.confirm_override(&db, &request, &conflicting).unwrap();
        assert!(matches!(outcome, ActionOutcome::Redirect { notice: Notice::Merged { .. }, .. }));
        assert_eq!(db.count_publications().unwrap(), 2);
        assert!(db.list_non_duplicate_groups().unwrap().is_empty());
    }

    #[test]
    fn test_merge_with_unrelated_publication_is_refused() {
        let db = Database::open_in_memory().unwrap();
        let (group_id, ids) = grouped(&db, 2);
        let stranger = {
            let conn = db.connection();
            seed(&conn, "Stranger", None, None).id
        };
        let request = MergeRequest {
            group_id,
            target_publication_id: Some(ids[0]),
            selected_publication_ids: vec![ids[1], stranger],
        };

        let outcome = AdminActions::new().merge(&db, &request).unwrap();
        assert_eq!(
            outcome,
            ActionOutcome::Redirect {
                group_id,
                notice: Notice::NonDuplicateMerge { offending: vec![stranger] },
            }
        );
        assert_eq!(db.count_publications().unwrap(), 3);
        let conn = db.connection();
        assert_eq!(SqliteDuplicateGroupRepository::new(&conn).members(&group_id).unwrap(), ids);
    }

    #[test]
    fn test_ignore_requires_two_selections() {
        let db = Database::open_in_memory().unwrap();
        let (group_id, ids) = grouped(&db, 2);

        let outcome = AdminActions::new()
            .ignore(&db, &IgnoreRequest { group_id, selected_publication_ids: vec![ids[0]] })
            .unwrap();
        assert_eq!(outcome, missing(group_id, "selected_publication_ids"));
        assert!(db.list_non_duplicate_groups().unwrap().is_empty());
    }

    #[test]
    fn test_merge_naming_another_group_is_refused() {
        let db = Database::open_in_memory().unwrap();
        let (own_group, own) = grouped(&db, 2);
        let (other_group, other) = grouped(&db, 2);
        let request = MergeRequest {
            group_id: other_group,
            target_publication_id: Some(own[0]),
            selected_publication_ids: own.clone(),
        };

        let outcome = AdminActions::new().merge(&db, &request).unwrap();
        assert_eq!(
            outcome,
            ActionOutcome::Redirect {
                group_id: other_group,
                notice: Notice::NotInGroup { publications: vec![own[0]] },
            }
        );
        assert_eq!(db.count_publications().unwrap(), 4);
        assert_eq!(db.get_duplicate_group(&own_group).unwrap().members, own);
        assert_eq!(db.get_duplicate_group(&other_group).unwrap().members, other);
    }

    #[test]
    fn test_partial_merge_of_visible_member_keeps_one_visible() {
        let db = Database::open_in_memory().unwrap();
        let (group_id, ids) = grouped(&db, 2);
        let newcomer = {
            let conn = db.connection();
            let c = seed(&conn, "P2", None, None).id;
            DuplicateGroupManager::default()
                .group_publications(&conn, &[ids[0], c])
                .unwrap();
            assert!(!reload(&conn, &ids[0]).visible);
            assert!(!reload(&conn, &ids[1]).visible);
            assert!(reload(&conn, &c).visible);
            c
        };

        let request = MergeRequest {
            group_id,
            target_publication_id: Some(ids[0]),
            selected_publication_ids: vec![ids[0], newcomer],
        };
        AdminActions::new().merge(&db, &request).unwrap();

        assert_eq!(db.get_duplicate_group(&group_id).unwrap().members, ids);
        let conn = db.connection();
        assert!(reload(&conn, &ids[0]).visible);
        assert!(!reload(&conn, &ids[1]).visible);
    }

    #[test]
    fn test_confirm_override_keeps_unrelated_non_duplicate_groups() {
        let db = Database::open_in_memory().unwrap();
        let (group_id, ids) = grouped(&db, 3);
        let unrelated = {
            let conn = db.connection();
            let x = seed(&conn, "X", None, None).id;
            let y = seed(&conn, "Y", None, None).id;
            NonDuplicateRegistry::new().ignore(&conn, &[x, y]).unwrap().id
        };
        let actions = AdminActions::new();
        actions
            .ignore(&db, &IgnoreRequest { group_id, selected_publication_ids: vec![ids[0], ids[1]] })
            .unwrap();

        let request = MergeRequest {
            group_id,
            target_publication_id: Some(ids[0]),
            selected_publication_ids: vec![ids[0], ids[1]],
        };
        let ActionOutcome::ConfirmOverride { conflicting, .. } = actions.merge(&db, &request).unwrap() else {
            panic!("expected a confirmation step");
        };
        assert!(!conflicting.contains(&unrelated));

        let mut confirmed = conflicting.clone();
        confirmed.push(unrelated);
        let outcome = actions.confirm_override(&db, &request, &confirmed).unwrap();
        assert!(matches!(outcome, ActionOutcome::Redirect { notice: Notice::Merged { .. }, .. }));

        let remaining: Vec<NonDuplicateGroupId> =
            db.list_non_duplicate_groups().unwrap().into_iter().map(|g| g.id).collect();
        assert_eq!(remaining, vec![unrelated]);
    }

    #[test]
    fn test_ignore_outside_the_group_is_refused() {
        let db = Database::open_in_memory().unwrap();
        let (group_id, ids) = grouped(&db, 2);
        let (_, other) = grouped(&db, 2);

        let outcome = AdminActions::new()
            .ignore(&db, &IgnoreRequest { group_id, selected_publication_ids: vec![ids[0], other[0]] })
            .unwrap();
        assert_eq!(
            outcome,
            ActionOutcome::Redirect {
                group_id,
                notice: Notice::NotInGroup { publications: vec![other[0]] },
            }
        );
        assert!(db.list_non_duplicate_groups().unwrap().is_empty());
        assert_eq!(db.get_duplicate_group(&group_id).unwrap().members, ids);
    }
}
