//! Duplicate detection, grouping, merging and multi-source import
//! reconciliation.

pub mod actions;
pub mod auto_merge;
pub mod error;
pub mod groups;
pub mod import;
pub mod matcher;
pub mod merge;
pub mod non_duplicates;
pub mod service;
pub mod similarity;

#[cfg(test)]
mod testing;

pub use actions::{ActionOutcome, AdminActions, IgnoreRequest, MergeRequest, Notice};
pub use auto_merge::{AutoMergePolicy, AutoMergeReport, AutoMerged};
pub use error::{DedupError, Result};
pub use groups::{DuplicateGroupManager, GroupingOutcome, RegroupReport, prune_group};
pub use import::{
    ImportReconciler, ImportReport, NormalizedContributor, NormalizedRecord, RecordError,
    RecordOutcome, read_jsonl,
};
pub use matcher::SimilarityMatcher;
pub use merge::{MergeEngine, MergeSummary};
pub use non_duplicates::NonDuplicateRegistry;
pub use service::PublicationService;
