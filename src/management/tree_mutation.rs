use chrono::Utc;
use snafu::{ResultExt, Snafu};
use tracing::{error, info};

use crate::content_store::ContentStore;
use crate::management::journal::{Journal, JournalEntry, JournalError};
use crate::management::rebase_plan::RebasePlan;
use crate::operations::OperationError;
use crate::patches::{PatchStore, StoreError};

const RECOVERY_NOTE: &str = "The workspace may be inconsistent; the pending writes are listed by `patchtree journal`";

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Phase {
    #[display("validating")]
    Validating,
    #[display("computing rebase")]
    ComputingRebase,
    #[display("mutating structure")]
    MutatingStructure,
    #[display("persisting content")]
    PersistingContent,
    #[display("done")]
    Done,
}

/// Restructures the patch tree.
///
/// A mutation moves through `Phase`s in order. Nothing is written before `MutatingStructure`, so
/// any error up to and including `ComputingRebase` leaves the workspace untouched.
pub struct TreeMutation<'a, S: ContentStore> {
    pub(super) store: &'a PatchStore<S>,
    journal: Journal,
    phase: Phase,
    action: &'static str,
    subject: String,
}

impl<'a, S: ContentStore> TreeMutation<'a, S> {
    pub fn new(store: &'a PatchStore<S>) -> Self {
        Self {
            journal: Journal::new(store.workspace()),
            store,
            phase: Phase::Validating,
            action: "",
            subject: String::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Starts a new mutation of `subject`.
    pub(super) fn begin(&mut self, action: &'static str, subject: &str) {
        self.action = action;
        self.subject = subject.to_string();
        self.phase = Phase::Validating;
        info!("{} of '{}': {}", self.action, self.subject, self.phase);
    }

    pub(super) fn advance(&mut self, phase: Phase) {
        self.phase = phase;
        info!("{} of '{}': {}", self.action, self.subject, self.phase);
    }

    /// Records `plan` in the journal and enters the first writing phase.
    pub(super) async fn start_writing(&mut self, plan: &RebasePlan) -> Result<(), ManagementError> {
        let entry = JournalEntry {
            action: self.action.to_string(),
            subject: self.subject.clone(),
            started: Utc::now().to_rfc3339(),
            writes: plan.planned_writes(),
        };
        self.journal.record(&entry).await.context(JournalSnafu)?;
        self.advance(Phase::MutatingStructure);
        Ok(())
    }

    pub(super) async fn finish(&mut self) -> Result<(), ManagementError> {
        self.journal.clear().await.context(JournalSnafu)?;
        self.advance(Phase::Done);
        Ok(())
    }

    /// Wraps an error raised after writing started; those leave the tree half restructured.
    pub(super) fn persist_failure(&self, id: &str, source: StoreError) -> ManagementError {
        error!(
            "{} of '{}' failed while {} at '{}': {}. {}",
            self.action, self.subject, self.phase, id, source, RECOVERY_NOTE
        );
        ManagementError::Persist {
            id: id.to_string(),
            note: RECOVERY_NOTE,
            source: Box::new(source),
        }
    }

    pub(super) fn mismatch(&self, id: &str, path: &str, source: OperationError) -> ManagementError {
        error!(
            "{} of '{}' produced an inapplicable operation for '{}' in '{}': {}. {}",
            self.action, self.subject, path, id, source, RECOVERY_NOTE
        );
        ManagementError::OperationMismatch {
            id: id.to_string(),
            path: path.to_string(),
            note: RECOVERY_NOTE,
            source,
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ManagementError {
    #[snafu(display("Cannot merge up a root node"))]
    RootMerge,
    #[snafu(display("Cannot merge into a root node"))]
    MergeIntoRoot,
    #[snafu(display("The changes conflict with the changes in '{}'", id))]
    MergeConflict { id: String },
    #[snafu(display("Cannot move a node to be a child of itself"))]
    SelfMove,
    #[snafu(display("'{}' and '{}' are not on one line of the tree", id, new_base))]
    InvalidMove { id: String, new_base: String },
    #[snafu(display("'{}' is already a child of '{}'", id, new_base))]
    NothingToDo { id: String, new_base: String },
    #[snafu(display("A root node cannot be moved"))]
    RootMove,
    #[snafu(display("The node cannot be moved. There is a conflict with '{}'", id))]
    MoveConflict { id: String },
    #[snafu(display("'{}' has children branching off the path of the move", id))]
    BranchingPath { id: String },
    #[snafu(display("Failed to read the patch tree"))]
    Store { source: StoreError },
    #[snafu(display("Failed to write '{}'. {}", id, note))]
    Persist {
        id: String,
        note: &'static str,
        source: Box<StoreError>,
    },
    #[snafu(display("Rebased change to '{}' in '{}' does not apply. {}", path, id, note))]
    OperationMismatch {
        id: String,
        path: String,
        note: &'static str,
        source: OperationError,
    },
    #[snafu(display("Failed to maintain the recovery journal"))]
    Journal { source: JournalError },
}
