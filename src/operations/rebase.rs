use tracing::debug;

use crate::operations::operation::{Hunk, Operation, OperationError};

/// Transforms `op` so that it applies to the output of `applied`.
///
/// Both operations must have been derived from the same text. Identical edits collapse into one,
/// edits which touch the same span (or insert at the same point) conflict.
pub fn rebase(applied: &Operation, op: &Operation) -> Result<Operation, OperationError> {
    if applied.base_len() != op.base_len() {
        return Err(OperationError::LengthMismatch {
            expected: applied.base_len(),
            actual: op.base_len(),
        });
    }

    let applied_hunks = applied.hunks();
    let mut rebased = Vec::new();

    for hunk in op.hunks() {
        let mut shift: isize = 0;
        let mut already_applied = false;

        for other in &applied_hunks {
            if *other == hunk {
                already_applied = true;
                continue;
            }
            if conflicts(other, &hunk) {
                debug!(
                    "Hunk at {} conflicts with hunk at {}",
                    hunk.start, other.start
                );
                return Err(OperationError::Conflict {
                    position: hunk.start,
                });
            }
            if other.end() <= hunk.start {
                shift += other.delta();
            }
        }

        if !already_applied {
            rebased.push(Hunk {
                start: shift_position(hunk.start, shift),
                old: hunk.old,
                new: hunk.new,
            });
        }
    }

    Operation::from_hunks(applied.target_len(), &rebased)
}

fn shift_position(position: usize, shift: isize) -> usize {
    position.saturating_add_signed(shift)
}

fn conflicts(a: &Hunk, b: &Hunk) -> bool {
    let overlapping = a.start.max(b.start) < a.end().min(b.end());
    let same_insertion_point = a.is_insertion() && b.is_insertion() && a.start == b.start;
    let insertion_inside = (a.is_insertion() && b.start < a.start && a.start < b.end())
        || (b.is_insertion() && a.start < b.start && b.start < a.end());

    overlapping || same_insertion_point || insertion_inside
}
