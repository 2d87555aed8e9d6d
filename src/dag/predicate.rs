// src/dag/predicate.rs

use crate::dag::task::{Combinator, Condition, TaskResult};

/// Whether a not-yet-run task may start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Some predecessors are still undecided.
    Waiting,
    Ready,
    /// The predecessor expression can no longer become true.
    Orphaned,
}

/// Evaluate a predecessor expression against the current predecessor results.
///
/// An empty expression is always ready.
pub fn evaluate<I>(combinator: Combinator, predecessors: I) -> Verdict
where
    I: IntoIterator<Item = (TaskResult, Condition)>,
{
    let mut any = false;
    let mut pending = false;
    let mut satisfied_any = false;
    let mut unsatisfied_terminal = false;

    for (result, condition) in predecessors {
        any = true;
        if condition.satisfied_by(result) {
            satisfied_any = true;
        } else if result.is_terminal() {
            unsatisfied_terminal = true;
        } else {
            pending = true;
        }
    }

    if !any {
        return Verdict::Ready;
    }

    match combinator {
        Combinator::And if unsatisfied_terminal => Verdict::Orphaned,
        Combinator::And if pending => Verdict::Waiting,
        Combinator::And => Verdict::Ready,
        Combinator::Or if satisfied_any => Verdict::Ready,
        Combinator::Or if pending => Verdict::Waiting,
        Combinator::Or => Verdict::Orphaned,
    }
}
