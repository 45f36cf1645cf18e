use crate::error::RelationError;
use tracing::{debug, warn};

type Step<'a> = Box<dyn FnOnce() -> Result<(), RelationError> + 'a>;

/// Compensating actions for a statement in progress. Dropping the log
/// without calling [`UndoLog::commit`] runs the recorded steps newest
/// first; a step that fails is logged and the rest still run.
pub(crate) struct UndoLog<'a> {
    steps: Vec<(String, Step<'a>)>,
    keep: bool,
}

impl<'a> UndoLog<'a> {
    pub(crate) fn new() -> Self {
        Self {
            steps: Vec::new(),
            keep: false,
        }
    }

    pub(crate) fn push(
        &mut self,
        what: impl Into<String>,
        step: impl FnOnce() -> Result<(), RelationError> + 'a,
    ) {
        self.steps.push((what.into(), Box::new(step)));
    }

    pub(crate) fn commit(mut self) {
        self.keep = true;
    }
}

impl Drop for UndoLog<'_> {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        while let Some((what, step)) = self.steps.pop() {
            match step() {
                Ok(()) => debug!("rolled back: {what}"),
                Err(e) => warn!("rollback failed to {what}: {e}"),
            }
        }
    }
}
