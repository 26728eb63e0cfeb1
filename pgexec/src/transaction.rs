//! Transaction status and automatic savepoints.
use crate::{
    config::AutoSave,
    error::Error,
};

/// Transaction phase as reported by `ReadyForQuery`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    /// Not in a transaction block.
    #[default]
    Idle,
    /// In a transaction block.
    Open,
    /// In a failed transaction block, queries will be rejected until block is ended.
    Failed,
}

impl TransactionState {
    /// Parse `ReadyForQuery` status indicator.
    pub fn from_status(status: u8) -> Option<TransactionState> {
        match status {
            b'I' => Some(Self::Idle),
            b'T' => Some(Self::Open),
            b'E' => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Savepoint name used by automatic savepoints.
pub const AUTOSAVE_NAME: &str = "PGEXEC_AUTOSAVE";

pub(crate) const SAVEPOINT_SQL: &str = "SAVEPOINT PGEXEC_AUTOSAVE";
pub(crate) const RELEASE_SQL: &str = "RELEASE SAVEPOINT PGEXEC_AUTOSAVE";
pub(crate) const ROLLBACK_SQL: &str = "ROLLBACK TO SAVEPOINT PGEXEC_AUTOSAVE";

/// Automatic savepoint bookkeeping.
///
/// Every savepoint shares one name, the server stacks them and `ROLLBACK TO`/`RELEASE` act on
/// the most recent.
#[derive(Debug)]
pub(crate) struct Autosave {
    pub(crate) policy: AutoSave,
    pub(crate) cleanup: bool,
    pub(crate) max_depth: u32,
    /// Savepoints acknowledged by the server in the current transaction.
    pub(crate) depth: u32,
}

/// What an execution does around its statements.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SavepointPlan {
    /// Release the most recent savepoint first, the depth is at its limit.
    pub(crate) release_before: bool,
    pub(crate) set: bool,
    /// Release the savepoint after the statements succeed.
    pub(crate) release_after: bool,
}

impl Autosave {
    pub(crate) fn new(policy: AutoSave, cleanup: bool, max_depth: u32) -> Self {
        Self { policy, cleanup, max_depth: max_depth.max(1), depth: 0 }
    }

    /// Decide savepoint messages for an execution.
    ///
    /// `prepared` tells whether the statement runs through a named statement, the only kind
    /// that can fail in a way a retry heals. Statements ending or starting a transaction get no
    /// savepoint, a release after `COMMIT` would run outside of any block.
    pub(crate) fn plan(&self, state: TransactionState, prepared: bool, control: bool) -> SavepointPlan {
        if control {
            return SavepointPlan::default();
        }
        let wanted = match self.policy {
            AutoSave::Never => false,
            AutoSave::Always => true,
            AutoSave::Conservative => prepared,
        };
        if !wanted || state != TransactionState::Open {
            return SavepointPlan::default();
        }
        SavepointPlan {
            release_before: self.depth >= self.max_depth,
            set: true,
            release_after: self.cleanup,
        }
    }

    /// Whether a failed execution that set a savepoint rolls back to it.
    pub(crate) fn should_rollback(&self, heals: bool) -> bool {
        match self.policy {
            AutoSave::Never => false,
            AutoSave::Always => true,
            AutoSave::Conservative => heals,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.depth = 0;
    }
}

/// Returns `true` if re-executing the statement after the error is expected to succeed,
/// because the error came from a server side statement that a fresh parse replaces.
///
/// This is the plan-independent part of
/// [`PgExecutor::will_heal_on_retry`][crate::PgExecutor::will_heal_on_retry].
pub fn heals_via_reparse(err: &Error) -> bool {
    let Some(db) = err.as_database() else {
        return false;
    };
    match db.code() {
        // prepared statement does not exist
        "26000" => true,
        // cached plan must not change result type
        "0A000" => matches!(db.routine(), Some("RevalidateCachedQuery" | "RevalidateCachedPlan")),
        _ => false,
    }
}
