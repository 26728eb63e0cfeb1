//! Per execution options.
use crate::{config::QueryMode, error::UsageError};

/// Flags controlling one execution.
///
/// The default executes through the extended dialect with auto-begin enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// The caller will not reuse the query, it never counts toward named prepare.
    pub one_shot: bool,
    /// The caller does not need the row shape.
    pub no_metadata: bool,
    /// Rows are discarded, the result still reports its row shape.
    pub no_results: bool,
    /// Bind a named portal and fetch in batches of the fetch size.
    pub forward_cursor: bool,
    /// Do not start a transaction before the statement.
    pub suppress_begin: bool,
    /// Parse and describe only, report parameter types and row shape.
    pub describe_only: bool,
    /// Deliver the command outcome of a row returning statement along with its rows.
    pub both_rows_and_status: bool,
    /// Describe the portal on every execution, detecting row shape changes.
    pub force_describe_portal: bool,
    /// Request text for every result column.
    pub no_binary_transfer: bool,
    /// A synthesized transaction start is `BEGIN READ ONLY`.
    pub read_only_hint: bool,
    /// Send through the simple dialect regardless of the query mode.
    pub execute_as_simple: bool,
    /// Override the configured adaptive fetch for this execution.
    pub adaptive_fetch: Option<bool>,
}

macro_rules! setter {
    ($($name:ident,)*) => {$(
        pub fn $name(mut self, enabled: bool) -> Self {
            self.$name = enabled;
            self
        }
    )*};
}

impl QueryOptions {
    pub fn new() -> QueryOptions {
        Self::default()
    }

    setter! {
        one_shot,
        no_metadata,
        no_results,
        forward_cursor,
        suppress_begin,
        describe_only,
        both_rows_and_status,
        force_describe_portal,
        no_binary_transfer,
        read_only_hint,
        execute_as_simple,
    }

    pub fn adaptive_fetch(mut self, enabled: bool) -> Self {
        self.adaptive_fetch = Some(enabled);
        self
    }

    /// Reject contradicting flags.
    pub fn validate(&self, mode: QueryMode) -> Result<(), UsageError> {
        let simple = self.execute_as_simple || matches!(mode, QueryMode::Simple);
        if self.describe_only && self.forward_cursor {
            return Err(UsageError::InvalidOptions("describe only cannot open a cursor"));
        }
        if self.describe_only && simple {
            return Err(UsageError::InvalidOptions("describe only requires the extended dialect"));
        }
        if self.forward_cursor && simple {
            return Err(UsageError::InvalidOptions("cursor requires the extended dialect"));
        }
        if self.describe_only && self.no_metadata {
            return Err(UsageError::InvalidOptions("describe only without metadata does nothing"));
        }
        Ok(())
    }

    /// Returns `true` if the execution goes through the simple dialect.
    pub(crate) fn use_simple(&self, mode: QueryMode, param_count: usize) -> bool {
        if self.execute_as_simple {
            return true;
        }
        match mode {
            QueryMode::Simple => true,
            QueryMode::ExtendedForPrepared => {
                param_count == 0 && !self.forward_cursor && !self.describe_only
            },
            QueryMode::Extended => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn contradicting_flags() {
        let mode = QueryMode::Extended;
        assert!(QueryOptions::new().validate(mode).is_ok());
        assert!(QueryOptions::new().describe_only(true).forward_cursor(true).validate(mode).is_err());
        assert!(QueryOptions::new().describe_only(true).execute_as_simple(true).validate(mode).is_err());
        assert!(QueryOptions::new().forward_cursor(true).validate(QueryMode::Simple).is_err());
        assert!(QueryOptions::new().forward_cursor(true).validate(mode).is_ok());
    }

    #[test]
    fn dialect() {
        let opts = QueryOptions::new();
        assert!(!opts.use_simple(QueryMode::Extended, 0));
        assert!(opts.use_simple(QueryMode::Simple, 3));
        assert!(opts.use_simple(QueryMode::ExtendedForPrepared, 0));
        assert!(!opts.use_simple(QueryMode::ExtendedForPrepared, 1));
        assert!(!opts.forward_cursor(true).use_simple(QueryMode::ExtendedForPrepared, 0));
    }
}
