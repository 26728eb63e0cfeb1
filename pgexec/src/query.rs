//! Query handles, the query arena, and parameter lists.
use bytes::Bytes;

use crate::{
    error::UsageError,
    postgres::{Oid, PgFormat},
    row::RowShape,
    sql::{self, Command, ParsedSql},
    statement::StatementName,
};

/// Structural identity of a cached query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub sql: String,
    /// Escape processing was requested by the caller, part of the identity only.
    pub escape_processing: bool,
    /// `$n` placeholders are recognized, otherwise the text is sent as is.
    pub parameterized: bool,
    /// Columns to return from a data modifying statement.
    pub column_names: Option<Vec<String>>,
}

impl QueryKey {
    pub fn new(sql: impl Into<String>) -> QueryKey {
        Self {
            sql: sql.into(),
            escape_processing: true,
            parameterized: true,
            column_names: None,
        }
    }

    pub fn escape_processing(mut self, enabled: bool) -> Self {
        self.escape_processing = enabled;
        self
    }

    pub fn parameterized(mut self, enabled: bool) -> Self {
        self.parameterized = enabled;
        self
    }

    pub fn column_names<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.column_names = Some(columns.into_iter().map(Into::into).collect());
        self
    }
}

/// A parsed statement handle.
///
/// Cheap to copy, it only addresses a record owned by the executor that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Query {
    pub(crate) engine: u32,
    pub(crate) slot: Slot,
    pub(crate) param_count: u32,
}

impl Query {
    /// Number of `$n` parameters.
    pub fn param_count(&self) -> usize {
        self.param_count as usize
    }

    /// Create an empty parameter list for this query.
    pub fn create_parameter_list(&self) -> ParameterList {
        ParameterList {
            owner: *self,
            slots: vec![None; self.param_count as usize],
        }
    }
}

/// Arena address with a generation guarding against reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Slot {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// One bound parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// Type oid, zero lets the server infer it.
    pub oid: Oid,
    /// Value bytes, `None` is NULL.
    pub value: Option<Bytes>,
    pub format: PgFormat,
}

/// Bound values for one execution of a [`Query`].
///
/// Parameter indices are 1-based, as `$n` in sql.
#[derive(Debug, Clone)]
pub struct ParameterList {
    owner: Query,
    slots: Vec<Option<Param>>,
}

impl ParameterList {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Bind a text value.
    pub fn set_text(&mut self, index: usize, value: &str, oid: Oid) -> Result<(), UsageError> {
        let value = Bytes::copy_from_slice(value.as_bytes());
        self.set(index, Param { oid, value: Some(value), format: PgFormat::Text })
    }

    /// Bind a binary value, permitted at execution only if `oid` is registered for binary send.
    pub fn set_binary(&mut self, index: usize, value: impl Into<Bytes>, oid: Oid) -> Result<(), UsageError> {
        self.set(index, Param { oid, value: Some(value.into()), format: PgFormat::Binary })
    }

    pub fn set_null(&mut self, index: usize, oid: Oid) -> Result<(), UsageError> {
        self.set(index, Param { oid, value: None, format: PgFormat::Text })
    }

    pub fn set(&mut self, index: usize, param: Param) -> Result<(), UsageError> {
        let count = self.slots.len();
        match index.checked_sub(1).and_then(|i| self.slots.get_mut(i)) {
            Some(slot) => {
                *slot = Some(param);
                Ok(())
            },
            None => Err(UsageError::ParameterIndex { index, count }),
        }
    }

    pub fn get(&self, index: usize) -> Option<&Param> {
        index.checked_sub(1).and_then(|i| self.slots.get(i)).and_then(Option::as_ref)
    }

    /// Unset every parameter.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|e| *e = None);
    }

    /// Check ownership and that every parameter is set.
    pub(crate) fn bound_for(&self, query: &Query) -> Result<&[Option<Param>], UsageError> {
        if self.owner != *query {
            return Err(UsageError::ForeignParameters);
        }
        if let Some(i) = self.slots.iter().position(Option::is_none) {
            return Err(UsageError::UnsetParameter(i + 1));
        }
        Ok(&self.slots)
    }

    pub(crate) fn owner(&self) -> &Query {
        &self.owner
    }
}

/// Server side state of one statement.
#[derive(Debug, Clone, Default)]
pub(crate) enum Prepared {
    /// Parsed as the unnamed statement on every execution.
    #[default]
    Unnamed,
    /// Parse sent under `name`, `complete` once the server acknowledged it.
    Named {
        name: StatementName,
        oids: Vec<Oid>,
        complete: bool,
    },
}

/// One statement of a query record.
#[derive(Debug)]
pub(crate) struct StatementRecord {
    pub(crate) sql: String,
    /// Statement parameter `i` is parameter list slot `params[i]`.
    pub(crate) params: Vec<usize>,
    pub(crate) command: Command,
    pub(crate) returns_rows: bool,
    pub(crate) prepared: Prepared,
    /// Parameter types resolved by the server.
    pub(crate) param_oids: Option<Vec<Oid>>,
    /// Result columns, known after a describe.
    pub(crate) fields: Option<RowShape>,
}

impl StatementRecord {
    pub(crate) fn name(&self) -> Option<StatementName> {
        match &self.prepared {
            Prepared::Named { name, .. } => Some(*name),
            Prepared::Unnamed => None,
        }
    }

    /// Returns `true` if the prepared statement accepts parameters of `oids`.
    ///
    /// Unspecified oids match anything.
    pub(crate) fn prepared_for(&self, oids: &[Oid]) -> bool {
        match &self.prepared {
            Prepared::Named { oids: prepared, .. } => {
                prepared.len() == oids.len()
                    && prepared.iter().zip(oids).all(|(p, o)| *o == 0 || p == o)
            },
            Prepared::Unnamed => false,
        }
    }

    /// Forget the server side name, returning it when it should be closed.
    pub(crate) fn unprepare(&mut self) -> Option<StatementName> {
        match std::mem::take(&mut self.prepared) {
            Prepared::Named { name, complete, .. } => complete.then_some(name),
            Prepared::Unnamed => None,
        }
    }
}

/// A query as the executor knows it.
#[derive(Debug)]
pub(crate) struct QueryRecord {
    pub(crate) sql: String,
    pub(crate) parsed: ParsedSql,
    pub(crate) statements: Vec<StatementRecord>,
    pub(crate) execute_count: u32,
    /// Present while the record is in the statement cache.
    pub(crate) key: Option<QueryKey>,
    pub(crate) borrows: u32,
}

impl QueryRecord {
    pub(crate) fn new(key: &QueryKey) -> QueryRecord {
        let sql = match &key.column_names {
            Some(columns) => with_returning(&key.sql, columns),
            None => key.sql.clone(),
        };

        let mut parsed = sql::parse(&sql);
        if !key.parameterized {
            parsed.param_count = 0;
            parsed.statements.iter_mut().for_each(|e| e.placeholders.clear());
        }

        let statements = (0..parsed.statements.len())
            .map(|i| {
                let (text, params) = parsed.statement_sql(&sql, i);
                let stmt = &parsed.statements[i];
                StatementRecord {
                    sql: text,
                    params,
                    command: stmt.command,
                    returns_rows: stmt.returns_rows(),
                    prepared: Prepared::Unnamed,
                    param_oids: None,
                    fields: None,
                }
            })
            .collect();

        Self { sql, parsed, statements, execute_count: 0, key: None, borrows: 0 }
    }

    /// Drop every server name, returning the ones to close.
    pub(crate) fn unprepare(&mut self) -> Vec<StatementName> {
        self.statements.iter_mut().filter_map(StatementRecord::unprepare).collect()
    }
}

/// Append `RETURNING` columns to a data modifying statement that has none.
fn with_returning(sql: &str, columns: &[String]) -> String {
    let parsed = sql::parse(sql);
    let [stmt] = &parsed.statements[..] else {
        return sql.to_owned();
    };
    if stmt.returning
        || columns.is_empty()
        || !matches!(stmt.command, Command::Insert | Command::Update | Command::Delete | Command::Merge)
    {
        return sql.to_owned();
    }

    let mut out = sql[..stmt.range.end].trim_end().to_owned();
    out.push_str(" RETURNING ");
    for (i, column) in columns.iter().enumerate() {
        if i != 0 {
            out.push_str(", ");
        }
        if column == "*" {
            out.push('*');
            continue;
        }
        out.push('"');
        out.push_str(&column.replace('"', "\"\""));
        out.push('"');
    }
    out
}

/// Records addressed by [`Slot`].
#[derive(Debug, Default)]
pub(crate) struct QueryArena {
    entries: Vec<(u32, Option<QueryRecord>)>,
    free: Vec<u32>,
}

impl QueryArena {
    pub(crate) fn insert(&mut self, record: QueryRecord) -> Slot {
        match self.free.pop() {
            Some(index) => {
                let entry = &mut self.entries[index as usize];
                entry.0 = entry.0.wrapping_add(1);
                entry.1 = Some(record);
                Slot { index, generation: entry.0 }
            },
            None => {
                self.entries.push((0, Some(record)));
                Slot { index: (self.entries.len() - 1) as u32, generation: 0 }
            },
        }
    }

    pub(crate) fn get(&self, slot: Slot) -> Option<&QueryRecord> {
        match self.entries.get(slot.index as usize) {
            Some((generation, record)) if *generation == slot.generation => record.as_ref(),
            _ => None,
        }
    }

    pub(crate) fn get_mut(&mut self, slot: Slot) -> Option<&mut QueryRecord> {
        match self.entries.get_mut(slot.index as usize) {
            Some((generation, record)) if *generation == slot.generation => record.as_mut(),
            _ => None,
        }
    }

    pub(crate) fn remove(&mut self, slot: Slot) -> Option<QueryRecord> {
        let (generation, record) = self.entries.get_mut(slot.index as usize)?;
        if *generation != slot.generation {
            return None;
        }
        let record = record.take()?;
        self.free.push(slot.index);
        Some(record)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut QueryRecord> {
        self.entries.iter_mut().filter_map(|e| e.1.as_mut())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len() - self.free.len()
    }
}
