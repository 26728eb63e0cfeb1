//! Writing executions and recording the replies they cause.
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

use super::PgExecutor;
use crate::{
    Result,
    error::UsageError,
    fetch::RowSizeProbe,
    options::QueryOptions,
    postgres::{Oid, PgFormat, frontend, oid},
    query::{Param, Prepared, Query, Slot},
    row::RowShape,
    sql::quote_literal,
    statement::{PortalName, StatementName},
    transport::PgTransport,
};

/// Statement `stmt` of the query record at `slot`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Target {
    pub(crate) slot: Slot,
    pub(crate) stmt: usize,
}

/// A reply the engine waits for, in the order the messages were written.
///
/// `exec` indexes [`PgExecutor::execs`] of the current round.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Pending {
    Parse { target: Option<Target> },
    DescribeStatement { target: Target, report: bool, exec: Option<usize> },
    Bind { target: Option<Target> },
    DescribePortal { exec: usize },
    Execute { exec: usize },
    Close,
    Sync,
    /// A simple query, ended by its own `ReadyForQuery`.
    Simple { exec: usize },
}

/// Statements the engine runs on its own behalf, their results are never reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Internal {
    Begin,
    Savepoint,
    Release,
    Rollback,
}

/// Named portal backing a forward cursor.
#[derive(Debug)]
pub(crate) struct CursorPlan {
    pub(crate) portal: PortalName,
    pub(crate) query: Query,
    /// Size the caller asked for.
    pub(crate) requested: u32,
    /// Size of the round trip in flight.
    pub(crate) size: u32,
    pub(crate) adaptive: bool,
    /// Continuation of a cursor handed out earlier.
    pub(crate) fetching: bool,
}

/// State of one result producing message of the current round.
#[derive(Debug)]
pub(crate) struct Exec {
    pub(crate) target: Option<Target>,
    pub(crate) internal: Option<Internal>,
    pub(crate) batch_index: Option<usize>,
    pub(crate) shape: Option<RowShape>,
    /// Formats requested in `Bind`.
    pub(crate) result_formats: Vec<PgFormat>,
    pub(crate) report_fields: bool,
    pub(crate) fields_reported: bool,
    pub(crate) deliver_rows: bool,
    pub(crate) cursor: Option<CursorPlan>,
    pub(crate) probe: RowSizeProbe,
    /// A refused `COPY TO STDOUT` whose output is drained.
    pub(crate) copy_refused: bool,
    pub(crate) suspended: bool,
    pub(crate) completed: bool,
}

impl Exec {
    fn new(target: Option<Target>, internal: Option<Internal>) -> Exec {
        Self {
            target,
            internal,
            batch_index: None,
            shape: None,
            result_formats: vec![],
            report_fields: false,
            fields_reported: false,
            deliver_rows: false,
            cursor: None,
            probe: RowSizeProbe::default(),
            copy_refused: false,
            suspended: false,
            completed: false,
        }
    }

    fn user(target: Option<Target>, options: &QueryOptions, run: &Run) -> Exec {
        let reported = run.batch_index.is_none() || options.both_rows_and_status;
        Self {
            batch_index: run.batch_index,
            report_fields: reported && !options.no_metadata,
            deliver_rows: reported && !options.no_results,
            ..Self::new(target, None)
        }
    }

    /// Continue a cursor from a previous round.
    pub(crate) fn fetch(shape: Option<RowShape>, cursor: CursorPlan) -> Exec {
        Self {
            shape,
            fields_reported: true,
            deliver_rows: true,
            cursor: Some(cursor),
            ..Self::new(None, None)
        }
    }
}

/// Per execution parameters beside the options.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Run {
    pub(crate) batch_index: Option<usize>,
    pub(crate) max_rows: u32,
    /// Fetch size when a forward cursor is opened.
    pub(crate) cursor: Option<u32>,
    pub(crate) adaptive: bool,
}

/// What was written for one query.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Queued {
    pub(crate) returns_rows: bool,
}

/// Bind format list, empty when every value is text.
fn collapse(formats: Vec<PgFormat>) -> Vec<PgFormat> {
    match formats.iter().any(PgFormat::is_binary) {
        true => formats,
        false => vec![],
    }
}

/// Inline a parameter as a literal for the simple dialect.
fn literal(param: Option<&Param>, standard_conforming_strings: bool) -> Result<String> {
    let Some(param) = param else {
        return Ok("NULL".into());
    };
    let mut out = match &param.value {
        Some(value) => quote_literal(std::str::from_utf8(value)?, standard_conforming_strings),
        None => "NULL".into(),
    };
    if let Some(name) = oid::type_name(param.oid) {
        out.push_str("::");
        out.push_str(name);
    }
    Ok(out)
}

impl<S> PgExecutor<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Check parameter formats against the dialect and the registry.
    pub(crate) fn check_params(
        &self,
        params: &[Option<Param>],
        simple: bool,
        options: &QueryOptions,
    ) -> Result<(), UsageError> {
        for (i, param) in params.iter().enumerate() {
            let Some(param) = param else {
                return Err(UsageError::UnsetParameter(i + 1));
            };
            if !param.format.is_binary() {
                continue;
            }
            if simple {
                return Err(UsageError::BinaryInSimpleQuery(i + 1));
            }
            if options.no_binary_transfer || !self.registry.contains_send(param.oid) {
                return Err(UsageError::BinaryNotPermitted { index: i + 1, oid: param.oid });
            }
        }
        Ok(())
    }

    /// Query text with every parameter inlined.
    pub(crate) fn simple_sql(&self, query: &Query, params: &[Option<Param>]) -> Result<String> {
        let record = self.record(query)?;
        if record.parsed.param_count == 0 {
            return Ok(record.sql.clone());
        }
        let scs = self.parameter_status("standard_conforming_strings") != Some("off");
        let literals = params
            .iter()
            .map(|e| literal(e.as_ref(), scs))
            .collect::<Result<Vec<_>>>()?;
        Ok(record.parsed.inline(&record.sql, &literals))
    }

    /// Whether the next execution of `query` runs through a named statement.
    pub(crate) fn will_prepare(&self, query: &Query, options: &QueryOptions) -> bool {
        let Ok(record) = self.record(query) else {
            return false;
        };
        if options.one_shot {
            return false;
        }
        let threshold = self.config.prepare_threshold;
        (threshold > 0 && record.execute_count + 1 >= threshold)
            || record.statements.iter().any(|e| e.name().is_some())
    }

    /// Close statements and portals nobody references anymore.
    pub(crate) fn queue_closes(&mut self) {
        for name in std::mem::take(&mut self.closes) {
            self.stream.send(frontend::Close { variant: b'S', name: name.as_str() });
            self.pending.push_back(Pending::Close);
        }
        for name in std::mem::take(&mut self.portal_closes) {
            self.stream.send(frontend::Close { variant: b'P', name: name.as_str() });
            self.pending.push_back(Pending::Close);
        }
    }

    pub(crate) fn queue_sync(&mut self) {
        self.stream.send(frontend::Sync);
        self.pending.push_back(Pending::Sync);
    }

    /// Queue a statement run on the engine's own behalf.
    pub(crate) fn queue_internal(&mut self, internal: Internal, sql: &str, simple: bool) {
        let exec = self.execs.len();
        self.execs.push(Exec::new(None, Some(internal)));

        if simple {
            self.stream.send(frontend::Query { sql });
            self.pending.push_back(Pending::Simple { exec });
            return;
        }

        self.stream.send(frontend::Parse { prepare_name: "", sql, oids: &[] });
        self.pending.push_back(Pending::Parse { target: None });
        self.stream.send(frontend::Bind {
            portal_name: "",
            stmt_name: "",
            param_formats: &[],
            params: &[],
            result_formats: &[],
        });
        self.pending.push_back(Pending::Bind { target: None });
        self.stream.send(frontend::Execute { portal_name: "", max_row: 0 });
        self.pending.push_back(Pending::Execute { exec });
    }

    /// Queue a simple query whose text already has parameters inlined.
    pub(crate) fn queue_simple(&mut self, sql: &str, options: &QueryOptions, run: &Run) {
        let exec = self.execs.len();
        self.execs.push(Exec::user(None, options, run));
        self.stream.send(frontend::Query { sql });
        self.pending.push_back(Pending::Simple { exec });
    }

    /// Queue every statement of `query` in the extended dialect.
    ///
    /// Parameters must be checked with [`check_params`][Self::check_params] beforehand.
    pub(crate) fn queue_extended(
        &mut self,
        query: &Query,
        params: &[Option<Param>],
        options: &QueryOptions,
        run: &Run,
    ) -> Result<Queued> {
        let threshold = self.config.prepare_threshold;
        let Some(record) = self.arena.get_mut(query.slot) else {
            return Err(UsageError::StaleQuery.into());
        };

        let counted = !options.one_shot && !options.describe_only;
        if counted {
            record.execute_count = record.execute_count.saturating_add(1);
        }
        let promote = !options.one_shot && threshold > 0 && record.execute_count >= threshold;
        let single = record.statements.len() == 1;
        let mut queued = Queued::default();

        for (i, stmt) in record.statements.iter_mut().enumerate() {
            let target = Target { slot: query.slot, stmt: i };
            let bound = stmt.params.iter().map(|&p| params.get(p).and_then(Option::as_ref));
            let values: Vec<Option<Bytes>> = bound.clone().map(|e| e.and_then(|e| e.value.clone())).collect();
            let oids: Vec<Oid> = bound.clone().map(|e| e.map_or(0, |e| e.oid)).collect();
            let formats = collapse(bound.map(|e| e.map_or(PgFormat::Text, |e| e.format)).collect());

            let named = !options.one_shot && (promote || stmt.name().is_some());
            let mut parsed = false;
            let stmt_name = if named && stmt.prepared_for(&oids) {
                stmt.name().unwrap_or_else(StatementName::unnamed)
            } else if named {
                if let Some(old) = stmt.unprepare() {
                    self.stream.send(frontend::Close { variant: b'S', name: old.as_str() });
                    self.pending.push_back(Pending::Close);
                }
                let name = StatementName::next(&mut self.name_counter);
                self.stream.send(frontend::Parse { prepare_name: name.as_str(), sql: &stmt.sql, oids: &oids });
                self.pending.push_back(Pending::Parse { target: Some(target) });
                stmt.prepared = Prepared::Named { name, oids: oids.clone(), complete: false };
                parsed = true;
                name
            } else {
                self.stream.send(frontend::Parse { prepare_name: "", sql: &stmt.sql, oids: &oids });
                self.pending.push_back(Pending::Parse { target: Some(target) });
                parsed = true;
                StatementName::unnamed()
            };

            let describe_statement = options.describe_only || (parsed && named);
            if options.describe_only {
                self.stream.send(frontend::Describe { kind: b'S', name: stmt_name.as_str() });
                self.pending.push_back(Pending::DescribeStatement { target, report: true, exec: None });
                continue;
            }

            let result_formats = match (&stmt.fields, options.no_binary_transfer) {
                (Some(fields), false) => self.registry.result_formats(fields.oids()),
                _ => vec![],
            };

            let exec = self.execs.len();
            let mut state = Exec::user(Some(target), options, run);
            state.shape = stmt.fields.as_ref().map(|e| e.with_formats(&result_formats));

            if describe_statement {
                self.stream.send(frontend::Describe { kind: b'S', name: stmt_name.as_str() });
                self.pending.push_back(Pending::DescribeStatement { target, report: false, exec: Some(exec) });
            }

            let cursor = run.cursor.filter(|_| single && stmt.returns_rows);
            let portal = match cursor {
                Some(_) => PortalName::next(&mut self.name_counter),
                None => PortalName::unnamed(),
            };

            self.stream.send(frontend::Bind {
                portal_name: portal.as_str(),
                stmt_name: stmt_name.as_str(),
                param_formats: &formats,
                params: &values,
                result_formats: &result_formats,
            });
            self.pending.push_back(Pending::Bind { target: Some(target) });

            let describe_portal = !describe_statement
                && (options.force_describe_portal || (stmt.fields.is_none() && !options.no_metadata));
            if describe_portal {
                self.stream.send(frontend::Describe { kind: b'P', name: portal.as_str() });
                self.pending.push_back(Pending::DescribePortal { exec });
            }

            let max_row = match cursor {
                Some(requested) => {
                    let size = match run.adaptive {
                        true => self.adaptive.size(&portal, requested),
                        false => requested,
                    };
                    self.portals.insert(portal);
                    state.cursor = Some(CursorPlan {
                        portal,
                        query: *query,
                        requested,
                        size,
                        adaptive: run.adaptive,
                        fetching: false,
                    });
                    size
                },
                None => run.max_rows,
            };

            self.stream.send(frontend::Execute { portal_name: portal.as_str(), max_row });
            self.pending.push_back(Pending::Execute { exec });
            state.result_formats = result_formats;
            self.execs.push(state);
            queued.returns_rows |= stmt.returns_rows;
        }

        Ok(queued)
    }

    /// Queue the next round trip of an open cursor.
    pub(crate) fn queue_fetch(&mut self, shape: Option<RowShape>, plan: CursorPlan) {
        let exec = self.execs.len();
        self.stream.send(frontend::Execute { portal_name: plan.portal.as_str(), max_row: plan.size });
        self.pending.push_back(Pending::Execute { exec });
        self.execs.push(Exec::fetch(shape, plan));
    }
}
