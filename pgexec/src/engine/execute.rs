//! Executions: single queries, batches and cursor fetches.
use tokio::io::{AsyncRead, AsyncWrite};

use super::{
    PgExecutor,
    send::{CursorPlan, Internal, Run},
};
use crate::{
    Result,
    common::{debug, log_warn, span, verbose},
    error::{Error, UsageError},
    handler::{BatchOutcome, BatchResultHandler, ResultHandler},
    options::QueryOptions,
    portal::ResultCursor,
    query::{ParameterList, Query},
    sql::Command,
    transaction::{
        RELEASE_SQL, ROLLBACK_SQL, SAVEPOINT_SQL, SavepointPlan, TransactionState, heals_via_reparse,
    },
};

/// Reply bytes assumed per batched statement.
const BATCH_STATEMENT_ESTIMATE: usize = 250;

impl<S> PgExecutor<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Execute a query.
    ///
    /// Results are delivered to `handler` as they are read. `max_rows` limits the rows of a
    /// plain execution, zero is no limit. With [`forward_cursor`][QueryOptions::forward_cursor]
    /// and a non zero `fetch_size` (or configured default) the result is read through a named
    /// portal, and the remaining rows are handed out as a [`ResultCursor`].
    ///
    /// Returns the first error, every error is also reported to the handler.
    pub async fn execute<H>(
        &mut self,
        query: &Query,
        params: &ParameterList,
        handler: &mut H,
        max_rows: u32,
        fetch_size: u32,
        options: QueryOptions,
    ) -> Result<()>
    where
        H: ResultHandler + ?Sized,
    {
        span!("execute");
        self.ensure_ready()?;
        options.validate(self.config.query_mode)?;
        let record = self.record(query)?;
        let command = record.statements[0].command;
        let control = record.statements.iter().any(|e| e.command.is_transaction_control());
        let bound = params.bound_for(query)?;
        let simple = options.use_simple(self.config.query_mode, query.param_count());
        self.check_params(bound, simple, &options)?;
        let text = match simple {
            true => Some(self.simple_sql(query, bound)?),
            false => None,
        };
        let prepared = !simple && self.will_prepare(query, &options);

        let fetch = match fetch_size {
            0 => self.config.default_fetch_size,
            n => n,
        };
        let cursor = options.forward_cursor
            && fetch > 0
            && !options.no_results
            && !options.no_metadata
            && !options.describe_only;
        let run = Run {
            batch_index: None,
            max_rows,
            cursor: cursor.then_some(match max_rows {
                0 => fetch,
                max => fetch.min(max),
            }),
            adaptive: options.adaptive_fetch.unwrap_or(self.config.adaptive_fetch),
        };

        self.execs.clear();
        self.queue_closes();
        if !options.describe_only {
            self.queue_begin(command, &options, simple);
        }
        let plan = match options.describe_only {
            true => SavepointPlan::default(),
            false => self.autosave.plan(self.state, prepared, control),
        };
        self.queue_savepoint(plan, simple);

        match text {
            Some(text) => self.queue_simple(&text, &options, &run),
            None => {
                self.queue_extended(query, bound, &options, &run)?;
            },
        }

        if plan.release_after && !simple {
            self.queue_internal(Internal::Release, RELEASE_SQL, false);
        }
        if !simple {
            self.queue_sync();
        }
        self.flush().await?;

        let err = self.process_results(handler, None).await?;
        let err = self.finish_savepoint(err, plan, simple).await?;
        handler.on_complete();
        match err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Execute queries as one pipelined batch.
    ///
    /// Statements are grouped into round trips bounded by
    /// [`max_buffered_recv_bytes`][crate::Config::max_buffered_recv_bytes]. Execution stops at
    /// the first failed statement: the handler receives a completed outcome for every statement
    /// before it and [`BatchOutcome::NotExecuted`] for it and every statement after it.
    pub async fn execute_batch<H>(
        &mut self,
        queries: &[Query],
        params: &[ParameterList],
        handler: &mut H,
        max_rows: u32,
        options: QueryOptions,
    ) -> Result<()>
    where
        H: BatchResultHandler + ?Sized,
    {
        span!("execute_batch", len = queries.len());
        self.ensure_ready()?;
        if queries.len() != params.len() {
            return Err(UsageError::BatchLength { queries: queries.len(), params: params.len() }.into());
        }
        options.validate(self.config.query_mode)?;
        if options.describe_only || options.forward_cursor {
            return Err(UsageError::InvalidOptions("batch cannot describe only or open a cursor").into());
        }

        let mut simple = vec![];
        for (query, params) in queries.iter().zip(params) {
            self.record(query)?;
            let bound = params.bound_for(query)?;
            let is_simple = options.use_simple(self.config.query_mode, query.param_count());
            self.check_params(bound, is_simple, &options)?;
            simple.push(match is_simple {
                true => Some(self.simple_sql(query, bound)?),
                false => None,
            });
        }

        let mut outcomes = vec![BatchOutcome::NotExecuted; queries.len()];
        let Some(first) = queries.first() else {
            handler.on_batch(&outcomes);
            handler.on_complete();
            return Ok(());
        };

        let command = self.record(first)?.statements[0].command;
        let prepared = queries.iter().any(|q| self.will_prepare(q, &options));
        let mut control = false;
        for query in queries {
            control |= self.record(query)?.statements.iter().any(|e| e.command.is_transaction_control());
        }
        let is_simple = simple.iter().all(Option::is_some);

        self.execs.clear();
        self.queue_closes();
        self.queue_begin(command, &options, is_simple);
        let plan = self.autosave.plan(self.state, prepared, control);
        self.queue_savepoint(plan, is_simple);

        let limit = self.config.max_buffered_recv_bytes;
        let mut estimate = 0;
        let mut err = None;

        for (i, ((query, params), text)) in queries.iter().zip(params).zip(&simple).enumerate() {
            if estimate + BATCH_STATEMENT_ESTIMATE > limit {
                debug!("batch sync forced after {} statements", i);
                err = self.batch_round(handler, &mut outcomes).await?;
                if err.is_some() {
                    break;
                }
                estimate = 0;
            }

            let run = Run { batch_index: Some(i), max_rows, ..Default::default() };
            let bound = params.bound_for(query)?;
            match text {
                Some(text) => {
                    // each simple query runs on its own, the server would not skip the rest
                    if !self.pending.is_empty() {
                        err = self.batch_round(handler, &mut outcomes).await?;
                        if err.is_some() {
                            break;
                        }
                    }
                    self.queue_simple(text, &options, &run);
                    estimate = limit;
                },
                None => {
                    let queued = self.queue_extended(query, bound, &options, &run)?;
                    estimate += BATCH_STATEMENT_ESTIMATE;
                    if queued.returns_rows {
                        // rows are unbounded, read them before queueing more
                        estimate = limit;
                    }
                },
            }
        }

        if err.is_none() && !self.pending.is_empty() {
            if plan.release_after && !is_simple {
                self.queue_internal(Internal::Release, RELEASE_SQL, false);
            }
            err = self.batch_round(handler, &mut outcomes).await?;
        }

        let err = self.finish_savepoint(err, plan, is_simple).await?;
        handler.on_batch(&outcomes);
        handler.on_complete();
        match err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Sync, flush and read one round of a batch.
    async fn batch_round<H>(&mut self, handler: &mut H, outcomes: &mut [BatchOutcome]) -> Result<Option<Error>>
    where
        H: BatchResultHandler + ?Sized,
    {
        let extended = self.pending.iter().any(|e| !matches!(e, super::Pending::Simple { .. }));
        if extended {
            self.queue_sync();
        }
        self.flush().await?;
        let err = self.process_results(handler, Some(outcomes)).await?;
        self.execs.clear();
        Ok(err)
    }

    /// Fetch the next rows of a cursor.
    ///
    /// Rows go to `handler`. A zero `fetch_size` keeps the size of the previous round trip,
    /// adaptive cursors use their learned size. Once every row was read the cursor is
    /// exhausted, its portal closed, and further fetches only report completion.
    pub async fn fetch<H>(&mut self, cursor: &mut ResultCursor, fetch_size: u32, handler: &mut H) -> Result<()>
    where
        H: ResultHandler + ?Sized,
    {
        span!("fetch", portal = %cursor.portal);
        self.ensure_ready()?;
        if cursor.engine != self.id {
            return Err(UsageError::ForeignQuery.into());
        }
        if cursor.exhausted {
            handler.on_complete();
            return Ok(());
        }
        if !self.portals.contains(&cursor.portal) {
            return Err(UsageError::CursorClosed.into());
        }

        let adaptive = self.adaptive.get(&cursor.portal).is_some();
        let requested = match fetch_size {
            0 => cursor.fetch_size,
            n => n,
        };
        let size = match adaptive {
            true => self.adaptive.size(&cursor.portal, requested),
            false => requested,
        };

        self.execs.clear();
        self.queue_closes();
        self.queue_fetch(cursor.shape.clone(), CursorPlan {
            portal: cursor.portal,
            query: cursor.query,
            requested,
            size,
            adaptive,
            fetching: true,
        });
        self.queue_sync();
        self.flush().await?;

        let err = self.process_results(handler, None).await?;
        if let Some(exec) = self.execs.first() {
            if exec.completed {
                cursor.exhausted = true;
            }
            if let Some(plan) = &exec.cursor {
                cursor.fetch_size = plan.size;
            }
            verbose!(portal = %cursor.portal, rows = cursor.fetch_size, exhausted = cursor.exhausted, "fetched");
        }
        handler.on_complete();
        match err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Close a cursor before it is exhausted.
    ///
    /// The portal is closed with the next round trip.
    pub fn close_cursor(&mut self, cursor: ResultCursor) -> Result<()> {
        if cursor.engine != self.id {
            return Err(UsageError::ForeignQuery.into());
        }
        if self.portals.remove(&cursor.portal) {
            self.adaptive.remove(&cursor.portal);
            self.portal_closes.push(cursor.portal);
        }
        Ok(())
    }

    /// Queue `BEGIN` when the unit of work needs one.
    fn queue_begin(&mut self, command: Command, options: &QueryOptions, simple: bool) {
        if options.suppress_begin || self.state != TransactionState::Idle || command == Command::Begin {
            return;
        }
        let sql = match options.read_only_hint {
            true => "BEGIN READ ONLY",
            false => "BEGIN",
        };
        self.queue_internal(Internal::Begin, sql, simple);
    }

    fn queue_savepoint(&mut self, plan: SavepointPlan, simple: bool) {
        if plan.release_before {
            self.queue_internal(Internal::Release, RELEASE_SQL, simple);
        }
        if plan.set {
            self.queue_internal(Internal::Savepoint, SAVEPOINT_SQL, simple);
        }
    }

    /// Release the savepoint after success, or roll back to it after a failure.
    async fn finish_savepoint(
        &mut self,
        err: Option<Error>,
        plan: SavepointPlan,
        simple: bool,
    ) -> Result<Option<Error>> {
        if !plan.set {
            return Ok(err);
        }
        let Some(err) = err else {
            if plan.release_after && simple {
                if let Some(_release) = self.run_internal(Internal::Release, RELEASE_SQL).await? {
                    log_warn!("releasing automatic savepoint failed: {_release}");
                }
            }
            return Ok(None);
        };
        if self.state == TransactionState::Failed && self.autosave.should_rollback(heals_via_reparse(&err)) {
            debug!("rolling back to automatic savepoint");
            if let Some(_rollback) = self.run_internal(Internal::Rollback, ROLLBACK_SQL).await? {
                log_warn!("rollback to automatic savepoint failed: {_rollback}");
            }
        }
        Ok(Some(err))
    }

    /// Run one statement of the engine's own as a simple query round trip.
    pub(crate) async fn run_internal(&mut self, internal: Internal, sql: &str) -> Result<Option<Error>> {
        self.execs.clear();
        self.queue_internal(internal, sql, true);
        self.flush().await?;
        self.process_results(&mut (), None).await
    }

    /// Run `BEGIN` on its own when a fastpath call or copy needs one.
    pub(crate) async fn begin_if_needed(&mut self, suppress_begin: bool) -> Result<()> {
        if suppress_begin || self.state != TransactionState::Idle {
            return Ok(());
        }
        match self.run_internal(Internal::Begin, "BEGIN").await? {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
