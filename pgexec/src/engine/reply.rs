//! Reading replies against the pending queue.
use tokio::io::{AsyncRead, AsyncWrite};

use super::{
    PgExecutor,
    send::{Exec, Internal, Pending},
};
use crate::{
    Result,
    common::{debug, verbose},
    error::{Error, UsageError},
    handler::{BatchOutcome, ResultHandler},
    portal::ResultCursor,
    postgres::{BackendMessage, frontend},
    query::Prepared,
    row::{CommandOutcome, Row, RowShape},
    transaction::heals_via_reparse,
    transport::PgTransport,
};

const COPY_REFUSED: &str = "COPY commands are only supported using the copy API";

/// Announce the row shape once, before the first row or the command outcome.
fn report_fields<H: ResultHandler + ?Sized>(exec: &mut Exec, handler: &mut H) {
    if exec.fields_reported || exec.internal.is_some() {
        return;
    }
    exec.fields_reported = true;
    if !exec.report_fields {
        return;
    }
    if let Some(shape) = exec.shape.as_ref().filter(|e| !e.is_empty()) {
        handler.on_fields(shape);
    }
}

impl<S> PgExecutor<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Read replies until every pending entry is answered.
    ///
    /// Returns the first statement level error. Connection fatal errors are returned as `Err`
    /// and leave the engine closed.
    pub(crate) async fn process_results<H>(
        &mut self,
        handler: &mut H,
        outcomes: Option<&mut [BatchOutcome]>,
    ) -> Result<Option<Error>>
    where
        H: ResultHandler + ?Sized,
    {
        let result = self.process_inner(handler, outcomes).await;
        if result.is_err() {
            self.pending.clear();
        }
        result
    }

    async fn process_inner<H>(
        &mut self,
        handler: &mut H,
        mut outcomes: Option<&mut [BatchOutcome]>,
    ) -> Result<Option<Error>>
    where
        H: ResultHandler + ?Sized,
    {
        let mut first_error: Option<Error> = None;
        // the error answering a `CopyFail` we sent
        let mut copy_failed = false;

        while let Some(&front) = self.pending.front() {
            let message = match self.read_message().await? {
                BackendMessage::NoticeResponse(notice) => {
                    let warning = self.on_notice(notice)?;
                    handler.on_warning(&warning);
                    continue;
                },
                BackendMessage::ErrorResponse(error) => {
                    let err = self.on_error_response(error)?;
                    if err.is_fatal() {
                        handler.on_error(&err);
                        return Err(err);
                    }
                    self.heal(front, &err);
                    if std::mem::take(&mut copy_failed) {
                        verbose!("copy refusal acknowledged: {err}");
                    } else {
                        handler.on_error(&err);
                    }
                    first_error.get_or_insert(err);
                    self.discard_until_sync();
                    continue;
                },
                message => message,
            };

            match (front, message) {
                (Pending::Parse { target }, BackendMessage::ParseComplete(_)) => {
                    if let Some(t) = target {
                        let stmt = self
                            .arena
                            .get_mut(t.slot)
                            .and_then(|e| e.statements.get_mut(t.stmt));
                        if let Some(Prepared::Named { complete, .. }) = stmt.map(|e| &mut e.prepared) {
                            *complete = true;
                        }
                    }
                    self.pending.pop_front();
                },
                (Pending::Bind { .. }, BackendMessage::BindComplete(_))
                | (Pending::Close, BackendMessage::CloseComplete(_)) => {
                    self.pending.pop_front();
                },
                (Pending::DescribeStatement { target, report, .. }, BackendMessage::ParameterDescription(desc)) => {
                    if report {
                        handler.on_parameters(&desc.oids);
                    }
                    let stmt = self
                        .arena
                        .get_mut(target.slot)
                        .and_then(|e| e.statements.get_mut(target.stmt));
                    if let Some(stmt) = stmt {
                        if let Prepared::Named { oids, .. } = &mut stmt.prepared {
                            oids.clone_from(&desc.oids);
                        }
                        stmt.param_oids = Some(desc.oids);
                    }
                },
                (Pending::DescribeStatement { target, report, exec }, message @ (BackendMessage::RowDescription(_) | BackendMessage::NoData(_))) => {
                    let shape = match message {
                        BackendMessage::RowDescription(desc) => self.decode_shape(desc)?,
                        _ => RowShape::empty(),
                    };
                    if report && !shape.is_empty() {
                        handler.on_fields(&shape);
                    }
                    if let Some(exec) = exec {
                        let Some(state) = self.execs.get_mut(exec) else {
                            return Err(self.desync());
                        };
                        state.shape = Some(shape.with_formats(&state.result_formats));
                    }
                    let stmt = self
                        .arena
                        .get_mut(target.slot)
                        .and_then(|e| e.statements.get_mut(target.stmt));
                    if let Some(stmt) = stmt {
                        stmt.fields = Some(shape);
                    }
                    self.pending.pop_front();
                },
                (Pending::DescribePortal { exec }, message @ (BackendMessage::RowDescription(_) | BackendMessage::NoData(_))) => {
                    let shape = match message {
                        BackendMessage::RowDescription(desc) => self.decode_shape(desc)?,
                        _ => RowShape::empty(),
                    };
                    let Some(state) = self.execs.get_mut(exec) else {
                        return Err(self.desync());
                    };
                    if let Some(t) = state.target {
                        let stmt = self
                            .arena
                            .get_mut(t.slot)
                            .and_then(|e| e.statements.get_mut(t.stmt));
                        if let Some(stmt) = stmt {
                            stmt.fields = Some(shape.clone());
                        }
                    }
                    state.shape = Some(shape);
                    report_fields(state, handler);
                    self.pending.pop_front();
                },
                (Pending::Simple { exec }, BackendMessage::RowDescription(desc)) => {
                    let shape = self.decode_shape(desc)?;
                    let Some(state) = self.execs.get_mut(exec) else {
                        return Err(self.desync());
                    };
                    state.shape = Some(shape);
                    state.fields_reported = false;
                    report_fields(state, handler);
                },
                (Pending::Execute { exec } | Pending::Simple { exec }, BackendMessage::DataRow(row)) => {
                    let Some(state) = self.execs.get_mut(exec) else {
                        return Err(self.desync());
                    };
                    let row = match Row::decode(row, state.shape.as_ref()) {
                        Ok(row) => row,
                        Err(err) => {
                            self.closed = true;
                            return Err(err.into());
                        },
                    };
                    state.probe.observe(row.byte_len());
                    report_fields(state, handler);
                    if state.internal.is_none() && state.deliver_rows && !state.copy_refused {
                        handler.on_row(row);
                    }
                },
                (Pending::Execute { exec }, BackendMessage::CommandComplete(cmd)) => {
                    self.on_command(exec, CommandOutcome::parse(cmd.tag), handler, outcomes.as_deref_mut())?;
                    self.pending.pop_front();
                },
                (Pending::Execute { exec }, BackendMessage::EmptyQueryResponse(_)) => {
                    self.on_command(exec, CommandOutcome::empty(), handler, outcomes.as_deref_mut())?;
                    self.pending.pop_front();
                },
                (Pending::Simple { exec }, BackendMessage::CommandComplete(cmd)) => {
                    self.on_command(exec, CommandOutcome::parse(cmd.tag), handler, outcomes.as_deref_mut())?;
                    let Some(state) = self.execs.get_mut(exec) else {
                        return Err(self.desync());
                    };
                    state.shape = None;
                    state.fields_reported = false;
                },
                (Pending::Simple { exec }, BackendMessage::EmptyQueryResponse(_)) => {
                    self.on_command(exec, CommandOutcome::empty(), handler, outcomes.as_deref_mut())?;
                },
                (Pending::Execute { exec }, BackendMessage::PortalSuspended(_)) => {
                    self.on_suspended(exec, handler)?;
                    self.pending.pop_front();
                },
                (
                    Pending::Execute { .. } | Pending::Simple { .. },
                    BackendMessage::CopyInResponse(_) | BackendMessage::CopyBothResponse(_),
                ) => {
                    debug!("refusing copy reached through execute");
                    self.stream.send(frontend::CopyFail { message: COPY_REFUSED });
                    self.flush().await?;
                    let err = Error::from(UsageError::CopyNotAllowed);
                    handler.on_error(&err);
                    first_error.get_or_insert(err);
                    copy_failed = true;
                },
                (Pending::Execute { exec } | Pending::Simple { exec }, BackendMessage::CopyOutResponse(_)) => {
                    debug!("draining copy reached through execute");
                    let Some(state) = self.execs.get_mut(exec) else {
                        return Err(self.desync());
                    };
                    state.copy_refused = true;
                    let err = Error::from(UsageError::CopyNotAllowed);
                    handler.on_error(&err);
                    first_error.get_or_insert(err);
                },
                (
                    Pending::Execute { .. } | Pending::Simple { .. },
                    BackendMessage::CopyData(_) | BackendMessage::CopyDone(_),
                ) => { },
                (Pending::Sync | Pending::Simple { .. }, BackendMessage::ReadyForQuery(ready)) => {
                    self.on_ready(ready);
                    self.pending.pop_front();
                },
                (_, message) => return Err(self.unexpected(&message, "query results")),
            }
        }

        Ok(first_error)
    }

    fn decode_shape(&mut self, desc: crate::postgres::backend::RowDescription) -> Result<RowShape> {
        RowShape::decode(desc).map_err(|err| {
            self.closed = true;
            err.into()
        })
    }

    fn on_command<H>(
        &mut self,
        exec: usize,
        outcome: CommandOutcome,
        handler: &mut H,
        outcomes: Option<&mut [BatchOutcome]>,
    ) -> Result<()>
    where
        H: ResultHandler + ?Sized,
    {
        if outcome.drops_statements() && self.config.flush_cache_on_deallocate {
            self.forget_statements();
        }

        let Some(state) = self.execs.get_mut(exec) else {
            return Err(self.desync());
        };
        state.completed = true;

        match state.internal {
            Some(Internal::Savepoint) => self.autosave.depth += 1,
            Some(Internal::Release) => self.autosave.depth = self.autosave.depth.saturating_sub(1),
            Some(Internal::Begin | Internal::Rollback) => { },
            None if state.copy_refused => state.copy_refused = false,
            None => {
                report_fields(state, handler);
                if let (Some(i), Some(outcomes)) = (state.batch_index, outcomes) {
                    if let Some(slot) = outcomes.get_mut(i) {
                        *slot = BatchOutcome::Completed(outcome.clone());
                    }
                }
                handler.on_command(outcome);
            },
        }

        if let Some(cursor) = &state.cursor {
            // exhausted within this round trip
            let portal = cursor.portal;
            self.portals.remove(&portal);
            self.adaptive.remove(&portal);
            self.portal_closes.push(portal);
        }
        Ok(())
    }

    fn on_suspended<H>(&mut self, exec: usize, handler: &mut H) -> Result<()>
    where
        H: ResultHandler + ?Sized,
    {
        let Some(state) = self.execs.get_mut(exec) else {
            return Err(self.desync());
        };
        state.suspended = true;
        report_fields(state, handler);

        let probe = state.probe;
        let Some(cursor) = state.cursor.as_mut() else {
            // row limit of a plain execution, the result ends here
            return Ok(());
        };
        if cursor.adaptive {
            cursor.size = self.adaptive.update(cursor.portal, probe, cursor.requested);
            verbose!(portal = %cursor.portal, size = cursor.size, "adaptive fetch size");
        }
        if cursor.fetching || state.internal.is_some() {
            return Ok(());
        }
        handler.on_cursor(ResultCursor {
            engine: self.id,
            portal: cursor.portal,
            query: cursor.query,
            shape: state.shape.clone(),
            fetch_size: cursor.size,
            exhausted: false,
        });
        Ok(())
    }

    /// Drop the server name of a statement whose failure a fresh parse heals.
    fn heal(&mut self, front: Pending, err: &Error) {
        if !heals_via_reparse(err) {
            return;
        }
        let target = match front {
            Pending::Parse { target } | Pending::Bind { target } => target,
            Pending::DescribeStatement { target, .. } => Some(target),
            Pending::DescribePortal { exec } | Pending::Execute { exec } => {
                self.execs.get(exec).and_then(|e| e.target)
            },
            Pending::Close | Pending::Sync | Pending::Simple { .. } => None,
        };
        let Some(t) = target else {
            return;
        };
        let Some(stmt) = self.arena.get_mut(t.slot).and_then(|e| e.statements.get_mut(t.stmt)) else {
            return;
        };
        debug!("dropping stale statement {:?}", stmt.name());
        let name = stmt.unprepare();
        stmt.fields = None;
        // a statement that does not exist needs no close
        if err.sqlstate() != Some("26000") {
            self.closes.extend(name);
        }
    }

    /// Skip the replies the server will not send after an error.
    fn discard_until_sync(&mut self) {
        while let Some(&front) = self.pending.front() {
            match front {
                Pending::Sync | Pending::Simple { .. } => break,
                Pending::Parse { target: Some(t) } => {
                    let stmt = self
                        .arena
                        .get_mut(t.slot)
                        .and_then(|e| e.statements.get_mut(t.stmt));
                    if let Some(stmt) = stmt {
                        if matches!(stmt.prepared, Prepared::Named { complete: false, .. }) {
                            stmt.prepared = Prepared::Unnamed;
                        }
                    }
                },
                Pending::Execute { exec } => {
                    if let Some(cursor) = self.execs.get(exec).and_then(|e| e.cursor.as_ref()).filter(|e| !e.fetching) {
                        self.portals.remove(&cursor.portal);
                    }
                },
                _ => { },
            }
            self.pending.pop_front();
        }
    }
}
