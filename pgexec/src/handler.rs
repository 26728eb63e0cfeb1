//! Result consumers.
use crate::{
    Error,
    portal::ResultCursor,
    postgres::{DbError, Oid},
    row::{CommandOutcome, Row, RowShape},
};

/// Receives the results of an execution as they are read.
///
/// Callbacks arrive in reply order. A result set is announced by
/// [`on_fields`][ResultHandler::on_fields], followed by its rows.
pub trait ResultHandler {
    /// Row shape of the next result set.
    fn on_fields(&mut self, shape: &RowShape) {
        let _ = shape;
    }

    /// Parameter types of a described statement.
    fn on_parameters(&mut self, oids: &[Oid]) {
        let _ = oids;
    }

    fn on_row(&mut self, row: Row);

    /// Completion of a command that produced no rows, or of any command when
    /// both rows and status are requested.
    fn on_command(&mut self, outcome: CommandOutcome);

    /// The result set was suspended in a named portal, more rows can be fetched.
    fn on_cursor(&mut self, cursor: ResultCursor) {
        let _ = cursor;
    }

    /// A notice received while executing.
    fn on_warning(&mut self, warning: &DbError) {
        let _ = warning;
    }

    /// Every error is reported here, the first one is also returned by the execution.
    fn on_error(&mut self, error: &Error) {
        let _ = error;
    }

    /// The execution finished and the connection is ready again.
    fn on_complete(&mut self) { }
}

/// Outcome of one statement of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Completed(CommandOutcome),
    /// The statement failed or was skipped after an earlier failure.
    NotExecuted,
}

impl BatchOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, BatchOutcome::Completed(_))
    }
}

/// Receives the results of a batch.
pub trait BatchResultHandler: ResultHandler {
    /// One outcome per batch entry, called before [`on_complete`][ResultHandler::on_complete].
    fn on_batch(&mut self, outcomes: &[BatchOutcome]);
}

impl ResultHandler for () {
    fn on_row(&mut self, _: Row) { }

    fn on_command(&mut self, _: CommandOutcome) { }
}

impl BatchResultHandler for () {
    fn on_batch(&mut self, _: &[BatchOutcome]) { }
}

impl<H: ResultHandler + ?Sized> ResultHandler for &mut H {
    fn on_fields(&mut self, shape: &RowShape) {
        H::on_fields(self, shape)
    }

    fn on_parameters(&mut self, oids: &[Oid]) {
        H::on_parameters(self, oids)
    }

    fn on_row(&mut self, row: Row) {
        H::on_row(self, row)
    }

    fn on_command(&mut self, outcome: CommandOutcome) {
        H::on_command(self, outcome)
    }

    fn on_cursor(&mut self, cursor: ResultCursor) {
        H::on_cursor(self, cursor)
    }

    fn on_warning(&mut self, warning: &DbError) {
        H::on_warning(self, warning)
    }

    fn on_error(&mut self, error: &Error) {
        H::on_error(self, error)
    }

    fn on_complete(&mut self) {
        H::on_complete(self)
    }
}

/// One result set collected by [`ResultCollector`].
#[derive(Debug, Default)]
pub struct ResultSet {
    pub shape: Option<RowShape>,
    pub rows: Vec<Row>,
    pub outcome: Option<CommandOutcome>,
}

/// A handler that keeps everything it receives.
#[derive(Debug, Default)]
pub struct ResultCollector {
    pub results: Vec<ResultSet>,
    pub parameters: Option<Vec<Oid>>,
    pub cursor: Option<ResultCursor>,
    pub warnings: Vec<DbError>,
    /// Display of every reported error.
    pub errors: Vec<String>,
    pub batch: Vec<BatchOutcome>,
    pub completed: bool,
}

impl ResultCollector {
    pub fn new() -> ResultCollector {
        Self::default()
    }

    /// Rows of every result set.
    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.results.iter().flat_map(|e| &e.rows)
    }

    /// Command outcomes in order.
    pub fn outcomes(&self) -> impl Iterator<Item = &CommandOutcome> {
        self.results.iter().filter_map(|e| e.outcome.as_ref())
    }

    fn current(&mut self) -> &mut ResultSet {
        match self.results.last() {
            Some(last) if last.outcome.is_none() => { },
            _ => self.results.push(ResultSet::default()),
        }
        let len = self.results.len();
        &mut self.results[len - 1]
    }
}

impl ResultHandler for ResultCollector {
    fn on_fields(&mut self, shape: &RowShape) {
        match self.results.last_mut() {
            Some(last) if last.outcome.is_none() && last.shape.is_none() && last.rows.is_empty() => {
                last.shape = Some(shape.clone());
            },
            _ => self.results.push(ResultSet { shape: Some(shape.clone()), ..Default::default() }),
        }
    }

    fn on_parameters(&mut self, oids: &[Oid]) {
        self.parameters = Some(oids.to_vec());
    }

    fn on_row(&mut self, row: Row) {
        self.current().rows.push(row);
    }

    fn on_command(&mut self, outcome: CommandOutcome) {
        self.current().outcome = Some(outcome);
    }

    fn on_cursor(&mut self, cursor: ResultCursor) {
        self.cursor = Some(cursor);
    }

    fn on_warning(&mut self, warning: &DbError) {
        self.warnings.push(warning.clone());
    }

    fn on_error(&mut self, error: &Error) {
        self.errors.push(error.to_string());
    }

    fn on_complete(&mut self) {
        self.completed = true;
    }
}

impl BatchResultHandler for ResultCollector {
    fn on_batch(&mut self, outcomes: &[BatchOutcome]) {
        self.batch = outcomes.to_vec();
    }
}
