//! The [`PgExecutor`], a query execution engine over one connection.
//!
//! The engine keeps a queue of replies it is waiting for, in the order the messages that
//! cause them were written. Every round ends with a `Sync` (or a simple `Query`), so the
//! engine always reads up to `ReadyForQuery` before returning, leaving the connection ready
//! for the next command.
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::watch,
    time::Instant,
};

use crate::{
    Result,
    cache::StatementCache,
    cancel::AbortHandle,
    common::{ByteStr, debug, verbose},
    config::Config,
    error::{ClosedError, Error, TimeoutError, UsageError},
    fetch::{AdaptiveFetch, AdaptiveFetchBounds, AdaptiveFetchEntry},
    notify::{Inbox, Notification},
    portal::OpenPortals,
    postgres::{BackendMessage, DbError, ProtocolError, backend, frontend},
    query::{Query, QueryArena, QueryKey, QueryRecord},
    registry::BinaryFormatRegistry,
    sql::Sql,
    statement::{PortalName, StatementName},
    stream::PgStream,
    transaction::{Autosave, TransactionState, heals_via_reparse},
    transport::{PgTransport, PgTransportExt},
};

mod send;
mod reply;
mod execute;
mod fastpath;
mod copy;

pub use fastpath::FastpathArg;
pub use copy::{CopyBoth, CopyIn, CopyOperation, CopyOut};

pub(crate) use send::{Exec, Pending};

static ENGINE_ID: AtomicU32 = AtomicU32::new(1);

/// Direction of an active copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CopyDirection {
    In,
    Out,
    Both,
}

/// Query execution engine over one established connection.
///
/// The socket must be past startup and authentication. Parameters reported during startup can
/// be handed over with [`set_parameter_status`][PgExecutor::set_parameter_status].
///
/// # Examples
///
/// ```no_run
/// use pgexec::{Config, PgExecutor, QueryKey, QueryOptions, ResultCollector};
///
/// # async fn app(socket: tokio::net::TcpStream) -> pgexec::Result<()> {
/// let mut engine = PgExecutor::new(socket, Config::default());
///
/// let query = engine.borrow_query(QueryKey::new("SELECT $1::int4 + 1"));
/// let mut params = query.create_parameter_list();
/// params.set_text(1, "41", pgexec::postgres::oid::INT4)?;
///
/// let mut rows = ResultCollector::new();
/// engine.execute(&query, &params, &mut rows, 0, 0, QueryOptions::new()).await?;
/// assert_eq!(rows.rows().next().unwrap().get_str(0).unwrap(), Some("42"));
///
/// engine.release_query(&query)?;
/// engine.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct PgExecutor<S> {
    id: u32,
    stream: PgStream<S>,
    config: Config,
    registry: BinaryFormatRegistry,

    arena: QueryArena,
    cache: StatementCache,
    /// Server side statements no longer referenced, closed with the next round.
    closes: Vec<StatementName>,
    portal_closes: Vec<PortalName>,
    name_counter: u32,

    pending: VecDeque<Pending>,
    execs: Vec<Exec>,

    portals: OpenPortals,
    adaptive: AdaptiveFetch,
    autosave: Autosave,
    state: TransactionState,

    inbox: Inbox,
    parameters: HashMap<ByteStr, ByteStr>,

    copy: Option<CopyDirection>,
    closed: bool,
    /// Messages were written and their `ReadyForQuery` is not read yet.
    in_round: bool,
    abort_tx: Arc<watch::Sender<bool>>,
    abort_rx: watch::Receiver<bool>,
}

impl<S> PgExecutor<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create an engine over an authenticated socket.
    pub fn new(socket: S, config: Config) -> Self {
        let registry = BinaryFormatRegistry::new(
            config.binary_send_oids.iter().copied(),
            config.binary_receive_oids.iter().copied(),
        );
        let (abort_tx, abort_rx) = watch::channel(false);
        Self {
            id: ENGINE_ID.fetch_add(1, Ordering::Relaxed),
            stream: PgStream::new(socket),
            registry,
            arena: QueryArena::default(),
            cache: StatementCache::new(config.statement_cache_size),
            closes: vec![],
            portal_closes: vec![],
            name_counter: 0,
            pending: VecDeque::new(),
            execs: vec![],
            portals: OpenPortals::default(),
            adaptive: AdaptiveFetch::new(AdaptiveFetchBounds::from_config(&config)),
            autosave: Autosave::new(config.autosave, config.cleanup_savepoints, config.max_savepoints),
            state: TransactionState::Idle,
            inbox: Inbox::default(),
            parameters: HashMap::new(),
            copy: None,
            closed: false,
            in_round: false,
            abort_tx: Arc::new(abort_tx),
            abort_rx,
            config,
        }
    }
}

impl<S> PgExecutor<S> {
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Types exchanged in binary.
    pub fn registry(&self) -> &BinaryFormatRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut BinaryFormatRegistry {
        &mut self.registry
    }

    /// Transaction state as of the last `ReadyForQuery`.
    pub fn transaction_state(&self) -> TransactionState {
        self.state
    }

    /// Last value the server reported for a run-time parameter.
    pub fn parameter_status(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(ByteStr::as_str)
    }

    /// Record a run-time parameter, e.g. one received during startup.
    pub fn set_parameter_status(&mut self, name: impl Into<ByteStr>, value: impl Into<ByteStr>) {
        self.parameters.insert(name.into(), value.into());
    }

    /// Returns `true` once the connection is unusable.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Returns `true` while a copy operation owns the connection.
    pub fn is_copy_active(&self) -> bool {
        self.copy.is_some()
    }

    /// Handle to force close this engine from another task.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle::new(self.abort_tx.clone())
    }

    /// Drain notices received outside of any handler.
    pub fn take_warnings(&mut self) -> Vec<DbError> {
        self.inbox.take_warnings()
    }

    /// Drain queued notifications, oldest first.
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        self.inbox.take_notifications()
    }

    /// Bounds every adaptive fetch size stays within.
    pub fn adaptive_fetch_bounds(&self) -> AdaptiveFetchBounds {
        self.adaptive.bounds()
    }

    /// Learned fetch size of an open cursor.
    pub fn adaptive_fetch_entry(&self, cursor: &crate::ResultCursor) -> Option<AdaptiveFetchEntry> {
        self.adaptive.get(&cursor.portal).copied()
    }

    /// Number of queries in the statement cache.
    pub fn cached_query_count(&self) -> usize {
        self.cache.len()
    }

    /// Number of live query records, cached or borrowed.
    pub fn query_count(&self) -> usize {
        self.arena.len()
    }

    /// Times `query` was executed, one-shot executions excluded.
    pub fn execute_count(&self, query: &Query) -> Result<u32> {
        Ok(self.record(query)?.execute_count)
    }

    /// Server side statement names of `query`, `None` for statements parsed unnamed.
    pub fn statement_names(&self, query: &Query) -> Result<Vec<Option<String>>> {
        let record = self.record(query)?;
        Ok(record.statements.iter().map(|e| e.name().map(|n| n.to_string())).collect())
    }

    /// Whether re-executing after `err` is expected to succeed.
    ///
    /// A statement that failed because its server side plan went stale heals by a fresh parse,
    /// unless the transaction already failed with no savepoint to return to.
    pub fn will_heal_on_retry(&self, err: &Error) -> bool {
        if matches!(self.config.autosave, crate::config::AutoSave::Never)
            && self.state == TransactionState::Failed
        {
            return false;
        }
        heals_via_reparse(err)
    }

    /// Look up a borrowed or created query.
    fn record(&self, query: &Query) -> Result<&QueryRecord, UsageError> {
        if query.engine != self.id {
            return Err(UsageError::ForeignQuery);
        }
        self.arena.get(query.slot).ok_or(UsageError::StaleQuery)
    }

    fn handle(&self, slot: crate::query::Slot) -> Query {
        let param_count = self.arena.get(slot).map_or(0, |e| e.parsed.param_count as u32);
        Query { engine: self.id, slot, param_count }
    }

    /// Borrow a query from the statement cache, parsing it on a miss.
    ///
    /// Identical keys share one record, and so share its server side statements. Every
    /// borrow must be balanced by [`release_query`][PgExecutor::release_query].
    pub fn borrow_query(&mut self, key: QueryKey) -> Query {
        let slot = self.cache.borrow(key, &mut self.arena, &mut self.closes);
        self.handle(slot)
    }

    /// Return a borrowed query.
    ///
    /// The record stays cached until evicted. Its server side statements are closed with the
    /// next round once it is neither cached nor borrowed.
    pub fn release_query(&mut self, query: &Query) -> Result<()> {
        self.record(query)?;
        if !self.cache.release(query.slot, &mut self.arena, &mut self.closes) {
            return Err(UsageError::StaleQuery.into());
        }
        Ok(())
    }

    /// Parse a query outside of the statement cache.
    pub fn create_query(&mut self, sql: impl Sql) -> Query {
        let key = QueryKey::new(sql.sql());
        let mut record = QueryRecord::new(&key);
        record.borrows = 1;
        let slot = self.arena.insert(record);
        self.handle(slot)
    }

    /// Drop a query made by [`create_query`][PgExecutor::create_query].
    pub fn close_query(&mut self, query: &Query) -> Result<()> {
        self.record(query)?;
        self.cache.release(query.slot, &mut self.arena, &mut self.closes);
        Ok(())
    }

    /// Forget every server side statement, they were dropped by the server.
    fn forget_statements(&mut self) {
        debug!("server dropped every prepared statement");
        self.arena.iter_mut().for_each(|e| {
            e.statements.iter_mut().for_each(|s| {
                s.prepared = Default::default();
                s.fields = None;
            });
        });
        self.closes.clear();
    }

    /// Reject use of an unusable or busy connection.
    ///
    /// A round left unfinished means a previous call was dropped before it read every reply,
    /// the stream position is unknown and the connection is closed.
    fn ensure_ready(&mut self) -> Result<(), Error> {
        if self.closed {
            return Err(ClosedError.into());
        }
        if self.copy.is_some() {
            return Err(UsageError::CopyInProgress.into());
        }
        if self.in_round || !self.pending.is_empty() {
            debug!("{} replies left unread by a cancelled call", self.pending.len());
            self.pending.clear();
            return Err(self.desync());
        }
        Ok(())
    }

    /// Replies and sent messages went out of step.
    pub(crate) fn desync(&mut self) -> Error {
        self.closed = true;
        ProtocolError::Desync.into()
    }
}

impl<S> PgExecutor<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn send<F: frontend::FrontendProtocol>(&mut self, message: F) {
        self.stream.send(message);
    }

    pub(crate) fn buffered(&self) -> usize {
        self.stream.buffered()
    }

    pub(crate) async fn flush(&mut self) -> Result<()> {
        self.in_round = true;
        if let Err(err) = self.stream.flush().await {
            self.closed = true;
            return Err(err.into());
        }
        Ok(())
    }

    /// Read the next message within the network timeout.
    pub(crate) async fn read_message(&mut self) -> Result<BackendMessage> {
        let timeout = self.config.network_timeout;
        self.read_message_within(timeout).await
    }

    /// Read the next message, handling the ones that may arrive at any time.
    ///
    /// `ParameterStatus` and `NotificationResponse` are consumed here. Every error is fatal and
    /// marks the connection closed.
    async fn read_message_within(&mut self, timeout: Option<Duration>) -> Result<BackendMessage> {
        loop {
            if self.closed {
                return Err(ClosedError.into());
            }

            let abort = &mut self.abort_rx;
            let stream = &mut self.stream;
            let result = tokio::select! {
                biased;
                _ = abort.wait_for(|aborted| *aborted) => {
                    Err(Error::from(ClosedError).context("aborted"))
                },
                result = recv_within(stream, timeout) => result,
            };

            let message = match result {
                Ok(message) => message,
                Err(err) => {
                    debug!("connection closed: {err}");
                    self.closed = true;
                    return Err(err);
                },
            };

            match message {
                BackendMessage::ParameterStatus(status) => {
                    verbose!(name = %status.name, value = %status.value, "parameter status");
                    self.parameters.insert(status.name, status.value);
                },
                BackendMessage::NotificationResponse(notification) => {
                    self.inbox.push_notification(notification.into());
                },
                message => return Ok(message),
            }
        }
    }

    /// Record a notice, returning it for handler delivery.
    pub(crate) fn on_notice(&mut self, notice: backend::NoticeResponse) -> Result<DbError> {
        let warning = DbError::parse(notice.body).inspect_err(|_| self.closed = true)?;
        self.inbox.push_warning(warning.clone());
        Ok(warning)
    }

    /// Turn an `ErrorResponse` into an error, closing the connection when it is fatal.
    pub(crate) fn on_error_response(&mut self, error: backend::ErrorResponse) -> Result<Error> {
        let err = Error::from(DbError::parse(error.body).inspect_err(|_| self.closed = true)?);
        if err.is_fatal() {
            self.closed = true;
        }
        Ok(err)
    }

    pub(crate) fn unexpected(&mut self, message: &BackendMessage, phase: &'static str) -> Error {
        self.closed = true;
        ProtocolError::unexpected_phase(message.msgtype(), phase).into()
    }

    /// Record the status of `ReadyForQuery`.
    pub(crate) fn on_ready(&mut self, ready: backend::ReadyForQuery) {
        self.in_round = false;
        self.state = ready.status;
        if self.state == TransactionState::Idle {
            // portals do not survive the end of a transaction
            for portal in self.portals.drain() {
                self.adaptive.remove(&portal);
            }
            self.portal_closes.clear();
            self.autosave.reset();
        }
    }

    /// Read until `ReadyForQuery`, keeping the first error.
    ///
    /// Used to recover from a copy or a call whose outcome is no longer of interest.
    pub(crate) async fn drain_until_ready(&mut self) -> Result<Option<Error>> {
        let mut first = None;
        loop {
            match self.read_message().await? {
                BackendMessage::ReadyForQuery(ready) => {
                    self.on_ready(ready);
                    return Ok(first);
                },
                BackendMessage::ErrorResponse(error) => {
                    let err = self.on_error_response(error)?;
                    if err.is_fatal() {
                        return Err(err);
                    }
                    first.get_or_insert(err);
                },
                BackendMessage::NoticeResponse(notice) => {
                    self.on_notice(notice)?;
                },
                _ => { },
            }
        }
    }

    /// Wait for notifications.
    ///
    /// With `Some(Duration::ZERO)` only messages that already arrived are processed and the
    /// call never blocks. With `None` the call waits until at least one notification arrived.
    /// Otherwise it returns after the first notification or once `wait` elapsed.
    ///
    /// Received notifications are queued, see [`take_notifications`][PgExecutor::take_notifications].
    pub async fn process_notifications(&mut self, wait: Option<Duration>) -> Result<()> {
        self.ensure_ready()?;

        let before = self.inbox.notification_count();
        let deadline = wait.map(|wait| Instant::now() + wait);

        loop {
            if self.inbox.notification_count() > before && !self.stream.has_buffered_message() {
                return Ok(());
            }

            let message = match deadline {
                None => self.read_message_within(None).await?,
                Some(deadline) => {
                    let read = self.read_message_within(None);
                    match tokio::time::timeout_at(deadline, read).await {
                        Ok(message) => message?,
                        Err(_) => return Ok(()),
                    }
                },
            };

            match message {
                BackendMessage::NoticeResponse(notice) => {
                    self.on_notice(notice)?;
                },
                BackendMessage::ErrorResponse(error) => {
                    // the server reports asynchronous errors only when terminating the session
                    self.closed = true;
                    return Err(self.on_error_response(error)?);
                },
                message => return Err(self.unexpected(&message, "process notifications")),
            }
        }
    }

    /// Send `Terminate` and shut the socket down.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream.send(frontend::Terminate);
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Drop the connection without `Terminate`.
    pub async fn abort(&mut self) {
        self.abort_tx.send_replace(true);
        self.closed = true;
        if let Err(_err) = self.stream.shutdown().await {
            debug!("shutdown after abort failed: {_err}");
        }
    }
}

async fn recv_within<S>(stream: &mut PgStream<S>, timeout: Option<Duration>) -> Result<BackendMessage>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, stream.recv())
            .await
            .map_err(|_| Error::from(TimeoutError))?,
        None => stream.recv().await,
    }
}
