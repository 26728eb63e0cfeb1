//! The [`Executor`] trait.
use bytes::Bytes;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    Result,
    engine::{FastpathArg, PgExecutor},
    error::Error,
    handler::{BatchResultHandler, ResultHandler},
    notify::Notification,
    options::QueryOptions,
    portal::ResultCursor,
    postgres::{DbError, Oid},
    query::{ParameterList, Query, QueryKey},
    registry::BinaryFormatRegistry,
    transaction::TransactionState,
};

/// A driver that executes queries over one connection.
///
/// Operations on one executor are sequential, each one runs to `ReadyForQuery` before the
/// next starts.
pub trait Executor {
    /// Borrow a query from the statement cache, see [`PgExecutor::borrow_query`].
    fn borrow_query(&mut self, key: QueryKey) -> Query;

    /// Return a borrowed query.
    fn release_query(&mut self, query: &Query) -> Result<()>;

    /// Execute one query, see [`PgExecutor::execute`].
    fn execute<H>(
        &mut self,
        query: &Query,
        params: &ParameterList,
        handler: &mut H,
        max_rows: u32,
        fetch_size: u32,
        options: QueryOptions,
    ) -> impl Future<Output = Result<()>>
    where
        H: ResultHandler + ?Sized;

    /// Execute queries as one batch, see [`PgExecutor::execute_batch`].
    fn execute_batch<H>(
        &mut self,
        queries: &[Query],
        params: &[ParameterList],
        handler: &mut H,
        max_rows: u32,
        options: QueryOptions,
    ) -> impl Future<Output = Result<()>>
    where
        H: BatchResultHandler + ?Sized;

    /// Fetch the next rows of an open cursor.
    fn fetch<H>(
        &mut self,
        cursor: &mut ResultCursor,
        fetch_size: u32,
        handler: &mut H,
    ) -> impl Future<Output = Result<()>>
    where
        H: ResultHandler + ?Sized;

    /// Close a cursor with the next round.
    fn close_cursor(&mut self, cursor: ResultCursor) -> Result<()>;

    /// Wait for notifications, see [`PgExecutor::process_notifications`].
    fn process_notifications(&mut self, wait: Option<Duration>) -> impl Future<Output = Result<()>>;

    fn take_notifications(&mut self) -> Vec<Notification>;

    fn take_warnings(&mut self) -> Vec<DbError>;

    fn transaction_state(&self) -> TransactionState;

    /// Whether re-executing after `err` is expected to succeed.
    fn will_heal_on_retry(&self, err: &Error) -> bool;

    fn registry(&self) -> &BinaryFormatRegistry;

    fn registry_mut(&mut self) -> &mut BinaryFormatRegistry;

    /// Terminate the session.
    fn close(&mut self) -> impl Future<Output = Result<()>>;
}

/// A driver that can call server functions directly.
pub trait Fastpath {
    /// Call a function by oid, see [`PgExecutor::fastpath_call`].
    fn fastpath_call(
        &mut self,
        function: Oid,
        args: &[FastpathArg],
        suppress_begin: bool,
    ) -> impl Future<Output = Result<Option<Bytes>>>;
}

impl<S> Executor for PgExecutor<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn borrow_query(&mut self, key: QueryKey) -> Query {
        PgExecutor::borrow_query(self, key)
    }

    fn release_query(&mut self, query: &Query) -> Result<()> {
        PgExecutor::release_query(self, query)
    }

    fn execute<H>(
        &mut self,
        query: &Query,
        params: &ParameterList,
        handler: &mut H,
        max_rows: u32,
        fetch_size: u32,
        options: QueryOptions,
    ) -> impl Future<Output = Result<()>>
    where
        H: ResultHandler + ?Sized,
    {
        PgExecutor::execute(self, query, params, handler, max_rows, fetch_size, options)
    }

    fn execute_batch<H>(
        &mut self,
        queries: &[Query],
        params: &[ParameterList],
        handler: &mut H,
        max_rows: u32,
        options: QueryOptions,
    ) -> impl Future<Output = Result<()>>
    where
        H: BatchResultHandler + ?Sized,
    {
        PgExecutor::execute_batch(self, queries, params, handler, max_rows, options)
    }

    fn fetch<H>(
        &mut self,
        cursor: &mut ResultCursor,
        fetch_size: u32,
        handler: &mut H,
    ) -> impl Future<Output = Result<()>>
    where
        H: ResultHandler + ?Sized,
    {
        PgExecutor::fetch(self, cursor, fetch_size, handler)
    }

    fn close_cursor(&mut self, cursor: ResultCursor) -> Result<()> {
        PgExecutor::close_cursor(self, cursor)
    }

    fn process_notifications(&mut self, wait: Option<Duration>) -> impl Future<Output = Result<()>> {
        PgExecutor::process_notifications(self, wait)
    }

    fn take_notifications(&mut self) -> Vec<Notification> {
        PgExecutor::take_notifications(self)
    }

    fn take_warnings(&mut self) -> Vec<DbError> {
        PgExecutor::take_warnings(self)
    }

    fn transaction_state(&self) -> TransactionState {
        PgExecutor::transaction_state(self)
    }

    fn will_heal_on_retry(&self, err: &Error) -> bool {
        PgExecutor::will_heal_on_retry(self, err)
    }

    fn registry(&self) -> &BinaryFormatRegistry {
        PgExecutor::registry(self)
    }

    fn registry_mut(&mut self) -> &mut BinaryFormatRegistry {
        PgExecutor::registry_mut(self)
    }

    fn close(&mut self) -> impl Future<Output = Result<()>> {
        PgExecutor::close(self)
    }
}

impl<S> Fastpath for PgExecutor<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn fastpath_call(
        &mut self,
        function: Oid,
        args: &[FastpathArg],
        suppress_begin: bool,
    ) -> impl Future<Output = Result<Option<Bytes>>> {
        PgExecutor::fastpath_call(self, function, args, suppress_begin)
    }
}
