//! Postgres query execution engine.
//!
//! [`PgExecutor`] drives the frontend/backend protocol over an authenticated connection:
//! statement preparation and caching, parameter binding, result delivery to a
//! [`ResultHandler`], batching, cursors with adaptive fetch sizes, transaction bookkeeping
//! with automatic savepoints, bulk copy, fastpath calls and notifications.
//!
//! # Examples
//!
//! ```no_run
//! use pgexec::{Config, PgExecutor, QueryKey, QueryOptions, ResultCollector};
//!
//! # async fn app(socket: tokio::net::TcpStream) -> pgexec::Result<()> {
//! let mut engine = PgExecutor::new(socket, Config::from_env()?);
//!
//! let query = engine.borrow_query(QueryKey::new("SELECT 420, $1::text"));
//! let mut params = query.create_parameter_list();
//! params.set_text(1, "Foo", pgexec::postgres::oid::TEXT)?;
//!
//! let mut rows = ResultCollector::new();
//! engine.execute(&query, &params, &mut rows, 0, 0, QueryOptions::new()).await?;
//! engine.release_query(&query)?;
//!
//! let row = rows.rows().next().unwrap();
//! assert_eq!(row.get_str(0)?, Some("420"));
//! assert_eq!(row.get_str(1)?, Some("Foo"));
//! # Ok(())
//! # }
//! ```
//!
//! Batching:
//!
//! ```no_run
//! use pgexec::{BatchOutcome, PgExecutor, QueryKey, QueryOptions, ResultCollector};
//!
//! # async fn app(mut engine: PgExecutor<tokio::net::TcpStream>) -> pgexec::Result<()> {
//! let insert = engine.borrow_query(QueryKey::new("INSERT INTO foo(id) VALUES($1::int4)"));
//!
//! let mut queries = vec![];
//! let mut params = vec![];
//! for i in 0..14 {
//!     let mut list = insert.create_parameter_list();
//!     list.set_text(1, &i.to_string(), pgexec::postgres::oid::INT4)?;
//!     queries.push(insert);
//!     params.push(list);
//! }
//!
//! let mut collector = ResultCollector::new();
//! engine.execute_batch(&queries, &params, &mut collector, 0, QueryOptions::new()).await?;
//! assert!(collector.batch.iter().all(BatchOutcome::is_completed));
//!
//! engine.release_query(&insert)?;
//! # Ok(())
//! # }
//! ```

pub mod common;
mod ext;

// Protocol
pub mod postgres;
mod stream;
pub mod transport;

// Component
pub mod sql;
mod statement;
mod query;
mod cache;
mod registry;
mod options;
pub mod row;
mod handler;

// Operation
mod portal;
mod fetch;
mod transaction;
mod notify;
mod cancel;
mod engine;
pub mod executor;

mod config;
mod error;


pub use config::{AutoSave, Config, ParseError, QueryMode};
pub use error::{ClosedError, Error, ErrorKind, Result, TimeoutError, UsageError};

pub use registry::BinaryFormatRegistry;
pub use options::QueryOptions;
pub use query::{Param, ParameterList, Query, QueryKey};
pub use row::{CommandOutcome, FieldDescription, Row, RowShape};
pub use handler::{BatchOutcome, BatchResultHandler, ResultCollector, ResultHandler, ResultSet};

pub use portal::ResultCursor;
pub use fetch::{AdaptiveFetchBounds, AdaptiveFetchEntry};
pub use transaction::{AUTOSAVE_NAME, TransactionState, heals_via_reparse};
pub use notify::Notification;
pub use cancel::{AbortHandle, CancelToken};
pub use stream::PgStream;

pub use engine::{CopyBoth, CopyIn, CopyOperation, CopyOut, FastpathArg, PgExecutor};
pub use executor::{Executor, Fastpath};
