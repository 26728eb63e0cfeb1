use std::time::Duration;

use pgexec::{
    BatchOutcome, CommandOutcome, QueryKey, QueryOptions, Result, ResultCollector, ResultHandler,
    Row, TransactionState,
    postgres::oid,
};

use crate::connection::connect;

/// Prints rows as they arrive.
#[derive(Default)]
struct Printer {
    rows: usize,
}

impl ResultHandler for Printer {
    fn on_row(&mut self, row: Row) {
        self.rows += 1;
        let name = row.get_str(1).ok().flatten().unwrap_or("NULL");
        tracing::info!(row = self.rows, name, "row");
    }

    fn on_command(&mut self, outcome: CommandOutcome) {
        tracing::info!(tag = %outcome.tag, "command");
    }
}

pub async fn main() -> Result<()> {
    let (mut engine, _token) = connect().await?;

    // Execute

    let create = engine.borrow_query(QueryKey::new("CREATE TEMP TABLE pgexec(id serial, name text)"));
    let mut sink = ResultCollector::new();
    engine.execute(&create, &create.create_parameter_list(), &mut sink, 0, 0, QueryOptions::new()).await?;
    engine.release_query(&create)?;

    assert_eq!(engine.transaction_state(), TransactionState::Open);

    // Batch, the insert is prepared once it crosses the prepare threshold

    let insert = engine.borrow_query(QueryKey::new("INSERT INTO pgexec(name) VALUES($1)"));
    let mut queries = vec![];
    let mut params = vec![];
    for id in 0..24 {
        let mut list = insert.create_parameter_list();
        list.set_text(1, &format!("row{id}"), oid::TEXT)?;
        queries.push(insert);
        params.push(list);
    }
    let mut sink = ResultCollector::new();
    engine.execute_batch(&queries, &params, &mut sink, 0, QueryOptions::new()).await?;
    assert!(sink.batch.iter().all(BatchOutcome::is_completed));
    engine.release_query(&insert)?;

    // Forward cursor

    let select = engine.borrow_query(QueryKey::new("SELECT id, name FROM pgexec ORDER BY id"));
    let mut printer = Printer::default();
    let mut sink = ResultCollector::new();
    let options = QueryOptions::new().forward_cursor(true);
    engine.execute(&select, &select.create_parameter_list(), &mut sink, 0, 10, options).await?;
    engine.release_query(&select)?;

    if let Some(mut cursor) = sink.cursor.take() {
        while !cursor.is_exhausted() {
            engine.fetch(&mut cursor, 0, &mut printer).await?;
        }
    }
    assert_eq!(sink.rows().count() + printer.rows, 24);

    // Error case, the transaction fails and the connection stays usable

    let missing = engine.borrow_query(QueryKey::new("SELECT foo"));
    let err = engine
        .execute(&missing, &missing.create_parameter_list(), &mut ResultCollector::new(), 0, 0, QueryOptions::new())
        .await
        .unwrap_err();
    tracing::info!(sqlstate = ?err.sqlstate(), "expected failure");
    assert_eq!(engine.transaction_state(), TransactionState::Failed);

    let rollback = engine.borrow_query(QueryKey::new("ROLLBACK"));
    let mut sink = ResultCollector::new();
    engine.execute(&rollback, &rollback.create_parameter_list(), &mut sink, 0, 0, QueryOptions::new()).await?;
    assert_eq!(engine.transaction_state(), TransactionState::Idle);

    // Notifications

    let listen = engine.borrow_query(QueryKey::new("LISTEN pgexec; NOTIFY pgexec, 'hello'"));
    let mut sink = ResultCollector::new();
    let options = QueryOptions::new().suppress_begin(true).execute_as_simple(true);
    engine.execute(&listen, &listen.create_parameter_list(), &mut sink, 0, 0, options).await?;
    engine.process_notifications(Some(Duration::from_secs(1))).await?;
    for notification in engine.take_notifications() {
        tracing::info!(channel = %notification.channel, payload = %notification.payload, "notification");
    }

    engine.close().await?;
    Ok(())
}
