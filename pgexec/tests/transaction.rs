use pgexec::{AutoSave, Config, Executor, QueryKey, QueryOptions, ResultCollector, TransactionState};

mod support;

use support::*;

#[tokio::test]
async fn autosave_rolls_back_failed_statement() {
    let config = Config { autosave: AutoSave::Always, ..Default::default() };
    let (mut engine, mut backend) = pair(config);
    let query = engine.borrow_query(QueryKey::new("INSERT INTO t VALUES(1)"));
    let params = query.create_parameter_list();

    // idle, no savepoint yet
    let mut sink = ResultCollector::new();
    let client = engine.execute(&query, &params, &mut sink, 0, 0, QueryOptions::new());
    let server = async {
        let messages = backend.recv_until_sync().await;
        assert_eq!(messages[0].parse_sql(), Some("BEGIN"));
        assert!(messages.iter().all(|e| e.parse_sql() != Some("SAVEPOINT PGEXEC_AUTOSAVE")));
        backend.send(&[
            parse_complete(),
            bind_complete(),
            command_complete("BEGIN"),
            parse_complete(),
            bind_complete(),
            no_data(),
            command_complete("INSERT 0 1"),
            ready(b'T'),
        ]).await;
    };
    let (result, _) = tokio::join!(client, server);
    result.unwrap();
    assert_eq!(engine.transaction_state(), TransactionState::Open);

    let mut sink = ResultCollector::new();
    let client = engine.execute(&query, &params, &mut sink, 0, 0, QueryOptions::new());
    let server = async {
        let messages = backend.recv_until_sync().await;
        assert_eq!(messages[0].parse_sql(), Some("SAVEPOINT PGEXEC_AUTOSAVE"));
        assert_eq!(messages[3].parse_sql(), Some("INSERT INTO t VALUES(1)"));
        backend.send(&[
            parse_complete(),
            bind_complete(),
            command_complete("SAVEPOINT"),
            parse_complete(),
            bind_complete(),
            error("23505", "duplicate key value violates unique constraint"),
            ready(b'E'),
        ]).await;

        assert_eq!(backend.recv_query().await, "ROLLBACK TO SAVEPOINT PGEXEC_AUTOSAVE");
        backend.reply_command("ROLLBACK", b'T').await;
    };
    let (result, _) = tokio::join!(client, server);

    let err = result.unwrap_err();
    assert_eq!(err.sqlstate(), Some("23505"));
    assert_eq!(engine.transaction_state(), TransactionState::Open);
    assert_eq!(sink.errors.len(), 1);
    assert!(!engine.will_heal_on_retry(&err));
}

#[tokio::test]
async fn autosave_is_skipped_for_suppressed_transactions() {
    let config = Config { autosave: AutoSave::Always, ..Default::default() };
    let (mut engine, mut backend) = pair(config);
    let query = engine.borrow_query(QueryKey::new("SELECT 1"));
    let params = query.create_parameter_list();

    let mut sink = ResultCollector::new();
    let client = engine.execute(&query, &params, &mut sink, 0, 0, QueryOptions::new().suppress_begin(true));
    let server = async {
        let messages = backend.recv_until_sync().await;
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0].parse_sql(), Some("SELECT 1"));
        backend.send(&[
            parse_complete(),
            bind_complete(),
            row_description(&[("?column?", TEXT)]),
            data_row(&[Some("1")]),
            command_complete("SELECT 1"),
            ready(b'I'),
        ]).await;
    };
    let (result, _) = tokio::join!(client, server);
    result.unwrap();
    assert_eq!(engine.transaction_state(), TransactionState::Idle);
}

#[tokio::test]
async fn stale_statement_heals_unless_transaction_failed() {
    let (mut engine, mut backend) = pair(Config::default());
    let query = engine.borrow_query(QueryKey::new("SELECT * FROM t"));
    let params = query.create_parameter_list();

    let mut sink = ResultCollector::new();
    let client = engine.execute(&query, &params, &mut sink, 0, 0, QueryOptions::new().suppress_begin(true));
    let server = async {
        backend.recv_until_sync().await;
        backend.send(&[error("26000", "prepared statement \"S_1\" does not exist"), ready(b'I')]).await;
    };
    let (result, _) = tokio::join!(client, server);
    let err = result.unwrap_err();
    assert!(Executor::will_heal_on_retry(&engine, &err));

    // inside a failed transaction without savepoints nothing heals
    let begin = engine.borrow_query(QueryKey::new("BEGIN"));
    let begin_params = begin.create_parameter_list();
    let mut sink = ResultCollector::new();
    let client = engine.execute(&begin, &begin_params, &mut sink, 0, 0, QueryOptions::new());
    let server = async {
        let messages = backend.recv_until_sync().await;
        // an explicit BEGIN is not preceded by another
        assert_eq!(messages.iter().filter(|e| e.parse_sql() == Some("BEGIN")).count(), 1);
        backend.send(&[parse_complete(), bind_complete(), no_data(), command_complete("BEGIN"), ready(b'T')]).await;
    };
    let (result, _) = tokio::join!(client, server);
    result.unwrap();

    let mut sink = ResultCollector::new();
    let client = engine.execute(&query, &params, &mut sink, 0, 0, QueryOptions::new());
    let server = async {
        backend.recv_until_sync().await;
        backend.send(&[error("26000", "prepared statement \"S_1\" does not exist"), ready(b'E')]).await;
    };
    let (result, _) = tokio::join!(client, server);
    let err = result.unwrap_err();
    assert_eq!(engine.transaction_state(), TransactionState::Failed);
    assert!(!engine.will_heal_on_retry(&err));
}

#[tokio::test]
async fn commit_and_rollback_get_no_savepoint() {
    let config = Config { autosave: AutoSave::Always, cleanup_savepoints: true, ..Default::default() };
    let (mut engine, mut backend) = pair(config);

    for end in ["COMMIT", "ROLLBACK"] {
        let query = engine.borrow_query(QueryKey::new("INSERT INTO t VALUES(1)"));
        let params = query.create_parameter_list();
        let mut sink = ResultCollector::new();
        let client = engine.execute(&query, &params, &mut sink, 0, 0, QueryOptions::new());
        let server = async {
            let messages = backend.recv_until_sync().await;
            assert_eq!(messages[0].parse_sql(), Some("BEGIN"));
            backend.send(&[
                parse_complete(),
                bind_complete(),
                command_complete("BEGIN"),
                parse_complete(),
                bind_complete(),
                no_data(),
                command_complete("INSERT 0 1"),
                ready(b'T'),
            ]).await;
        };
        let (result, _) = tokio::join!(client, server);
        result.unwrap();
        assert_eq!(engine.transaction_state(), TransactionState::Open);

        let query = engine.borrow_query(QueryKey::new(end));
        let params = query.create_parameter_list();
        let mut sink = ResultCollector::new();
        let client = engine.execute(&query, &params, &mut sink, 0, 0, QueryOptions::new());
        let server = async {
            let messages = backend.recv_until_sync().await;
            let statements: Vec<_> = messages.iter().filter_map(|e| e.parse_sql()).collect();
            assert_eq!(statements, [end]);
            backend.send(&[
                parse_complete(),
                bind_complete(),
                no_data(),
                command_complete(end),
                ready(b'I'),
            ]).await;
        };
        let (result, _) = tokio::join!(client, server);
        result.unwrap();
        assert_eq!(engine.transaction_state(), TransactionState::Idle);
    }
}

#[tokio::test]
async fn batch_with_commit_gets_no_savepoint() {
    let config = Config { autosave: AutoSave::Always, cleanup_savepoints: true, ..Default::default() };
    let (mut engine, mut backend) = pair(config);

    let begin = engine.borrow_query(QueryKey::new("BEGIN"));
    let params = begin.create_parameter_list();
    let mut sink = ResultCollector::new();
    let client = engine.execute(&begin, &params, &mut sink, 0, 0, QueryOptions::new());
    let server = async {
        backend.recv_until_sync().await;
        backend.send(&[parse_complete(), bind_complete(), no_data(), command_complete("BEGIN"), ready(b'T')]).await;
    };
    let (result, _) = tokio::join!(client, server);
    result.unwrap();

    let queries = [
        engine.borrow_query(QueryKey::new("UPDATE t SET n = 1")),
        engine.borrow_query(QueryKey::new("COMMIT")),
    ];
    let params = [queries[0].create_parameter_list(), queries[1].create_parameter_list()];
    let mut sink = ResultCollector::new();
    let client = engine.execute_batch(&queries, &params, &mut sink, 0, QueryOptions::new());
    let server = async {
        let messages = backend.recv_until_sync().await;
        let statements: Vec<_> = messages.iter().filter_map(|e| e.parse_sql()).collect();
        assert_eq!(statements, ["UPDATE t SET n = 1", "COMMIT"]);
        backend.send(&[
            parse_complete(),
            bind_complete(),
            no_data(),
            command_complete("UPDATE 1"),
            parse_complete(),
            bind_complete(),
            no_data(),
            command_complete("COMMIT"),
            ready(b'I'),
        ]).await;
    };
    let (result, _) = tokio::join!(client, server);
    result.unwrap();
    assert_eq!(engine.transaction_state(), TransactionState::Idle);
}
