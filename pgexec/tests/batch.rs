use pgexec::{BatchOutcome, Config, QueryKey, QueryOptions, ResultCollector, TransactionState, UsageError};

mod support;

use support::*;

#[tokio::test]
async fn batch_stops_at_first_failure() {
    let config = Config { prepare_threshold: 0, ..Default::default() };
    let (mut engine, mut backend) = pair(config);
    let insert = engine.borrow_query(QueryKey::new("INSERT INTO t VALUES($1)"));

    let mut queries = vec![];
    let mut params = vec![];
    for i in 0..5 {
        let mut list = insert.create_parameter_list();
        list.set_text(1, &i.to_string(), INT4).unwrap();
        queries.push(insert);
        params.push(list);
    }

    let mut collector = ResultCollector::new();
    let client = engine.execute_batch(&queries, &params, &mut collector, 0, QueryOptions::new());
    let server = async {
        let messages = backend.recv_until_sync().await;
        // BEGIN, then parse bind describe execute for each statement, in one round trip
        assert_eq!(messages.len(), 3 + 5 * 4 + 1);
        assert_eq!(messages[0].parse_sql(), Some("BEGIN"));
        assert_eq!(messages.iter().filter(|e| **e == Frontend::Sync).count(), 1);

        let mut replies = vec![parse_complete(), bind_complete(), command_complete("BEGIN")];
        for _ in 0..3 {
            replies.extend([parse_complete(), bind_complete(), no_data(), command_complete("INSERT 0 1")]);
        }
        replies.extend([
            parse_complete(),
            bind_complete(),
            no_data(),
            error("23505", "duplicate key value violates unique constraint"),
            ready(b'E'),
        ]);
        backend.send(&replies).await;
    };
    let (result, _) = tokio::join!(client, server);

    let err = result.unwrap_err();
    assert_eq!(err.sqlstate(), Some("23505"));
    assert_eq!(collector.batch.len(), 5);
    assert!(collector.batch[..3].iter().all(BatchOutcome::is_completed));
    assert!(collector.batch[3..].iter().all(|e| *e == BatchOutcome::NotExecuted));
    let BatchOutcome::Completed(outcome) = &collector.batch[0] else {
        unreachable!()
    };
    assert_eq!(outcome.rows, Some(1));
    assert_eq!(engine.transaction_state(), TransactionState::Failed);
    assert_eq!(collector.errors.len(), 1);
    assert!(collector.completed);
}

#[tokio::test]
async fn row_returning_statement_forces_sync() {
    let (mut engine, mut backend) = pair(Config::default());
    let first = engine.borrow_query(QueryKey::new("SELECT a FROM t"));
    let second = engine.borrow_query(QueryKey::new("SELECT b FROM t"));
    let params = [first.create_parameter_list(), second.create_parameter_list()];

    let mut collector = ResultCollector::new();
    let queries = [first, second];
    let client = engine.execute_batch(
        &queries,
        &params,
        &mut collector,
        0,
        QueryOptions::new().suppress_begin(true),
    );
    let server = async {
        for column in ["a", "b"] {
            let messages = backend.recv_until_sync().await;
            assert_eq!(messages.len(), 5);
            assert_eq!(messages[0].parse_sql(), Some(format!("SELECT {column} FROM t").as_str()));
            backend.send(&[
                parse_complete(),
                bind_complete(),
                row_description(&[(column, TEXT)]),
                data_row(&[Some("1")]),
                command_complete("SELECT 1"),
                ready(b'I'),
            ]).await;
        }
    };
    let (result, _) = tokio::join!(client, server);
    result.unwrap();

    assert!(collector.batch.iter().all(BatchOutcome::is_completed));
    // batch rows are not delivered unless asked for
    assert_eq!(collector.rows().count(), 0);
}

#[tokio::test]
async fn rows_and_status_delivers_rows() {
    let (mut engine, mut backend) = pair(Config::default());
    let query = engine.borrow_query(QueryKey::new("SELECT a FROM t"));
    let params = [query.create_parameter_list()];

    let mut collector = ResultCollector::new();
    let options = QueryOptions::new().suppress_begin(true).both_rows_and_status(true);
    let queries = [query];
    let client = engine.execute_batch(&queries, &params, &mut collector, 0, options);
    let server = async {
        backend.recv_until_sync().await;
        backend.send(&[
            parse_complete(),
            bind_complete(),
            row_description(&[("a", TEXT)]),
            data_row(&[Some("1")]),
            data_row(&[Some("2")]),
            command_complete("SELECT 2"),
            ready(b'I'),
        ]).await;
    };
    let (result, _) = tokio::join!(client, server);
    result.unwrap();
    assert_eq!(collector.rows().count(), 2);
    assert_eq!(collector.outcomes().next().unwrap().rows, Some(2));
}

#[tokio::test]
async fn batch_arguments_are_checked() {
    let (mut engine, _backend) = pair(Config::default());
    let query = engine.borrow_query(QueryKey::new("SELECT 1"));

    let mut collector = ResultCollector::new();
    let err = engine
        .execute_batch(&[query, query], &[query.create_parameter_list()], &mut collector, 0, QueryOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.as_usage(), Some(&UsageError::BatchLength { queries: 2, params: 1 }));

    let err = engine
        .execute_batch(
            &[query],
            &[query.create_parameter_list()],
            &mut collector,
            0,
            QueryOptions::new().forward_cursor(true),
        )
        .await
        .unwrap_err();
    assert!(matches!(err.as_usage(), Some(UsageError::InvalidOptions(_))));

    // nothing to send
    engine.execute_batch(&[], &[], &mut collector, 0, QueryOptions::new()).await.unwrap();
    assert!(collector.batch.is_empty());
    assert!(collector.completed);
}

#[tokio::test]
async fn large_batch_is_split_into_rounds() {
    let config = Config { prepare_threshold: 0, ..Default::default() };
    let (mut engine, mut backend) = pair(config);
    let update = engine.borrow_query(QueryKey::new("UPDATE t SET n = n + 1"));
    let queries = vec![update; 300];
    let params: Vec<_> = queries.iter().map(|e| e.create_parameter_list()).collect();

    let mut collector = ResultCollector::new();
    let client = engine.execute_batch(&queries, &params, &mut collector, 0, QueryOptions::new().suppress_begin(true));
    let server = async {
        let mut executed = 0;
        let mut rounds = vec![];
        while executed < 300 {
            let messages = backend.recv_until_sync().await;
            let mut replies = vec![];
            let mut in_round = 0;
            for message in &messages {
                match message {
                    Frontend::Parse { .. } => replies.push(parse_complete()),
                    Frontend::Bind { .. } => replies.push(bind_complete()),
                    Frontend::Describe { .. } => replies.push(no_data()),
                    Frontend::Execute { .. } => {
                        // the row count tells statements apart
                        replies.push(command_complete(&format!("UPDATE {executed}")));
                        executed += 1;
                        in_round += 1;
                    },
                    Frontend::Sync => replies.push(ready(b'I')),
                    message => panic!("unexpected {message:?}"),
                }
            }
            assert_eq!(messages.iter().filter(|e| **e == Frontend::Sync).count(), 1);
            backend.send(&replies).await;
            rounds.push(in_round);
        }
        rounds
    };
    let (result, rounds) = tokio::join!(client, server);
    result.unwrap();

    assert!(rounds.len() > 1, "{rounds:?}");
    assert_eq!(rounds.iter().sum::<usize>(), 300);
    assert_eq!(collector.batch.len(), 300);
    for (i, outcome) in collector.batch.iter().enumerate() {
        let BatchOutcome::Completed(outcome) = outcome else {
            panic!("statement {i} not executed");
        };
        assert_eq!(outcome.rows, Some(i as u64));
    }
}
