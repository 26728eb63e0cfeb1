use pgexec::{Config, ErrorKind, QueryKey, QueryMode, QueryOptions, ResultCollector, TransactionState, UsageError};

mod support;

use support::*;

fn no_begin() -> QueryOptions {
    QueryOptions::new().suppress_begin(true)
}

#[tokio::test]
async fn extended_select_with_parameter() {
    let (mut engine, mut backend) = pair(Config::default());
    let query = engine.borrow_query(QueryKey::new("SELECT $1::text"));
    let mut params = query.create_parameter_list();
    params.set_text(1, "Foo", TEXT).unwrap();
    let mut rows = ResultCollector::new();

    let client = engine.execute(&query, &params, &mut rows, 0, 0, no_begin());
    let server = async {
        let messages = backend.recv_until_sync().await;
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0], Frontend::Parse { name: "".into(), sql: "SELECT $1::text".into(), oids: vec![TEXT] });
        let Frontend::Bind { portal, statement, params, .. } = &messages[1] else {
            panic!("expected Bind, got {:?}", messages[1]);
        };
        assert_eq!((portal.as_str(), statement.as_str()), ("", ""));
        assert_eq!(params, &[Some(b"Foo".to_vec())]);
        assert_eq!(messages[2], Frontend::Describe { kind: b'P', name: "".into() });
        assert_eq!(messages[3], Frontend::Execute { portal: "".into(), max_rows: 0 });

        backend.send(&[
            parse_complete(),
            bind_complete(),
            row_description(&[("text", TEXT)]),
            data_row(&[Some("Foo")]),
            command_complete("SELECT 1"),
            ready(b'I'),
        ]).await;
    };
    let (result, _) = tokio::join!(client, server);
    result.unwrap();

    assert!(rows.completed);
    let row = rows.rows().next().unwrap();
    assert_eq!(row.get_str(0).unwrap(), Some("Foo"));
    assert_eq!(rows.results[0].shape.as_ref().unwrap().len(), 1);
    assert_eq!(rows.outcomes().next().unwrap().rows, Some(1));
    assert_eq!(engine.transaction_state(), TransactionState::Idle);
    engine.release_query(&query).unwrap();
}

#[tokio::test]
async fn begin_precedes_first_statement_unless_suppressed() {
    let (mut engine, mut backend) = pair(Config::default());
    let query = engine.borrow_query(QueryKey::new("UPDATE t SET a = 1"));
    let params = query.create_parameter_list();

    let mut rows = ResultCollector::new();
    let client = engine.execute(&query, &params, &mut rows, 0, 0, QueryOptions::new());
    let server = async {
        let messages = backend.recv_until_sync().await;
        assert_eq!(messages[0].parse_sql(), Some("BEGIN"));
        assert!(matches!(messages[1], Frontend::Bind { .. }));
        assert!(matches!(messages[2], Frontend::Execute { .. }));
        assert_eq!(messages[3].parse_sql(), Some("UPDATE t SET a = 1"));

        backend.send(&[
            parse_complete(),
            bind_complete(),
            command_complete("BEGIN"),
            parse_complete(),
            bind_complete(),
            no_data(),
            command_complete("UPDATE 2"),
            ready(b'T'),
        ]).await;
    };
    let (result, _) = tokio::join!(client, server);
    result.unwrap();
    assert_eq!(engine.transaction_state(), TransactionState::Open);
    assert_eq!(rows.outcomes().next().unwrap().rows, Some(2));

    // already inside a transaction
    let mut rows = ResultCollector::new();
    let client = engine.execute(&query, &params, &mut rows, 0, 0, QueryOptions::new());
    let server = async {
        let messages = backend.recv_until_sync().await;
        assert!(messages.iter().all(|e| e.parse_sql() != Some("BEGIN")));
        backend.send(&[
            parse_complete(),
            bind_complete(),
            command_complete("UPDATE 2"),
            ready(b'T'),
        ]).await;
    };
    let (result, _) = tokio::join!(client, server);
    result.unwrap();
}

#[tokio::test]
async fn suppressed_begin_sends_no_begin() {
    let (mut engine, mut backend) = pair(Config::default());
    let query = engine.borrow_query(QueryKey::new("DELETE FROM t"));
    let params = query.create_parameter_list();

    let mut rows = ResultCollector::new();
    let client = engine.execute(&query, &params, &mut rows, 0, 0, no_begin());
    let server = async {
        let messages = backend.recv_until_sync().await;
        assert!(messages.iter().all(|e| e.parse_sql() != Some("BEGIN")));
        backend.send(&[
            parse_complete(),
            bind_complete(),
            no_data(),
            command_complete("DELETE 0"),
            ready(b'I'),
        ]).await;
    };
    let (result, _) = tokio::join!(client, server);
    result.unwrap();
    assert_eq!(engine.transaction_state(), TransactionState::Idle);
}

#[tokio::test]
async fn prepare_threshold_promotes_to_named_statement() {
    let config = Config { prepare_threshold: 2, ..Default::default() };
    let (mut engine, mut backend) = pair(config);
    let query = engine.borrow_query(QueryKey::new("SELECT name FROM t"));
    let params = query.create_parameter_list();

    // first execution parses the unnamed statement
    let mut rows = ResultCollector::new();
    let client = engine.execute(&query, &params, &mut rows, 0, 0, no_begin());
    let server = async {
        let messages = backend.recv_until_sync().await;
        assert_eq!(messages[0], Frontend::Parse { name: "".into(), sql: "SELECT name FROM t".into(), oids: vec![] });
        backend.send(&[
            parse_complete(),
            bind_complete(),
            row_description(&[("name", TEXT)]),
            data_row(&[Some("a")]),
            command_complete("SELECT 1"),
            ready(b'I'),
        ]).await;
    };
    let (result, _) = tokio::join!(client, server);
    result.unwrap();
    assert_eq!(engine.statement_names(&query).unwrap(), [None]);

    // second execution reaches the threshold
    let mut rows = ResultCollector::new();
    let client = engine.execute(&query, &params, &mut rows, 0, 0, no_begin());
    let server = async {
        let messages = backend.recv_until_sync().await;
        let Frontend::Parse { name, .. } = &messages[0] else {
            panic!("expected Parse, got {:?}", messages[0]);
        };
        assert!(!name.is_empty());
        assert_eq!(messages[1], Frontend::Describe { kind: b'S', name: name.clone() });
        let Frontend::Bind { statement, .. } = &messages[2] else {
            panic!("expected Bind, got {:?}", messages[2]);
        };
        assert_eq!(statement, name);
        backend.send(&[
            parse_complete(),
            parameter_description(&[]),
            row_description(&[("name", TEXT)]),
            bind_complete(),
            data_row(&[Some("a")]),
            command_complete("SELECT 1"),
            ready(b'I'),
        ]).await;
        name.clone()
    };
    let (result, name) = tokio::join!(client, server);
    result.unwrap();
    assert_eq!(rows.rows().count(), 1);
    assert_eq!(engine.statement_names(&query).unwrap(), [Some(name.clone())]);

    // third execution reuses the named statement without parsing
    let mut rows = ResultCollector::new();
    let client = engine.execute(&query, &params, &mut rows, 0, 0, no_begin());
    let server = async {
        let messages = backend.recv_until_sync().await;
        assert!(messages.iter().all(|e| !matches!(e, Frontend::Parse { .. } | Frontend::Describe { .. })));
        let Frontend::Bind { statement, .. } = &messages[0] else {
            panic!("expected Bind, got {:?}", messages[0]);
        };
        assert_eq!(statement, &name);
        backend.send(&[
            bind_complete(),
            data_row(&[Some("a")]),
            command_complete("SELECT 1"),
            ready(b'I'),
        ]).await;
    };
    let (result, _) = tokio::join!(client, server);
    result.unwrap();
    assert_eq!(rows.results[0].shape.as_ref().unwrap()[0].name, "name");
    assert_eq!(engine.execute_count(&query).unwrap(), 3);
}

#[tokio::test]
async fn one_shot_never_promotes() {
    let config = Config { prepare_threshold: 1, ..Default::default() };
    let (mut engine, mut backend) = pair(config);
    let query = engine.borrow_query(QueryKey::new("SELECT 1"));
    let params = query.create_parameter_list();

    for i in 0..3 {
        let mut rows = ResultCollector::new();
        let client = engine.execute(&query, &params, &mut rows, 0, 0, no_begin().one_shot(true));
        let server = async {
            let messages = backend.recv_until_sync().await;
            assert_eq!(messages[0], Frontend::Parse { name: "".into(), sql: "SELECT 1".into(), oids: vec![] });
            let mut replies = vec![parse_complete(), bind_complete()];
            // the row shape is remembered after the first portal describe
            if i == 0 {
                replies.push(row_description(&[("?column?", TEXT)]));
            }
            replies.extend([data_row(&[Some("1")]), command_complete("SELECT 1"), ready(b'I')]);
            backend.send(&replies).await;
        };
        let (result, _) = tokio::join!(client, server);
        result.unwrap();
    }

    assert_eq!(engine.statement_names(&query).unwrap(), [None]);
    assert_eq!(engine.execute_count(&query).unwrap(), 0);
}

#[tokio::test]
async fn statement_cache_shares_and_evicts() {
    let config = Config { prepare_threshold: 1, statement_cache_size: 1, ..Default::default() };
    let (mut engine, mut backend) = pair(config);

    let a = engine.borrow_query(QueryKey::new("SELECT 1"));
    let again = engine.borrow_query(QueryKey::new("SELECT 1"));
    assert_eq!(a, again);
    assert_eq!(engine.cached_query_count(), 1);
    engine.release_query(&again).unwrap();

    let params = a.create_parameter_list();
    let mut rows = ResultCollector::new();
    let client = engine.execute(&a, &params, &mut rows, 0, 0, no_begin());
    let server = async {
        let messages = backend.recv_until_sync().await;
        let Frontend::Parse { name, .. } = &messages[0] else {
            panic!("expected Parse, got {:?}", messages[0]);
        };
        backend.send(&[
            parse_complete(),
            parameter_description(&[]),
            row_description(&[("?column?", TEXT)]),
            bind_complete(),
            data_row(&[Some("1")]),
            command_complete("SELECT 1"),
            ready(b'I'),
        ]).await;
        name.clone()
    };
    let (result, name) = tokio::join!(client, server);
    result.unwrap();
    engine.release_query(&a).unwrap();
    assert!(engine.release_query(&a).is_err());

    // capacity one, `a` is evicted and its statement closed with the next round
    let b = engine.borrow_query(QueryKey::new("SELECT 2"));
    assert_eq!(engine.query_count(), 1);
    let stale = engine.execute_count(&a).unwrap_err();
    assert_eq!(stale.as_usage(), Some(&UsageError::StaleQuery));

    let params = b.create_parameter_list();
    let mut rows = ResultCollector::new();
    let client = engine.execute(&b, &params, &mut rows, 0, 0, no_begin());
    let server = async {
        let messages = backend.recv_until_sync().await;
        assert_eq!(messages[0], Frontend::Close { kind: b'S', name });
        backend.send(&[
            close_complete(),
            parse_complete(),
            parameter_description(&[]),
            row_description(&[("?column?", TEXT)]),
            bind_complete(),
            data_row(&[Some("2")]),
            command_complete("SELECT 1"),
            ready(b'I'),
        ]).await;
    };
    let (result, _) = tokio::join!(client, server);
    result.unwrap();
    assert_eq!(rows.rows().next().unwrap().get_str(0).unwrap(), Some("2"));
    engine.release_query(&b).unwrap();
}

#[tokio::test]
async fn uncached_query_is_closed_explicitly() {
    let config = Config { prepare_threshold: 1, ..Default::default() };
    let (mut engine, mut backend) = pair(config);
    let query = engine.create_query("UPDATE t SET n = 1");
    assert_eq!(engine.cached_query_count(), 0);

    let params = query.create_parameter_list();
    let mut sink = ResultCollector::new();
    let client = engine.execute(&query, &params, &mut sink, 0, 0, no_begin());
    let server = async {
        let messages = backend.recv_until_sync().await;
        assert_eq!(messages[1], Frontend::Describe { kind: b'S', name: "S_1".into() });
        backend.send(&[
            parse_complete(),
            parameter_description(&[]),
            no_data(),
            bind_complete(),
            command_complete("UPDATE 1"),
            ready(b'I'),
        ]).await;
        messages
    };
    let (result, messages) = tokio::join!(client, server);
    result.unwrap();
    assert_eq!(messages[0], Frontend::Parse { name: "S_1".into(), sql: "UPDATE t SET n = 1".into(), oids: vec![] });
    assert_eq!(engine.statement_names(&query).unwrap(), [Some("S_1".to_owned())]);

    engine.close_query(&query).unwrap();
    let err = engine.execute_count(&query).unwrap_err();
    assert_eq!(err.as_usage(), Some(&UsageError::StaleQuery));

    let other = engine.borrow_query(QueryKey::new("DELETE FROM t"));
    let params = other.create_parameter_list();
    let mut sink = ResultCollector::new();
    let client = engine.execute(&other, &params, &mut sink, 0, 0, no_begin());
    let server = async {
        let messages = backend.recv_until_sync().await;
        assert_eq!(messages[0], Frontend::Close { kind: b'S', name: "S_1".into() });
        backend.send(&[
            close_complete(),
            parse_complete(),
            parameter_description(&[]),
            no_data(),
            bind_complete(),
            command_complete("DELETE 0"),
            ready(b'I'),
        ]).await;
    };
    let (result, _) = tokio::join!(client, server);
    result.unwrap();
}

#[tokio::test]
async fn simple_mode_inlines_parameters() {
    let config = Config { query_mode: QueryMode::Simple, ..Default::default() };
    let (mut engine, mut backend) = pair(config);
    let query = engine.borrow_query(QueryKey::new("SELECT $1"));
    let mut params = query.create_parameter_list();
    params.set_text(1, "it's", TEXT).unwrap();

    let mut rows = ResultCollector::new();
    let client = engine.execute(&query, &params, &mut rows, 0, 0, no_begin());
    let server = async {
        assert_eq!(backend.recv_query().await, "SELECT 'it''s'::text");
        backend.send(&[
            row_description(&[("?column?", TEXT)]),
            data_row(&[Some("it's")]),
            command_complete("SELECT 1"),
            ready(b'I'),
        ]).await;
    };
    let (result, _) = tokio::join!(client, server);
    result.unwrap();
    assert_eq!(rows.rows().next().unwrap().get_str(0).unwrap(), Some("it's"));

    // binary values cannot be inlined
    let mut params = query.create_parameter_list();
    params.set_binary(1, vec![0, 0, 0, 1], INT4).unwrap();
    let err = engine
        .execute(&query, &params, &mut ResultCollector::new(), 0, 0, no_begin())
        .await
        .unwrap_err();
    assert_eq!(err.as_usage(), Some(&UsageError::BinaryInSimpleQuery(1)));
}

#[tokio::test]
async fn simple_mode_escapes_backslash_without_standard_strings() {
    let config = Config { query_mode: QueryMode::Simple, ..Default::default() };
    let (mut engine, mut backend) = pair(config);
    engine.set_parameter_status("standard_conforming_strings", "off");
    assert_eq!(engine.parameter_status("standard_conforming_strings"), Some("off"));

    let query = engine.borrow_query(QueryKey::new("SELECT $1"));
    let mut params = query.create_parameter_list();
    params.set_text(1, r"x\'; DROP TABLE t; --", TEXT).unwrap();

    let mut rows = ResultCollector::new();
    let client = engine.execute(&query, &params, &mut rows, 0, 0, no_begin());
    let server = async {
        assert_eq!(backend.recv_query().await, r"SELECT E'x\\''; DROP TABLE t; --'::text");
        backend.send(&[
            row_description(&[("?column?", TEXT)]),
            data_row(&[Some(r"x\'; DROP TABLE t; --")]),
            command_complete("SELECT 1"),
            ready(b'I'),
        ]).await;
    };
    let (result, _) = tokio::join!(client, server);
    result.unwrap();
    assert_eq!(rows.rows().count(), 1);
}

#[tokio::test]
async fn describe_only_reports_types() {
    let (mut engine, mut backend) = pair(Config::default());
    let query = engine.borrow_query(QueryKey::new("SELECT name FROM t WHERE id = $1"));
    let mut params = query.create_parameter_list();
    params.set_null(1, 0).unwrap();

    let mut rows = ResultCollector::new();
    let client = engine.execute(&query, &params, &mut rows, 0, 0, QueryOptions::new().describe_only(true));
    let server = async {
        let messages = backend.recv_until_sync().await;
        assert_eq!(messages.len(), 3);
        assert!(matches!(messages[0], Frontend::Parse { .. }));
        assert_eq!(messages[1], Frontend::Describe { kind: b'S', name: "".into() });
        backend.send(&[
            parse_complete(),
            parameter_description(&[INT4]),
            row_description(&[("name", TEXT)]),
            ready(b'I'),
        ]).await;
    };
    let (result, _) = tokio::join!(client, server);
    result.unwrap();

    assert_eq!(rows.parameters, Some(vec![INT4]));
    assert_eq!(rows.results[0].shape.as_ref().unwrap()[0].name, "name");
    assert_eq!(engine.execute_count(&query).unwrap(), 0);
}

#[tokio::test]
async fn copy_through_execute_is_refused() {
    let (mut engine, mut backend) = pair(Config::default());
    let query = engine.borrow_query(QueryKey::new("COPY t FROM STDIN"));
    let params = query.create_parameter_list();

    let mut rows = ResultCollector::new();
    let client = engine.execute(&query, &params, &mut rows, 0, 0, no_begin());
    let server = async {
        backend.recv_until_sync().await;
        backend.send(&[parse_complete(), bind_complete(), no_data(), copy_in_response(1)]).await;
        assert!(matches!(backend.recv().await, Frontend::CopyFail(_)));
        backend.send(&[error("57014", "COPY from stdin failed"), ready(b'I')]).await;
    };
    let (result, _) = tokio::join!(client, server);
    let err = result.unwrap_err();
    assert_eq!(err.as_usage(), Some(&UsageError::CopyNotAllowed));
    assert_eq!(rows.errors.len(), 1);
    assert!(!engine.is_closed());
    assert!(!engine.is_copy_active());
}

#[tokio::test]
async fn statement_error_keeps_connection() {
    let (mut engine, mut backend) = pair(Config::default());
    let query = engine.borrow_query(QueryKey::new("SELECT * FROM missing"));
    let params = query.create_parameter_list();

    let mut rows = ResultCollector::new();
    let client = engine.execute(&query, &params, &mut rows, 0, 0, no_begin());
    let server = async {
        backend.recv_until_sync().await;
        backend.send(&[
            notice("table is missing"),
            error("42P01", "relation \"missing\" does not exist"),
            ready(b'I'),
        ]).await;
    };
    let (result, _) = tokio::join!(client, server);
    let err = result.unwrap_err();
    assert_eq!(err.sqlstate(), Some("42P01"));
    assert!(!err.is_fatal());
    assert!(!engine.is_closed());
    assert_eq!(rows.warnings.len(), 1);
    assert_eq!(engine.take_warnings().len(), 1);
    assert!(rows.completed);
}

#[tokio::test]
async fn fatal_error_closes_connection() {
    let (mut engine, mut backend) = pair(Config::default());
    let query = engine.borrow_query(QueryKey::new("SELECT 1"));
    let params = query.create_parameter_list();

    let mut rows = ResultCollector::new();
    let client = engine.execute(&query, &params, &mut rows, 0, 0, no_begin());
    let server = async {
        backend.recv_until_sync().await;
        backend.send(&[fatal("57P01", "terminating connection due to administrator command")]).await;
    };
    let (result, _) = tokio::join!(client, server);
    assert!(result.unwrap_err().is_fatal());
    assert!(engine.is_closed());

    let err = engine.execute(&query, &params, &mut rows, 0, 0, no_begin()).await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Closed(_)));
}

#[tokio::test]
async fn foreign_and_unset_parameters_are_rejected() {
    let (mut engine, _backend) = pair(Config::default());
    let a = engine.borrow_query(QueryKey::new("SELECT $1::int4"));
    let b = engine.borrow_query(QueryKey::new("SELECT $1::text"));

    let unset = a.create_parameter_list();
    let err = engine.execute(&a, &unset, &mut ResultCollector::new(), 0, 0, no_begin()).await.unwrap_err();
    assert_eq!(err.as_usage(), Some(&UsageError::UnsetParameter(1)));

    let mut foreign = b.create_parameter_list();
    foreign.set_text(1, "x", TEXT).unwrap();
    let err = engine.execute(&a, &foreign, &mut ResultCollector::new(), 0, 0, no_begin()).await.unwrap_err();
    assert_eq!(err.as_usage(), Some(&UsageError::ForeignParameters));

    let (mut other, _other_backend) = pair(Config::default());
    let err = other.release_query(&a).unwrap_err();
    assert_eq!(err.as_usage(), Some(&UsageError::ForeignQuery));
}

#[tokio::test]
async fn fastpath_call_returns_value() {
    let (mut engine, mut backend) = pair(Config::default());

    let args = [pgexec::FastpathArg::int4(42)];
    let client = engine.fastpath_call(1598, &args, true);
    let server = async {
        let Frontend::FunctionCall { function, arg_formats, args, result_format } = backend.recv().await else {
            panic!("expected FunctionCall");
        };
        assert_eq!(function, 1598);
        assert_eq!(arg_formats, [1]);
        assert_eq!(args, [Some(42i32.to_be_bytes().to_vec())]);
        assert_eq!(result_format, 1);
        backend.send(&[function_call_response(Some(&[0, 0, 0, 7])), ready(b'I')]).await;
    };
    let (result, _) = tokio::join!(client, server);
    assert_eq!(result.unwrap().as_deref(), Some(&[0u8, 0, 0, 7][..]));
}

#[tokio::test]
async fn parameter_status_is_tracked() {
    let (mut engine, mut backend) = pair(Config::default());
    engine.set_parameter_status("TimeZone", "UTC");
    let query = engine.borrow_query(QueryKey::new("SET TIME ZONE 'Asia/Jakarta'"));
    let params = query.create_parameter_list();

    let mut sink = ResultCollector::new();
    let client = engine.execute(&query, &params, &mut sink, 0, 0, no_begin());
    let server = async {
        backend.recv_until_sync().await;
        backend.send(&[
            parse_complete(),
            bind_complete(),
            no_data(),
            command_complete("SET"),
            parameter_status("TimeZone", "Asia/Jakarta"),
            ready(b'I'),
        ]).await;
    };
    let (result, _) = tokio::join!(client, server);
    result.unwrap();
    assert_eq!(engine.parameter_status("TimeZone"), Some("Asia/Jakarta"));
}

#[tokio::test]
async fn discard_all_forgets_prepared_statements() {
    let config = Config { prepare_threshold: 1, ..Default::default() };
    let (mut engine, mut backend) = pair(config);
    let update = engine.borrow_query(QueryKey::new("UPDATE t SET n = 1"));
    let discard = engine.borrow_query(QueryKey::new("DISCARD ALL"));

    for query in [update, discard] {
        let params = query.create_parameter_list();
        let mut sink = ResultCollector::new();
        let client = engine.execute(&query, &params, &mut sink, 0, 0, no_begin());
        let server = async {
            let messages = backend.recv_until_sync().await;
            let Some(Frontend::Parse { sql, .. }) = messages.first() else {
                panic!("expected Parse, got {messages:?}");
            };
            let tag = if sql.starts_with("DISCARD") { "DISCARD ALL" } else { "UPDATE 1" };
            backend.send(&[
                parse_complete(),
                parameter_description(&[]),
                no_data(),
                bind_complete(),
                command_complete(tag),
                ready(b'I'),
            ]).await;
        };
        let (result, _) = tokio::join!(client, server);
        result.unwrap();
    }

    assert_eq!(engine.statement_names(&update).unwrap(), [None]);
    assert_eq!(engine.statement_names(&discard).unwrap(), [None]);
}

/// Answer one round, asserting it carries no transaction start.
async fn reply_without_begin(backend: &mut Backend) {
    let first = backend.recv().await;
    if let Frontend::Query(sql) = &first {
        assert!(!sql.to_ascii_uppercase().starts_with("BEGIN"), "{sql}");
        backend.send(&[command_complete("UPDATE 1"), ready(b'I')]).await;
        return;
    }

    let mut messages = vec![first];
    while messages.last() != Some(&Frontend::Sync) {
        messages.push(backend.recv().await);
    }
    let mut replies = vec![];
    for message in &messages {
        assert!(!message.parse_sql().is_some_and(|e| e.starts_with("BEGIN")), "{messages:?}");
        match message {
            Frontend::Parse { .. } => replies.push(parse_complete()),
            Frontend::Bind { .. } => replies.push(bind_complete()),
            Frontend::Describe { kind: b'S', .. } => replies.extend([parameter_description(&[]), no_data()]),
            Frontend::Describe { .. } => replies.push(no_data()),
            Frontend::Execute { .. } => replies.push(command_complete("UPDATE 1")),
            Frontend::Close { .. } => replies.push(close_complete()),
            Frontend::Sync => replies.push(ready(b'I')),
            message => panic!("unexpected {message:?}"),
        }
    }
    backend.send(&replies).await;
}

#[tokio::test]
async fn suppressed_begin_holds_for_every_option() {
    let (mut engine, mut backend) = pair(Config::default());
    let query = engine.borrow_query(QueryKey::new("UPDATE t SET n = 1"));
    let params = query.create_parameter_list();

    let base = no_begin();
    let cases = [
        ("plain", base),
        ("simple", base.execute_as_simple(true)),
        ("read only", base.read_only_hint(true)),
        ("one shot", base.one_shot(true)),
        ("no results", base.no_results(true)),
        ("no metadata", base.no_metadata(true)),
        ("describe portal", base.force_describe_portal(true)),
        (
            "combined",
            base.read_only_hint(true)
                .one_shot(true)
                .no_results(true)
                .no_metadata(true)
                .force_describe_portal(true)
                .no_binary_transfer(true),
        ),
        ("combined simple", base.execute_as_simple(true).read_only_hint(true).no_results(true)),
    ];

    for (case, options) in cases {
        assert_eq!(engine.transaction_state(), TransactionState::Idle, "{case}");

        let mut sink = ResultCollector::new();
        let client = engine.execute(&query, &params, &mut sink, 0, 0, options);
        let (result, _) = tokio::join!(client, reply_without_begin(&mut backend));
        result.unwrap_or_else(|err| panic!("{case}: {err}"));

        let queries = [query, query];
        let batch_params = [query.create_parameter_list(), query.create_parameter_list()];
        let rounds = match options.execute_as_simple {
            true => 2,
            false => 1,
        };
        let mut sink = ResultCollector::new();
        let client = engine.execute_batch(&queries, &batch_params, &mut sink, 0, options);
        let server = async {
            for _ in 0..rounds {
                reply_without_begin(&mut backend).await;
            }
        };
        let (result, _) = tokio::join!(client, server);
        result.unwrap_or_else(|err| panic!("{case} batch: {err}"));
    }

    let args = [pgexec::FastpathArg::int4(1)];
    let client = engine.fastpath_call(1598, &args, true);
    let server = async {
        assert!(matches!(backend.recv().await, Frontend::FunctionCall { .. }));
        backend.send(&[function_call_response(None), ready(b'I')]).await;
    };
    let (result, _) = tokio::join!(client, server);
    assert_eq!(result.unwrap(), None);
}
