//! Atomic multi-statement transactions.

#[path = "../support/mod.rs"]
mod support;

use opfs_sql::config::WorkerSettings;
use opfs_sql::{
    params, Database, Error, Settings, Statement, StatementKind, StatementResult,
};
use serde_json::{json, Value as Json};
use support::{exec_sql, healthy, Reply, ScriptedHost};

async fn open(host: &ScriptedHost) -> Database {
    let settings = WorkerSettings {
        request_timeout_ms: 2_000,
        startup_timeout_ms: 2_000,
    };
    Database::open_with_host(host, "tx.db", &settings)
        .await
        .unwrap()
}

/// Scripted worker that fails every exec whose SQL contains one of `failing`.
fn failing_on(failing: &'static [&'static str]) -> ScriptedHost {
    ScriptedHost::with_responder(move |request: &Json| match exec_sql(request) {
        Some(sql) if failing.iter().any(|f| sql.contains(f)) => {
            Reply::Error(format!("engine rejected {sql}"))
        }
        _ => healthy(request),
    })
}

#[tokio::test]
async fn test_local_failure_stops_the_transaction() {
    let host = ScriptedHost::new();
    let db = open(&host).await;

    let err = db
        .transaction(vec![
            Statement::new("INSERT INTO t VALUES (1)"),
            Statement::query("INSERT INTO t VALUES (2)"),
            Statement::new("INSERT INTO t VALUES (3)"),
        ])
        .await
        .unwrap_err();

    match &err {
        Error::Transaction { source, rollback } => {
            assert!(matches!(**source, Error::OperationMismatch { .. }));
            assert!(rollback.is_none());
        }
        other => panic!("expected transaction error, got {other:?}"),
    }
    assert_eq!(
        host.exec_log(),
        vec!["BEGIN TRANSACTION", "INSERT INTO t VALUES (1)", "ROLLBACK"]
    );
}

#[tokio::test]
async fn test_engine_failure_rolls_back() {
    let host = failing_on(&["(2)"]);
    let db = open(&host).await;

    let err = db
        .transaction(vec![
            Statement::new("INSERT INTO t VALUES (1)"),
            Statement::new("INSERT INTO t VALUES (2)"),
            Statement::new("INSERT INTO t VALUES (3)"),
        ])
        .await
        .unwrap_err();

    assert!(err.to_string().starts_with("transaction execution failed"));
    assert_eq!(
        err.engine_info().map(|i| i.message.as_str()),
        Some("engine rejected INSERT INTO t VALUES (2)")
    );
    assert!(err.suppressed().is_none());
    assert_eq!(
        host.exec_log(),
        vec![
            "BEGIN TRANSACTION",
            "INSERT INTO t VALUES (1)",
            "INSERT INTO t VALUES (2)",
            "ROLLBACK",
        ]
    );
}

#[tokio::test]
async fn test_rollback_failure_is_suppressed() {
    let host = failing_on(&["(2)", "ROLLBACK"]);
    let db = open(&host).await;

    let err = db
        .transaction(vec![
            Statement::new("INSERT INTO t VALUES (1)"),
            Statement::new("INSERT INTO t VALUES (2)"),
        ])
        .await
        .unwrap_err();

    assert_eq!(
        err.engine_info().map(|i| i.message.as_str()),
        Some("engine rejected INSERT INTO t VALUES (2)")
    );
    let suppressed = err.suppressed().unwrap();
    assert_eq!(
        suppressed.engine_info().map(|i| i.message.as_str()),
        Some("engine rejected ROLLBACK")
    );
}

#[tokio::test]
async fn test_commit_failure_rolls_back() {
    let host = failing_on(&["COMMIT"]);
    let db = open(&host).await;

    let err = db
        .transaction(vec![Statement::new("DELETE FROM t")])
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Transaction { .. }));
    assert_eq!(
        host.exec_log(),
        vec!["BEGIN TRANSACTION", "DELETE FROM t", "COMMIT", "ROLLBACK"]
    );
}

#[tokio::test]
async fn test_empty_transaction_is_rejected() {
    let host = ScriptedHost::new();
    let db = open(&host).await;

    let err = db.transaction(Vec::new()).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(host.exec_log().is_empty());
}

#[tokio::test]
async fn test_declared_kind_selects_the_result_shape() {
    let host = ScriptedHost::new();
    let db = open(&host).await;

    let results = db
        .transaction(vec![
            Statement::run("INSERT INTO t VALUES (1)"),
            Statement::new("CREATE INDEX idx ON t (x)"),
            Statement::new("SELECT * FROM t"),
        ])
        .await
        .unwrap();

    assert_eq!(
        results,
        vec![
            StatementResult::Done,
            StatementResult::Done,
            StatementResult::Rows(Vec::new()),
        ]
    );
    assert_eq!(
        host.exec_log(),
        vec![
            "BEGIN TRANSACTION",
            "INSERT INTO t VALUES (1)",
            "CREATE INDEX idx ON t (x)",
            "SELECT * FROM t",
            "COMMIT",
        ]
    );
}

#[tokio::test]
async fn test_statements_parse_from_json() {
    let statements: Vec<Statement> = serde_json::from_value(json!([
        {"sql": "INSERT INTO t (c) VALUES (?)", "parameters": [1], "type": "execute"},
        {"sql": "SELECT c FROM t"}
    ]))
    .unwrap();

    assert_eq!(statements[0].effective_kind(), StatementKind::Execute);
    assert_eq!(statements[1].effective_kind(), StatementKind::Query);
}

#[tokio::test]
async fn test_transaction_against_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::with_storage_root(dir.path());
    let db = Database::open_with_settings("tx.db", &settings).await.unwrap();

    db.run("CREATE TABLE t (id INTEGER PRIMARY KEY, c INTEGER)", ())
        .await
        .unwrap();

    let results = db
        .transaction(vec![
            Statement::new("INSERT INTO t (c) VALUES (?)").with_params(params![1]),
            Statement::new("SELECT count(*) AS c FROM t"),
        ])
        .await
        .unwrap();
    assert_eq!(
        serde_json::to_value(&results).unwrap(),
        json!([{"changes": 1, "lastInsertId": 1}, [{"c": 1}]])
    );

    // A duplicate key aborts the whole batch, including the first insert.
    let err = db
        .transaction(vec![
            Statement::new("INSERT INTO t (id, c) VALUES (2, 2)"),
            Statement::new("INSERT INTO t (id, c) VALUES (1, 3)"),
        ])
        .await
        .unwrap_err();
    assert!(err.engine_info().is_some());
    assert!(err.suppressed().is_none());

    let rows: Vec<Json> = db.read_many("SELECT id, c FROM t", ()).await.unwrap();
    assert_eq!(rows, vec![json!({"id": 1, "c": 1})]);

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_declared_statement_list_against_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::with_storage_root(dir.path());
    let db = Database::open_with_settings("declared.db", &settings)
        .await
        .unwrap();
    db.run("CREATE TABLE t (x)", ()).await.unwrap();

    let statements: Vec<Statement> = serde_json::from_value(json!([
        {"sql": "INSERT INTO t VALUES (?)", "parameters": [1], "type": "execute"},
        {"sql": "SELECT COUNT(*) as c FROM t", "type": "query"}
    ]))
    .unwrap();
    let results = db.transaction(statements).await.unwrap();

    assert_eq!(
        serde_json::to_value(&results).unwrap(),
        json!([{"changes": 1, "lastInsertId": 1}, [{"c": 1}]])
    );
    db.close().await.unwrap();
}
