// tests/integration/query_endpoint_test.rs

use super::fixtures::{FAIL_AFTER_OUTPUT_QUERY, FAIL_QUERY, FakeEngine, SLEEP_QUERY};
use super::test_helpers::{TestServer, session_client, test_config, wait_until};
use std::time::Duration;

#[tokio::test]
async fn test_post_body_query() {
    let server = TestServer::start().await;
    let client = session_client();

    let response = client
        .post(server.url("/"))
        .body("SELECT 'x' AS col")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/csv; charset=utf-8"
    );
    assert_eq!(response.text().await.unwrap(), "col\nx\n");
}

#[tokio::test]
async fn test_union_rows_in_order() {
    let server = TestServer::start().await;
    let client = session_client();

    let (status, body) = server.post(&client, "SELECT 1 UNION ALL SELECT 2").await;
    assert_eq!(status, 200);
    assert_eq!(body, "1\n1\n2\n");
}

#[tokio::test]
async fn test_get_with_q_parameter() {
    let server = TestServer::start().await;
    let client = session_client();

    let (status, body) = server.get(&client, "/?q=SELECT%2042%20AS%20answer").await;
    assert_eq!(status, 200);
    assert_eq!(body, "answer\n42\n");
}

#[tokio::test]
async fn test_get_with_query_parameter() {
    let server = TestServer::start().await;
    let client = session_client();

    let (status, body) = server.get(&client, "/?query=SELECT%207%20AS%20n").await;
    assert_eq!(status, 200);
    assert_eq!(body, "n\n7\n");
}

#[tokio::test]
async fn test_body_wins_over_parameters() {
    let server = TestServer::start().await;
    let client = session_client();

    let response = client
        .post(server.url("/?q=SELECT%202%20AS%20b"))
        .body("SELECT 1 AS a")
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "a\n1\n");
}

#[tokio::test]
async fn test_missing_query_is_rejected_without_session() {
    let server = TestServer::start().await;
    let client = session_client();

    let (status, body) = server.post(&client, "").await;
    assert_eq!(status, 400);
    assert_eq!(body, "No queries, please specify a query\r\n");

    let (status, _) = server.get(&client, "/").await;
    assert_eq!(status, 400);
    assert_eq!(server.state.registry.session_count(), 0);
}

#[tokio::test]
async fn test_multiple_statements_are_separated() {
    let server = TestServer::start().await;
    let client = session_client();

    let (status, body) = server.post(&client, "SELECT 1 AS a; SELECT 2 AS b").await;
    assert_eq!(status, 200);
    assert_eq!(body, "a\n1\n\nb\n2\n");
}

#[tokio::test]
async fn test_statements_without_columns_are_silent() {
    let server = TestServer::start().await;
    let client = session_client();

    let (status, body) = server
        .post(
            &client,
            "CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (1); SELECT x FROM t",
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body, "x\n1\n");

    let (status, body) = server.post(&client, "CREATE TABLE u (y TEXT)").await;
    assert_eq!(status, 200);
    assert_eq!(body, "");
}

#[tokio::test]
async fn test_value_formatting() {
    let server = TestServer::start().await;
    let client = session_client();

    let (status, body) = server
        .post(
            &client,
            "SELECT NULL AS n, '' AS e, 'a,b' AS c, 2.5 AS r, X'00ff' AS b",
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body, "n,e,c,r,b\n\\N,\"\",\"a,b\",2.5,\\x00ff\n");
}

#[tokio::test]
async fn test_invalid_sql_is_a_server_error() {
    let server = TestServer::start().await;
    let client = session_client();

    let (status, body) = server.post(&client, "SELEC nonsense").await;
    assert_eq!(status, 500);
    assert!(body.starts_with("Query failed: "), "{body}");
}

#[tokio::test]
async fn test_failure_in_later_statement_before_output() {
    let server = TestServer::start().await;
    let client = session_client();

    let (status, body) = server
        .post(&client, "CREATE TABLE t (x); SELECT * FROM missing")
        .await;
    assert_eq!(status, 500);
    assert!(body.contains("no such table"), "{body}");
}

#[tokio::test]
async fn test_unsupported_methods_are_not_found() {
    let server = TestServer::start().await;
    let client = session_client();

    for method in [reqwest::Method::PUT, reqwest::Method::DELETE, reqwest::Method::PATCH] {
        let response = client
            .request(method.clone(), server.url("/?q=SELECT%201"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 404, "{method}");
    }
    assert_eq!(server.state.registry.session_count(), 0);
}

#[tokio::test]
async fn test_ping() {
    let server = TestServer::start().await;
    let client = session_client();

    for path in ["/ping", "/ping/", "/ping/deeper/path"] {
        let (status, body) = server.get(&client, path).await;
        assert_eq!(status, 200, "{path}");
        assert_eq!(body, "OK\r\n", "{path}");
    }
    for method in [reqwest::Method::POST, reqwest::Method::DELETE] {
        let response = client
            .request(method, server.url("/ping/x"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
    }
    assert_eq!(server.state.registry.session_count(), 0);
}

#[tokio::test]
async fn test_unknown_paths_are_not_found() {
    let server = TestServer::start().await;
    let client = session_client();

    for path in ["/pingx", "/query", "/metrics", "/a/b"] {
        let (status, body) = server.get(&client, path).await;
        assert_eq!(status, 404, "{path}");
        assert_eq!(body, "Not Found\r\n", "{path}");
    }
}

#[tokio::test]
async fn test_state_persists_across_requests_on_one_connection() {
    let server = TestServer::start().await;
    let client = session_client();

    server
        .post(&client, "CREATE TABLE kv (k TEXT, v INTEGER)")
        .await;
    server
        .post(&client, "INSERT INTO kv VALUES ('a', 1), ('b', 2)")
        .await;
    let (status, body) = server.post(&client, "SELECT k, v FROM kv ORDER BY k").await;

    assert_eq!(status, 200);
    assert_eq!(body, "k,v\na,1\nb,2\n");
    assert_eq!(server.state.registry.session_count(), 1);
}

#[tokio::test]
async fn test_connections_are_isolated() {
    let server = TestServer::start().await;
    let first = session_client();
    let second = session_client();

    server.post(&first, "CREATE TABLE private (x)").await;
    let (status, body) = server.post(&second, "SELECT * FROM private").await;

    assert_eq!(status, 500);
    assert!(body.contains("no such table"), "{body}");
    assert_eq!(server.state.registry.session_count(), 2);
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let mut config = test_config();
    config.output.max_query_size = 64;
    let server = TestServer::with_config(config).await;
    let client = session_client();

    let query = format!("SELECT '{}'", "x".repeat(128));
    let (status, _) = server.post(&client, &query).await;
    assert_eq!(status, 413);
}

#[tokio::test]
async fn test_engine_error_before_output_is_500() {
    let engine = FakeEngine::new();
    let server = TestServer::with_engine(test_config(), engine).await;
    let client = session_client();

    let (status, body) = server.post(&client, FAIL_QUERY).await;
    assert_eq!(status, 500);
    assert_eq!(body, "Query failed: boom\r\n");
}

#[tokio::test]
async fn test_engine_error_after_output_aborts_body() {
    let mut config = test_config();
    config.output.chunk_size = 16;
    let server = TestServer::with_engine(config, FakeEngine::new()).await;
    let client = session_client();

    let response = client
        .post(server.url("/"))
        .body(FAIL_AFTER_OUTPUT_QUERY)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert!(response.text().await.is_err());
}

#[tokio::test]
async fn test_query_timeout_interrupts_engine() {
    let engine = FakeEngine::new();
    let stats = engine.stats();
    let mut config = test_config();
    config.session.query_timeout = Some(Duration::from_millis(100));
    let server = TestServer::with_engine(config, engine).await;
    let client = session_client();

    let (status, body) = server.post(&client, SLEEP_QUERY).await;
    assert_eq!(status, 500);
    assert_eq!(body, "Query failed: interrupted\r\n");
    assert!(stats.interrupted() >= 1);

    // The session stays usable after an interrupted query.
    let (status, body) = server.post(&client, "after").await;
    assert_eq!(status, 200);
    assert_eq!(body, "query\nafter\n");
    assert_eq!(stats.opened(), 1);
}

#[tokio::test]
async fn test_engine_open_failure_is_reported() {
    let engine = FakeEngine::new();
    engine.set_fail_connect(true);
    let server = TestServer::with_engine(test_config(), engine).await;
    let client = session_client();

    let (status, body) = server.post(&client, "anything").await;
    assert_eq!(status, 500);
    assert!(body.starts_with("No associated session: "), "{body}");
    assert_eq!(server.state.registry.session_count(), 0);
}

#[tokio::test]
async fn test_repeated_q_parameter_takes_the_first() {
    let server = TestServer::start().await;
    let client = session_client();

    let (status, body) = server
        .get(&client, "/?q=SELECT%201%20AS%20z&q=SELECT%202")
        .await;
    assert_eq!(status, 200);
    assert_eq!(body, "z\n1\n");

    let (status, body) = server.get(&client, "/?q=&q=SELECT%203%20AS%20y").await;
    assert_eq!(status, 200);
    assert_eq!(body, "y\n3\n");
}

#[tokio::test]
async fn test_repeated_q_parameter_does_not_override_body() {
    let server = TestServer::start().await;
    let client = session_client();

    let response = client
        .post(server.url("/?q=a&q=b"))
        .body("SELECT 1 AS a")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().await.unwrap(), "a\n1\n");
}

#[tokio::test]
async fn test_method_is_checked_before_parameters_and_body() {
    let mut config = test_config();
    config.output.max_query_size = 64;
    let server = TestServer::with_config(config).await;
    let client = session_client();

    let response = client
        .put(server.url("/?q=a&q=b"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);

    let response = client
        .put(server.url("/"))
        .body("x".repeat(128))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
    assert_eq!(server.state.registry.session_count(), 0);
}

#[tokio::test]
async fn test_client_disconnect_interrupts_running_query() {
    let engine = FakeEngine::new();
    let stats = engine.stats();
    let server = TestServer::with_engine(test_config(), engine).await;
    let client = session_client();

    let result = client
        .post(server.url("/"))
        .body(SLEEP_QUERY)
        .timeout(Duration::from_millis(200))
        .send()
        .await;
    assert!(result.is_err());
    drop(client);

    assert!(wait_until(Duration::from_secs(2), || stats.interrupted() >= 1).await);
    assert!(stats.wait_closed(1).await);
    assert!(
        wait_until(Duration::from_secs(2), || server.state.registry.session_count() == 0).await
    );
}
