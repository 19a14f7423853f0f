mod common;

use serde_json::Value;
use sheetsql::config::AppConfig;
use sheetsql::server::{self, AppState};
use sheetsql::store::Store;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn start_server(config: AppConfig) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = AppState::with_store(config, Arc::new(Store::open_in_memory().unwrap()));
    tokio::spawn(server::serve(listener, Arc::new(state)));
    addr
}

/// Send raw request bytes, return (status, JSON body).
async fn send(addr: SocketAddr, head: &str, body: &[u8]) -> (u16, Value) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(head.as_bytes()).await.unwrap();
    stream.write_all(body).await.unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let text = String::from_utf8(raw).unwrap();
    let (head, body) = text.split_once("\r\n\r\n").unwrap();
    let status = head.split_whitespace().nth(1).unwrap().parse().unwrap();
    (status, serde_json::from_str(body).unwrap())
}

async fn post_json(addr: SocketAddr, path: &str, body: &Value) -> (u16, Value) {
    let body = body.to_string();
    let head = format!(
        "POST {} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
        path,
        body.len()
    );
    send(addr, &head, body.as_bytes()).await
}

async fn get(addr: SocketAddr, path: &str) -> (u16, Value) {
    send(addr, &format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path), b"").await
}

fn multipart_body(boundary: &str, file_name: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"purpose\"\r\n\r\nanalysis\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\n\
             Content-Type: application/zip\r\n\r\n",
            b = boundary,
            f = file_name
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

#[tokio::test]
async fn test_ingest_then_query_over_http() {
    let addr = start_server(AppConfig::default()).await;

    let workbook = common::xlsx(&[(
        "Sheet1",
        vec![vec!["Name", "Qty"], vec!["Widget", "3"], vec!["Gadget", "7"]],
    )]);
    let archive = common::zip(&[("orders.xlsx", workbook), ("notes.txt", b"hi".to_vec())]);
    let body = multipart_body("----sheetsql", "archive.zip", &archive);
    let head = format!(
        "POST /api/ingest HTTP/1.1\r\nHost: localhost\r\nContent-Type: multipart/form-data; boundary=----sheetsql\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    let (status, json) = send(addr, &head, &body).await;
    assert_eq!(status, 200, "{}", json);
    assert_eq!(json["ok"], true);
    assert_eq!(json["truncated"], false);
    assert_eq!(json["tables"][0]["table_name"], "orders");
    assert_eq!(json["tables"][0]["columns"], "Name, Qty");
    assert_eq!(json["tables"][0]["rows"], 2);
    assert_eq!(json["skipped"][0]["member"], "notes.txt");
    assert!(json["run_id"].as_str().is_some());

    let (status, json) = post_json(
        addr,
        "/api/query",
        &serde_json::json!({"sql": "SELECT * FROM \"orders\" ORDER BY \"Name\""}),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(json["rowCount"], 2);
    assert_eq!(json["truncated"], false);
    assert_eq!(json["fields"][0], serde_json::json!({"name": "Name", "type": "text"}));
    assert_eq!(json["rows"][0]["Name"], "Gadget");

    let (status, json) = get(addr, "/api/catalog").await;
    assert_eq!(status, 200);
    assert_eq!(json["tables"].as_array().unwrap().len(), 1);

    let (status, json) = get(addr, "/api/catalog/orders").await;
    assert_eq!(status, 200);
    assert_eq!(json["table"]["rows"], 2);
}

#[tokio::test]
async fn test_raw_zip_body_and_rejections() {
    let addr = start_server(AppConfig::default()).await;

    let archive = common::zip(&[("people.csv", b"name,age\nAda,36\n".to_vec())]);
    let head = format!(
        "POST /api/ingest HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/zip\r\nContent-Length: {}\r\n\r\n",
        archive.len()
    );
    let (status, json) = send(addr, &head, &archive).await;
    assert_eq!(status, 200);
    assert_eq!(json["tables"][0]["table_name"], "people");

    let (status, json) =
        post_json(addr, "/api/query", &serde_json::json!({"sql": "DELETE FROM people"})).await;
    assert_eq!(status, 400);
    assert_eq!(json["ok"], false);
    assert_eq!(json["error"], "ValidationRejected");

    let (status, json) = post_json(
        addr,
        "/api/query",
        &serde_json::json!({"sql": "SELECT COUNT(*) AS n FROM people"}),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(json["rows"][0]["n"], 1);

    let (status, _) = send(
        addr,
        "OPTIONS /api/query HTTP/1.1\r\nHost: localhost\r\n\r\n",
        b"",
    )
    .await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn test_upload_cap_returns_413() {
    let config = AppConfig {
        max_upload_bytes: 16,
        ..AppConfig::default()
    };
    let addr = start_server(config).await;

    let head = "POST /api/ingest HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/zip\r\nContent-Length: 1024\r\n\r\n";
    let (status, json) = send(addr, head, b"").await;
    assert_eq!(status, 413);
    assert_eq!(json["ok"], false);
}
