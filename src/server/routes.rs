//! Request routing for the JSON API.

use crate::catalog::Catalog;
use crate::error::{Result, SheetError};
use crate::ingestion::{IngestionOrchestrator, IngestionResult};
use crate::server::http::{HttpRequest, HttpResponse};
use crate::server::multipart;
use crate::server::state::AppState;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

const DEFAULT_UPLOAD_NAME: &str = "upload.zip";

#[derive(Debug, Deserialize)]
struct QueryRequest {
    sql: String,
}

pub async fn handle_request(state: &AppState, request: HttpRequest) -> HttpResponse {
    match (request.method.as_str(), request.path.as_str()) {
        ("OPTIONS", _) => HttpResponse::json(200, "{}"),
        ("GET", "/api/health") => {
            HttpResponse::json(200, json!({"status": "ok", "service": "sheetsql"}).to_string())
        }
        ("GET", "/api/catalog") => list_catalog(state).await,
        ("GET", path) if path.starts_with("/api/catalog/") => {
            get_catalog_entry(state, &path["/api/catalog/".len()..]).await
        }
        ("POST", "/api/ingest") => ingest(state, request).await,
        ("POST", "/api/query") => query(state, &request.body).await,
        (_, "/api/health" | "/api/catalog" | "/api/ingest" | "/api/query") => {
            HttpResponse::json(405, json!({"ok": false, "error": "MethodNotAllowed"}).to_string())
        }
        _ => HttpResponse::json(
            404,
            json!({"ok": false, "error": "NotFound", "details": request.path}).to_string(),
        ),
    }
}

async fn list_catalog(state: &AppState) -> HttpResponse {
    let outcome = async {
        let store = state.store.get().await?;
        run_blocking(move || store.with_connection(Catalog::list)).await
    }
    .await;

    match outcome {
        Ok(tables) => HttpResponse::json(200, json!({"ok": true, "tables": tables}).to_string()),
        Err(e) => error_response(500, &e),
    }
}

/// `raw_name` is the still percent-encoded path segment.
async fn get_catalog_entry(state: &AppState, raw_name: &str) -> HttpResponse {
    let table_name = match percent_decode_str(raw_name).decode_utf8() {
        Ok(name) => name.into_owned(),
        Err(_) => {
            return error_response(404, &SheetError::NotFound(format!("table '{}'", raw_name)));
        }
    };
    let name = table_name.clone();
    let outcome = async {
        let store = state.store.get().await?;
        run_blocking(move || store.with_connection(|conn| Catalog::get(conn, &name))).await
    }
    .await;

    match outcome {
        Ok(Some(entry)) => HttpResponse::json(200, json!({"ok": true, "table": entry}).to_string()),
        Ok(None) => error_response(404, &SheetError::NotFound(format!("table '{}'", table_name))),
        Err(e) => error_response(500, &e),
    }
}

async fn ingest(state: &AppState, request: HttpRequest) -> HttpResponse {
    let (file_name, bytes) = match upload_payload(request).await {
        Ok(payload) => payload,
        Err(e) => return ingest_failure(&e),
    };
    info!("📥 Upload '{}' ({} bytes)", file_name, bytes.len());

    let options = state.config.ingestion.clone();
    let outcome = async {
        let store = state.store.get().await?;
        run_blocking(move || {
            IngestionOrchestrator::with_options(store, options).ingest_archive(&file_name, bytes)
        })
        .await
    }
    .await;

    match outcome {
        Ok(result) => HttpResponse::json(200, to_body(&result)),
        Err(e) => ingest_failure(&e),
    }
}

/// The uploaded file: first file part of a multipart body, or the raw body.
async fn upload_payload(request: HttpRequest) -> Result<(String, Vec<u8>)> {
    let boundary = request.header("content-type").and_then(multipart::boundary);
    let (file_name, bytes) = match boundary {
        Some(boundary) => {
            let part = multipart::first_file_part(request.body, &boundary)
                .await
                .map_err(|e| SheetError::InvalidArchive(format!("malformed multipart body: {}", e)))?
                .ok_or_else(|| {
                    SheetError::InvalidArchive("multipart body has no file part".to_string())
                })?;
            (part.file_name, part.data)
        }
        None => {
            let name = request
                .header("x-file-name")
                .map(str::to_string)
                .unwrap_or_else(|| DEFAULT_UPLOAD_NAME.to_string());
            (name, request.body)
        }
    };

    if bytes.is_empty() {
        return Err(SheetError::InvalidArchive("upload is empty".to_string()));
    }
    Ok((file_name, bytes))
}

fn ingest_failure(err: &SheetError) -> HttpResponse {
    let status = match err {
        SheetError::InvalidArchive(_) | SheetError::UnsupportedMember { .. } => 400,
        _ => 500,
    };
    if status == 500 {
        error!("Ingestion failed: {}", err);
    } else {
        warn!("Ingestion rejected: {}", err);
    }
    HttpResponse::json(status, to_body(&IngestionResult::failed(err)))
}

async fn query(state: &AppState, body: &[u8]) -> HttpResponse {
    let request: QueryRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(e) => return error_response(400, &SheetError::from(e)),
    };

    let outcome = async {
        let store = state.store.get().await?;
        state.config.guards.execute(store, &request.sql).await
    }
    .await;

    match outcome {
        Ok(result) => HttpResponse::json(200, to_body(&result)),
        Err(e) => {
            let status = match e {
                SheetError::ValidationRejected(_) | SheetError::ExecutionError(_) => 400,
                SheetError::Timeout(_) => 408,
                _ => 500,
            };
            error_response(status, &e)
        }
    }
}

fn error_response(status: u16, err: &SheetError) -> HttpResponse {
    let mut body = json!({"ok": false, "error": err.label()});
    if let Some(details) = err.details() {
        body["details"] = json!(details);
    }
    HttpResponse::json(status, body.to_string())
}

fn to_body<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|e| json!({"ok": false, "error": "Json", "details": e.to_string()}).to_string())
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SheetError::ExecutionError(format!("blocking task failed: {}", e)))?
}
