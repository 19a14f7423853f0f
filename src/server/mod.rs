//! HTTP Server
//!
//! Plain tokio TCP accept loop; one task per connection, one request per
//! connection.

pub mod http;
pub mod multipart;
pub mod routes;
pub mod state;

pub use state::AppState;

use crate::error::Result;
use http::{read_request, HttpResponse, ReadOutcome};
use serde_json::json;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Bind `state.config.bind` and serve until the process exits.
pub async fn run(state: AppState) -> Result<()> {
    let listener = TcpListener::bind(&state.config.bind).await?;
    info!("✅ Server listening on {}", listener.local_addr()?);
    serve(listener, Arc::new(state)).await
}

/// Accept connections on an already bound listener.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    loop {
        let (stream, addr) = listener.accept().await?;
        debug!("📥 New connection from: {}", addr);
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            handle_connection(stream, &state).await;
        });
    }
}

pub async fn handle_connection<S>(mut stream: S, state: &AppState)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let max_body = usize::try_from(state.config.max_upload_bytes).unwrap_or(usize::MAX);

    let response = match read_request(&mut stream, max_body).await {
        Ok(ReadOutcome::Request(request)) => {
            info!("🔍 Request: {} {}", request.method, request.path);
            routes::handle_request(state, request).await
        }
        Ok(ReadOutcome::TooLarge { declared }) => {
            warn!("Upload of {} bytes refused (limit {})", declared, max_body);
            HttpResponse::json(
                413,
                json!({
                    "ok": false,
                    "error": "PayloadTooLarge",
                    "details": format!("body of {} bytes exceeds the {} byte limit", declared, max_body),
                })
                .to_string(),
            )
        }
        Ok(ReadOutcome::LengthRequired) => HttpResponse::json(
            411,
            json!({"ok": false, "error": "LengthRequired"}).to_string(),
        ),
        Ok(ReadOutcome::Malformed(reason)) => {
            warn!("Malformed request: {}", reason);
            HttpResponse::json(
                400,
                json!({"ok": false, "error": "BadRequest", "details": reason}).to_string(),
            )
        }
        Ok(ReadOutcome::Closed) => return,
        Err(e) => {
            warn!("Failed to read from stream: {}", e);
            return;
        }
    };

    if let Err(e) = stream.write_all(&response.to_bytes()).await {
        warn!("Failed to write response: {}", e);
    }
    let _ = stream.shutdown().await;
}
