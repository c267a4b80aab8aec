//! Newline-delimited JSON protocol. The first line of a connection is a
//! hello frame naming the account; every line after that is one request,
//! answered with exactly one response line.

use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::debug;

use crate::api::{self, Request, Response};
use crate::observability;
use crate::tenant::TenantManager;

/// Requests larger than this are a protocol violation, not data.
pub const MAX_LINE_LEN: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
struct Hello {
    account: String,
}

pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
) -> Result<(), LinesCodecError> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    // Hello frame selects the account and pins the engine for the
    // connection's lifetime.
    let Some(first) = framed.next().await else {
        return Ok(());
    };
    let hello: Hello = match serde_json::from_str(&first?) {
        Ok(h) => h,
        Err(e) => {
            send_error(&mut framed, "bad_hello", &format!("malformed hello: {e}")).await?;
            return Ok(());
        }
    };
    let engine = match tenant_manager.get_or_create(&hello.account) {
        Ok(engine) => engine,
        Err(e) => {
            send_error(&mut framed, "bad_account", &e.to_string()).await?;
            return Ok(());
        }
    };
    framed
        .send(json!({ "status": "ok", "data": { "account": hello.account } }).to_string())
        .await?;

    while let Some(line) = framed.next().await {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let req: Request = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                send_error(&mut framed, "bad_request", &e.to_string()).await?;
                continue;
            }
        };

        let label = observability::request_label(&req);
        debug!("request: {label}");
        let started = Instant::now();
        let resp = api::dispatch(&engine, req).await;
        let status = match &resp {
            Response::Ok { .. } => "ok",
            Response::CapacityFull { .. } => "capacity_full",
            Response::Error { .. } => "error",
        };
        metrics::counter!(
            observability::REQUESTS_TOTAL,
            "request" => label,
            "status" => status,
        )
        .increment(1);
        metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "request" => label)
            .record(started.elapsed().as_secs_f64());

        framed.send(render(&resp)).await?;
    }
    Ok(())
}

fn render(resp: &Response) -> String {
    match serde_json::to_string(resp) {
        Ok(s) => s,
        Err(e) => json!({
            "status": "error",
            "code": "internal",
            "message": format!("response serialization: {e}"),
        })
        .to_string(),
    }
}

async fn send_error(
    framed: &mut Framed<TcpStream, LinesCodec>,
    code: &str,
    message: &str,
) -> Result<(), LinesCodecError> {
    framed
        .send(json!({ "status": "error", "code": code, "message": message }).to_string())
        .await
}
