//! HTTP bandwidth handler
//!
//! Every path on the HTTP port accepts GET, PUT and POST. The request body is
//! drained before replying so the transfer is complete, then the declared
//! content length is credited to the caller's HTTP bandwidth test.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes};
use hyper::header::CONTENT_LENGTH;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use crate::protocol::{TestProtocol, TestType};
use crate::serve::ServerContext;

pub async fn run_http_server(listener: TcpListener, ctx: Arc<ServerContext>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                ctx.ui
                    .print_dbg(&format!("Error accepting new HTTP connection: {}", e));
                continue;
            }
        };
        let io = TokioIo::new(stream);
        let ctx = ctx.clone();

        tokio::spawn(async move {
            let service_ctx = ctx.clone();
            let service = service_fn(move |req| {
                let ctx = service_ctx.clone();
                async move { handle_request(req, peer, &ctx).await }
            });

            if let Err(err) = hyper::server::conn::http1::Builder::new()
                .serve_connection(io, service)
                .await
            {
                ctx.ui
                    .print_dbg(&format!("Error serving HTTP connection from {}: {}", peer, err));
            }
        });
    }
}

/// Handle one request from `peer`.
///
/// The `ok` body is produced before the caller is matched to a test. An
/// unmatched caller therefore still gets status 200, with the rejection text
/// appended to the body.
pub async fn handle_request<B>(
    req: Request<B>,
    peer: SocketAddr,
    ctx: &ServerContext,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body,
    B::Error: std::fmt::Display,
{
    let (parts, body) = req.into_parts();
    let content_length = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    if let Err(e) = body.collect().await {
        ctx.ui.print_dbg(&format!("Error reading HTTP body: {}", e));
        return Ok(reply(StatusCode::BAD_REQUEST, format!("{}\n", e)));
    }

    match parts.method {
        Method::GET | Method::PUT | Method::POST => {}
        _ => {
            return Ok(reply(
                StatusCode::METHOD_NOT_ALLOWED,
                "Only GET, PUT and POST are supported.\n".to_string(),
            ));
        }
    }

    let mut body = String::from("ok");
    let Some(test) = ctx
        .registry
        .lookup(peer.ip(), TestProtocol::Http, TestType::Bandwidth)
    else {
        ctx.ui
            .print_dbg(&format!("Unauthorized HTTP request from {}", peer));
        body.push_str("Unauthorized request.\n");
        return Ok(reply(StatusCode::OK, body));
    };

    if content_length > 0 {
        test.result().add_cumulative(content_length);
    }
    Ok(reply(StatusCode::OK, body))
}

fn reply(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}
