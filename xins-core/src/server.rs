//! hyper HTTP/1 adapter around the [`Engine`]

use crate::api::Api;
use crate::engine::Engine;
use crate::http::{HttpRequest, HttpResponse};
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::header::{self, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioIo, TokioTimer};
use prometheus::Registry;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use xins_config::Config;

/// Per-connection limits taken from the configuration.
#[derive(Debug, Clone, Copy)]
pub struct ServerLimits {
    pub max_body_size: usize,
    /// Time allowed for receiving a complete request body.
    pub request_read_timeout: Duration,
    /// Time allowed between requests on a kept-alive connection.
    pub idle_timeout: Duration,
}

impl ServerLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_body_size: config.max_body_size(),
            request_read_timeout: Duration::from_secs(config.timeouts.request_read),
            idle_timeout: Duration::from_secs(config.timeouts.idle),
        }
    }
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_body_size: xins_config::DEFAULT_MAX_BODY_SIZE,
            request_read_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

/// Serves `api` on every configured address until Ctrl-C.
pub async fn run_server(
    config: Config,
    api: Api,
    registry: Option<Registry>,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = Arc::new(Engine::new(&config, api, registry.as_ref())?);
    let limits = ServerLimits::from_config(&config);

    let mut listeners: Vec<TcpListener> = Vec::new();
    for addr_str in &config.listen_addrs {
        let addr: SocketAddr = addr_str.parse()?;
        info!("Starting listener on {}", addr);
        listeners.push(TcpListener::bind(addr).await?);
    }

    info!("Server started, waiting for requests...");

    let mut connections = JoinSet::new();
    loop {
        let mut accepts = FuturesUnordered::new();
        for listener in &listeners {
            accepts.push(listener.accept());
        }

        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            Some(result) = accepts.next() => {
                match result {
                    Ok((socket, addr)) => {
                        connections.spawn(handle_connection(socket, addr, engine.clone(), limits));
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
        }
    }

    drop(listeners);
    let grace = Duration::from_secs(config.shutdown_timeout());
    info!(
        "Waiting up to {:?} for {} open connections",
        grace,
        connections.len()
    );
    if timeout(grace, async { while connections.join_next().await.is_some() {} })
        .await
        .is_err()
    {
        warn!("Shutdown timeout elapsed, aborting {} connections", connections.len());
        connections.abort_all();
    }

    engine.conventions().shutdown();
    info!("Shutting down server");
    Ok(())
}

/// Accepts connections on `listener` forever.
pub async fn serve(
    listener: TcpListener,
    engine: Arc<Engine>,
    limits: ServerLimits,
) -> std::io::Result<()> {
    loop {
        let (socket, addr) = listener.accept().await?;
        tokio::spawn(handle_connection(socket, addr, engine.clone(), limits));
    }
}

async fn handle_connection(
    socket: TcpStream,
    addr: SocketAddr,
    engine: Arc<Engine>,
    limits: ServerLimits,
) {
    debug!("New connection from {}", addr);
    let io = TokioIo::new(socket);
    let service = service_fn(move |req| {
        let engine = engine.clone();
        async move { Ok::<_, Infallible>(handle_request(req, addr, engine, limits).await) }
    });

    if let Err(e) = http1::Builder::new()
        .timer(TokioTimer::new())
        .header_read_timeout(limits.idle_timeout)
        .serve_connection(io, service)
        .await
    {
        debug!("Connection from {} ended with error: {}", addr, e);
    }
}

async fn handle_request(
    req: Request<Incoming>,
    addr: SocketAddr,
    engine: Arc<Engine>,
    limits: ServerLimits,
) -> Response<Full<Bytes>> {
    let (parts, body) = req.into_parts();

    let declared_length = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared_length.is_some_and(|len| len > limits.max_body_size) {
        return status_response(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
    }

    let collected = timeout(
        limits.request_read_timeout,
        Limited::new(body, limits.max_body_size).collect(),
    )
    .await;
    let body = match collected {
        Ok(Ok(collected)) => collected.to_bytes(),
        Ok(Err(e)) if e.downcast_ref::<LengthLimitError>().is_some() => {
            return status_response(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
        }
        Ok(Err(e)) => {
            debug!("Failed to read request body from {}: {}", addr, e);
            return status_response(StatusCode::BAD_REQUEST, "Unable to read request body");
        }
        Err(_) => {
            debug!("Timed out reading request body from {}", addr);
            return status_response(StatusCode::REQUEST_TIMEOUT, "Request body not received in time");
        }
    };

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let is_head = parts.method == Method::HEAD;
    let request = HttpRequest::new(parts.method.clone(), path_and_query)
        .with_headers(parts.headers)
        .with_body(body)
        .with_remote_addr(addr);

    // Conventions and functions are synchronous and may block.
    match tokio::task::spawn_blocking(move || engine.handle(request)).await {
        Ok(response) => into_hyper(response, is_head),
        Err(e) => {
            error!("Request handler task failed: {}", e);
            status_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

fn into_hyper(response: HttpResponse, is_head: bool) -> Response<Full<Bytes>> {
    let (status, headers, body, length) = response.into_parts();
    let body = if is_head { Vec::new() } else { body };

    let mut out = Response::new(Full::new(Bytes::from(body)));
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    out.headers_mut()
        .insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    out
}

fn status_response(status: StatusCode, detail: &str) -> Response<Full<Bytes>> {
    into_hyper(HttpResponse::with_status(status, detail), false)
}
