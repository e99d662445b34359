pub mod demo;

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{self, HeaderValue};
use hyper::server::conn::http1;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, Registry, TextEncoder};
use std::error::Error;
use std::net::SocketAddr;
use std::path::Path;
use tokio::net::TcpListener;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, fmt};
use xins_config::Config;
use xins_core::run_server;

pub async fn run(config_path: &Path) -> Result<(), Box<dyn Error>> {
    // Initialize logging
    fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into())
                .add_directive("xins=debug".parse()?),
        )
        .with_target(false)
        .json()
        .init();

    let config = Config::from_file(config_path)?;
    info!("Loaded configuration from {}", config_path.display());

    let registry = if config.metrics.enabled {
        let registry = Registry::new();
        let metrics_addr: SocketAddr = config.metrics.address.parse()?;
        let metrics_listener = TcpListener::bind(metrics_addr).await?;
        info!("Serving metrics on {}", metrics_addr);
        tokio::spawn(serve_metrics(metrics_listener, registry.clone()));
        Some(registry)
    } else {
        None
    };

    let api = demo::api(&config.api_name)?;
    run_server(config, api, registry).await?;

    Ok(())
}

/// Answers every request on `listener` with the registry in text format.
pub async fn serve_metrics(listener: TcpListener, registry: Registry) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Metrics accept error: {}", e);
                continue;
            }
        };
        let registry = registry.clone();
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            let service = hyper::service::service_fn(move |_req: Request<hyper::body::Incoming>| {
                let registry = registry.clone();
                async move { Ok::<_, std::convert::Infallible>(metrics_response(&registry)) }
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Metrics connection from {} failed: {}", addr, err);
            }
        });
    }
}

fn metrics_response(registry: &Registry) -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    match encoder.encode(&registry.gather(), &mut buffer) {
        Ok(()) => {
            let mut response = Response::new(Full::new(Bytes::from(buffer)));
            if let Ok(content_type) = HeaderValue::from_str(encoder.format_type()) {
                response
                    .headers_mut()
                    .insert(header::CONTENT_TYPE, content_type);
            }
            response
        }
        Err(e) => {
            error!("Metrics encoding error: {}", e);
            let mut response = Response::new(Full::new(Bytes::from_static(b"metrics unavailable")));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}
