//! HTTP endpoint for Prometheus scraping and liveness probes
//!
//! - `/metrics`: session metrics in Prometheus text format
//! - `/health`: 200 while the session is streaming, 503 otherwise

use super::SessionMetrics;
use anyhow::{Context, Result};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    pub listen_addr: SocketAddr,
    pub metrics_path: String,
}

impl Default for MetricsServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 9090)),
            metrics_path: "/metrics".to_string(),
        }
    }
}

pub struct MetricsServer {
    config: MetricsServerConfig,
    metrics: Arc<SessionMetrics>,
}

impl MetricsServer {
    pub fn new(config: MetricsServerConfig, metrics: Arc<SessionMetrics>) -> Self {
        Self { config, metrics }
    }

    /// Bind the configured address and serve until `shutdown` flips to true
    pub async fn serve(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .with_context(|| format!("Failed to bind metrics server on {}", self.config.listen_addr))?;
        self.serve_on(listener, shutdown).await
    }

    pub async fn serve_on(
        self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let local = listener.local_addr().context("metrics listener has no address")?;
        info!(
            "Metrics server listening on http://{}{}",
            local, self.config.metrics_path
        );

        let server = Arc::new(self);

        loop {
            let accepted = tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break,
                accepted = listener.accept() => accepted,
            };

            let (stream, remote_addr) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let server = server.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let server = server.clone();
                    async move { Ok::<_, hyper::Error>(server.handle(req.uri().path())) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Connection error from {}: {}", remote_addr, err);
                }
            });
        }

        info!("Metrics server stopped");
        Ok(())
    }

    fn handle(&self, path: &str) -> Response<Full<Bytes>> {
        debug!(path, "metrics request");

        if path == "/health" || path == "/healthz" {
            return if self.metrics.is_streaming() {
                text(StatusCode::OK, "OK".to_string())
            } else {
                text(StatusCode::SERVICE_UNAVAILABLE, "NOT STREAMING".to_string())
            };
        }

        if path == self.config.metrics_path {
            return match self.metrics.encode() {
                Ok(body) => {
                    let mut response = text(StatusCode::OK, body);
                    response.headers_mut().insert(
                        CONTENT_TYPE,
                        HeaderValue::from_static("text/plain; version=0.0.4"),
                    );
                    response
                }
                Err(e) => {
                    error!("Failed to encode metrics: {:#}", e);
                    text(StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {}", e))
                }
            };
        }

        if path == "/" {
            return text(
                StatusCode::OK,
                format!(
                    "feedline\n\nEndpoints:\n  {} - Prometheus metrics\n  /health - Streaming probe\n",
                    self.config.metrics_path
                ),
            );
        }

        warn!("Unknown metrics endpoint requested: {}", path);
        text(StatusCode::NOT_FOUND, "Not Found".to_string())
    }
}

fn text(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn server() -> (MetricsServer, Arc<SessionMetrics>) {
        let metrics = Arc::new(SessionMetrics::new().unwrap());
        (
            MetricsServer::new(MetricsServerConfig::default(), metrics.clone()),
            metrics,
        )
    }

    #[test]
    fn test_config_default() {
        let config = MetricsServerConfig::default();
        assert_eq!(config.metrics_path, "/metrics");
        assert_eq!(config.listen_addr.port(), 9090);
    }

    #[test]
    fn test_health_follows_state() {
        let (server, metrics) = server();
        assert_eq!(server.handle("/health").status(), StatusCode::SERVICE_UNAVAILABLE);

        metrics.state.set(SessionState::Streaming.code());
        assert_eq!(server.handle("/health").status(), StatusCode::OK);

        metrics.state.set(SessionState::Backoff.code());
        assert_eq!(server.handle("/healthz").status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_routes() {
        let (server, _) = server();
        let metrics = server.handle("/metrics");
        assert_eq!(metrics.status(), StatusCode::OK);
        assert_eq!(
            metrics.headers().get(CONTENT_TYPE).unwrap(),
            "text/plain; version=0.0.4"
        );
        assert_eq!(server.handle("/").status(), StatusCode::OK);
        assert_eq!(server.handle("/nope").status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_serve_over_http() {
        let (server, metrics) = server();
        metrics.messages_total.inc_by(7);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(server.serve_on(listener, stop_rx));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("feedline_messages_total 7"));

        stop_tx.send(true).unwrap();
        task.await.unwrap().unwrap();
    }
}
