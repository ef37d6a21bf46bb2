//! Operator-facing HTTP surface: `/health`, `/ready`, `/ready/detailed`,
//! `/metrics`. Runs on its own thread and stops as soon as the shared
//! shutdown signal fires, polling `recv_timeout` rather than blocking
//! forever on `recv` so it notices shutdown promptly.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use confd_backend::Backend;
use confd_scheduler::ShutdownSignal;
use tiny_http::{Response, Server};

use crate::metrics::CountingMetrics;

/// Wraps the running backend so `/ready` can report its *current* health
/// rather than a cached "started up fine" flag — a backend that goes
/// unreachable mid-run should flip `/ready` to 503 on the next poll.
pub struct Readiness {
    backend: Arc<dyn Backend>,
}

impl Readiness {
    pub fn new(backend: Arc<dyn Backend>) -> Arc<Self> {
        Arc::new(Self { backend })
    }

    /// `Ok(())` if the backend's health check passes right now.
    pub fn check(&self) -> Result<(), confd_types::ConfdError> {
        self.backend.health_check()
    }
}

pub fn spawn(
    addr: &str,
    readiness: Arc<Readiness>,
    metrics: Arc<CountingMetrics>,
    shutdown: Arc<ShutdownSignal>,
) -> std::io::Result<JoinHandle<()>> {
    let server = Server::http(addr).map_err(|e| std::io::Error::other(e.to_string()))?;
    Ok(thread::spawn(move || serve(server, readiness, metrics, shutdown)))
}

fn serve(server: Server, readiness: Arc<Readiness>, metrics: Arc<CountingMetrics>, shutdown: Arc<ShutdownSignal>) {
    loop {
        if shutdown.is_triggered() {
            return;
        }
        let request = match server.recv_timeout(Duration::from_millis(200)) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(e) => {
                log::warn!("http server recv failed: {e}");
                continue;
            }
        };

        let (status, body) = match request.url() {
            "/health" => (200, "ok".to_string()),
            "/ready" => match readiness.check() {
                Ok(()) => (200, "ready".to_string()),
                Err(_) => (503, "not ready".to_string()),
            },
            "/ready/detailed" => {
                let body = match readiness.check() {
                    Ok(()) => r#"{"ready":true}"#.to_string(),
                    Err(e) => format!(r#"{{"ready":false,"error":"{}"}}"#, e.to_string().replace('"', "'")),
                };
                (200, body)
            }
            "/metrics" => (200, metrics.render()),
            _ => (404, "not found".to_string()),
        };

        let response = Response::from_string(body).with_status_code(status);
        if let Err(e) = request.respond(response) {
            log::debug!("http response failed: {e}");
        }
    }
}
