mod admin;
pub mod bootstrap;
pub mod runtime;
pub mod state;

pub use state::{new_stats_handle, EmitterStats, StatsHandle};

use crate::metrics::Metrics;
use anyhow::Result;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Everything the admin endpoints need, cheaply cloneable.
#[derive(Clone)]
pub struct AdminState {
    pub metrics: Metrics,
    pub stats: StatsHandle,
}

/// Run the admin server for health/readiness checks and metrics.
pub async fn run_admin_server(listen: &str, state: AdminState) -> Result<()> {
    let addr: SocketAddr = listen.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("server: admin listening, addr={}", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let state = state.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let svc = service_fn(move |req: Request<Incoming>| {
                let state = state.clone();
                async move { admin::handle_admin(req, state) }
            });

            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .http1()
                .keep_alive(true)
                .serve_connection_with_upgrades(io, svc)
                .await
            {
                if !e.to_string().contains("connection closed") {
                    error!("server: admin: connection error, error={}", e);
                }
            }
        });
    }
}
