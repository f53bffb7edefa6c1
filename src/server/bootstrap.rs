use crate::bbs::BbsClient;
use crate::config::EmitterConfig;
use crate::emitter::{
    spawn_greet_responder, NatsEmitter, RoutingApiClient, TcpRoutingApiEmitter,
};
use crate::handler::RouteHandler;
use crate::metrics::Metrics;
use crate::routingtable::{MessageBuilder, RouterGreetingMessage};
use crate::server;
use crate::watcher::{Watcher, WatcherConfig};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// CLI arguments forwarded from `main()`.
pub struct BootstrapArgs {
    pub config_path: std::path::PathBuf,
    pub admin_listen: String,
}

/// Emitter lifecycle: init → connect → watch → drain → shutdown.
pub async fn run(args: BootstrapArgs) -> Result<()> {
    // Config is loaded before tracing so its log level can seed the filter;
    // RUST_LOG still wins when set.
    let config = EmitterConfig::load(&args.config_path)?;
    init_tracing(&config.log_level);
    info!(
        "server: starting route-emitter, bbs={}, nats={}, cell_id={}",
        config.bbs.address,
        config.nats.servers.join(","),
        if config.cell_id.is_empty() {
            "<all>"
        } else {
            config.cell_id.as_str()
        },
    );

    let metrics = Metrics::install();
    let stats = server::new_stats_handle();
    let shutdown = Arc::new(Notify::new());

    // Phase 1: connect the sinks. A refused NATS connection is fatal; the
    // routing API is optional.
    let nats_client = async_nats::connect(config.nats.servers.join(",")).await?;
    info!("server: connected to nats");
    let registry_emitter = NatsEmitter::new(nats_client.clone());
    spawn_greet_responder(
        nats_client,
        RouterGreetingMessage {
            minimum_register_interval: config.sync.emit_interval_secs,
            prune_threshold_in_seconds: config.sync.route_ttl_seconds,
        },
        shutdown.clone(),
    );

    let tcp_emitter = if config.routing_api.url.is_empty() {
        info!("server: routing api not configured, tcp routes disabled");
        TcpRoutingApiEmitter::disabled()
    } else {
        let client = RoutingApiClient::new(
            &config.routing_api.url,
            Duration::from_secs(config.bbs.client_timeout_secs),
        )?;
        TcpRoutingApiEmitter::new(
            client,
            config.sync.route_ttl_seconds,
            config.use_direct_instance_routes,
        )
    };

    // Phase 2: the workload store client drives both snapshots and events.
    let bbs = BbsClient::new(
        &config.bbs.address,
        Duration::from_secs(config.bbs.client_timeout_secs),
    )?;

    let builder = if config.use_internal_address_builder {
        MessageBuilder::InternalAddress
    } else {
        MessageBuilder::HostPort
    };
    let handler = RouteHandler::new(builder, registry_emitter, tcp_emitter, config.cell_id.clone());

    let watcher = Watcher::new(
        bbs.clone(),
        bbs,
        handler,
        WatcherConfig {
            cell_id: config.cell_id.clone(),
            sync_interval: Duration::from_secs(config.sync.sync_interval_secs),
            emit_interval: Duration::from_secs(config.sync.emit_interval_secs),
            snapshot_timeout: Duration::from_secs(config.bbs.client_timeout_secs),
        },
        stats.clone(),
    );

    // Phase 3: admin server and the dispatcher loop.
    start_admin_server(metrics, stats, &args.admin_listen);
    let mut watcher_handle = tokio::spawn(watcher.run(shutdown.clone()));

    // Phase 4: block until a signal arrives or the watcher dies.
    tokio::select! {
        _ = wait_for_signal() => {
            shutdown.notify_waiters();
            watcher_handle.await??;
        }
        result = &mut watcher_handle => {
            shutdown.notify_waiters();
            result??;
            anyhow::bail!("watcher exited unexpectedly");
        }
    }

    info!("server: shutdown complete");
    Ok(())
}

fn init_tracing(log_level: &str) {
    let (non_blocking, _guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stdout());

    let fallback = log_level.to_string();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .json(),
        )
        .init();

    std::mem::forget(_guard);
}

fn start_admin_server(metrics: Metrics, stats: server::StatsHandle, listen: &str) {
    let state = server::AdminState { metrics, stats };
    let listen = listen.to_string();
    tokio::spawn(async move {
        if let Err(e) = server::run_admin_server(&listen, state).await {
            tracing::error!("server: admin failed, error={}", e);
        }
    });
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("server: received SIGINT, shutting down"),
        _ = terminate => info!("server: received SIGTERM, shutting down"),
    }
}
