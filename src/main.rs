#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::Result;
use clap::Parser;
use route_emitter::server;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "route-emitter",
    about = "Projects cluster workload state onto the HTTP and TCP routing tiers"
)]
struct Cli {
    /// Path to the emitter config file
    #[arg(short, long, default_value = "route-emitter.toml")]
    config: PathBuf,

    /// Admin API listen address (health/metrics)
    #[arg(long, default_value = "0.0.0.0:9091")]
    admin_listen: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let worker_threads = server::runtime::worker_thread_count();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?;

    rt.block_on(server::bootstrap::run(server::bootstrap::BootstrapArgs {
        config_path: cli.config,
        admin_listen: cli.admin_listen,
    }))
}
