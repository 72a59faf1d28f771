mod args;
mod auth;
mod handlers;
mod models;
mod state;

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use orbit_common::telemetry::init_tracing;
use orbit_common::ConfigStore;
use orbit_core::{ContainerRuntime, DockerRuntime, HostRuntime, PoolManager};

use crate::args::Args;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("orbit-bridge");
    let args = Args::parse();

    let store = ConfigStore::new(ConfigStore::default_root());

    let node_name = match store.load() {
        Ok(config) => config.node_name,
        Err(_) => hostname::get()?.to_string_lossy().into_owned(),
    };
    let runtime: Arc<dyn ContainerRuntime> = match args.runtime.as_str() {
        "host" => Arc::new(HostRuntime::new()),
        _ => Arc::new(DockerRuntime::new(store.compose_file(), &node_name)),
    };

    let access_key = args
        .access_key
        .or_else(|| store.load().ok().and_then(|c| c.user_api_key));
    if access_key.is_none() {
        tracing::warn!("no access key configured, all gated routes answer 401");
    }

    let state = AppState {
        store: store.clone(),
        manager: Arc::new(PoolManager::new(store, runtime)),
        access_key,
    };

    let app = handlers::build_router(state);
    let listener = tokio::net::TcpListener::bind(&args.listen_addr).await?;
    info!(addr = %args.listen_addr, "bridge listening");
    axum::serve(listener, app).await?;
    Ok(())
}
