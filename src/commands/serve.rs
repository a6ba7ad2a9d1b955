use anyhow::{Context, Result};
use std::sync::Arc;

use crate::cli::StrategyKind;
use crate::config::{Config, StoreKind};
use crate::materialize::Materializer;
use crate::serve::state::AppState;
use crate::store::{ContentStore, FsStore, GcsStore, MemoryStore};
use crate::strategy::{
    CommandBuilder, FlattenStrategy, InProcessQueue, MirrorStrategy, PackagesStrategy,
    RandomStrategy, Strategy, WaitStrategy,
};
use crate::upstream::{RegistryClient, Upstream};

pub async fn execute(strategy: StrategyKind, host: String, port: u16) -> Result<()> {
    let config = Config::load()?;
    let store = build_store(&config, &host, port)?;
    let materializer = Materializer::new(store);
    let local = config.store.served_locally();
    log::info!("Using {} store", config.store);

    match strategy {
        StrategyKind::Mirror => {
            let strategy = MirrorStrategy::new(
                build_upstream(&config),
                config.upstream_registry.clone(),
                config.self_host.clone(),
            );
            run(materializer, strategy, &host, port, local).await
        }
        StrategyKind::Flatten => {
            let strategy = FlattenStrategy::new(
                build_upstream(&config),
                config.upstream_registry.clone(),
                config.self_host.clone(),
            );
            run(materializer, strategy, &host, port, local).await
        }
        StrategyKind::Random => {
            let strategy = RandomStrategy::new(config.max_random_bytes);
            run(materializer, strategy, &host, port, local).await
        }
        StrategyKind::Wait => {
            let strategy = WaitStrategy::new(materializer.clone(), Arc::new(InProcessQueue));
            run(materializer, strategy, &host, port, local).await
        }
        StrategyKind::Packages => {
            let command = config
                .build_command
                .clone()
                .context("The packages strategy needs KONTAIN_BUILD_COMMAND")?;
            let builder = Arc::new(CommandBuilder::new(command));
            let strategy = PackagesStrategy::new(builder, config.self_host.clone());
            run(materializer, strategy, &host, port, local).await
        }
    }
}

async fn run<S: Strategy>(
    materializer: Materializer,
    strategy: S,
    host: &str,
    port: u16,
    serve_local_blobs: bool,
) -> Result<()> {
    let state = AppState::new(materializer, strategy);
    crate::serve::run_server(state, host, port, serve_local_blobs).await
}

fn build_store(config: &Config, host: &str, port: u16) -> Result<Arc<dyn ContentStore>> {
    let public_url = config.resolved_public_url(host, port);
    let store: Arc<dyn ContentStore> = match config.store {
        StoreKind::Memory => Arc::new(MemoryStore::new(public_url.unwrap_or_default())),
        StoreKind::Fs => {
            let dir = config
                .store_dir
                .clone()
                .context("The fs store needs KONTAIN_STORE_DIR")?;
            Arc::new(
                FsStore::new(&dir, public_url.unwrap_or_default())
                    .with_context(|| format!("Failed to open store at {}", dir.display()))?,
            )
        }
        StoreKind::Gcs => {
            let bucket = config
                .bucket
                .clone()
                .context("The gcs store needs KONTAIN_BUCKET")?;
            Arc::new(
                GcsStore::new(
                    config.store_endpoint.clone(),
                    bucket,
                    public_url,
                    config.store_token.clone(),
                )
                .context("Failed to create storage client")?,
            )
        }
    };
    Ok(store)
}

fn build_upstream(config: &Config) -> Arc<dyn Upstream> {
    Arc::new(RegistryClient::new(config.upstream_plain_http))
}
