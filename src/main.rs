use std::{future::IntoFuture, process, sync::Arc};

use cachet::{
    application::{error::AppError, items::ItemService, repos::ItemsRepo},
    cache::{CacheClient, CacheConfig, MemoryStore},
    config,
    infra::{error::InfraError, http, memory::InMemoryItemsRepo, telemetry},
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Check(_) => run_check(settings),
    }
}

fn build_item_service(settings: &config::Settings) -> Result<Arc<ItemService>, AppError> {
    let cache_config = CacheConfig::from(&settings.cache);
    let store = Arc::new(MemoryStore::new(&cache_config));
    let client = CacheClient::new(store, &cache_config);
    let repo: Arc<dyn ItemsRepo> = Arc::new(InMemoryItemsRepo::new());

    let service = ItemService::new(repo, client, &cache_config)?;
    Ok(Arc::new(service))
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let items = build_item_service(&settings)?;
    let router = http::build_router(http::ApiState { items });

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        addr = %settings.server.addr,
        cache_enabled = settings.cache.enabled,
        eviction_mode = settings.cache.eviction_mode.as_str(),
        "listening"
    );

    let grace = settings.server.graceful_shutdown;
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .into_future();

    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        _ = async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
            tokio::time::sleep(grace).await;
        } => {
            warn!(grace_secs = grace.as_secs(), "graceful shutdown timed out, closing open connections");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received, draining");
}

/// Validate configuration and cache wiring without serving traffic.
fn run_check(settings: config::Settings) -> Result<(), AppError> {
    let items = build_item_service(&settings)?;

    info!(
        enabled = settings.cache.enabled,
        list_ttl_ms = settings.cache.list_ttl.as_millis() as u64,
        detail_ttl_ms = settings.cache.detail_ttl.as_millis() as u64,
        store_capacity = settings.cache.store_capacity.get(),
        eviction_mode = settings.cache.eviction_mode.as_str(),
        common_list_queries = settings.cache.common_list_queries.len(),
        list_staleness_bound_ms = items.list_staleness_bound().as_millis() as u64,
        "configuration valid"
    );
    Ok(())
}
