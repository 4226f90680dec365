use std::{process, sync::Arc};

use apalis::{
    layers::WorkerBuilderExt,
    prelude::{Monitor, WorkerBuilder, WorkerFactoryFn},
};
use apalis_cron::CronStream;
use apalis_sql::{Config as ApalisSqlConfig, postgres::PostgresStorage};
use bookbytes_cache::{
    application::{
        error::{AppError, error_chain},
        invalidation::{CacheInvalidationHook, InvalidationHook},
        jobs::{
            CACHE_INVALIDATION_NAMESPACE, JobWorkerContext, process_cache_invalidation_job,
            process_purge_expired_cache_job, purge_expired_schedule,
        },
        lookup::{BookLookupService, SearchQuery},
    },
    cache::{
        CacheConfig, CacheService, DurableStore, HotStore, MemoryHotStore, NullDurableStore,
        RedisHotStore, RedisHotStoreConfig,
    },
    config,
    infra::{
        db::{self, PostgresDurableStore},
        error::InfraError,
        telemetry,
    },
    provider::{ContentProvider, OpenLibraryConfig, OpenLibraryProvider},
};
use sqlx::PgPool;
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
    let chain = error_chain(error).join(": ");
    if dispatcher::has_been_set() {
        error!(error = %chain, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %chain, "application error");
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
        config::Command::Migrate(_) => run_migrate(settings).await,
        config::Command::Purge(_) => run_purge(settings).await,
        config::Command::Lookup(args) => run_lookup(settings, args).await,
    }
}

/// Shared runtime wiring for every command that touches the cache.
struct CacheRuntime {
    pool: Option<PgPool>,
    cache: Arc<CacheService>,
    provider: Arc<dyn ContentProvider>,
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let runtime = build_cache_runtime(&settings).await?;
    let hook: Arc<dyn InvalidationHook> = Arc::new(CacheInvalidationHook::new(
        Arc::clone(&runtime.cache),
        runtime.provider.name(),
    ));
    let context = JobWorkerContext {
        cache: Arc::clone(&runtime.cache),
        invalidation: hook,
    };

    let monitor_handle = match runtime.pool.as_ref() {
        Some(pool) => Some(spawn_job_monitor(pool.clone(), context, &settings.jobs)?),
        None => {
            warn!("No database configured; background jobs are disabled");
            None
        }
    };

    info!(
        provider = runtime.provider.name(),
        durable = runtime.pool.is_some(),
        "Cache service running; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!("Shutdown requested");

    if let Some(handle) = monitor_handle {
        handle.abort();
        let _ = handle.await;
    }

    flush_cache(&runtime.cache).await;
    Ok(())
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    let pool = connect_database(&settings)
        .await?
        .ok_or_else(|| InfraError::configuration("database url is not configured"))?;
    pool.close().await;
    info!("Migrations applied");
    Ok(())
}

async fn run_purge(settings: config::Settings) -> Result<(), AppError> {
    let runtime = build_cache_runtime(&settings).await?;
    if runtime.pool.is_none() {
        return Err(AppError::from(InfraError::configuration(
            "database url is not configured",
        )));
    }
    let purged = runtime.cache.purge_expired().await?;
    info!(purged_count = purged, "Purged expired cache rows");
    Ok(())
}

async fn run_lookup(settings: config::Settings, args: config::LookupArgs) -> Result<(), AppError> {
    let runtime = build_cache_runtime(&settings).await?;
    let service = BookLookupService::new(Arc::clone(&runtime.cache), runtime.provider);

    let result = if let Some(isbn) = args.isbn.as_deref() {
        service
            .book_by_isbn(isbn)
            .await
            .map(serde_json::to_value)
    } else if let Some(work) = args.work.as_deref() {
        service
            .work(work)
            .await
            .map(serde_json::to_value)
    } else {
        let query = SearchQuery {
            author: args.author,
            ..SearchQuery::title(args.title.unwrap_or_default())
        };
        service
            .search(&query)
            .await
            .map(serde_json::to_value)
    };

    flush_cache(&runtime.cache).await;

    let value = result
        .map_err(|err| AppError::unexpected(err.to_string()))?
        .map_err(|err| AppError::unexpected(format!("failed to encode document: {err}")))?;
    let rendered = serde_json::to_string_pretty(&value)
        .map_err(|err| AppError::unexpected(format!("failed to encode document: {err}")))?;
    println!("{rendered}");
    Ok(())
}

async fn build_cache_runtime(settings: &config::Settings) -> Result<CacheRuntime, AppError> {
    let pool = connect_database(settings).await?;
    let hot = build_hot_store(&settings.hot_store).await?;
    let durable: Arc<dyn DurableStore> = match pool.as_ref() {
        Some(pool) => Arc::new(PostgresDurableStore::new(pool.clone())),
        None => Arc::new(NullDurableStore),
    };

    let cache = Arc::new(CacheService::new(
        hot,
        durable,
        CacheConfig::from(&settings.cache),
    ));

    let provider: Arc<dyn ContentProvider> =
        Arc::new(OpenLibraryProvider::new(provider_config(&settings.provider))?);

    Ok(CacheRuntime {
        pool,
        cache,
        provider,
    })
}

async fn connect_database(settings: &config::Settings) -> Result<Option<PgPool>, AppError> {
    let Some(database_url) = settings.database.url.as_ref() else {
        return Ok(None);
    };

    let pool = db::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    db::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresStorage::<()>::setup(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok(Some(pool))
}

async fn build_hot_store(hot: &config::HotStoreSettings) -> Result<Arc<dyn HotStore>, AppError> {
    match hot.backend {
        config::HotStoreBackend::Memory => {
            Ok(Arc::new(MemoryHotStore::new(hot.capacity, hot.shards)))
        }
        config::HotStoreBackend::Redis => {
            let url = hot
                .redis_url
                .clone()
                .ok_or_else(|| InfraError::configuration("hot_store.redis_url is not configured"))?;
            let store = RedisHotStore::connect(RedisHotStoreConfig {
                url,
                key_prefix: hot.key_prefix.clone(),
            })
            .await
            .map_err(|err| AppError::from(InfraError::hot_store(err.to_string())))?;
            Ok(Arc::new(store))
        }
    }
}

fn provider_config(provider: &config::ProviderSettings) -> OpenLibraryConfig {
    OpenLibraryConfig {
        base_url: provider.base_url.clone(),
        timeout: provider.timeout,
        tag: provider.tag.clone(),
        app_name: provider.app_name.clone(),
        app_version: provider.app_version.clone(),
        contact: provider.contact.clone(),
        page_size: provider.page_size,
    }
}

async fn flush_cache(cache: &CacheService) {
    if !cache.shutdown().await {
        warn!(
            pending = cache.pending_writes(),
            "Shutdown timed out with durable writes still pending"
        );
    }
}

fn spawn_job_monitor(
    pool: PgPool,
    context: JobWorkerContext,
    jobs: &config::JobsSettings,
) -> Result<tokio::task::JoinHandle<()>, AppError> {
    let invalidation_storage =
        PostgresStorage::new_with_config(pool, ApalisSqlConfig::new(CACHE_INVALIDATION_NAMESPACE));

    let invalidation_worker = WorkerBuilder::new("cache-invalidation-worker")
        .concurrency(jobs.invalidation_concurrency.get() as usize)
        .data(context.clone())
        .backend(invalidation_storage)
        .build_fn(process_cache_invalidation_job);

    let schedule = purge_expired_schedule(&jobs.purge_schedule).map_err(AppError::validation)?;
    let purge_worker = WorkerBuilder::new("purge-expired-cache-worker")
        .data(context)
        .backend(CronStream::new(schedule))
        .build_fn(process_purge_expired_cache_job);

    let monitor = Monitor::new()
        .register(invalidation_worker)
        .register(purge_worker);

    Ok(tokio::spawn(async move {
        if let Err(err) = monitor.run().await {
            error!(error = %err, "job monitor stopped");
        }
    }))
}
