// Main entry point for the content generation server

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use generation_core::domains::generation::{default_pipeline, PipelineSettings};
use generation_core::kernel::jobs::{
    DeliveryPolicy, HttpTaskQueue, InProcessQueue, JobManager, JobStore, JobWorker,
    JobWorkerConfig, LogNotifier, MemoryJobStore, PostgresJobStore, TaskQueue, TerminalNotifier,
    WebhookNotifier,
};
use generation_core::kernel::{BaseContentProvider, ChatCompletionsProvider, ProgressHub, ServerDeps};
use generation_core::server::{build_app, AppState};
use generation_core::Config;
use provider_gateway::{Gateway, HttpTransport, OperationRegistry, ResponseCache, RetryPolicy};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,generation_core=debug,provider_gateway=debug,sqlx=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting content generation server");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    // Job store
    let (store, db_pool): (Arc<dyn JobStore>, Option<PgPool>) = match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url)
                .await
                .context("Failed to connect to database")?;

            tracing::info!("Running database migrations...");
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("Failed to run migrations")?;
            tracing::info!("Migrations complete");

            let store: Arc<dyn JobStore> = Arc::new(PostgresJobStore::new(pool.clone()));
            (store, Some(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, jobs are kept in memory");
            let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
            (store, None)
        }
    };

    // Provider gateway
    let operations = match &config.provider_operations_file {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read operation table {path}"))?;
            OperationRegistry::from_json(&raw).context("Invalid operation table")?
        }
        None => OperationRegistry::seo_defaults(),
    };
    let transport = HttpTransport::new(&config.provider_base_url)
        .with_timeout(Duration::from_secs(60))
        .context("Failed to build provider transport")?
        .with_basic_auth(&config.provider_login, &config.provider_password)
        .with_status_pointer("/tasks/0/status_code");
    let gateway = Arc::new(
        Gateway::new(
            Arc::new(transport),
            ResponseCache::in_memory(config.cache_ttls()),
            operations,
        )
        .with_retry_policy(RetryPolicy::default()),
    );

    // Content providers
    let primary_ai: Arc<dyn BaseContentProvider> = Arc::new(
        ChatCompletionsProvider::openai(&config.openai_api_key, &config.openai_model)
            .context("Failed to create OpenAI provider")?,
    );
    let fallback_ai: Option<Arc<dyn BaseContentProvider>> = match &config.openrouter_api_key {
        Some(key) => Some(Arc::new(
            ChatCompletionsProvider::openrouter(key, &config.openrouter_model)
                .context("Failed to create OpenRouter provider")?,
        )),
        None => {
            tracing::warn!("OPENROUTER_API_KEY not set, writing stages have no fallback provider");
            None
        }
    };

    let progress_hub = ProgressHub::new();
    let deps = ServerDeps::new(gateway.clone(), primary_ai, fallback_ai, progress_hub.clone());
    let orchestrator = Arc::new(default_pipeline(&deps, &PipelineSettings::default()));

    let notifier: Arc<dyn TerminalNotifier> = match &config.terminal_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url).context("Failed to create webhook notifier")?),
        None => Arc::new(LogNotifier),
    };

    let worker_config = JobWorkerConfig {
        job_timeout: config.job_timeout,
        ..JobWorkerConfig::default()
    };
    tracing::info!(worker_id = %worker_config.worker_id, "Job worker configured");
    let worker = Arc::new(JobWorker::with_config(
        store.clone(),
        orchestrator,
        progress_hub.clone(),
        notifier,
        worker_config,
    ));

    // Task queue
    let (queue, in_process): (Arc<dyn TaskQueue>, Option<Arc<InProcessQueue>>) =
        match config.worker_endpoint() {
            Some(endpoint) => {
                tracing::info!(endpoint = %endpoint, "Dispatching jobs over HTTP");
                let policy = DeliveryPolicy {
                    retry_window: config.queue_max_retry_window,
                    request_timeout: config.job_timeout + Duration::from_secs(60),
                    ..DeliveryPolicy::default()
                };
                let queue: Arc<dyn TaskQueue> = Arc::new(
                    HttpTaskQueue::new(endpoint, store.clone(), worker.announcer(), policy)
                        .context("Failed to create HTTP task queue")?,
                );
                (queue, None)
            }
            None => {
                tracing::info!("Dispatching jobs in-process");
                let in_process = Arc::new(InProcessQueue::new(worker.clone()));
                let queue: Arc<dyn TaskQueue> = in_process.clone();
                (queue, Some(in_process))
            }
        };

    let manager = Arc::new(JobManager::new(
        store,
        queue,
        worker.clone(),
        config.queue_fallback,
    ));

    // Periodic sweeper: job retention, cache expiry, idle progress channels
    let shutdown = CancellationToken::new();
    let sweeper = {
        let manager = manager.clone();
        let gateway = gateway.clone();
        let hub = progress_hub.clone();
        let retention = config.job_retention;
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = manager.purge(retention).await {
                            tracing::warn!(error = %e, "job purge failed");
                        }
                        let expired = gateway.cache().purge_expired().await;
                        tracing::debug!(expired, "response cache swept");
                        hub.cleanup().await;
                    }
                }
            }
        })
    };

    // Build application
    let app = build_app(
        AppState {
            manager,
            worker,
            progress_hub,
            gateway,
            db_pool,
        },
        config.job_timeout + Duration::from_secs(30),
    );

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Shutting down");
    if let Some(queue) = in_process {
        queue.close();
    }
    shutdown.cancel();
    let _ = sweeper.await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
