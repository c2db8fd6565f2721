//! Composition root and lifecycle.
//!
//! Wires together:
//! - Connection pool and message store (with startup connectivity check)
//! - Subscriber and dispatch path
//! - Query service and HTTP read API
//! - Graceful shutdown of both loops

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::config::Config;
use crate::service::http::create_router;
use crate::service::QueryService;
use crate::storage::pool::ConnectionPool;
use crate::storage::sqlite::SqliteMessageStore;
use crate::storage::MessageStore;
use crate::subscriber::dispatch::Dispatcher;
use crate::subscriber::Subscriber;

/// Explicitly constructed components shared by the ingest and read paths.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn MessageStore>,
    pub dispatcher: Dispatcher,
    pub query: QueryService,
}

impl Services {
    /// Build services on top of any store implementation.
    pub fn with_store(config: &Config, store: Arc<dyn MessageStore>) -> Self {
        Self {
            dispatcher: Dispatcher::new(Arc::clone(&store), config.ingest_rules()),
            query: QueryService::new(Arc::clone(&store)),
            store,
        }
    }
}

/// Open the SQLite store, check connectivity and create the schema.
pub fn open_store(config: &Config) -> anyhow::Result<SqliteMessageStore> {
    let pool = ConnectionPool::open(&config.db_path, config.pool())
        .context("failed to create connection pool")?;
    let store = SqliteMessageStore::new(pool);

    store
        .ping()
        .with_context(|| format!("cannot reach store at {}", config.db_path.display()))?;
    store.initialize().context("failed to initialize schema")?;

    tracing::info!(
        path = %config.db_path.display(),
        pool_size = config.pool_size,
        "Store connection OK"
    );
    Ok(store)
}

/// Run Chatlog until `shutdown_rx` flips.
///
/// # Arguments
///
/// * `config` - Service configuration
/// * `shutdown_rx` - Receiver for shutdown signal
pub async fn run_server(config: Config, shutdown_rx: watch::Receiver<bool>) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.http_host, config.http_port).parse()?;

    let store = open_store(&config)?;
    let services = Services::with_store(&config, Arc::new(store));

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    serve(&config, services, listener, shutdown_rx).await
}

/// Run the subscriber and the read API on an already bound listener.
///
/// Returns an error if the subscriber cannot reach the broker on its first
/// attempt; the read API is stopped in that case.
pub async fn serve(
    config: &Config,
    services: Services,
    listener: TcpListener,
    shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let app = create_router(services.query.clone());
    let mut http_shutdown = shutdown_rx.clone();

    tracing::info!(address = %listener.local_addr()?, "Starting read API");
    let http = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = http_shutdown.changed().await;
                tracing::info!("Read API shutting down");
            })
            .await
    });

    let mut subscriber = Subscriber::new(config.broker(), services.dispatcher);
    if let Err(e) = subscriber.run(shutdown_rx).await {
        http.abort();
        return Err(e).context("subscriber failed to start");
    }

    http.await??;

    tracing::info!("Server stopped");
    Ok(())
}
