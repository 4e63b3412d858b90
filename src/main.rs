use std::{path::Path, process, sync::Arc};

use strato::{
    cache::{
        BlobBackend, BuildGuard, CacheStore, EdgeError, EdgeNotifier, FsBackend, MemoryBackend,
        S3Backend,
    },
    config::{self, BackendKind, Settings},
    http::{self, AdminState},
    telemetry,
};
use thiserror::Error;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[derive(Debug, Error)]
enum AppError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] config::LoadError),
    #[error(transparent)]
    Telemetry(#[from] telemetry::TelemetryError),
    #[error("failed to prepare local cache directory: {0}")]
    CacheRoot(std::io::Error),
    #[error("invalid edge purge endpoint: {0}")]
    Edge(#[from] EdgeError),
    #[error("failed to bind administrative listener: {0}")]
    Bind(std::io::Error),
    #[error("server error: {0}")]
    Serve(std::io::Error),
}

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
    let (_cli, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;
    run_serve(settings).await
}

async fn run_serve(settings: Settings) -> Result<(), AppError> {
    let backend = build_backend(&settings).await?;
    let edge = build_edge(&settings)?;

    let store = Arc::new(CacheStore::new(Arc::clone(&backend), edge.clone()));

    if settings.cache.build_phase {
        info!(
            target = "strato::generation",
            build_id = %settings.cache.build_id,
            "build phase worker, skipping generation check"
        );
    } else {
        let guard = BuildGuard::new(
            Arc::clone(&backend),
            edge.clone(),
            settings.cache.build_id.clone(),
        );
        if let Err(err) = guard.ensure_current().await {
            warn!(
                target = "strato::generation",
                error = %err,
                "generation check failed, continuing with existing entries"
            );
        }
    }

    let admin_state = AdminState {
        store,
        static_routes_manifest: settings.cache.static_routes_manifest.clone(),
    };
    let admin_router = http::build_admin_router(admin_state);

    let listener = tokio::net::TcpListener::bind(settings.server.admin_addr)
        .await
        .map_err(AppError::Bind)?;
    info!(addr = %settings.server.admin_addr, "administrative listener started");

    axum::serve(listener, admin_router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(AppError::Serve)
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
}

async fn build_backend(settings: &Settings) -> Result<Arc<dyn BlobBackend>, AppError> {
    let backend: Arc<dyn BlobBackend> = match settings.cache.backend {
        BackendKind::Local => Arc::new(
            FsBackend::new(settings.cache.root_dir.clone()).map_err(AppError::CacheRoot)?,
        ),
        BackendKind::S3 => {
            let bucket = settings.cache.bucket.clone().unwrap_or_default();
            Arc::new(S3Backend::connect(bucket, settings.cache.bucket_prefix.clone()).await)
        }
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
    };

    info!(
        backend = backend_label(settings.cache.backend, &settings.cache.root_dir),
        "cache backend ready"
    );
    Ok(backend)
}

fn build_edge(settings: &Settings) -> Result<Option<Arc<EdgeNotifier>>, AppError> {
    let Some(edge) = settings.edge.as_ref() else {
        return Ok(None);
    };
    let notifier = EdgeNotifier::new(edge.purge_url.clone(), edge.timeout)?;
    info!(target = "strato::edge", endpoint = %edge.purge_url, "edge purge notifier enabled");
    Ok(Some(Arc::new(notifier)))
}

fn backend_label(kind: BackendKind, root: &Path) -> String {
    match kind {
        BackendKind::Local => format!("local:{}", root.display()),
        BackendKind::S3 => "s3".to_string(),
        BackendKind::Memory => "memory".to_string(),
    }
}
