use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use rollcall_hw::CaptureSettings;
use rollcall_store::{SqliteStore, Store};
use tracing_subscriber::EnvFilter;

mod cache;
mod config;
mod engine;
mod routes;
mod session;

use cache::StudentCache;
use config::Config;
use engine::{EngineSettings, SharedState};
use routes::AppState;
use session::AttendanceSession;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::load()?;
    if config.uses_default_admin_password() {
        tracing::warn!("using the default administrator password; set ROLLCALL_ADMIN_PASSWORD");
    }

    let store = SqliteStore::open(&config.db_path)
        .await
        .with_context(|| format!("opening database {}", config.db_path.display()))?;
    let store: Arc<dyn Store> = Arc::new(store);

    let shared = SharedState {
        store,
        cache: Arc::new(Mutex::new(StudentCache::new(Duration::from_secs(
            config.cache_lifetime_secs,
        )))),
        session: Arc::new(Mutex::new(AttendanceSession::new())),
    };

    let settings = EngineSettings {
        camera_device: config.camera_device.clone(),
        capture: CaptureSettings::default(),
        similarity_threshold: config.similarity_threshold,
        frame_skip: config.frame_skip,
        jpeg_quality: config.jpeg_quality,
    };
    let engine = match engine::spawn_engine(
        &config.detector_model_path(),
        &config.recognizer_model_path(),
        settings,
        shared.clone(),
        tokio::runtime::Handle::current(),
    ) {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::error!(error = %e, "camera engine unavailable; live view and registration disabled");
            None
        }
    };

    let state = AppState {
        shared,
        engine: engine.clone(),
        admin_password: Arc::from(config.admin_password.as_str()),
    };
    let app = routes::router(state, config.session_hours);

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    tracing::info!(bind = %config.bind, "rollcalld ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(engine) = engine {
        if let Err(e) = engine.stop().await {
            tracing::warn!(error = %e, "camera stop failed during shutdown");
        }
    }
    tracing::info!("rollcalld shutting down");

    Ok(())
}

/// Lock `mutex`, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
