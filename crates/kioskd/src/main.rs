use std::sync::Arc;

use anyhow::Result;
use kiosk_core::{FeatureExtractor, GridExtractor};
use kiosk_store::{EmbeddingDb, PatientDb};
use tracing_subscriber::EnvFilter;

mod admin;
mod config;
mod engine;
mod enroll;
mod error;
mod http;
mod recognize;
#[cfg(test)]
mod testutil;

use admin::AdminOps;
use config::Config;
use engine::Engine;
use enroll::EnrollmentCoordinator;
use http::AppState;
use recognize::RecognitionCoordinator;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("kioskd starting");

    let config = Arc::new(Config::from_env());
    if config.admin_token.is_none() {
        tracing::warn!("KIOSK_ADMIN_TOKEN not set; privileged endpoints are open");
    }
    std::fs::create_dir_all(&config.data_dir)?;

    let patients = PatientDb::open(&config.patient_db_path()).await?;
    patients.seed_departments(config.departments.clone()).await?;
    tracing::info!(departments = ?config.departments, "queue counters ready");

    let embeddings = EmbeddingDb::open(&config.embedding_db_path()).await?;
    let extractor: Arc<dyn FeatureExtractor> = Arc::new(GridExtractor);
    tracing::info!(model = extractor.model_version(), "feature extractor ready");

    let engine = Arc::new(
        Engine::new(
            extractor,
            embeddings,
            config.similarity_threshold,
            config.fast_mode_frames,
        )
        .await?,
    );
    tracing::info!(gallery = engine.gallery_size(), "embedding gallery loaded");

    let admin = Arc::new(AdminOps::new(patients.clone(), engine.clone()));

    // Enforce the zero-embedding rollback for enrollments that aborted
    // mid-flight before the daemon last stopped.
    let sweep = admin.sweep_incomplete().await?;
    if !sweep.removed_patients.is_empty() || !sweep.orphaned_identities.is_empty() {
        tracing::warn!(
            removed = sweep.removed_patients.len(),
            orphaned = sweep.orphaned_identities.len(),
            "startup consistency sweep found inconsistencies"
        );
    }

    let state = AppState {
        enroll: Arc::new(EnrollmentCoordinator::new(
            patients.clone(),
            engine.clone(),
            config.min_embeddings,
        )),
        recognize: Arc::new(RecognitionCoordinator::new(
            patients.clone(),
            engine.clone(),
        )),
        admin,
        patients,
        engine,
        config: config.clone(),
    };

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "kioskd ready");

    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("kioskd shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
