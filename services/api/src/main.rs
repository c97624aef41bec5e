mod config;
mod handlers;

use anyhow::Context;
use axum::Router;
use axum::routing::{get, post};
use panelist_core::bank::QuestionBank;
use panelist_core::embedding::EmbeddingClient;
use panelist_core::interviewer::InterviewerClient;
use panelist_core::session::SessionEngine;
use panelist_core::store::{MemoryStore, SessionStore};
use panelist_core::types::{Candidate, JobPosting};
use panelist_core::vision::RemoteAffectClassifier;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Jobs and candidates loaded into the store at startup.
#[derive(Debug, Deserialize)]
struct SeedData {
    #[serde(default)]
    jobs: Vec<JobPosting>,
    #[serde(default)]
    candidates: Vec<Candidate>,
}

async fn load_seeds(store: &MemoryStore, path: &str) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading seed file {path}"))?;
    let seeds: SeedData =
        serde_json::from_str(&raw).with_context(|| format!("parsing seed file {path}"))?;
    let (jobs, candidates) = (seeds.jobs.len(), seeds.candidates.len());
    for job in seeds.jobs {
        store.insert_job(job).await?;
    }
    for candidate in seeds.candidates {
        store.insert_candidate(candidate).await?;
    }
    info!(jobs, candidates, "seed data loaded");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cfg.log_level.to_string())),
        )
        .init();

    let bank_json = std::fs::read_to_string(&cfg.question_bank_path)
        .with_context(|| format!("reading question bank {}", cfg.question_bank_path))?;
    let bank = Arc::new(QuestionBank::from_json(&bank_json)?);
    info!(questions = bank.len(), "question bank loaded");

    let store = Arc::new(MemoryStore::new());
    if let Some(path) = &cfg.seed_path {
        load_seeds(&store, path).await?;
    }

    let interviewer = Arc::new(InterviewerClient::new(
        cfg.openai_api_key.clone(),
        cfg.chat_model.clone(),
    ));
    let embedder = Arc::new(EmbeddingClient::new(
        cfg.openai_api_key.clone(),
        cfg.embedding_model.clone(),
    ));
    let classifier = Arc::new(RemoteAffectClassifier::new(cfg.vision_endpoint.clone()));

    let engine: handlers::Engine = Arc::new(SessionEngine::new(
        store,
        bank,
        interviewer,
        embedder,
        classifier,
        cfg.engine.clone(),
    ));

    // Permissive CORS so a separately hosted frontend can call the API.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    let app = Router::new()
        .route("/api/interview/start", post(handlers::start_interview))
        .route("/api/interview/chat", post(handlers::chat))
        .route("/api/interview/session/{id}", get(handlers::get_session))
        .route("/api/interview/session/{id}/end", post(handlers::end_session))
        .route("/api/interview/vision", post(handlers::analyze_vision))
        .route("/api/interview/report/{id}", get(handlers::get_report))
        .layer(cors)
        .with_state(engine);

    info!("Starting interview API, listening on {}", cfg.bind_address);
    let listener = tokio::net::TcpListener::bind(cfg.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
