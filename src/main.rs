//! gitquest-server
//!
//! Backend for a GitHub-driven narrative game. Forking the upstream
//! repository starts a game; a character bot then opens issues and posts
//! comments on the fork, and the player's replies advance a persistent,
//! resumable quest. Quests are driven one pass at a time by triggers:
//! the fork webhook, scheduled internal ticks, and the tick endpoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

mod character;
mod config;
mod db;
mod game;
mod protocol;
mod quest;
mod store;

use character::GithubCharacter;
use config::Config;
use db::Database;
use game::Game;
use protocol::{GitHubForkHook, StatusResponse, TickRequest, TickResponse, verify_signature};
use quest::{QuestEngine, QuestRegistry, TickCadence, TickReport};
use store::GameStore;

#[derive(Clone)]
struct AppState {
    engine: Arc<QuestEngine>,
    db: Arc<Database>,
    config: Arc<Config>,
}

// ============================================================================
// HTTP Handlers
// ============================================================================

async fn health_check() -> Json<StatusResponse> {
    Json(StatusResponse::ok())
}

/// GitHub fork webhook: verify, check the repo is ours, then create the
/// game and put it on the entry quest.
async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<StatusResponse>) {
    let signature = headers
        .get("X-Hub-Signature-256")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !verify_signature(&state.config.webhook_secret, &body, signature) {
        warn!("Rejected webhook with invalid signature");
        return (
            StatusCode::FORBIDDEN,
            Json(StatusResponse::error("Invalid signature")),
        );
    }

    let hook: GitHubForkHook = match serde_json::from_slice(&body) {
        Ok(hook) => hook,
        Err(e) => {
            warn!("Undecodable fork payload: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(StatusResponse::error("Invalid payload")),
            );
        }
    };

    if !hook.is_repo(&state.config.upstream_repo) {
        warn!("Fork of foreign repo {}", hook.repository.full_name);
        return (
            StatusCode::NOT_FOUND,
            Json(StatusResponse::error("Invalid repo")),
        );
    }

    let game = Game::from_fork(&hook);
    info!("Fork from {} ({})", game.user_login, game.fork_url);

    if let Err(e) = state.db.upsert_game(&game).await {
        error!("Failed to store game {}: {}", game.key, e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(StatusResponse::error("Storage failure")),
        );
    }

    match state.engine.start_quest(&game).await {
        Ok(_) => (StatusCode::OK, Json(StatusResponse::ok())),
        Err(e) => {
            error!("Entry quest failed for game {}: {}", game.key, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(StatusResponse::error("Quest execution failure")),
            )
        }
    }
}

/// External tick trigger; the cadence selects cheap or complete checks.
async fn tick(
    State(state): State<AppState>,
    Json(request): Json<TickRequest>,
) -> (StatusCode, Json<TickResponse>) {
    match state.engine.tick(request.cadence).await {
        Ok(report) => (
            StatusCode::OK,
            Json(TickResponse {
                success: true,
                report,
            }),
        ),
        Err(e) => {
            error!("Tick failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(TickResponse {
                    success: false,
                    report: TickReport::default(),
                }),
            )
        }
    }
}

// ============================================================================
// Internal schedulers
// ============================================================================

fn spawn_ticker(engine: Arc<QuestEngine>, cadence: TickCadence, secs: u64) {
    if secs == 0 {
        return;
    }
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(secs));
        loop {
            interval.tick().await;
            if let Err(e) = engine.tick(cadence).await {
                error!("Scheduled {:?} tick failed: {}", cadence, e);
            }
        }
    });
    info!("Scheduled {:?} ticks every {}s", cadence, secs);
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gitquest_server=info".parse().unwrap()),
        )
        .init();

    let config = Arc::new(Config::from_env());

    let db = Arc::new(
        Database::new(&config.database_url)
            .await
            .expect("Failed to initialize database"),
    );

    let registry = Arc::new(QuestRegistry::load().expect("Broken quest definition"));
    let character = Arc::new(GithubCharacter::new(&config.github_token));

    let engine = Arc::new(QuestEngine::new(
        registry,
        db.clone(),
        db.clone(),
        character,
    ));

    spawn_ticker(engine.clone(), TickCadence::Fast, config.fast_tick_secs);
    spawn_ticker(engine.clone(), TickCadence::Full, config.full_tick_secs);

    let state = AppState {
        engine,
        db,
        config: config.clone(),
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/webhooks/github", post(github_webhook))
        .route("/tick", post(tick))
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers([axum::http::header::CONTENT_TYPE]),
        )
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("gitquest server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
