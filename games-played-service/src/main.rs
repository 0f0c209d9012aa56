// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::net::SocketAddr;

use anyhow::Context;
use arcade_common::{
    CounterService, FALLBACK_GAMES_PLAYED, GamesPlayedResponse, IncrementResponse,
    store::load_kv_store,
};
use axum::{
    Json, Router,
    extract::State,
    http::{Method, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use lambda_http::run as lambda_run;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

#[derive(Clone)]
struct AppState {
    counter: CounterService,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "games_played_service=debug,tower_http=info".to_string()),
        )
        .init();

    let store = load_kv_store().await;
    let state = AppState {
        counter: CounterService::from_env(store),
    };
    info!(key = %state.counter.key(), "games played counter configured");

    let app = build_router(state);

    if std::env::var("AWS_LAMBDA_RUNTIME_API").is_ok() {
        info!("AWS Lambda runtime detected; running games-played-service in lambda mode");
        lambda_run(app)
            .await
            .map_err(|e| anyhow::Error::msg(format!("lambda runtime error: {e}")))?;
        return Ok(());
    }

    let bind_addr = parse_bind_addr("GAMES_PLAYED_BIND", "0.0.0.0:8083")?;
    info!(%bind_addr, "games-played-service listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: AppState) -> Router {
    let increment = Router::new()
        .route(
            "/incrementGamesPlayed",
            post(increment_games_played_handler)
                .options(preflight_ok)
                .fallback(method_not_allowed),
        )
        .layer(cors_for([Method::POST]));
    let read = Router::new()
        .route(
            "/gamesPlayed",
            get(games_played_handler)
                .options(preflight_ok)
                .fallback(method_not_allowed),
        )
        .layer(cors_for([Method::GET]));

    Router::new()
        .route("/health", get(health))
        .merge(increment)
        .merge(read)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

fn cors_for<const N: usize>(methods: [Method; N]) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(methods)
        .allow_headers([CONTENT_TYPE])
}

fn parse_bind_addr(var_name: &str, default: &str) -> anyhow::Result<SocketAddr> {
    let value = std::env::var(var_name)
        .ok()
        .unwrap_or_else(|| default.to_string());
    value.parse().context(format!("invalid {var_name}"))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true, "service": "games-played-service"}))
}

/// OPTIONS that `CorsLayer` does not treat as a preflight.
async fn preflight_ok() -> StatusCode {
    StatusCode::OK
}

async fn method_not_allowed() -> ApiError {
    ApiError::method_not_allowed()
}

async fn increment_games_played_handler(
    State(state): State<AppState>,
) -> Result<Json<IncrementResponse>, ApiError> {
    let increment = state
        .counter
        .increment()
        .await
        .map_err(|e| ApiError::store("failed to increment games played", &e))?;

    info!(
        previous_count = increment.previous,
        new_count = increment.current,
        "games played incremented"
    );
    Ok(Json(IncrementResponse {
        message: "Games played incremented".to_string(),
        previous_count: increment.previous,
        new_count: increment.current,
    }))
}

async fn games_played_handler(
    State(state): State<AppState>,
) -> Result<Json<GamesPlayedResponse>, ApiError> {
    let count = state.counter.read().await.map_err(|e| {
        ApiError::store("failed to read games played", &e).with_count(FALLBACK_GAMES_PLAYED)
    })?;
    Ok(Json(GamesPlayedResponse { count }))
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
    detail: Option<String>,
    count: Option<i64>,
}

impl ApiError {
    fn store(message: impl Into<String>, error: &anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            detail: Some(format!("{error:#}")),
            count: None,
        }
    }

    fn method_not_allowed() -> Self {
        Self {
            status: StatusCode::METHOD_NOT_ALLOWED,
            message: "Method not allowed".to_string(),
            detail: None,
            count: None,
        }
    }

    /// Keep the client's display populated even though the read failed.
    fn with_count(mut self, count: i64) -> Self {
        self.count = Some(count);
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(
            status = %self.status,
            message = %self.message,
            detail = self.detail.as_deref().unwrap_or_default(),
            "request failed"
        );
        let mut body = serde_json::json!({"error": self.message});
        if let Some(detail) = self.detail {
            body["message"] = serde_json::Value::String(detail);
        }
        if let Some(count) = self.count {
            body["count"] = serde_json::Value::from(count);
        }
        (self.status, Json(body)).into_response()
    }
}
