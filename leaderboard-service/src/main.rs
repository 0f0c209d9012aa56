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
    LeaderboardEntry, LeaderboardError, LeaderboardService, SubmitScoreRequest,
    SubmitScoreResponse, store::load_kv_store,
};
use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{Method, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::get,
};
use lambda_http::run as lambda_run;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

#[derive(Clone)]
struct AppState {
    leaderboard: LeaderboardService,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "leaderboard_service=debug,tower_http=info".to_string()),
        )
        .init();

    let store = load_kv_store().await;
    let state = AppState {
        leaderboard: LeaderboardService::from_env(store),
    };
    info!(
        key = %state.leaderboard.key(),
        capacity = state.leaderboard.capacity(),
        "leaderboard configured"
    );

    let app = build_router(state);

    if std::env::var("AWS_LAMBDA_RUNTIME_API").is_ok() {
        info!("AWS Lambda runtime detected; running leaderboard-service in lambda mode");
        lambda_run(app)
            .await
            .map_err(|e| anyhow::Error::msg(format!("lambda runtime error: {e}")))?;
        return Ok(());
    }

    let bind_addr = parse_bind_addr("LEADERBOARD_BIND", "0.0.0.0:8084")?;
    info!(%bind_addr, "leaderboard-service listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE]);

    let leaderboard = Router::new()
        .route(
            "/leaderboard",
            get(list_leaderboard_handler)
                .post(submit_score_handler)
                .options(preflight_ok)
                .fallback(method_not_allowed),
        )
        .layer(cors);

    Router::new()
        .route("/health", get(health))
        .merge(leaderboard)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

fn parse_bind_addr(var_name: &str, default: &str) -> anyhow::Result<SocketAddr> {
    let value = std::env::var(var_name)
        .ok()
        .unwrap_or_else(|| default.to_string());
    value.parse().context(format!("invalid {var_name}"))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true, "service": "leaderboard-service"}))
}

/// OPTIONS that `CorsLayer` does not treat as a preflight.
async fn preflight_ok() -> StatusCode {
    StatusCode::OK
}

async fn method_not_allowed() -> ApiError {
    ApiError::method_not_allowed()
}

async fn list_leaderboard_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<LeaderboardEntry>>, ApiError> {
    let entries = state
        .leaderboard
        .list()
        .await
        .map_err(|e| ApiError::from_leaderboard("failed to fetch leaderboard", e))?;
    Ok(Json(entries))
}

async fn submit_score_handler(
    State(state): State<AppState>,
    payload: Result<Json<SubmitScoreRequest>, JsonRejection>,
) -> Result<Json<SubmitScoreResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;

    let submission = state
        .leaderboard
        .submit_request(&request)
        .await
        .map_err(|e| ApiError::from_leaderboard("failed to add score", e))?;

    Ok(Json(SubmitScoreResponse {
        message: "Score added successfully".to_string(),
        entry: submission.entry,
        rank: submission.rank,
    }))
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
    detail: Option<String>,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            detail: None,
        }
    }

    fn method_not_allowed() -> Self {
        Self {
            status: StatusCode::METHOD_NOT_ALLOWED,
            message: "Method not allowed".to_string(),
            detail: None,
        }
    }

    fn from_leaderboard(context: &str, error: LeaderboardError) -> Self {
        match error {
            LeaderboardError::Validation(message) => Self::bad_request(message),
            store_error @ LeaderboardError::Store(_) => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: context.to_string(),
                detail: Some(store_error.to_string()),
            },
        }
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
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arcade_common::{InMemoryKvStore, KvStore, MAX_ENTRIES};
    use async_trait::async_trait;
    use axum::{body::Body, http::Request};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    struct UnavailableStore;

    #[async_trait]
    impl KvStore for UnavailableStore {
        async fn get(&self, _key: &str) -> anyhow::Result<Option<Value>> {
            Err(anyhow::anyhow!("request timed out"))
        }

        async fn set(&self, _key: &str, _value: &Value) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("request timed out"))
        }

        async fn incr(&self, _key: &str) -> anyhow::Result<i64> {
            Err(anyhow::anyhow!("request timed out"))
        }
    }

    fn app_state(store: Arc<dyn KvStore>) -> AppState {
        AppState {
            leaderboard: LeaderboardService::new(store, "leaderboard"),
        }
    }

    async fn send(state: AppState, request: Request<Body>) -> (StatusCode, Value) {
        let response = build_router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post_json(body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/leaderboard")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_board() -> Request<Body> {
        Request::builder()
            .method(Method::GET)
            .uri("/leaderboard")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn submit_handler_normalizes_initials() {
        let state = app_state(Arc::new(InMemoryKvStore::new()));
        let request = SubmitScoreRequest {
            initials: Some(json!("abcdef")),
            score: Some(json!(900)),
        };

        let response = submit_score_handler(State(state.clone()), Ok(Json(request)))
            .await
            .unwrap()
            .0;
        assert_eq!(response.entry.initials, "ABC");
        assert_eq!(response.entry.score, 900);
        assert_eq!(response.rank, Some(1));

        let entries = list_leaderboard_handler(State(state)).await.unwrap().0;
        assert_eq!(entries, vec![response.entry]);
    }

    #[tokio::test]
    async fn list_handler_returns_empty_board_when_absent() {
        let state = app_state(Arc::new(InMemoryKvStore::new()));
        let entries = list_leaderboard_handler(State(state)).await.unwrap().0;
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn submit_route_returns_entry_with_camel_case_fields() {
        let state = app_state(Arc::new(InMemoryKvStore::new()));

        let (status, body) = send(state, post_json(r#"{"initials": "zz", "score": 75}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Score added successfully");
        assert_eq!(body["entry"]["initials"], "ZZ");
        assert_eq!(body["entry"]["score"], 75);
        assert!(body["entry"]["createdAt"].is_string());
        assert_eq!(body["rank"], 1);
    }

    #[tokio::test]
    async fn invalid_submissions_are_bad_requests_and_leave_board_untouched() {
        let store = Arc::new(InMemoryKvStore::new());
        let state = app_state(store.clone());
        send(state.clone(), post_json(r#"{"initials": "OK", "score": 10}"#)).await;
        let before = store.get("leaderboard").await.unwrap();

        for body in [
            r#"{"initials": "ABC", "score": -5}"#,
            r#"{"initials": "ABC", "score": "x"}"#,
            r#"{"score": 10}"#,
            r#"{"initials": "ABC""#,
        ] {
            let (status, response) = send(state.clone(), post_json(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
            assert!(response["error"].is_string(), "{body}");
            assert!(response.get("message").is_none(), "{body}");
        }

        assert_eq!(store.get("leaderboard").await.unwrap(), before);
    }

    #[tokio::test]
    async fn board_is_sorted_and_capped_after_many_submissions() {
        let state = app_state(Arc::new(InMemoryKvStore::new()));
        for score in (0..=100).step_by(10) {
            let body = format!(r#"{{"initials": "p{score}", "score": {score}}}"#);
            let (status, _) = send(state.clone(), post_json(&body)).await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, body) = send(state, get_board()).await;
        assert_eq!(status, StatusCode::OK);
        let scores: Vec<u64> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| entry["score"].as_u64().unwrap())
            .collect();
        assert_eq!(scores.len(), MAX_ENTRIES);
        assert_eq!(scores, vec![100, 90, 80, 70, 60, 50, 40, 30, 20, 10]);
    }

    #[tokio::test]
    async fn store_failures_are_internal_errors_with_detail() {
        let state = app_state(Arc::new(UnavailableStore));

        let (status, body) = send(state.clone(), get_board()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "failed to fetch leaderboard");
        assert!(body["message"].as_str().unwrap().contains("request timed out"));

        let (status, body) = send(state, post_json(r#"{"initials": "ABC", "score": 1}"#)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "failed to add score");
    }

    #[tokio::test]
    async fn validation_wins_over_store_failure() {
        let state = app_state(Arc::new(UnavailableStore));
        let (status, _) = send(state, post_json(r#"{"initials": "ABC", "score": -1}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unsupported_methods_are_rejected() {
        let state = app_state(Arc::new(InMemoryKvStore::new()));
        let request = Request::builder()
            .method(Method::PUT)
            .uri("/leaderboard")
            .body(Body::empty())
            .unwrap();

        let (status, body) = send(state, request).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["error"], "Method not allowed");
    }

    #[tokio::test]
    async fn bare_options_is_ok() {
        let store = Arc::new(InMemoryKvStore::new());
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/leaderboard")
            .header("origin", "https://arcade.example")
            .body(Body::empty())
            .unwrap();

        let (status, _) = send(app_state(store.clone()), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(store.get("leaderboard").await.unwrap(), None);
    }

    #[tokio::test]
    async fn whitespace_initials_are_accepted_over_http() {
        let state = app_state(Arc::new(InMemoryKvStore::new()));

        let (status, body) = send(state, post_json(r#"{"initials": " abc", "score": 5}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entry"]["initials"], " AB");
    }

    #[tokio::test]
    async fn preflight_allows_get_and_post() {
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/leaderboard")
            .header("origin", "https://arcade.example")
            .header("access-control-request-method", "POST")
            .header("access-control-request-headers", "content-type")
            .body(Body::empty())
            .unwrap();

        let response = build_router(app_state(Arc::new(InMemoryKvStore::new())))
            .oneshot(request)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers["access-control-allow-origin"], "*");
        let methods = headers["access-control-allow-methods"].to_str().unwrap();
        assert!(methods.contains("GET"));
        assert!(methods.contains("POST"));
        assert_eq!(headers["access-control-allow-headers"], "content-type");
    }
}
