mod handlers;
pub mod views;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::{error, warn};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::Requester;
use crate::notifier::Notifier;

pub struct AppState {
    pub engine: Arc<Engine>,
    pub notifier: Arc<dyn Notifier>,
}

pub type SharedState = Arc<AppState>;

pub fn router(state: SharedState) -> Router {
    let api = Router::new()
        .route(
            "/buildings",
            get(handlers::list_buildings).post(handlers::create_building),
        )
        .route(
            "/buildings/:id",
            get(handlers::get_building)
                .put(handlers::update_building)
                .delete(handlers::delete_building),
        )
        .route("/buildings/:id/floors/:floor", delete(handlers::delete_floor))
        .route(
            "/buildings/:id/floors/:floor/slots/:slot",
            delete(handlers::delete_slot),
        )
        .route("/buildings/:id/buy", post(handlers::buy_building))
        .route("/buildings/:id/floors/:floor/buy", post(handlers::buy_floor))
        .route("/buildings/:id/leave", post(handlers::leave_building))
        .route("/buildings/:id/reserve", post(handlers::reserve_slot))
        .route("/buildings/:id/cancel", post(handlers::cancel_reservation))
        .route("/buildings/:id/profit", get(handlers::building_profit))
        .route("/buildings/:id/events", get(handlers::building_events))
        .route("/reservations/:id/cancel", post(handlers::cancel_reservation_by_id))
        .route("/slots", get(handlers::slots_overview))
        .route("/users/:id/reservations", get(handlers::user_reservations));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .nest("/api/v1", api)
        .route_layer(middleware::from_fn(track_metrics))
        .with_state(state)
}

async fn track_metrics(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".into());
    let start = Instant::now();
    let response = next.run(req).await;
    metrics::histogram!(crate::observability::HTTP_REQUEST_DURATION_SECONDS, "route" => route.clone())
        .record(start.elapsed().as_secs_f64());
    metrics::counter!(
        crate::observability::HTTP_REQUESTS_TOTAL,
        "route" => route,
        "status" => response.status().as_u16().to_string()
    )
    .increment(1);
    response
}

// ── Errors ───────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    /// No `x-user-id` header on a route that acts for someone.
    Unauthenticated,
    InvalidId(String),
    MalformedBody(String),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Engine(e) => engine_status(e),
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::InvalidId(_) | ApiError::MalformedBody(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Engine(e) => e.kind(),
            ApiError::Unauthenticated => "Unauthenticated",
            ApiError::InvalidId(_) => "InvalidId",
            ApiError::MalformedBody(_) => "MalformedBody",
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Engine(e) => write!(f, "{e}"),
            ApiError::Unauthenticated => write!(f, "missing x-user-id header"),
            ApiError::InvalidId(raw) => write!(f, "not a valid id: {raw}"),
            ApiError::MalformedBody(msg) => write!(f, "malformed request body: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

fn engine_status(e: &EngineError) -> StatusCode {
    match e {
        EngineError::BuildingNotFound(_)
        | EngineError::FloorNotFound(_)
        | EngineError::SlotNotFound(_)
        | EngineError::ReservationNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::AlreadyBought(_)
        | EngineError::FloorAlreadyBought(_)
        | EngineError::AlreadyExists(_) => StatusCode::CONFLICT,
        EngineError::PersistenceFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        EngineError::MissingFields(_)
        | EngineError::InvalidTimestamp(_)
        | EngineError::DegenerateInterval
        | EngineError::StartInPast
        | EngineError::InvertedInterval
        | EngineError::TooShort
        | EngineError::SlotOverlap { .. }
        | EngineError::InvalidIndex { .. }
        | EngineError::NotBought(_)
        | EngineError::InvalidLayout(_)
        | EngineError::LimitExceeded(_) => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("request failed: {self}");
        } else {
            warn!("request rejected ({}): {self}", self.kind());
        }
        let body = json!({ "error": self.kind(), "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}

// ── Request helpers ──────────────────────────────────────

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Identity set by the auth proxy in front of the service.
pub fn requester_from_headers(headers: &HeaderMap) -> Result<Requester, ApiError> {
    let user_id = header(headers, "x-user-id").ok_or(ApiError::Unauthenticated)?;
    Ok(Requester {
        user_id,
        name: header(headers, "x-user-name"),
        email: header(headers, "x-user-email"),
    })
}

pub fn parse_id(raw: &str) -> Result<Ulid, ApiError> {
    Ulid::from_string(raw).map_err(|_| ApiError::InvalidId(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn status_codes_follow_error_kind() {
        let id = Ulid::new();
        assert_eq!(ApiError::from(EngineError::BuildingNotFound(id)).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::from(EngineError::TooShort).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::from(EngineError::AlreadyBought(id)).status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::from(EngineError::PersistenceFailure("disk".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ApiError::Unauthenticated.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn requester_needs_a_user_id() {
        let mut headers = HeaderMap::new();
        assert!(matches!(requester_from_headers(&headers), Err(ApiError::Unauthenticated)));

        headers.insert("x-user-id", HeaderValue::from_static("u-1"));
        headers.insert("x-user-email", HeaderValue::from_static("a@x.test"));
        headers.insert("x-user-name", HeaderValue::from_static("  "));
        let who = requester_from_headers(&headers).unwrap();
        assert_eq!(who.user_id, "u-1");
        assert_eq!(who.email.as_deref(), Some("a@x.test"));
        assert_eq!(who.name, None);
    }

    #[test]
    fn parse_id_rejects_garbage() {
        assert!(matches!(parse_id("nope"), Err(ApiError::InvalidId(_))));
        let id = Ulid::new();
        assert_eq!(parse_id(&id.to_string()).unwrap(), id);
    }
}
