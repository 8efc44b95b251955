use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::post,
};
use validator::Validate;

use crate::{
    dto::admin::{AllocateRequest, AllocateResponse, AllocationOutcome},
    error::AppError,
    services::allocator::{self, Allocation},
    state::SharedState,
};

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Operator endpoints.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/admin/allocate", post(force_allocate))
        .route_layer(middleware::from_fn_with_state(state, require_admin_token))
}

/// Drain the queue of a game type now; a no-op when fewer players wait than a tournament needs.
#[utoipa::path(
    post,
    path = "/admin/allocate",
    tag = "admin",
    params(("X-Admin-Token" = Option<String>, Header, description = "Required when the server is configured with an admin token")),
    request_body = AllocateRequest,
    responses(
        (status = 200, description = "Allocation attempted", body = AllocateResponse),
        (status = 401, description = "Missing or invalid admin token", body = crate::error::ErrorBody)
    )
)]
pub async fn force_allocate(
    State(state): State<SharedState>,
    Json(payload): Json<AllocateRequest>,
) -> Result<Json<AllocateResponse>, AppError> {
    payload.validate()?;
    let response = match allocator::allocate(&state, &payload.game_type).await? {
        Allocation::Created(tournament_id) => AllocateResponse {
            success: true,
            outcome: AllocationOutcome::Created,
            tournament_id: Some(tournament_id),
            message: "Tournament created".into(),
        },
        Allocation::NotEnoughPlayers { waiting, required } => AllocateResponse {
            success: true,
            outcome: AllocationOutcome::NotEnoughPlayers,
            tournament_id: None,
            message: format!("Not enough players in queue ({waiting}/{required})"),
        },
        Allocation::LostRace => AllocateResponse {
            success: true,
            outcome: AllocationOutcome::LostRace,
            tournament_id: None,
            message: "Queue drained by a concurrent allocation".into(),
        },
    };
    Ok(Json(response))
}

async fn require_admin_token(
    State(state): State<SharedState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.admin_token() else {
        return Ok(next.run(req).await);
    };

    let provided = req
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            AppError::Unauthenticated("missing admin token header `X-Admin-Token`".into())
        })?;

    if provided == expected {
        Ok(next.run(req).await)
    } else {
        Err(AppError::Unauthenticated("invalid admin token".into()))
    }
}
