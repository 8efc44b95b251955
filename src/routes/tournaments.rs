use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::results::{ResultsResponse, SubmitResultRequest, SubmitResultResponse},
    error::AppError,
    routes::caller::Caller,
    services::results_service,
    state::SharedState,
};

/// Identifiers that are not UUIDs cannot name a stored tournament.
fn parse_tournament_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::NotFound("Tournament not found".into()))
}

/// Submit (or overwrite) the caller's result.
#[utoipa::path(
    post,
    path = "/tournaments/{id}/results",
    tag = "tournaments",
    params(
        ("X-User-Id" = String, Header, description = "Verified caller identity"),
        ("id" = String, Path, description = "Tournament identifier")
    ),
    request_body = SubmitResultRequest,
    responses(
        (status = 200, description = "Result recorded", body = SubmitResultResponse),
        (status = 400, description = "Missing or malformed result", body = crate::error::ErrorBody),
        (status = 403, description = "Caller is not a participant", body = crate::error::ErrorBody),
        (status = 404, description = "Unknown tournament", body = crate::error::ErrorBody)
    )
)]
pub async fn submit_result(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
    Json(payload): Json<SubmitResultRequest>,
) -> Result<Json<SubmitResultResponse>, AppError> {
    let tournament_id = parse_tournament_id(&id)?;
    payload.validate()?;
    let response = results_service::submit_result(
        &state,
        &caller,
        tournament_id,
        payload.user_id.as_deref(),
        payload.result,
    )
    .await?;
    Ok(Json(response))
}

/// Ranked leaderboard of a tournament.
#[utoipa::path(
    get,
    path = "/tournaments/{id}/results",
    tag = "tournaments",
    params(
        ("X-User-Id" = String, Header, description = "Verified caller identity"),
        ("id" = String, Path, description = "Tournament identifier")
    ),
    responses(
        (status = 200, description = "Ranked results", body = ResultsResponse),
        (status = 404, description = "Unknown tournament", body = crate::error::ErrorBody)
    )
)]
pub async fn get_results(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> Result<Json<ResultsResponse>, AppError> {
    let tournament_id = parse_tournament_id(&id)?;
    Ok(Json(
        results_service::get_results(&state, &caller, tournament_id).await?,
    ))
}

/// Configure the tournament routes subtree.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route(
        "/tournaments/{id}/results",
        get(get_results).post(submit_result),
    )
}
