use axum::{Json, Router, extract::State, routing::post};
use validator::Validate;

use crate::{
    dto::queue::{EnqueueRequest, EnqueueResponse},
    error::AppError,
    routes::caller::Caller,
    services::queue_service,
    state::SharedState,
};

/// Join the waiting queue of a game type.
#[utoipa::path(
    post,
    path = "/queue",
    tag = "queue",
    params(("X-User-Id" = String, Header, description = "Verified caller identity")),
    request_body = EnqueueRequest,
    responses(
        (status = 200, description = "Queued, or already in a tournament", body = EnqueueResponse),
        (status = 401, description = "Missing caller identity", body = crate::error::ErrorBody),
        (status = 403, description = "Acting for another user", body = crate::error::ErrorBody)
    )
)]
pub async fn join_queue(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Json(payload): Json<EnqueueRequest>,
) -> Result<Json<EnqueueResponse>, AppError> {
    payload.validate()?;
    let response = queue_service::enqueue(
        &state,
        &caller,
        payload.user_id.as_deref(),
        &payload.game_type,
    )
    .await?;
    Ok(Json(response))
}

/// Configure the queue routes subtree.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/queue", post(join_queue))
}
