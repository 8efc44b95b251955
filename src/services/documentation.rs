use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the tournament back-end.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::queue::join_queue,
        crate::routes::tournaments::submit_result,
        crate::routes::tournaments::get_results,
        crate::routes::admin::force_allocate,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::HealthStatus,
            crate::dto::queue::EnqueueRequest,
            crate::dto::queue::EnqueueResponse,
            crate::dto::results::SubmitResultRequest,
            crate::dto::results::SubmitResultResponse,
            crate::dto::results::RankedResultDto,
            crate::dto::results::ResultsResponse,
            crate::dto::admin::AllocateRequest,
            crate::dto::admin::AllocateResponse,
            crate::dto::admin::AllocationOutcome,
            crate::error::ErrorBody,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "queue", description = "Tournament matchmaking queue"),
        (name = "tournaments", description = "Result submission and leaderboards"),
        (name = "admin", description = "Operator triggers"),
    )
)]
pub struct ApiDoc;
