use axum::Json;
use axum::extract::State;

use crate::server::AppState;
use crate::types::HealthResponse;

#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "barstream".to_string(),
        environment: state.environment.to_string(),
    })
}
