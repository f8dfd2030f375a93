use axum::http::StatusCode;

#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    summary = "Liveness",
    responses((status = 200, description = "The service is running"))
)]
pub async fn health() -> StatusCode {
    StatusCode::OK
}
