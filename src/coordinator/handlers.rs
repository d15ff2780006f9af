use super::protocol::*;
use super::service::Coordinator;
use crate::error::SubmissionError;

use axum::{Extension, Json, Router, extract::Path, http::StatusCode, routing::get, routing::post};
use std::sync::Arc;

pub fn router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route(ENDPOINT_SUBMIT_GRAPH, post(handle_submit_graph))
        .route(ENDPOINT_GRAPH_STATUS, get(handle_graph_status))
        .route(ENDPOINT_WORKERS, get(handle_workers))
        .layer(Extension(coordinator))
}

fn status_for(error: &SubmissionError) -> StatusCode {
    match error {
        SubmissionError::Conflict(_) | SubmissionError::OperatorInUse { .. } => {
            StatusCode::CONFLICT
        }
        SubmissionError::NoWorkers(_) => StatusCode::SERVICE_UNAVAILABLE,
        SubmissionError::Invalid(_) => StatusCode::BAD_REQUEST,
        SubmissionError::UnknownGraph(_) => StatusCode::NOT_FOUND,
        SubmissionError::Dissemination(_) => StatusCode::INTERNAL_SERVER_ERROR,
        SubmissionError::Unreachable(_) => StatusCode::BAD_GATEWAY,
    }
}

pub async fn handle_submit_graph(
    Extension(coordinator): Extension<Arc<Coordinator>>,
    Json(req): Json<SubmitGraphRequest>,
) -> (StatusCode, Json<SubmitGraphResponse>) {
    let name = req.graph.name.clone();

    match coordinator.submit_graph(req.graph).await {
        Ok(epoch) => {
            tracing::info!("Graph '{}' accepted (epoch {})", name, epoch);
            (
                StatusCode::OK,
                Json(SubmitGraphResponse {
                    accepted: true,
                    epoch: Some(epoch),
                    error: None,
                }),
            )
        }
        Err(e) => {
            tracing::warn!("Graph '{}' rejected: {}", name, e);
            (
                status_for(&e),
                Json(SubmitGraphResponse {
                    accepted: false,
                    epoch: None,
                    error: Some(e),
                }),
            )
        }
    }
}

pub async fn handle_graph_status(
    Extension(coordinator): Extension<Arc<Coordinator>>,
    Path(name): Path<String>,
) -> (StatusCode, Json<Option<GraphStatusResponse>>) {
    match coordinator.graph_status(&name) {
        Some(status) => (StatusCode::OK, Json(Some(status))),
        None => (StatusCode::NOT_FOUND, Json(None)),
    }
}

pub async fn handle_workers(
    Extension(coordinator): Extension<Arc<Coordinator>>,
) -> (StatusCode, Json<WorkersResponse>) {
    (
        StatusCode::OK,
        Json(WorkersResponse {
            workers: coordinator.membership.members(),
        }),
    )
}
