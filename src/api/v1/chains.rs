//! Chain listing and execution endpoints

use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::state::AppState;
use crate::api::types::{ApiError, ChainSummary, ExecuteChainBody, Json};
use crate::domain::chain::ChainId;
use crate::domain::execution::{ChainEvent, ChainEventStream};

/// List configured chains
pub async fn list_chains(
    State(state): State<AppState>,
) -> Result<Json<Vec<ChainSummary>>, ApiError> {
    let chains = state.chain_service.list().await?;
    Ok(Json(chains.iter().map(ChainSummary::from).collect()))
}

/// Execute a chain
///
/// Returns the execution result, a dry-run estimate when `dry_run` is set, or
/// an SSE stream of `delta` events closed by one `completed` event when
/// `stream` is set. Dropping the stream cancels the execution.
pub async fn execute_chain(
    State(state): State<AppState>,
    Path(chain_id): Path<ChainId>,
    Json(body): Json<ExecuteChainBody>,
) -> Result<Response, ApiError> {
    let request = body.into_request(chain_id);
    debug!(
        chain_id = %chain_id,
        dry_run = request.dry_run,
        stream = request.stream,
        "Chain execution requested"
    );

    if request.dry_run {
        let estimate = state.chain_service.dry_run(&request).await?;
        return Ok(Json(estimate).into_response());
    }

    if request.stream {
        let events = state
            .chain_service
            .stream(&request, CancellationToken::new())
            .await?;
        return Ok(Sse::new(sse_events(events))
            .keep_alive(KeepAlive::default())
            .into_response());
    }

    let result = state
        .chain_service
        .execute(&request, &CancellationToken::new())
        .await?;
    Ok(Json(result).into_response())
}

fn sse_events(events: ChainEventStream) -> impl Stream<Item = Result<Event, axum::Error>> {
    events.map(|event| {
        let name = match &event {
            ChainEvent::Delta { .. } => "delta",
            ChainEvent::Completed { .. } => "completed",
        };
        Event::default().event(name).json_data(&event)
    })
}
