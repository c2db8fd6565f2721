//! HTTP read API.
//!
//! Provides:
//! - `GET /messages` - Most recent chat messages, newest first

use axum::{extract::State, routing::get, Json, Router};
use tower_http::trace::TraceLayer;

use super::{MessageView, QueryService};

/// Create the read API router.
pub fn create_router(service: QueryService) -> Router {
    Router::new()
        .route("/messages", get(messages_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Handle GET /messages.
///
/// Always 200; store failures produce an empty array.
async fn messages_handler(State(service): State<QueryService>) -> Json<Vec<MessageView>> {
    Json(service.recent_messages().await)
}
