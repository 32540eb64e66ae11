pub mod attachments;
pub mod error;
pub mod health;
pub mod messages;
pub mod state;

use axum::{Router, routing::get};

use crate::state::AppState;

/// Read-only query routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/messages", get(messages::get_messages))
        .route("/attachments/{id}", get(attachments::get_attachment))
        .route("/attachments/{id}/raw", get(attachments::get_attachment_raw))
        .route("/health", get(health::health))
        .with_state(state)
}
