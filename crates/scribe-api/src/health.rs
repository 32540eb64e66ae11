use axum::{Json, extract::State};

use scribe_types::api::HealthResponse;

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        active_sessions: state.listener.active_sessions().await,
    })
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use crate::test_support;

    #[tokio::test]
    async fn reports_ok_with_no_sessions() {
        let state = test_support::state();
        let (status, _, body) = test_support::get(&state, "/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["activeSessions"], 0);
    }
}
