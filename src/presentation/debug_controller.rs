use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, response::Json, routing::get, Router};
use serde::Serialize;

use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/debug/info", get(info))
        .route("/debug/status", get(status))
}

async fn info() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Serialize)]
struct StatusCheck {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Value")]
    value: String,
    #[serde(rename = "Passed")]
    passed: bool,
    #[serde(rename = "Duration")]
    duration: String,
}

async fn run_check<F, Fut>(name: &str, check: F) -> StatusCheck
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = (String, bool)>,
{
    let start = Instant::now();
    let (value, passed) = check().await;
    StatusCheck {
        name: name.to_string(),
        value,
        passed,
        duration: format!("{:?}", start.elapsed()),
    }
}

async fn status(State(state): State<Arc<AppState>>) -> Json<BTreeMap<String, StatusCheck>> {
    let mut checks = BTreeMap::new();

    checks.insert(
        "server_started".to_string(),
        run_check("server started", || async {
            (state.started_at.to_rfc3339(), true)
        })
        .await,
    );

    let pg = state.pg.clone();
    checks.insert(
        "database_connected".to_string(),
        run_check("database connected", || async move {
            match sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&pg).await {
                Ok(_) => ("connected".to_string(), true),
                Err(e) => (e.to_string(), false),
            }
        })
        .await,
    );

    checks.insert(
        "controllers".to_string(),
        run_check("registered controllers", || async {
            match state.controllers.list().await {
                Ok(controllers) => (controllers.len().to_string(), true),
                Err(e) => (e.to_string(), false),
            }
        })
        .await,
    );

    checks.insert(
        "jwks".to_string(),
        run_check("signing keys present", || async {
            match state.jwks.current().await {
                Ok(Some((_, expiry))) => (format!("expires {}", expiry.to_rfc3339()), true),
                Ok(None) => ("absent".to_string(), false),
                Err(e) => (e.to_string(), false),
            }
        })
        .await,
    );

    Json(checks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_status_check_shape() {
        let check = run_check("server started", || async {
            ("2026-01-01T00:00:00Z".to_string(), true)
        })
        .await;
        let value = serde_json::to_value(&check).unwrap();
        assert_eq!(value["Name"], "server started");
        assert_eq!(value["Passed"], true);
        assert!(value.get("Duration").is_some());
        assert!(value.get("Value").is_some());
    }
}
