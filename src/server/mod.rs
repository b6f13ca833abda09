//! HTTP entrypoint.
//!
//! `POST /api/provision/{blueprint}` validates the request synchronously, sends
//! the `init` status event, starts the run as a background task and answers
//! `202 Accepted`. Run state is then readable at `GET /api/runs/{id}`.

pub mod api;
pub mod params;
pub mod registry;
pub mod validate;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use api::{AppState, SharedState};
pub use params::RequestParams;
pub use registry::RunRegistry;

/// Build the full application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until Ctrl+C.
pub async fn serve(state: Arc<AppState>, host: &str, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(%local_addr, "skyforge listening");
    println!("skyforge running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StagingSection, Timings};
    use crate::credentials::StaticCredentials;
    use crate::dns::StaticResolver;
    use crate::lifecycle::MemoryCloud;
    use crate::lifecycle::memory::ZONE_NAME_SERVERS;
    use crate::notify::RecordingNotifier;
    use crate::orchestrator::blueprint::BlueprintRegistry;
    use crate::orchestrator::runner::{Collaborators, Provisioner};
    use crate::staging::MemoryObjectStore;
    use crate::status::receiver::Receiver;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use skyforge_common::RunStatus;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state(credentials: StaticCredentials) -> (Arc<MemoryCloud>, Arc<AppState>) {
        let cloud = Arc::new(MemoryCloud::new());
        let provisioner = Provisioner::new(
            Collaborators {
                cloud: cloud.clone(),
                store: Arc::new(MemoryObjectStore::new()),
                credentials: Arc::new(credentials),
                resolver: Arc::new(StaticResolver::always(&ZONE_NAME_SERVERS[..])),
                notifier: Arc::new(RecordingNotifier::new()),
            },
            Timings::immediate(),
            &StagingSection::default(),
        );
        let state = Arc::new(AppState::new(BlueprintRegistry::builtin(), provisioner));
        (cloud, state)
    }

    async fn call(app: Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn wait_for_terminal(state: &Arc<AppState>, run_id: &str) -> RunStatus {
        for _ in 0..200 {
            if let Some(snap) = state.runs.get(run_id)
                && snap.status.is_terminal()
            {
                return snap.status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run {} did not finish", run_id);
    }

    #[tokio::test]
    async fn health_and_blueprints() {
        let (_, state) = test_state(StaticCredentials::simulated());
        let (status, body) = call(build_router(state.clone()), get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = call(build_router(state), get("/api/blueprints")).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|b| b["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["app-vm", "plain-vm", "search-stack"]);
    }

    #[tokio::test]
    async fn missing_field_is_rejected_without_cloud_calls() {
        let (cloud, state) = test_state(StaticCredentials::simulated());
        let (status, body) = call(
            build_router(state.clone()),
            post_json(
                "/api/provision/app-vm",
                serde_json::json!({"vm_name": "web01", "domain": "example.com"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing 'resource_group' parameter");
        assert_eq!(body["kind"], "missing_parameter");
        assert!(cloud.calls().is_empty());
        assert!(state.runs.is_empty());
    }

    #[tokio::test]
    async fn subdomain_and_incomplete_domain_are_rejected() {
        let (cloud, state) = test_state(StaticCredentials::simulated());
        let base = serde_json::json!({
            "vm_name": "web01",
            "resource_group": "rg-web",
            "location": "westeurope",
        });

        for (domain, kind) in [
            ("sub.example.com", "subdomain_not_allowed"),
            ("example", "invalid_domain"),
        ] {
            let mut body = base.clone();
            body["domain"] = domain.into();
            let (status, json) =
                call(build_router(state.clone()), post_json("/api/provision/app-vm", body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", domain);
            assert_eq!(json["kind"], kind);
        }
        assert!(cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_recipients_are_rejected() {
        let (cloud, state) = test_state(StaticCredentials::simulated());
        let (status, body) = call(
            build_router(state.clone()),
            post_json(
                "/api/provision/plain-vm",
                serde_json::json!({"vm_name": "box", "resource_group": "rg", "location": "westeurope"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing 'recipient_emails' parameter");
        assert!(cloud.calls().is_empty());
        assert!(state.runs.is_empty());
    }

    #[tokio::test]
    async fn query_string_is_a_fallback() {
        let (_, state) = test_state(StaticCredentials::simulated());
        let req = Request::builder()
            .method("POST")
            .uri("/api/provision/plain-vm?vm_name=box&resource_group=rg&location=westeurope&recipient_emails=ops%40example.com")
            .body(Body::empty())
            .unwrap();
        let (status, body) = call(build_router(state.clone()), req).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["vm_name"], "box");
        let run_id = body["run_id"].as_str().unwrap().to_string();
        assert_eq!(wait_for_terminal(&state, &run_id).await, RunStatus::Completed);
    }

    #[tokio::test]
    async fn unknown_blueprint_is_not_found() {
        let (_, state) = test_state(StaticCredentials::simulated());
        let (status, body) = call(
            build_router(state),
            post_json("/api/provision/windows-desktop", serde_json::json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("windows-desktop"));
    }

    #[tokio::test]
    async fn missing_credentials_are_a_server_error() {
        let (cloud, state) = test_state(StaticCredentials::missing());
        let (status, body) = call(
            build_router(state),
            post_json(
                "/api/provision/plain-vm",
                serde_json::json!({
                    "vm_name": "box",
                    "resource_group": "rg",
                    "location": "westeurope",
                    "recipient_emails": "ops@example.com",
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("not configured"));
        assert!(cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn accepted_run_returns_status_url_and_finishes() {
        let receiver = Receiver::start(0, "https://status.example/runs/web01").await;
        let (cloud, state) = test_state(StaticCredentials::simulated());
        let (status, body) = call(
            build_router(state.clone()),
            post_json(
                "/api/provision/app-vm",
                serde_json::json!({
                    "vm_name": "web01",
                    "resource_group": "rg-web",
                    "domain": "example.com",
                    "location": "westeurope",
                    "recipient_emails": "ops@example.com",
                    "hook_url": receiver.url,
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status_url"], "https://status.example/runs/web01");
        assert_eq!(body["vm_name"], "web01");
        assert_eq!(body["message"], "app-vm provisioning started");

        let run_id = body["run_id"].as_str().unwrap().to_string();
        assert_eq!(wait_for_terminal(&state, &run_id).await, RunStatus::Completed);
        assert!(!cloud.mutations().is_empty());

        let (status, run) = call(build_router(state.clone()), get(&format!("/api/runs/{}", run_id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(run["status"], "completed");
        assert_eq!(run["phase"], "DONE");
        assert_eq!(run["access_urls"][0], "https://web01.example.com");

        let (_, runs) = call(build_router(state), get("/api/runs")).await;
        assert_eq!(runs.as_array().unwrap().len(), 1);

        let events = receiver.events().await;
        assert_eq!(events[0]["details"]["step"], "init");
        assert_eq!(events.last().unwrap()["status"], "completed");
    }

    #[tokio::test]
    async fn failing_init_webhook_aborts_before_any_run() {
        let receiver = Receiver::start(u32::MAX, "").await;
        let (cloud, state) = test_state(StaticCredentials::simulated());
        let (status, body) = call(
            build_router(state.clone()),
            post_json(
                "/api/provision/plain-vm",
                serde_json::json!({
                    "vm_name": "box",
                    "resource_group": "rg",
                    "location": "westeurope",
                    "recipient_emails": "ops@example.com",
                    "hook_url": receiver.url,
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().starts_with("Status update failed:"));
        assert!(state.runs.is_empty());
        assert!(cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_run_is_not_found() {
        let (_, state) = test_state(StaticCredentials::simulated());
        let (status, _) = call(build_router(state), get("/api/runs/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
