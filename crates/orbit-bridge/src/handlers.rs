use axum::{
    extract::{Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde_json::json;

use orbit_common::{Error, TemplateError, TokenMode};
use orbit_core::{CreateOpts, JoinOpts};

use crate::auth::{gate_info, gate_mutating, Tier};
use crate::models::*;
use crate::state::AppState;

/// Error wrapper deciding between HTTP status and `{"error"}` payloads.
///
/// Expected domain failures stay 200 so the CLI and dashboard render
/// them uniformly; auth and protocol violations use the status code.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({"error": self.0.to_string()});
        match &self.0 {
            Error::Unauthorised => (StatusCode::UNAUTHORIZED, Json(body)).into_response(),
            Error::WatcherUnreachable(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
            Error::Template(TemplateError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, Json(body)).into_response()
            }
            _ => (StatusCode::OK, Json(body)).into_response(),
        }
    }
}

type ApiResult = Result<Json<serde_json::Value>, ApiError>;

pub fn build_router(state: AppState) -> Router {
    let mutating = Router::new()
        .route("/create_pool", post(create_pool))
        .route("/join_pool", post(join_pool))
        .route("/attach_to_pool", post(attach_to_pool))
        .route("/stop_pool", post(stop_pool))
        .route("/pause_agent", post(pause_agent))
        .route("/resume_agent", post(resume_agent))
        .route("/delete_nodes", post(delete_nodes))
        .route("/cordon_nodes", post(cordon_nodes))
        .route("/uncordon_nodes", post(uncordon_nodes))
        .route("/add_node_labels", post(add_node_labels))
        .route("/deploy_job", post(deploy_job))
        .route("/delete_job", post(delete_job))
        .layer(middleware::from_fn_with_state(state.clone(), gate_mutating));

    let info = Router::new()
        .route("/fetch_devices", get(fetch_devices))
        .route("/fetch_resources", get(fetch_resources))
        .route("/fetch_gpus", get(fetch_gpus))
        .route("/fetch_job_details", post(fetch_job_details))
        .route("/fetch_job_names", get(fetch_job_names))
        .route("/fetch_job_logs", get(fetch_job_logs))
        .route("/fetch_job_templates", get(fetch_job_templates))
        .route("/fetch_job_defaults", get(fetch_job_defaults))
        .route("/get_node_labels", get(get_node_labels))
        .route("/is_connected", get(is_connected))
        .route("/is_agent_running", get(is_agent_running))
        .route("/is_server", get(is_server))
        .route("/get_pool_token", get(get_pool_token))
        .route("/get_ip_addresses", get(get_ip_addresses))
        .layer(middleware::from_fn_with_state(state.clone(), gate_info));

    Router::new()
        .route("/v1/health", get(health))
        .merge(mutating)
        .merge(info)
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

// ── pool management ─────────────────────────────────────────────────

async fn create_pool(
    State(state): State<AppState>,
    Json(req): Json<CreatePoolRequest>,
) -> ApiResult {
    let outcome = state
        .manager
        .create(CreateOpts {
            cluster_name: req.cluster_name,
            ip_address: req.ip_address,
            num_gpus: req.num_gpus,
            labels: req.labels,
            vpn_token: req.vpn_token,
            location: req.location,
            platform: req.platform,
            user_id: req.user_id,
            user_api_key: req.user_api_key,
        })
        .await?;
    Ok(Json(json!(PoolResponse::from(outcome))))
}

async fn join_pool(State(state): State<AppState>, Json(req): Json<JoinPoolRequest>) -> ApiResult {
    let outcome = state
        .manager
        .join(JoinOpts {
            token: req.token,
            node_name: req.node_name,
            ip_address: req.ip_address,
            num_gpus: req.num_gpus,
            labels: req.labels,
            storage_compatible: req.storage_compatible.unwrap_or(true),
            platform: req.platform,
            user_id: req.user_id,
        })
        .await?;
    Ok(Json(json!(PoolResponse::from(outcome))))
}

async fn attach_to_pool(
    State(state): State<AppState>,
    Json(req): Json<AttachRequest>,
) -> ApiResult {
    let outcome = state.manager.attach(&req.token).await?;
    Ok(Json(json!(PoolResponse::from(outcome))))
}

async fn stop_pool(State(state): State<AppState>, Json(req): Json<StopPoolRequest>) -> ApiResult {
    state.manager.stop(req.skip_node_deletion).await?;
    Ok(Json(json!({"stopped": true})))
}

async fn pause_agent(State(state): State<AppState>) -> ApiResult {
    state.manager.pause().await?;
    Ok(Json(json!({"paused": true})))
}

async fn resume_agent(State(state): State<AppState>) -> ApiResult {
    state.manager.resume().await?;
    Ok(Json(json!({"resumed": true})))
}

// ── node management ─────────────────────────────────────────────────

async fn delete_nodes(State(state): State<AppState>, Json(req): Json<NodesRequest>) -> ApiResult {
    let deleted = state.node_service()?.delete_nodes(&req.nodes).await?;
    Ok(Json(json!(deleted)))
}

async fn cordon_nodes(State(state): State<AppState>, Json(req): Json<NodesRequest>) -> ApiResult {
    state.node_service()?.cordon(&req.nodes).await?;
    Ok(Json(json!({"cordoned": req.nodes})))
}

async fn uncordon_nodes(
    State(state): State<AppState>,
    Json(req): Json<NodesRequest>,
) -> ApiResult {
    state.node_service()?.uncordon(&req.nodes).await?;
    Ok(Json(json!({"uncordoned": req.nodes})))
}

async fn add_node_labels(
    State(state): State<AppState>,
    Json(req): Json<AddNodeLabelsRequest>,
) -> ApiResult {
    state
        .node_service()?
        .add_node_labels(&req.node, &req.labels)
        .await?;
    Ok(Json(json!({"labelled": req.node})))
}

// ── job management ──────────────────────────────────────────────────

fn check_force_namespace(tier: Tier, force_namespace: &Option<String>) -> Result<(), ApiError> {
    if force_namespace.is_some() && tier != Tier::Admin {
        return Err(Error::State(
            "force_namespace requires the admin key".to_string(),
        )
        .into());
    }
    Ok(())
}

async fn deploy_job(
    State(state): State<AppState>,
    Extension(tier): Extension<Tier>,
    Json(req): Json<DeployJobRequest>,
) -> ApiResult {
    check_force_namespace(tier, &req.force_namespace)?;
    let result = state
        .job_service()?
        .deploy_job(
            &req.template_name,
            &req.values,
            req.force_namespace.as_deref(),
            req.target_labels.as_ref(),
            req.target_labels_ops,
        )
        .await?;
    Ok(Json(json!(result)))
}

async fn delete_job(
    State(state): State<AppState>,
    Extension(tier): Extension<Tier>,
    Json(req): Json<DeleteJobRequest>,
) -> ApiResult {
    check_force_namespace(tier, &req.force_namespace)?;
    state
        .job_service()?
        .delete_job(&req.name, req.force_namespace.as_deref())
        .await?;
    Ok(Json(json!({"deleted": req.name})))
}

async fn fetch_job_details(
    State(state): State<AppState>,
    Json(req): Json<FetchJobDetailsRequest>,
) -> ApiResult {
    let jobs = state
        .job_service()?
        .fetch_job_details(req.namespace.as_deref())
        .await?;
    Ok(Json(json!(jobs)))
}

async fn fetch_job_names(State(state): State<AppState>) -> ApiResult {
    let names = state.job_service()?.fetch_job_names().await?;
    Ok(Json(json!(names)))
}

async fn fetch_job_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> ApiResult {
    let logs = state
        .job_service()?
        .fetch_job_logs(&query.name, query.pod.as_deref(), query.tail)
        .await?;
    Ok(Json(json!(logs)))
}

async fn fetch_job_templates(State(state): State<AppState>) -> ApiResult {
    let templates = state.job_service()?.fetch_job_templates()?;
    Ok(Json(json!(templates)))
}

async fn fetch_job_defaults(
    State(state): State<AppState>,
    Query(query): Query<TemplateQuery>,
) -> ApiResult {
    let defaults = state.job_service()?.fetch_job_defaults(&query.name)?;
    Ok(Json(json!(defaults)))
}

// ── info ────────────────────────────────────────────────────────────

async fn fetch_devices(State(state): State<AppState>) -> ApiResult {
    let nodes = state.node_service()?.fetch_devices().await?;
    Ok(Json(json!(nodes)))
}

async fn fetch_resources(
    State(state): State<AppState>,
    Query(query): Query<ResourcesQuery>,
) -> ApiResult {
    let nodes = query.nodes.as_deref().map(split_nodes);
    let summary = state
        .node_service()?
        .fetch_resources(nodes.as_deref())
        .await?;
    Ok(Json(json!(summary)))
}

async fn fetch_gpus(State(state): State<AppState>, Query(query): Query<GpusQuery>) -> ApiResult {
    let gpus = state
        .node_service()?
        .fetch_gpus(query.available_only)
        .await?;
    Ok(Json(json!(gpus)))
}

async fn get_node_labels(
    State(state): State<AppState>,
    Query(query): Query<NodeLabelsQuery>,
) -> ApiResult {
    let labels = state
        .node_service()?
        .get_node_labels(&split_nodes(&query.nodes))
        .await?;
    Ok(Json(json!(labels)))
}

async fn is_connected(State(state): State<AppState>) -> ApiResult {
    Ok(Json(json!(state.manager.is_connected().await)))
}

async fn is_agent_running(State(state): State<AppState>) -> ApiResult {
    Ok(Json(json!(state.manager.is_agent_running().await)))
}

async fn is_server(State(state): State<AppState>) -> ApiResult {
    Ok(Json(json!(state.manager.is_server().await)))
}

async fn get_pool_token(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> ApiResult {
    let mode = TokenMode::from_code(query.mode)
        .ok_or_else(|| Error::TokenInvalid(format!("unknown token mode {}", query.mode)))?;
    let token = state.manager.get_pool_token(mode).await?;
    Ok(Json(json!({"token": token})))
}

async fn get_ip_addresses() -> ApiResult {
    Ok(Json(json!(orbit_core::net::get_ip_addresses().await)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use orbit_common::{ConfigStore, PoolConfig};
    use orbit_core::{DockerRuntime, PoolManager};

    use super::*;

    fn test_state(dir: &std::path::Path, access_key: Option<&str>) -> AppState {
        let store = ConfigStore::new(dir.join("pool"));
        let runtime = DockerRuntime::new(store.compose_file(), "orbit-test");
        AppState {
            store: store.clone(),
            manager: Arc::new(PoolManager::new(store, Arc::new(runtime))),
            access_key: access_key.map(str::to_string),
        }
    }

    fn seed_config(state: &AppState) {
        state
            .store
            .store(&PoolConfig {
                server_ip: "10.0.0.1".into(),
                admin_key: "admin-key".into(),
                write_key: Some("write-key".into()),
                readonly_key: Some("readonly-key".into()),
                watcher_service: "10.0.0.1:31000".into(),
                node_name: "seed".into(),
                cluster_name: "demo".into(),
                public_location: None,
                user_api_key: None,
            })
            .unwrap();
    }

    #[tokio::test]
    async fn health_requires_no_auth() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(test_state(dir.path(), Some("secret")));

        let req = Request::builder()
            .uri("/v1/health")
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn mutating_route_rejects_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(test_state(dir.path(), Some("secret")));

        let req = Request::builder()
            .method("POST")
            .uri("/stop_pool")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn single_bit_flip_in_the_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let key = "0123456789abcdef";
        let state = test_state(dir.path(), Some(key));
        let router = build_router(state);

        // Flip the low bit of the first byte: '0' -> '1'.
        let flipped = "1123456789abcdef";
        let req = Request::builder()
            .method("POST")
            .uri("/stop_pool")
            .header("content-type", "application/json")
            .header("x-api-key", flipped)
            .body(Body::from("{}"))
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn no_configured_key_means_nothing_passes() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(test_state(dir.path(), None));

        let req = Request::builder()
            .method("POST")
            .uri("/stop_pool")
            .header("content-type", "application/json")
            .header("x-api-key", "anything")
            .body(Body::from("{}"))
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn info_route_accepts_any_tier_key() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), Some("secret"));
        seed_config(&state);
        let router = build_router(state);

        for key in ["admin-key", "write-key", "readonly-key", "secret"] {
            let req = Request::builder()
                .uri("/is_agent_running")
                .header("x-api-key", key)
                .body(Body::empty())
                .unwrap();
            let resp = router.clone().oneshot(req).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK, "key {key} rejected");
        }

        let req = Request::builder()
            .uri("/is_agent_running")
            .header("x-api-key", "wrong")
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_request_fields_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(test_state(dir.path(), Some("secret")));

        let req = Request::builder()
            .method("POST")
            .uri("/delete_nodes")
            .header("content-type", "application/json")
            .header("x-api-key", "secret")
            .body(Body::from(r#"{"nodes": [], "extra": true}"#))
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn force_namespace_is_admin_gated() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), Some("secret"));
        seed_config(&state);
        let router = build_router(state);

        // Access key passes the gate but is not the admin key, so the
        // request is answered with a domain error.
        let body = r#"{"name": "my-job", "force_namespace": "other"}"#;
        let req = Request::builder()
            .method("POST")
            .uri("/delete_job")
            .header("content-type", "application/json")
            .header("x-api-key", "secret")
            .body(Body::from(body))
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn reads_without_pool_config_answer_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(test_state(dir.path(), Some("secret")));

        let req = Request::builder()
            .uri("/is_connected")
            .header("x-api-key", "secret")
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
