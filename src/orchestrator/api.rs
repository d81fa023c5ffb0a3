use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;

use super::error::ApiError;
use super::remediation::{
    ApplyOutcome, Estimate, Remediation, RemediationRequest, STRATEGIES, Strategy,
};
use super::report::{self, ReportFormat, ScanReport};
use super::scans::ScanCoordinator;
use super::store::{
    Container, Host, HostUpdate, NewHost, Page, ScanHistory, Store, Vulnerability,
    VulnerabilityFilter,
};

pub struct AppState {
    pub store: Store,
    pub scans: ScanCoordinator,
    pub remediation: Remediation,
}

pub fn router(state: Arc<AppState>) -> Router {
    let v1 = Router::new()
        .route("/hosts", get(list_hosts).post(create_host))
        .route(
            "/hosts/{host_id}",
            get(get_host).put(update_host).delete(delete_host),
        )
        .route("/hosts/{host_id}/containers", get(list_containers))
        .route("/scan", get(scan_history).post(start_scan))
        .route("/scan/{scan_id}", get(get_scan))
        .route("/scan/{scan_id}/report", get(scan_report))
        .route("/vulnerabilities", get(list_vulnerabilities))
        .route("/vulnerabilities/{id}", get(get_vulnerability))
        .route("/remediation/strategies", get(list_strategies))
        .route("/remediation/estimate", post(estimate_downtime))
        .route("/remediation/apply", post(apply_remediation));

    Router::new()
        .route("/health", get(health))
        .nest("/v1", v1)
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "service": "aegis" }))
}

// ---------------------------------------------------------------------------
// Hosts
// ---------------------------------------------------------------------------

fn default_port() -> i64 {
    5000
}

fn valid_port(port: i64) -> Result<u16, ApiError> {
    u16::try_from(port)
        .ok()
        .filter(|port| *port != 0)
        .ok_or_else(|| ApiError::Validation(format!("Port {port} is outside 1..=65535")))
}

#[derive(Debug, Deserialize)]
struct CreateHost {
    name: String,
    address: String,
    #[serde(default = "default_port")]
    port: i64,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UpdateHost {
    name: Option<String>,
    address: Option<String>,
    port: Option<i64>,
    description: Option<String>,
}

async fn list_hosts(
    State(state): State<Arc<AppState>>,
    Query(page): Query<Page>,
) -> Result<Json<Vec<Host>>, ApiError> {
    Ok(Json(state.store.list_hosts(page).await?))
}

async fn create_host(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateHost>,
) -> Result<Json<Host>, ApiError> {
    let host = NewHost {
        port: valid_port(body.port)?,
        name: body.name,
        address: body.address,
        description: body.description,
    };
    Ok(Json(state.store.create_host(&host).await?))
}

async fn get_host(
    State(state): State<Arc<AppState>>,
    Path(host_id): Path<String>,
) -> Result<Json<Host>, ApiError> {
    Ok(Json(state.store.get_host(&host_id).await?))
}

async fn update_host(
    State(state): State<Arc<AppState>>,
    Path(host_id): Path<String>,
    Json(body): Json<UpdateHost>,
) -> Result<Json<Host>, ApiError> {
    let update = HostUpdate {
        port: body.port.map(valid_port).transpose()?,
        name: body.name,
        address: body.address,
        description: body.description,
    };
    Ok(Json(state.store.update_host(&host_id, &update).await?))
}

async fn delete_host(
    State(state): State<Arc<AppState>>,
    Path(host_id): Path<String>,
) -> Result<Json<bool>, ApiError> {
    state.store.delete_host(&host_id).await?;
    Ok(Json(true))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RefreshQuery {
    refresh: bool,
}

async fn list_containers(
    State(state): State<Arc<AppState>>,
    Path(host_id): Path<String>,
    Query(query): Query<RefreshQuery>,
) -> Result<Json<Vec<Container>>, ApiError> {
    Ok(Json(state.scans.containers(&host_id, query.refresh).await?))
}

// ---------------------------------------------------------------------------
// Scans
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ScanRequest {
    host_id: String,
    container_id: String,
}

async fn start_scan(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ScanRequest>,
) -> Result<Json<ScanHistory>, ApiError> {
    let scan = state
        .scans
        .request_scan(&body.host_id, &body.container_id)
        .await?;
    Ok(Json(scan))
}

async fn scan_history(
    State(state): State<Arc<AppState>>,
    Query(page): Query<Page>,
) -> Result<Json<Vec<ScanHistory>>, ApiError> {
    Ok(Json(state.store.list_scans(page).await?))
}

async fn get_scan(
    State(state): State<Arc<AppState>>,
    Path(scan_id): Path<String>,
) -> Result<Json<ScanReport>, ApiError> {
    Ok(Json(state.scans.scan_report(&scan_id).await?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReportQuery {
    format: Option<String>,
}

async fn scan_report(
    State(state): State<Arc<AppState>>,
    Path(scan_id): Path<String>,
    Query(query): Query<ReportQuery>,
) -> Result<Response, ApiError> {
    let format = match query.format.as_deref() {
        Some(format) => format.parse()?,
        None => ReportFormat::default(),
    };

    let scan = state.store.get_scan(&scan_id).await?;
    let vulnerabilities = state.store.scan_vulnerabilities(&scan_id).await?;
    let body = report::render(
        &ScanReport {
            scan,
            vulnerabilities,
        },
        format,
    )?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        report::file_name(&scan_id, format)
    );
    let headers = [
        (header::CONTENT_TYPE, format.content_type().to_string()),
        (header::CONTENT_DISPOSITION, disposition),
    ];
    Ok((headers, body).into_response())
}

async fn list_vulnerabilities(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<VulnerabilityFilter>,
    Query(page): Query<Page>,
) -> Result<Json<Vec<Vulnerability>>, ApiError> {
    Ok(Json(state.store.list_vulnerabilities(&filter, page).await?))
}

async fn get_vulnerability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vulnerability>, ApiError> {
    Ok(Json(state.store.get_vulnerability(&id).await?))
}

// ---------------------------------------------------------------------------
// Remediation
// ---------------------------------------------------------------------------

async fn list_strategies() -> Json<&'static [Strategy]> {
    Json(STRATEGIES.as_slice())
}

async fn estimate_downtime(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RemediationRequest>,
) -> Result<Json<Estimate>, ApiError> {
    Ok(Json(state.remediation.estimate(&request).await?))
}

async fn apply_remediation(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RemediationRequest>,
) -> Result<Json<ApplyOutcome>, ApiError> {
    Ok(Json(state.remediation.apply(&request).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::scans::tests::{FakeAgent, seeded_store};
    use crate::wire::ScanStatus;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::num::NonZeroU32;
    use tower::ServiceExt;

    fn app(store: Store, agent: Arc<FakeAgent>) -> Router {
        router(Arc::new(AppState {
            scans: ScanCoordinator::new(store.clone(), agent),
            remediation: Remediation::new(store.clone(), NonZeroU32::new(2).unwrap()),
            store,
        }))
    }

    async fn empty_app() -> Router {
        app(
            Store::open_in_memory().await.unwrap(),
            Arc::new(FakeAgent::accepting()),
        )
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap()
            .to_vec()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn send_json(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = empty_app().await.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["service"], "aegis");
    }

    #[tokio::test]
    async fn test_host_crud() {
        let app = empty_app().await;

        let response = app
            .clone()
            .oneshot(send_json(
                "POST",
                "/v1/hosts",
                serde_json::json!({ "name": "web-1", "address": "10.0.0.5" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let host = body_json(response).await;
        assert_eq!(host["port"], 5000);
        let id = host["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(send_json(
                "PUT",
                &format!("/v1/hosts/{id}"),
                serde_json::json!({ "port": 6000 }),
            ))
            .await
            .unwrap();
        let updated = body_json(response).await;
        assert_eq!(updated["port"], 6000);
        assert_eq!(updated["name"], "web-1");

        let response = app.clone().oneshot(get("/v1/hosts?limit=10")).await.unwrap();
        assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);

        let response = app
            .clone()
            .oneshot(
                Request::delete(format!("/v1/hosts/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!(true));

        let response = app.oneshot(get(&format!("/v1/hosts/{id}"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "not_found");
    }

    #[tokio::test]
    async fn test_port_out_of_range() {
        let app = empty_app().await;
        for port in [0, 70000] {
            let response = app
                .clone()
                .oneshot(send_json(
                    "POST",
                    "/v1/hosts",
                    serde_json::json!({ "name": "x", "address": "10.0.0.9", "port": port }),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "port {port}");
        }
    }

    #[tokio::test]
    async fn test_scan_flow_and_csv_report() {
        let (store, host) = seeded_store().await;
        let agent = Arc::new(FakeAgent::accepting());
        let app = app(store, agent.clone());

        let response = app
            .clone()
            .oneshot(send_json(
                "POST",
                "/v1/scan",
                serde_json::json!({ "host_id": host.id, "container_id": "c1" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let scan = body_json(response).await;
        assert_eq!(scan["status"], "pending");
        let scan_id = scan["scan_id"].as_str().unwrap().to_string();

        agent.report(
            ScanStatus::Completed,
            Some(serde_json::json!({
                "Results": [{ "Vulnerabilities": [{
                    "VulnerabilityID": "CVE-1",
                    "Severity": "HIGH",
                    "Description": "d",
                    "CVSS": { "nvd": { "V3Score": 9.1 } },
                    "References": ["https://example.com/cve-1"]
                }] }]
            })),
        );

        let response = app
            .clone()
            .oneshot(get(&format!("/v1/scan/{scan_id}")))
            .await
            .unwrap();
        let detail = body_json(response).await;
        assert_eq!(detail["status"], "completed");
        assert_eq!(detail["vulnerabilities"].as_array().unwrap().len(), 1);

        let response = app
            .clone()
            .oneshot(get(&format!("/v1/scan/{scan_id}/report?format=csv")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            format!("attachment; filename=\"aegis-scan-report-{scan_id}.csv\"").as_str()
        );
        let csv = String::from_utf8(body_bytes(response).await).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(
            lines,
            [
                "cve_id,severity,cvss,description,recommendation",
                "CVE-1,HIGH,9.1,d,More information: https://example.com/cve-1"
            ]
        );

        let response = app
            .clone()
            .oneshot(get(&format!("/v1/scan/{scan_id}/report?format=pdf")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(get(&format!("/v1/vulnerabilities?host_id={}", host.id)))
            .await
            .unwrap();
        let vulnerabilities = body_json(response).await;
        let vulnerability_id = vulnerabilities[0]["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(get(&format!("/v1/vulnerabilities/{vulnerability_id}")))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["details"]["Severity"], "HIGH");

        let response = app
            .oneshot(get("/v1/scan?skip=0&limit=5"))
            .await
            .unwrap();
        assert_eq!(body_json(response).await[0]["scan_id"], scan_id.as_str());
    }

    #[tokio::test]
    async fn test_rejected_dispatch_is_recorded_not_returned() {
        let (store, host) = seeded_store().await;
        let app = app(store, Arc::new(FakeAgent::default()));

        let response = app
            .oneshot(send_json(
                "POST",
                "/v1/scan",
                serde_json::json!({ "host_id": host.id, "container_id": "c1" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let scan = body_json(response).await;
        assert_eq!(scan["status"], "error");
        assert!(scan["finished_at"].is_string());
    }

    #[tokio::test]
    async fn test_unknown_scan_and_report() {
        let app = empty_app().await;
        for uri in ["/v1/scan/missing", "/v1/scan/missing/report"] {
            let response = app.clone().oneshot(get(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_remediation_endpoints() {
        let (store, host) = seeded_store().await;
        let scan = store.create_scan(&host.id, "c1").await.unwrap();
        let app = app(store, Arc::new(FakeAgent::accepting()));

        let response = app
            .clone()
            .oneshot(get("/v1/remediation/strategies"))
            .await
            .unwrap();
        let strategies = body_json(response).await;
        assert_eq!(strategies.as_array().unwrap().len(), 3);
        assert_eq!(strategies[0]["id"], "hot-patch");

        let response = app
            .clone()
            .oneshot(send_json(
                "POST",
                "/v1/remediation/estimate",
                serde_json::json!({ "scan_id": scan.scan_id, "strategy": "restart" }),
            ))
            .await
            .unwrap();
        let estimate = body_json(response).await;
        assert_eq!(estimate["estimated_time"], 120);
        assert_eq!(estimate["affected_containers"], 1);
        assert_eq!(estimate["strategy"], "Restart");

        let response = app
            .clone()
            .oneshot(send_json(
                "POST",
                "/v1/remediation/apply",
                serde_json::json!({ "scan_id": scan.scan_id, "strategy": "teleport" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "validation_error");

        let response = app
            .oneshot(send_json(
                "POST",
                "/v1/remediation/apply",
                serde_json::json!({ "scan_id": scan.scan_id, "strategy": "rolling-update" }),
            ))
            .await
            .unwrap();
        let outcome = body_json(response).await;
        assert_eq!(outcome["success"], true);
        assert_eq!(outcome["details"]["status"], "scheduled");
        assert_eq!(outcome["details"]["container_name"], "c1-name");
    }
}
