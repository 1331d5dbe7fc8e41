//! REST client behavior against a local stub API server.

use agw_client::api::{ApiClient, ApiError, LocationQuery};
use agw_client::session::Session;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use url::Url;

async fn spawn_api(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

fn client_for(addr: SocketAddr, dir: &TempDir) -> ApiClient {
    let session = Arc::new(Session::load(dir.path().join("session.json")).expect("session"));
    let base = Url::parse(&format!("http://{addr}")).expect("base url");
    ApiClient::new(base, session).expect("client")
}

fn terrain_json(id: &str) -> serde_json::Value {
    json!({
        "id": id,
        "name": "North field",
        "latitude": 41.1579,
        "longitude": -8.6291,
        "crop_type": "Wheat",
        "area_hectares": 3.5,
        "created_at": "2026-05-01T08:00:00Z",
        "last_updated": "2026-06-15T08:00:00Z"
    })
}

#[tokio::test]
async fn login_stores_the_token_and_requests_carry_it_as_bearer() {
    let seen_auth: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let capture = seen_auth.clone();

    let app = Router::new()
        .route(
            "/api/auth/login",
            post(|| async { Json(json!({"success": true, "token": "tok-1"})) }),
        )
        .route(
            "/api/terrains",
            get(move |headers: HeaderMap| {
                let capture = capture.clone();
                async move {
                    *capture.lock().unwrap() = headers
                        .get("authorization")
                        .and_then(|value| value.to_str().ok())
                        .map(|value| value.to_string());
                    Json(json!({"success": true, "terrains": [terrain_json("t1")]}))
                }
            }),
        );

    let dir = TempDir::new().unwrap();
    let client = client_for(spawn_api(app).await, &dir);

    client.login("maria", "hunter2").await.expect("login");
    assert_eq!(client.session().token().as_deref(), Some("tok-1"));

    let terrains = client.terrains().await.expect("terrains");
    assert_eq!(terrains.len(), 1);
    assert_eq!(terrains[0].id, "t1");
    assert_eq!(seen_auth.lock().unwrap().as_deref(), Some("Bearer tok-1"));
}

#[tokio::test]
async fn analysis_success_maps_into_one_snapshot() {
    let app = Router::new().route(
        "/api/terrains/:id/agro-analysis",
        post(|| async {
            Json(json!({
                "success": true,
                "weather": {
                    "location": "Porto",
                    "latitude": 41.1579,
                    "longitude": -8.6291,
                    "temperature": 18.2,
                    "humidity": 62.0,
                    "pressure": 1016.0,
                    "description": "few clouds",
                    "timestamp": "2026-06-15T09:30:00Z",
                    "is_complete": true
                },
                "agro_suggestions": {
                    "location": "Porto",
                    "suggestions": ["Irrigate moderately"],
                    "priority": "medium",
                    "confidence": 0.82,
                    "reasoning": "mild and dry",
                    "timestamp": "2026-06-15T09:30:00Z",
                    "suggestion_count": 1
                }
            }))
        }),
    );

    let dir = TempDir::new().unwrap();
    let client = client_for(spawn_api(app).await, &dir);

    let analysis = client.terrain_analysis("t1").await.expect("analysis");
    let weather = analysis.weather.expect("weather");
    assert_eq!(weather.temperature, 18.2);
    let suggestions = analysis.suggestions.expect("suggestions");
    assert_eq!(suggestions.priority, agw_core::Priority::Medium);
    assert_eq!(suggestions.suggestions, vec!["Irrigate moderately"]);
}

#[tokio::test]
async fn success_false_surfaces_the_server_message() {
    let app = Router::new().route(
        "/api/terrains/:id/agro-analysis",
        post(|| async { Json(json!({"success": false, "error": "terrain not found"})) }),
    );

    let dir = TempDir::new().unwrap();
    let client = client_for(spawn_api(app).await, &dir);

    match client.terrain_analysis("t9").await {
        Err(ApiError::Api(message)) => assert_eq!(message, "terrain not found"),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn http_error_statuses_use_the_error_body_when_present() {
    let app = Router::new().route(
        "/api/terrains",
        get(|| async {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "analysis engine offline"})),
            )
        }),
    );

    let dir = TempDir::new().unwrap();
    let client = client_for(spawn_api(app).await, &dir);

    match client.terrains().await {
        Err(ApiError::Api(message)) => assert_eq!(message, "analysis engine offline"),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_server_is_a_network_error() {
    let dir = TempDir::new().unwrap();
    // Nothing listens here: bind, read the port, drop the listener.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = client_for(addr, &dir);
    assert!(matches!(
        client.terrains().await,
        Err(ApiError::Network(_))
    ));
}

#[tokio::test]
async fn create_terrain_validates_the_draft_before_any_request() {
    let dir = TempDir::new().unwrap();
    // Port intentionally dead: a rejected draft must not reach the wire.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let client = client_for(addr, &dir);

    let draft = agw_core::TerrainDraft {
        name: "Bad field".to_string(),
        latitude: 123.0,
        longitude: 0.0,
        ..Default::default()
    };
    match client.create_terrain(&draft).await {
        Err(ApiError::Request(reason)) => assert_eq!(reason, "latitude out of range"),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn bulk_analysis_returns_one_advisory_per_location() {
    let app = Router::new().route(
        "/api/agro/bulk-analyze",
        post(|Json(body): Json<serde_json::Value>| async move {
            let count = body["locations"].as_array().map(|list| list.len()).unwrap_or(0);
            let results: Vec<_> = (0..count)
                .map(|n| {
                    json!({
                        "location": format!("loc-{n}"),
                        "suggestions": ["Monitor soil moisture"],
                        "priority": "low",
                        "confidence": 0.6,
                        "timestamp": "2026-06-15T09:30:00Z",
                        "suggestion_count": 1
                    })
                })
                .collect();
            Json(json!({"success": true, "results": results}))
        }),
    );

    let dir = TempDir::new().unwrap();
    let client = client_for(spawn_api(app).await, &dir);

    let locations = vec![
        LocationQuery {
            name: "Porto".to_string(),
            latitude: 41.1579,
            longitude: -8.6291,
        },
        LocationQuery {
            name: "Braga".to_string(),
            latitude: 41.5518,
            longitude: -8.4229,
        },
    ];
    let advisories = client.bulk_analysis(&locations).await.expect("bulk");
    assert_eq!(advisories.len(), 2);
    assert_eq!(advisories[0].priority, agw_core::Priority::Low);
}
