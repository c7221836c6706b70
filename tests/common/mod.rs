//! Common test utilities and fixtures for integration tests

#![allow(dead_code)]

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use std::net::SocketAddr;
use tempfile::TempDir;
use tower::ServiceExt;

use visitor_analytics::crypto::{RequestSigningParams, SiteSigningKey};
use visitor_analytics::domain::SiteId;
use visitor_analytics::infra::ShutdownCoordinator;
use visitor_analytics::server::{build_router, AppState, Config};

/// Visitor X
pub const ADDR_X: &str = "203.0.113.10:40000";

/// Visitor Y
pub const ADDR_Y: &str = "198.51.100.20:40000";

pub fn site(id: &str) -> SiteId {
    SiteId::parse(id).unwrap()
}

/// A full application over a temporary data directory.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub config: Config,
    pub shutdown: ShutdownCoordinator,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(customize: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config {
            data_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        customize(&mut config);

        let shutdown = ShutdownCoordinator::new();
        let state = AppState::build(&config, shutdown.signal()).await.unwrap();
        let router = build_router(state.clone(), &config).unwrap();
        Self {
            router,
            state,
            config,
            shutdown,
            _dir: dir,
        }
    }

    /// Send a request from `peer` and decode the JSON response body.
    pub async fn send(&self, mut request: Request<Body>, peer: &str) -> (StatusCode, serde_json::Value) {
        let peer: SocketAddr = peer.parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(peer));

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, body)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        self.send(request, ADDR_X).await
    }

    pub async fn post_json(&self, uri: &str, body: serde_json::Value, peer: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request, peer).await
    }

    pub async fn track(&self, site_id: &str, path: &str, peer: &str) -> (StatusCode, serde_json::Value) {
        self.post_json(
            "/track",
            serde_json::json!({"site_id": site_id, "path": path}),
            peer,
        )
        .await
    }

    /// Run the pairing flow for `site_id` and return the registered key.
    pub async fn pair(&self, site_id: &str) -> SiteSigningKey {
        let (status, init) = self
            .post_json("/pair/init", serde_json::json!({"site_id": site_id}), ADDR_X)
            .await;
        assert_eq!(status, StatusCode::OK, "{init}");

        let nonce = hex::decode(init["nonce"].as_str().unwrap()).unwrap();
        let key = SiteSigningKey::generate();
        let (status, body) = self
            .post_json(
                "/pair/complete",
                serde_json::json!({
                    "site_id": site_id,
                    "public_key": hex::encode(key.public_key_bytes()),
                    "signature": hex::encode(key.sign(&nonce)),
                }),
                ADDR_X,
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        key
    }
}

/// A GET request carrying a signature over its method, path and query, timestamp and empty body.
pub fn signed_get(key: &SiteSigningKey, uri: &str, timestamp: i64) -> Request<Body> {
    let signature = key.sign_request(&RequestSigningParams {
        method: "GET",
        path: uri,
        timestamp,
        body: b"",
    });
    Request::builder()
        .uri(uri)
        .header("x-signature", hex::encode(signature))
        .header("x-timestamp", timestamp.to_string())
        .body(Body::empty())
        .unwrap()
}
