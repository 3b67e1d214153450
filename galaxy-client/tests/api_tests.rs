//! Integration tests for the Galaxy API client against a stub HTTP server

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use flate2::{Compression, write::ZlibEncoder};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use galaxy_client::{ApiClient, Config, Error, SecureLinkProvider, StaticTokenProvider};

fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

async fn client_for(server: &MockServer) -> ApiClient {
    ApiClient::new(Config::for_root(server.uri()))
        .unwrap()
        .with_token_provider(Arc::new(StaticTokenProvider::new("token-1")))
}

#[tokio::test]
async fn builds_endpoint_decodes_json() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products/1207658930/os/windows/builds"))
        .and(query_param("generation", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 1,
            "count": 1,
            "items": [{"build_id": "55136646198558648", "generation": 2}],
        })))
        .mount(&server)
        .await;

    let api = client_for(&server).await;
    let builds = api.builds("1207658930", "windows", 2).await.unwrap();
    assert_eq!(builds["count"], 1);
    assert_eq!(builds["items"][0]["generation"], 2);
}

#[tokio::test]
async fn v2_manifest_is_inflated_transparently() {
    let server = MockServer::start().await;
    let body = zlib(br#"{"depot":{"items":[]}}"#);
    Mock::given(method("GET"))
        .and(path(
            "/content-system/v2/meta/e8/0b/e80b5017098950fc58aad83c8c14978e",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let api = client_for(&server).await;
    let manifest = api
        .v2_manifest("e80b5017098950fc58aad83c8c14978e")
        .await
        .unwrap();
    assert!(manifest["depot"]["items"].as_array().unwrap().is_empty());

    // The raw variant must hand back the compressed bytes untouched.
    let raw = api
        .v2_manifest_raw("e80b5017098950fc58aad83c8c14978e")
        .await
        .unwrap();
    assert_eq!(raw, body);
}

#[tokio::test]
async fn missing_content_surfaces_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let api = client_for(&server).await;
    let err = api
        .v2_manifest("e80b5017098950fc58aad83c8c14978e")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/content-system/v2/meta/ab/cd/abcd"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/content-system/v2/meta/ab/cd/abcd"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let api = client_for(&server).await;
    let value = api.v2_manifest("abcd").await.unwrap();
    assert_eq!(value["ok"], true);
}

struct RefreshingProvider {
    refreshed: AtomicBool,
}

#[async_trait]
impl galaxy_client::TokenProvider for RefreshingProvider {
    async fn access_token(&self) -> galaxy_client::Result<String> {
        if self.refreshed.load(Ordering::SeqCst) {
            Ok("token-fresh".to_string())
        } else {
            Ok("token-stale".to_string())
        }
    }

    async fn refresh(&self) -> galaxy_client::Result<String> {
        self.refreshed.store(true, Ordering::SeqCst);
        self.access_token().await
    }
}

#[tokio::test]
async fn unauthorized_triggers_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("authorization", "Bearer token-stale"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(header("authorization", "Bearer token-fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "urls": [{
                "url_format": "https://cdn.example.com/{token}/{GALAXY_PATH}",
                "parameters": {"token": "sig"},
                "priority": 0,
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let api = ApiClient::new(Config::for_root(server.uri()))
        .unwrap()
        .with_token_provider(Arc::new(RefreshingProvider {
            refreshed: AtomicBool::new(false),
        }));

    let links = api.secure_link("1", "/", 2).await.unwrap();
    assert_eq!(links["urls"][0]["parameters"]["token"], "sig");
}

#[tokio::test]
async fn concurrent_secure_link_calls_trigger_exactly_one_refresh() {
    let server = MockServer::start().await;
    let hits = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&hits);

    Mock::given(method("GET"))
        .and(path("/products/42/secure_link"))
        .respond_with(move |_: &wiremock::Request| {
            counter.fetch_add(1, Ordering::SeqCst);
            ResponseTemplate::new(200).set_body_json(json!({
                "urls": [{
                    "url_format": "https://cdn.example.com/{token}/{GALAXY_PATH}",
                    "parameters": {"token": "sig", "expires_at": 4_102_444_800_i64},
                    "priority": 0,
                }]
            }))
        })
        .mount(&server)
        .await;

    let api = client_for(&server).await;
    let provider = Arc::new(SecureLinkProvider::new(api));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let provider = Arc::clone(&provider);
            tokio::spawn(async move { provider.store_urls("42", 2).await })
        })
        .collect();

    for task in tasks {
        let urls = task.await.unwrap().unwrap();
        assert_eq!(urls, vec!["https://cdn.example.com/sig/{GALAXY_PATH}"]);
    }

    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
