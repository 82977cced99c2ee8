//! HTTP refresher, transport and gateway against a mock server.

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::json;
use sessiongate_core::auth::HttpRefresher;
use sessiongate_core::{
    AccessToken, ApiRequest, Config, CredentialRefresher, HttpTransport, Identity, RefreshError,
    RefreshToken, RequestGateway, Transport,
};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REFRESH_PATH: &str = "/auth/token/refresh";

fn refresher(server: &MockServer) -> HttpRefresher {
    HttpRefresher::new(format!("{}{}", server.uri(), REFRESH_PATH), Duration::from_secs(5))
        .expect("client should build")
}

#[tokio::test]
async fn refresher_returns_new_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .and(body_json(json!({"refresh_token": "refresh-1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-2",
            "refresh_token": "refresh-2"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let refreshed = refresher(&server)
        .refresh(&RefreshToken::new("refresh-1"))
        .await
        .unwrap();
    assert_eq!(refreshed.access_token, AccessToken::new("access-2"));
    assert_eq!(refreshed.refresh_token, Some(RefreshToken::new("refresh-2")));
}

#[tokio::test]
async fn refresher_maps_rejections() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .and(body_json(json!({"refresh_token": "expired"})))
        .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .and(body_json(json!({"refresh_token": "revoked"})))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "Token is revoked"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .and(body_json(json!({"refresh_token": "flaky"})))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let refresher = refresher(&server);
    assert_eq!(
        refresher.refresh(&RefreshToken::new("expired")).await,
        Err(RefreshError::Expired)
    );
    assert_eq!(
        refresher.refresh(&RefreshToken::new("revoked")).await,
        Err(RefreshError::Revoked)
    );
    let flaky = refresher.refresh(&RefreshToken::new("flaky")).await.unwrap_err();
    assert!(flaky.is_recoverable());
}

#[tokio::test]
async fn refresher_treats_garbage_body_as_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let err = refresher(&server)
        .refresh(&RefreshToken::new("refresh-1"))
        .await
        .unwrap_err();
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn refresher_unreachable_endpoint_is_network_failure() {
    let refresher =
        HttpRefresher::new("http://127.0.0.1:1/auth/token/refresh", Duration::from_secs(2)).unwrap();
    let err = refresher
        .refresh(&RefreshToken::new("refresh-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, RefreshError::NetworkFailure(_)));
}

#[tokio::test]
async fn transport_attaches_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 42})))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::new().unwrap();
    let request = ApiRequest::get(format!("{}/me", server.uri()));
    let response = transport
        .dispatch(&request, Some(&AccessToken::new("access-1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().unwrap();
    assert_eq!(body["id"], 42);
}

#[tokio::test]
async fn gateway_refreshes_and_retries_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/courses"))
        .and(header("authorization", "Bearer access-old"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/courses"))
        .and(header("authorization", "Bearer access-new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"title": "Rust 101"}])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "access-new"})))
        .expect(1)
        .mount(&server)
        .await;

    let config = Config {
        auth_base_url: server.uri(),
        refresh_path: REFRESH_PATH.to_string(),
        persist_session: false,
        ..Config::default()
    };
    let gateway = RequestGateway::from_config(&config).unwrap();
    gateway
        .coordinator()
        .login(
            AccessToken::new("access-old"),
            Some(RefreshToken::new("refresh-1")),
            Identity::new("42", "student", "Ada Lovelace"),
        )
        .unwrap();

    let response = gateway
        .execute(&ApiRequest::get(format!("{}/courses", server.uri())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        gateway.coordinator().current_credential(),
        Some(AccessToken::new("access-new"))
    );
}
