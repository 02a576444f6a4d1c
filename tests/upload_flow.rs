//! Login, token handshake and chunked upload against a mock API server,
//! wired the same way the `cup upload` command wires them.

use std::sync::Arc;

use httpmock::prelude::*;
use reqwest::Url;
use serde_json::json;

use commons_uploader::client::HttpApiClient;
use commons_uploader::config::{ApiConfig, UploadConfig};
use commons_uploader::error::ApiError;
use commons_uploader::media::ImageFormat;
use commons_uploader::models::{CategoryRef, TokenKind, UploadRequest};
use commons_uploader::session::Session;
use commons_uploader::token::TokenStatus;
use commons_uploader::upload::{UploadOrchestrator, UploadProgress};
use commons_uploader::wiki::WikiApi;

fn api_for(server: &MockServer) -> Arc<WikiApi> {
    let url: Url = server.url("/w/api.php").parse().unwrap();
    let http = HttpApiClient::new(&ApiConfig::default()).unwrap();
    Arc::new(WikiApi::with_client(http, url.clone(), url))
}

#[tokio::test]
async fn login_then_chunked_upload_and_publish() {
    let server = MockServer::start_async().await;
    let login_token = server.mock(|when, then| {
        when.method(GET)
            .path("/w/api.php")
            .query_param("meta", "tokens")
            .query_param("type", "login");
        then.status(200)
            .json_body(json!({"query": {"tokens": {"logintoken": "login+\\"}}}));
    });
    let login = server.mock(|when, then| {
        when.method(POST)
            .path("/w/api.php")
            .query_param("action", "login");
        then.status(200)
            .header("Set-Cookie", "wikiSession=abc123; Path=/; HttpOnly")
            .json_body(json!({"login": {"result": "Success", "lgusername": "Alice"}}));
    });
    // Only answered inside the session the login established.
    let csrf = server.mock(|when, then| {
        when.method(GET)
            .path("/w/api.php")
            .query_param("meta", "tokens")
            .query_param("type", "csrf")
            .header("cookie", "wikiSession=abc123");
        then.status(200)
            .json_body(json!({"query": {"tokens": {"csrftoken": "csrf+\\"}}}));
    });
    // Each chunk must carry the stash key the previous one was given.
    let first_chunk = server.mock(|when, then| {
        when.method(POST)
            .path("/w/api.php")
            .query_param("action", "upload")
            .header("cookie", "wikiSession=abc123")
            .body_includes("name=\"offset\"\r\n\r\n0\r\n")
            .body_includes("name=\"filesize\"\r\n\r\n10\r\n")
            .body_includes("Content-Type: image/jpeg")
            .body_includes("0123");
        then.status(200).json_body(json!({
            "upload": {"result": "Continue", "filekey": "stash-1", "offset": 4}
        }));
    });
    let second_chunk = server.mock(|when, then| {
        when.method(POST)
            .path("/w/api.php")
            .query_param("action", "upload")
            .body_includes("name=\"filekey\"\r\n\r\nstash-1\r\n")
            .body_includes("name=\"offset\"\r\n\r\n4\r\n")
            .body_includes("4567");
        then.status(200).json_body(json!({
            "upload": {"result": "Continue", "filekey": "stash-2", "offset": 8}
        }));
    });
    let third_chunk = server.mock(|when, then| {
        when.method(POST)
            .path("/w/api.php")
            .query_param("action", "upload")
            .body_includes("name=\"filekey\"\r\n\r\nstash-2\r\n")
            .body_includes("name=\"offset\"\r\n\r\n8\r\n")
            .body_includes("89");
        then.status(200).json_body(json!({
            "upload": {"result": "Success", "filekey": "stash-3"}
        }));
    });
    let publish = server.mock(|when, then| {
        when.method(POST)
            .path("/w/api.php")
            .query_param("action", "upload")
            .body_includes("filekey=stash-3")
            .body_includes("comment=");
        then.status(200).json_body(json!({
            "upload": {"result": "Success", "filename": "Sunset.jpg"}
        }));
    });

    let api = api_for(&server);
    let session = Session::new(api.clone());
    assert!(!session.upload_enabled());
    assert_eq!(session.login("Alice@uploader", "secret").await.unwrap(), "Alice");
    assert!(session.upload_enabled());
    login_token.assert();
    login.assert();

    let config = UploadConfig {
        chunk_size: 4,
        comment: "integration test".into(),
    };
    let uploader = UploadOrchestrator::new(api, session.tokens(), &config);
    let request = UploadRequest::new(b"0123456789".to_vec(), "Sunset", ImageFormat::Jpeg)
        .with_categories(vec![CategoryRef::new("Sunsets in Mauritius")]);

    let file = uploader.start_upload(request).await.unwrap();
    assert_eq!(file.filename, "Sunset.jpg");
    assert_eq!(
        uploader.progress(),
        UploadProgress::Succeeded {
            filename: "Sunset.jpg".into()
        }
    );
    csrf.assert();
    first_chunk.assert();
    second_chunk.assert();
    third_chunk.assert();
    publish.assert();
    assert_eq!(session.tokens().status(TokenKind::Csrf), TokenStatus::Present);
}

#[tokio::test]
async fn rejected_login_keeps_upload_disabled() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET)
            .path("/w/api.php")
            .query_param("meta", "tokens")
            .query_param("type", "login");
        then.status(200)
            .json_body(json!({"query": {"tokens": {"logintoken": "login+\\"}}}));
    });
    server.mock(|when, then| {
        when.method(POST)
            .path("/w/api.php")
            .query_param("action", "login");
        then.status(200).json_body(json!({
            "login": {"result": "Failed", "reason": "Incorrect username or password entered."}
        }));
    });

    let session = Session::new(api_for(&server));
    let err = session.login("Alice", "wrong").await.unwrap_err();
    match err {
        ApiError::Auth { reason, .. } => {
            assert_eq!(reason, "Incorrect username or password entered.")
        }
        other => panic!("expected auth error, got {:?}", other),
    }
    assert!(!session.upload_enabled());
    assert_eq!(session.tokens().status(TokenKind::Login), TokenStatus::Absent);
}

#[tokio::test]
async fn token_endpoint_failure_is_auth_error() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/w/api.php");
        then.status(503).body("maintenance");
    });

    let session = Session::new(api_for(&server));
    let err = session.login("Alice", "secret").await.unwrap_err();
    assert!(matches!(err, ApiError::Auth { .. }), "got {:?}", err);
    assert!(!session.upload_enabled());
}
