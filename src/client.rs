//! Thin HTTP wrapper shared by every endpoint.
//!
//! One [`HttpApiClient`] owns one `reqwest::Client` with a cookie store, so
//! the login handshake and the authenticated upload share session state for
//! as long as the client lives. Issuing and decoding are separate steps:
//!
//! 1. [`HttpApiClient::request`] performs the call and returns raw JSON, or
//!    [`ApiError::Transport`] if no usable response arrived.
//! 2. [`decode`] turns that JSON into a typed schema, or
//!    [`ApiError::Decode`] / [`ApiError::Auth`] when the body was an error
//!    envelope or had the wrong shape.
//!
//! No retries happen here; retry policy belongs to callers.

use std::time::Duration;

use reqwest::multipart::Form;
use reqwest::{Client, Method, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};

/// Request payload for POST calls.
pub enum RequestBody {
    /// `application/x-www-form-urlencoded` fields.
    Form(Vec<(&'static str, String)>),
    /// `multipart/form-data`, used for file chunks.
    Multipart(Form),
}

/// Cookie-bearing JSON client for MediaWiki-style `api.php` endpoints.
#[derive(Clone)]
pub struct HttpApiClient {
    client: Client,
}

impl HttpApiClient {
    /// Build a client with a fresh cookie jar.
    pub fn new(config: &ApiConfig) -> ApiResult<Self> {
        let client = Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|source| ApiError::Transport {
                endpoint: "client".to_string(),
                source,
            })?;
        Ok(Self { client })
    }

    /// Issue one API call and return the raw JSON body.
    ///
    /// `action` and `format=json` always travel in the query string. For GET
    /// requests `params` are appended to the query string as well; for POST
    /// requests they are ignored in favour of `body`.
    pub async fn request(
        &self,
        method: Method,
        url: &Url,
        action: &str,
        params: &[(&str, String)],
        body: Option<RequestBody>,
    ) -> ApiResult<Value> {
        let mut builder = self
            .client
            .request(method.clone(), url.clone())
            .query(&[("action", action), ("format", "json")]);

        if method == Method::GET {
            builder = builder.query(params);
        }

        builder = match body {
            Some(RequestBody::Form(fields)) => builder.form(&fields),
            Some(RequestBody::Multipart(form)) => builder.multipart(form),
            None => builder,
        };

        debug!(%method, %url, action, "issuing api request");

        let transport = |source| ApiError::Transport {
            endpoint: action.to_string(),
            source,
        };

        let response = builder
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(transport)?;

        let bytes = response.bytes().await.map_err(transport)?;

        serde_json::from_slice(&bytes).map_err(|err| ApiError::Decode {
            endpoint: action.to_string(),
            body_sample: crate::error::body_sample(&String::from_utf8_lossy(&bytes)),
            reason: format!("body is not JSON: {}", err),
        })
    }
}

/// Decode a JSON body into `T`, classifying MediaWiki error envelopes first.
pub fn decode<T: DeserializeOwned>(endpoint: &str, value: Value) -> ApiResult<T> {
    if let Some(error) = value.get("error") {
        let code = error.get("code").and_then(Value::as_str).unwrap_or("unknown");
        let info = error.get("info").and_then(Value::as_str).unwrap_or("");
        return Err(ApiError::from_envelope(endpoint, code, info, &value));
    }

    match T::deserialize(&value) {
        Ok(decoded) => Ok(decoded),
        Err(err) => Err(ApiError::decode(endpoint, &value, err.to_string())),
    }
}
