//! Typed MediaWiki endpoints.
//!
//! [`WikiApi`] knows the two API bases (the media repository and the
//! linked-data site) and the parameters and response shapes of each call.
//! It implements every backend trait in [`traits`](crate::traits), so one
//! shared instance (and therefore one cookie jar) serves search, login,
//! token fetches and uploads.
//!
//! | Call | Base | Method | Consumed response |
//! |------|------|--------|-------------------|
//! | category prefix search | commons | GET | `query.allcategories[].*` |
//! | entity full-text search | wikidata | GET | `query.search[].{pageid,title,snippet}` |
//! | file exists | commons | GET | `query.pages` keys (`"-1"` = missing) |
//! | token fetch | commons | GET | `query.tokens.{logintoken,csrftoken}` |
//! | login | commons | POST form | `login.{result,reason,lgusername}` |
//! | chunk upload | commons | POST multipart | `upload.{result,filekey,offset}` |
//! | publish | commons | POST form | `upload.{result,filename}` |

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Method, Url};
use serde::Deserialize;
use tracing::debug;

use crate::client::{decode, HttpApiClient, RequestBody};
use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};
use crate::models::{CategoryRef, EntityRef, TokenKind};
use crate::traits::{
    Authenticator, ChunkAck, ChunkSubmission, FileLookup, LoginOutcome, PublishSubmission,
    PublishedFile, SearchSource, TokenFetcher, UploadTransport,
};

// ═══════════════════════════════════════════════════════════════════════
// Response schemas
// ═══════════════════════════════════════════════════════════════════════

#[derive(Deserialize)]
struct QueryEnvelope<Q> {
    query: Q,
}

#[derive(Deserialize)]
struct AllCategories {
    #[serde(default)]
    allcategories: Vec<CategoryHit>,
}

#[derive(Deserialize)]
struct CategoryHit {
    #[serde(rename = "*")]
    name: String,
}

#[derive(Deserialize)]
struct FullTextSearch {
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    pageid: u64,
    title: String,
    #[serde(default)]
    snippet: String,
}

#[derive(Deserialize)]
struct Pages {
    #[serde(default)]
    pages: HashMap<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct Tokens {
    tokens: TokenValues,
}

#[derive(Deserialize)]
struct TokenValues {
    logintoken: Option<String>,
    csrftoken: Option<String>,
}

#[derive(Deserialize)]
struct LoginEnvelope {
    login: LoginBody,
}

#[derive(Deserialize)]
struct LoginBody {
    result: String,
    reason: Option<String>,
    lgusername: Option<String>,
}

#[derive(Deserialize)]
struct UploadEnvelope {
    upload: UploadBody,
}

#[derive(Deserialize)]
struct UploadBody {
    result: String,
    filekey: Option<String>,
    offset: Option<usize>,
    filename: Option<String>,
    warnings: Option<serde_json::Value>,
}

// ═══════════════════════════════════════════════════════════════════════
// WikiApi
// ═══════════════════════════════════════════════════════════════════════

/// Client for the media repository and linked-data APIs.
pub struct WikiApi {
    http: HttpApiClient,
    commons: Url,
    wikidata: Url,
}

impl WikiApi {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let http = HttpApiClient::new(config)?;
        Ok(Self::with_client(http, config.commons()?, config.wikidata()?))
    }

    pub fn with_client(http: HttpApiClient, commons: Url, wikidata: Url) -> Self {
        Self {
            http,
            commons,
            wikidata,
        }
    }

    /// Categories whose name starts with `prefix`, in server order.
    pub async fn search_categories(&self, prefix: &str, limit: u32) -> ApiResult<Vec<CategoryRef>> {
        let params = [
            ("list", "allcategories".to_string()),
            ("acprefix", prefix.to_string()),
            ("aclimit", limit.to_string()),
        ];
        let value = self
            .http
            .request(Method::GET, &self.commons, "query", &params, None)
            .await?;
        let decoded: QueryEnvelope<AllCategories> = decode("allcategories", value)?;
        Ok(decoded
            .query
            .allcategories
            .into_iter()
            .map(|hit| CategoryRef::new(hit.name))
            .collect())
    }

    /// Entities matching `terms` by full-text search, in server order.
    pub async fn search_entities(&self, terms: &str, limit: u32) -> ApiResult<Vec<EntityRef>> {
        let params = [
            ("list", "search".to_string()),
            ("srsearch", terms.to_string()),
            ("srlimit", limit.to_string()),
        ];
        let value = self
            .http
            .request(Method::GET, &self.wikidata, "query", &params, None)
            .await?;
        let decoded: QueryEnvelope<FullTextSearch> = decode("search", value)?;
        Ok(decoded
            .query
            .search
            .into_iter()
            .map(|hit| EntityRef::new(hit.pageid, hit.title, strip_markup(&hit.snippet)))
            .collect())
    }

    /// Whether `File:<name>` already exists on the media repository.
    pub async fn file_exists(&self, name: &str) -> ApiResult<bool> {
        let params = [("titles", format!("File:{}", name))];
        let value = self
            .http
            .request(Method::GET, &self.commons, "query", &params, None)
            .await?;
        let decoded: QueryEnvelope<Pages> = decode("pages", value)?;
        Ok(!decoded.query.pages.contains_key("-1"))
    }

    async fn request_token(&self, kind: TokenKind) -> ApiResult<String> {
        let params = [
            ("meta", "tokens".to_string()),
            ("type", kind.api_type().to_string()),
        ];
        let value = self
            .http
            .request(Method::GET, &self.commons, "query", &params, None)
            .await?;
        let sample = value.clone();
        let decoded: QueryEnvelope<Tokens> = decode("tokens", value)?;
        let token = match kind {
            TokenKind::Login => decoded.query.tokens.logintoken,
            TokenKind::Csrf => decoded.query.tokens.csrftoken,
        };
        token.ok_or_else(|| ApiError::decode("tokens", &sample, format!("no {} token", kind)))
    }

    async fn request_login(
        &self,
        username: &str,
        password: &str,
        token: &str,
    ) -> ApiResult<LoginOutcome> {
        let fields = vec![
            ("lgname", username.to_string()),
            ("lgpassword", password.to_string()),
            ("lgtoken", token.to_string()),
        ];
        let value = self
            .http
            .request(
                Method::POST,
                &self.commons,
                "login",
                &[],
                Some(RequestBody::Form(fields)),
            )
            .await?;
        let decoded: LoginEnvelope = decode("login", value)?;
        let body = decoded.login;
        Ok(match body.result.as_str() {
            "Success" => LoginOutcome::Success {
                username: body.lgusername.unwrap_or_else(|| username.to_string()),
            },
            other => LoginOutcome::Failed {
                reason: body
                    .reason
                    .unwrap_or_else(|| format!("login result: {}", other)),
            },
        })
    }

    async fn request_chunk(&self, chunk: &ChunkSubmission<'_>) -> ApiResult<ChunkAck> {
        let mut form = Form::new()
            .text("stash", "1")
            .text("ignorewarnings", "1")
            .text("filename", chunk.filename.to_string())
            .text("filesize", chunk.filesize.to_string())
            .text("offset", chunk.offset.to_string())
            .text("token", chunk.token.to_string());
        if let Some(filekey) = chunk.filekey {
            form = form.text("filekey", filekey.to_string());
        }
        let part = Part::bytes(chunk.bytes.to_vec())
            .file_name(chunk.filename.to_string())
            .mime_str(chunk.mime_type)
            .map_err(|err| {
                let reason = format!("invalid content type {}: {}", chunk.mime_type, err);
                ApiError::precondition(reason)
            })?;
        let form = form.part("file", part);

        debug!(
            filename = chunk.filename,
            offset = chunk.offset,
            len = chunk.bytes.len(),
            "submitting chunk"
        );

        let value = self
            .http
            .request(
                Method::POST,
                &self.commons,
                "upload",
                &[],
                Some(RequestBody::Multipart(form)),
            )
            .await?;
        let sample = value.clone();
        let decoded: UploadEnvelope = decode("upload", value)?;
        let body = decoded.upload;
        match (body.result.as_str(), body.filekey) {
            ("Continue" | "Success", Some(filekey)) => Ok(ChunkAck {
                filekey,
                next_offset: body.offset,
            }),
            (result, _) => Err(ApiError::decode(
                "upload",
                &sample,
                format!("chunk not acknowledged (result {})", result),
            )),
        }
    }

    async fn request_publish(&self, publish: &PublishSubmission<'_>) -> ApiResult<PublishedFile> {
        let fields = vec![
            ("filename", publish.filename.to_string()),
            ("filekey", publish.filekey.to_string()),
            ("token", publish.token.to_string()),
            ("text", publish.text.to_string()),
            ("comment", publish.comment.to_string()),
            ("ignorewarnings", "1".to_string()),
        ];
        let value = self
            .http
            .request(
                Method::POST,
                &self.commons,
                "upload",
                &[],
                Some(RequestBody::Form(fields)),
            )
            .await?;
        let sample = value.clone();
        let decoded: UploadEnvelope = decode("upload", value)?;
        let body = decoded.upload;
        if body.result != "Success" {
            let reason = match body.warnings {
                Some(warnings) => format!("publish returned {}: {}", body.result, warnings),
                None => format!("publish returned {}", body.result),
            };
            return Err(ApiError::decode("upload", &sample, reason));
        }
        Ok(PublishedFile {
            filename: body
                .filename
                .unwrap_or_else(|| publish.filename.to_string()),
        })
    }
}

/// Remove HTML tags (search-match highlighting) from a snippet.
fn strip_markup(snippet: &str) -> String {
    let mut out = String::with_capacity(snippet.len());
    let mut in_tag = false;
    for c in snippet.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════
// Trait implementations
// ═══════════════════════════════════════════════════════════════════════

#[async_trait]
impl FileLookup for WikiApi {
    async fn file_exists(&self, filename: &str) -> ApiResult<bool> {
        WikiApi::file_exists(self, filename).await
    }
}

#[async_trait]
impl TokenFetcher for WikiApi {
    async fn fetch_token(&self, kind: TokenKind) -> ApiResult<String> {
        self.request_token(kind).await
    }
}

#[async_trait]
impl Authenticator for WikiApi {
    async fn login(&self, username: &str, password: &str, token: &str) -> ApiResult<LoginOutcome> {
        self.request_login(username, password, token).await
    }
}

#[async_trait]
impl UploadTransport for WikiApi {
    async fn upload_chunk(&self, chunk: &ChunkSubmission<'_>) -> ApiResult<ChunkAck> {
        self.request_chunk(chunk).await
    }

    async fn publish(&self, publish: &PublishSubmission<'_>) -> ApiResult<PublishedFile> {
        self.request_publish(publish).await
    }
}

/// Category prefix search bound to a result limit.
pub struct CategorySearch {
    api: Arc<WikiApi>,
    limit: u32,
}

impl CategorySearch {
    pub fn new(api: Arc<WikiApi>, limit: u32) -> Self {
        Self { api, limit }
    }
}

#[async_trait]
impl SearchSource for CategorySearch {
    type Item = CategoryRef;

    fn label(&self) -> &str {
        "categories"
    }

    async fn search(&self, query: &str) -> ApiResult<Vec<CategoryRef>> {
        self.api.search_categories(query, self.limit).await
    }
}

/// Entity full-text search bound to a result limit.
pub struct EntitySearch {
    api: Arc<WikiApi>,
    limit: u32,
}

impl EntitySearch {
    pub fn new(api: Arc<WikiApi>, limit: u32) -> Self {
        Self { api, limit }
    }
}

#[async_trait]
impl SearchSource for EntitySearch {
    type Item = EntityRef;

    fn label(&self) -> &str {
        "entities"
    }

    async fn search(&self, query: &str) -> ApiResult<Vec<EntityRef>> {
        self.api.search_entities(query, self.limit).await
    }
}
