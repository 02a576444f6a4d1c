//! Backend seams between the orchestration components and the wire.
//!
//! The search, probe, token, session and upload components are generic over these
//! traits instead of calling [`WikiApi`](crate::wiki::WikiApi) directly. The
//! production implementations live in [`wiki`](crate::wiki); tests swap in
//! in-process fakes to control timing and failures.
//!
//! ```text
//! SearchCoordinator ──▶ SearchSource ──┐
//! FileExistsProbe ────▶ FileLookup ────┤
//! TokenManager ───────▶ TokenFetcher ──┤
//! Session ────────────▶ Authenticator ─┼──▶ WikiApi ──▶ HttpApiClient
//! UploadOrchestrator ─▶ UploadTransport┘
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ApiResult;
use crate::models::{Selectable, TokenKind};

/// A search endpoint producing an ordered result set for a query string.
#[async_trait]
pub trait SearchSource: Send + Sync {
    type Item: Selectable;

    /// Short label used in logs (e.g. `"categories"`).
    fn label(&self) -> &str;

    async fn search(&self, query: &str) -> ApiResult<Vec<Self::Item>>;
}

/// Answers whether a file page already exists on the media repository.
#[async_trait]
pub trait FileLookup: Send + Sync {
    async fn file_exists(&self, filename: &str) -> ApiResult<bool>;
}

#[async_trait]
impl<L: FileLookup + ?Sized> FileLookup for Arc<L> {
    async fn file_exists(&self, filename: &str) -> ApiResult<bool> {
        (**self).file_exists(filename).await
    }
}

/// Fetches a fresh token of the given kind from the server.
#[async_trait]
pub trait TokenFetcher: Send + Sync {
    async fn fetch_token(&self, kind: TokenKind) -> ApiResult<String>;
}

/// Outcome of an `action=login` call that reached the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Success { username: String },
    Failed { reason: String },
}

/// Performs the credential exchange using a previously fetched login token.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn login(&self, username: &str, password: &str, token: &str) -> ApiResult<LoginOutcome>;
}

/// One chunk submission to the upload stash.
#[derive(Debug, Clone)]
pub struct ChunkSubmission<'a> {
    pub filename: &'a str,
    /// Content type of the complete file, sent on the chunk part.
    pub mime_type: &'a str,
    /// Total size of the complete file in bytes.
    pub filesize: usize,
    /// Byte offset of this chunk within the file.
    pub offset: usize,
    pub bytes: &'a [u8],
    pub token: &'a str,
    /// Stash key returned by the previous chunk; `None` for the first chunk.
    pub filekey: Option<&'a str>,
}

/// Server acknowledgment of a stashed chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkAck {
    pub filekey: String,
    /// Offset the server expects next, when reported.
    pub next_offset: Option<usize>,
}

/// Final publish request turning a stashed file into a file page.
#[derive(Debug, Clone)]
pub struct PublishSubmission<'a> {
    pub filename: &'a str,
    pub filekey: &'a str,
    pub token: &'a str,
    /// Initial page text, including category and entity metadata.
    pub text: &'a str,
    pub comment: &'a str,
}

/// Result of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedFile {
    pub filename: String,
}

/// Stash-then-publish upload endpoint.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn upload_chunk(&self, chunk: &ChunkSubmission<'_>) -> ApiResult<ChunkAck>;

    async fn publish(&self, publish: &PublishSubmission<'_>) -> ApiResult<PublishedFile>;
}
