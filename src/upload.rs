//! Chunked stash-then-publish upload.
//!
//! ```text
//! Idle ─▶ AcquiringToken ─▶ Uploading(0/n) ─▶ … ─▶ Uploading(n/n) ─▶ Succeeded
//!   │            │                  │                                  ▲
//!   └────────────┴──────────────────┴──────────▶ Failed(reason) ◀──────┘ (publish)
//! ```
//!
//! The payload is cut into fixed-size chunks submitted strictly in order.
//! Every chunk after the first carries the stash key returned for the
//! previous one. `chunk_index` counts acknowledged chunks, so it only moves
//! once the server accepted a chunk.
//!
//! A chunk rejected with `badtoken` triggers exactly one CSRF refetch and one
//! resubmission of the same chunk. Any other failure, including a second
//! rejection, is terminal.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::UploadConfig;
use crate::error::{ApiError, ApiResult};
use crate::models::{Selectable, Token, TokenKind, UploadRequest};
use crate::token::TokenManager;
use crate::traits::{
    ChunkAck, ChunkSubmission, PublishSubmission, PublishedFile, TokenFetcher, UploadTransport,
};

/// Observable state of one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadProgress {
    Idle,
    AcquiringToken,
    Uploading {
        /// Number of chunks acknowledged so far.
        chunk_index: usize,
        total_chunks: usize,
    },
    Succeeded {
        filename: String,
    },
    Failed {
        reason: String,
    },
}

impl UploadProgress {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Failed { .. })
    }
}

/// One slice of the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub index: usize,
    pub offset: usize,
    pub bytes: &'a [u8],
}

/// Split `payload` into `chunk_size` pieces; the last one holds the remainder.
pub fn split_chunks(payload: &[u8], chunk_size: usize) -> Vec<Chunk<'_>> {
    payload
        .chunks(chunk_size.max(1))
        .enumerate()
        .map(|(index, bytes)| Chunk {
            index,
            offset: index * chunk_size.max(1),
            bytes,
        })
        .collect()
}

/// Initial wikitext of the file page: description block, one `Depicts` line
/// per entity and one category link per category.
pub fn page_text(request: &UploadRequest) -> String {
    let mut text = String::from("== {{int:filedesc}} ==\n{{Information\n");
    text.push_str(&format!("|description={}\n", request.description.trim()));
    text.push_str("|source={{own}}\n}}\n");

    if !request.entities.is_empty() {
        text.push('\n');
        for entity in &request.entities {
            text.push_str(&format!("{{{{Depicts|{}}}}}\n", entity.display_name()));
        }
    }
    if !request.categories.is_empty() {
        text.push('\n');
        for category in &request.categories {
            text.push_str(&format!("[[Category:{}]]\n", category.name()));
        }
    }
    text
}

struct Runs {
    current: u64,
    claimed: bool,
}

/// Drives one upload at a time through the token handshake and the chunk
/// sequence.
pub struct UploadOrchestrator<T: UploadTransport, F: TokenFetcher> {
    transport: Arc<T>,
    tokens: Arc<TokenManager<F>>,
    chunk_size: usize,
    comment: String,
    runs: Mutex<Runs>,
    progress: watch::Sender<UploadProgress>,
}

impl<T: UploadTransport, F: TokenFetcher> UploadOrchestrator<T, F> {
    pub fn new(transport: Arc<T>, tokens: Arc<TokenManager<F>>, config: &UploadConfig) -> Self {
        let (progress, _) = watch::channel(UploadProgress::Idle);
        Self {
            transport,
            tokens,
            chunk_size: config.chunk_size,
            comment: config.comment.clone(),
            runs: Mutex::new(Runs {
                current: 0,
                claimed: false,
            }),
            progress,
        }
    }

    pub fn progress(&self) -> UploadProgress {
        self.progress.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<UploadProgress> {
        self.progress.subscribe()
    }

    /// Discard the previous upload's state so `start_upload` can run again.
    /// Progress of an upload still in flight is no longer published.
    pub fn reset(&self) {
        let mut runs = self.lock();
        runs.current += 1;
        runs.claimed = false;
        self.progress.send_replace(UploadProgress::Idle);
    }

    /// Upload `request` and publish it. The orchestrator is single-use: a
    /// second call without [`reset`](Self::reset) is rejected.
    pub async fn start_upload(&self, request: UploadRequest) -> ApiResult<PublishedFile> {
        let run = {
            let mut runs = self.lock();
            if runs.claimed {
                return Err(ApiError::precondition(
                    "an upload was already started; reset before starting another",
                ));
            }
            runs.claimed = true;
            runs.current += 1;
            runs.current
        };

        let result = self.execute(run, &request).await;
        match &result {
            Ok(file) => {
                info!(filename = %file.filename, "upload published");
                self.set(
                    run,
                    UploadProgress::Succeeded {
                        filename: file.filename.clone(),
                    },
                );
            }
            Err(err) => {
                warn!(error = %err, "upload failed");
                self.set(
                    run,
                    UploadProgress::Failed {
                        reason: err.to_string(),
                    },
                );
            }
        }
        result
    }

    async fn execute(&self, run: u64, request: &UploadRequest) -> ApiResult<PublishedFile> {
        let payload = match request.payload.as_deref() {
            Some(bytes) if !bytes.is_empty() => bytes,
            _ => return Err(ApiError::precondition("no file data to upload")),
        };
        if request.file_base_name.trim().is_empty() {
            return Err(ApiError::precondition("file name is empty"));
        }
        let filename = request.target_filename().ok_or_else(|| {
            ApiError::precondition("only JPEG and PNG images can be uploaded")
        })?;

        self.set(run, UploadProgress::AcquiringToken);
        let mut token = self.tokens.ensure_token(TokenKind::Csrf).await?;

        let chunks = split_chunks(payload, self.chunk_size);
        let total_chunks = chunks.len();
        self.set(
            run,
            UploadProgress::Uploading {
                chunk_index: 0,
                total_chunks,
            },
        );

        let mut filekey: Option<String> = None;
        for chunk in &chunks {
            let ack = self
                .submit_chunk(
                    &filename,
                    request.format.mime_type(),
                    payload.len(),
                    chunk,
                    &mut token,
                    filekey.as_deref(),
                )
                .await?;
            let expected = chunk.offset + chunk.bytes.len();
            if let Some(next) = ack.next_offset {
                if next != expected {
                    debug!(
                        chunk = chunk.index,
                        next,
                        expected,
                        "server reported a different offset"
                    );
                }
            }
            filekey = Some(ack.filekey);
            self.set(
                run,
                UploadProgress::Uploading {
                    chunk_index: chunk.index + 1,
                    total_chunks,
                },
            );
        }

        let filekey =
            filekey.ok_or_else(|| ApiError::precondition("no chunk was acknowledged"))?;
        let text = page_text(request);
        debug!(%filename, %filekey, "publishing stashed file");
        self.transport
            .publish(&PublishSubmission {
                filename: &filename,
                filekey: &filekey,
                token: &token.value,
                text: &text,
                comment: &self.comment,
            })
            .await
    }

    async fn submit_chunk(
        &self,
        filename: &str,
        mime_type: &str,
        filesize: usize,
        chunk: &Chunk<'_>,
        token: &mut Token,
        filekey: Option<&str>,
    ) -> ApiResult<ChunkAck> {
        let first = self
            .transport
            .upload_chunk(&ChunkSubmission {
                filename,
                mime_type,
                filesize,
                offset: chunk.offset,
                bytes: chunk.bytes,
                token: &token.value,
                filekey,
            })
            .await;

        match first {
            Err(err) if err.is_bad_token() => {
                warn!(chunk = chunk.index, "token rejected, refetching once");
                self.tokens.invalidate(TokenKind::Csrf);
                *token = self.tokens.ensure_token(TokenKind::Csrf).await?;
                self.transport
                    .upload_chunk(&ChunkSubmission {
                        filename,
                        mime_type,
                        filesize,
                        offset: chunk.offset,
                        bytes: chunk.bytes,
                        token: &token.value,
                        filekey,
                    })
                    .await
            }
            other => other,
        }
    }

    fn set(&self, run: u64, progress: UploadProgress) {
        let runs = self.lock();
        if runs.current == run {
            self.progress.send_replace(progress);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Runs> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
