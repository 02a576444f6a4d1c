//! # Commons Uploader
//!
//! Client-side orchestration for contributing media files to a MediaWiki
//! media repository: live category and entity search merged with the user's
//! selection, token handling with single-flight fetches, and chunked
//! stash-then-publish uploads.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────┐  ┌──────────────┐  ┌────────────────────┐
//! │ SearchCoordinator │  │ TokenManager │  │ UploadOrchestrator │
//! │  + SelectionStore │  │  + Session   │  │  (chunks, publish) │
//! └─────────┬─────────┘  └──────┬───────┘  └─────────┬──────────┘
//!           │      backend traits (traits.rs)        │
//!           └───────────────────┼────────────────────┘
//!                               ▼
//!                        ┌─────────────┐    ┌───────────────┐
//!                        │   WikiApi   │───▶│ HttpApiClient │──▶ api.php
//!                        └─────────────┘    └───────────────┘
//! ```
//!
//! Results flow back as observable state (`tokio::sync::watch` snapshots),
//! never as callbacks into the view.
//!
//! ## Quick Start
//!
//! ```bash
//! cup categories "Sunsets in"        # category prefix search
//! cup entities "Mauritius"           # entity full-text search
//! cup exists "Sunset.jpg"            # is the target name taken?
//! CUP_PASSWORD=... cup upload sunset.jpg --name Sunset --category "Sunsets in Mauritius"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | `ApiError` taxonomy |
//! | [`models`] | Core data types |
//! | [`media`] | Image format detection and target file names |
//! | [`client`] | HTTP request issue and response decoding |
//! | [`wiki`] | Typed MediaWiki endpoints |
//! | [`traits`] | Backend seams used by the orchestration components |
//! | [`selection`] | Selected items, independent of search results |
//! | [`search`] | Last-query-wins search coordinator |
//! | [`token`] | Single-flight token manager |
//! | [`session`] | Login handshake |
//! | [`exists`] | Duplicate file name probe |
//! | [`upload`] | Chunked upload orchestrator |
//! | [`progress`] | Upload progress rendering |
//! | [`logging`] | Tracing subscriber setup |

pub mod client;
pub mod config;
pub mod error;
pub mod exists;
pub mod logging;
pub mod media;
pub mod models;
pub mod progress;
pub mod search;
pub mod selection;
pub mod session;
pub mod token;
pub mod traits;
pub mod upload;
pub mod wiki;
