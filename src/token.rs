//! Login and CSRF token lifecycle.
//!
//! Each [`TokenKind`] has one slot moving through
//! `Absent → Fetching → Present → (Invalidated → Fetching)`.
//!
//! - [`TokenManager::ensure_token`] is single-flight: while a fetch is in
//!   progress every other caller waits on the same fetch through a `watch`
//!   channel instead of issuing its own request.
//! - [`TokenManager::take_token`] hands out the value and, for single-use
//!   kinds, empties the slot.
//! - [`TokenManager::invalidate`] is called by whoever saw the server reject
//!   a token; the next `ensure_token` fetches again.
//! - [`TokenManager::discard`] also detaches an in-flight fetch, whose
//!   result then never lands in the slot. Used when the session changes.
//!
//! A fetch that is dropped before completing (its future cancelled) puts the
//! slot back to `Absent`, and waiters see an [`ApiError::Auth`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{ApiError, ApiResult};
use crate::models::{Token, TokenKind};
use crate::traits::TokenFetcher;

/// Shared fetch result: token value or failure reason.
type FetchResult = Option<Result<String, String>>;

/// Observable state of one token slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    Absent,
    Fetching,
    Present,
    Invalidated,
}

enum Slot {
    Absent,
    Fetching(watch::Receiver<FetchResult>),
    Present(String),
    Invalidated,
}

impl Slot {
    fn status(&self) -> TokenStatus {
        match self {
            Slot::Absent => TokenStatus::Absent,
            Slot::Fetching(_) => TokenStatus::Fetching,
            Slot::Present(_) => TokenStatus::Present,
            Slot::Invalidated => TokenStatus::Invalidated,
        }
    }
}

/// Owns the token slots and the fetcher used to fill them.
pub struct TokenManager<F: TokenFetcher> {
    fetcher: Arc<F>,
    slots: Mutex<BTreeMap<TokenKind, Slot>>,
}

/// What a caller of `ensure_token` has to do after inspecting the slot.
enum Plan {
    Ready(String),
    Wait(watch::Receiver<FetchResult>),
    Fetch(watch::Sender<FetchResult>, watch::Receiver<FetchResult>),
}

impl<F: TokenFetcher> TokenManager<F> {
    pub fn new(fetcher: Arc<F>) -> Self {
        Self {
            fetcher,
            slots: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn status(&self, kind: TokenKind) -> TokenStatus {
        self.lock()
            .get(&kind)
            .map_or(TokenStatus::Absent, Slot::status)
    }

    pub fn is_present(&self, kind: TokenKind) -> bool {
        self.status(kind) == TokenStatus::Present
    }

    /// Make sure a token of `kind` is held, fetching it if needed.
    pub async fn ensure_token(&self, kind: TokenKind) -> ApiResult<Token> {
        let plan = {
            let mut slots = self.lock();
            match slots.get(&kind) {
                Some(Slot::Present(value)) => Plan::Ready(value.clone()),
                Some(Slot::Fetching(rx)) => Plan::Wait(rx.clone()),
                Some(Slot::Absent | Slot::Invalidated) | None => {
                    let (tx, rx) = watch::channel(None);
                    slots.insert(kind, Slot::Fetching(rx.clone()));
                    Plan::Fetch(tx, rx)
                }
            }
        };

        let value = match plan {
            Plan::Ready(value) => value,
            Plan::Wait(rx) => self.wait_for_fetch(kind, rx).await?,
            Plan::Fetch(tx, own) => self.fetch(kind, tx, own).await?,
        };
        Ok(Token { kind, value })
    }

    /// Return the held token. Single-use kinds are emptied by taking them.
    pub fn take_token(&self, kind: TokenKind) -> Option<Token> {
        let mut slots = self.lock();
        let value = match slots.get(&kind) {
            Some(Slot::Present(value)) => value.clone(),
            _ => return None,
        };
        if kind.is_single_use() {
            slots.insert(kind, Slot::Absent);
        }
        Some(Token { kind, value })
    }

    /// Mark a held token as rejected so the next `ensure_token` refetches.
    /// An in-flight fetch is left alone.
    pub fn invalidate(&self, kind: TokenKind) {
        let mut slots = self.lock();
        if let Some(slot) = slots.get_mut(&kind) {
            if matches!(slot, Slot::Present(_)) {
                debug!(%kind, "token invalidated");
                *slot = Slot::Invalidated;
            }
        }
    }

    /// Forget the token of `kind`, including one still being fetched.
    pub fn discard(&self, kind: TokenKind) {
        let mut slots = self.lock();
        if let Some(slot) = slots.get_mut(&kind) {
            if !matches!(slot, Slot::Absent) {
                debug!(%kind, status = ?slot.status(), "token discarded");
                *slot = Slot::Invalidated;
            }
        }
    }

    async fn fetch(
        &self,
        kind: TokenKind,
        tx: watch::Sender<FetchResult>,
        own: watch::Receiver<FetchResult>,
    ) -> ApiResult<String> {
        let mut guard = FetchGuard {
            slots: &self.slots,
            kind,
            own: &own,
            armed: true,
        };

        debug!(%kind, "fetching token");
        let result = self.fetcher.fetch_token(kind).await;
        guard.armed = false;

        let mut slots = self.lock();
        let owned = owns_slot(&slots, kind, &own);
        if !owned {
            debug!(%kind, "token fetch was discarded, slot left as is");
        }
        match result {
            Ok(value) => {
                if owned {
                    info!(%kind, "token acquired");
                    slots.insert(kind, Slot::Present(value.clone()));
                }
                tx.send_replace(Some(Ok(value.clone())));
                Ok(value)
            }
            Err(err) => {
                if owned {
                    slots.insert(kind, Slot::Absent);
                }
                let reason = format!("could not fetch {} token: {}", kind, err);
                tx.send_replace(Some(Err(reason.clone())));
                Err(match err {
                    auth @ ApiError::Auth { .. } => auth,
                    _ => ApiError::auth(None, reason),
                })
            }
        }
    }

    async fn wait_for_fetch(
        &self,
        kind: TokenKind,
        mut rx: watch::Receiver<FetchResult>,
    ) -> ApiResult<String> {
        debug!(%kind, "joining in-flight token fetch");
        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map(|done| (*done).clone())
            .unwrap_or(None);
        match outcome {
            Some(Ok(value)) => Ok(value),
            Some(Err(reason)) => Err(ApiError::auth(None, reason)),
            None => Err(ApiError::auth(
                None,
                format!("{} token fetch was abandoned", kind),
            )),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<TokenKind, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Whether the slot still belongs to the fetch publishing on `own`.
fn owns_slot(
    slots: &BTreeMap<TokenKind, Slot>,
    kind: TokenKind,
    own: &watch::Receiver<FetchResult>,
) -> bool {
    matches!(slots.get(&kind), Some(Slot::Fetching(rx)) if rx.same_channel(own))
}

/// Resets a slot left in `Fetching` when the fetching future is dropped.
struct FetchGuard<'a> {
    slots: &'a Mutex<BTreeMap<TokenKind, Slot>>,
    kind: TokenKind,
    own: &'a watch::Receiver<FetchResult>,
    armed: bool,
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            if owns_slot(&slots, self.kind, self.own) {
                slots.insert(self.kind, Slot::Absent);
            }
        }
    }
}
