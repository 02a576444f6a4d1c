//! Login handshake and the "logged in" flag that gates uploads.
//!
//! The cookie jar lives in the HTTP client shared by every backend call, so a
//! successful `action=login` authenticates everything issued afterwards. A
//! CSRF token fetched (or still being fetched) before login belongs to the
//! anonymous session and is discarded once the login succeeds.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{info, warn};

use crate::error::{ApiError, ApiResult};
use crate::models::TokenKind;
use crate::token::TokenManager;
use crate::traits::{Authenticator, LoginOutcome, TokenFetcher};

/// One login lifetime against the media repository.
pub struct Session<B: TokenFetcher + Authenticator> {
    backend: Arc<B>,
    tokens: Arc<TokenManager<B>>,
    user: Mutex<Option<String>>,
}

impl<B: TokenFetcher + Authenticator> Session<B> {
    pub fn new(backend: Arc<B>) -> Self {
        let tokens = Arc::new(TokenManager::new(backend.clone()));
        Self::with_tokens(backend, tokens)
    }

    /// Share an existing token manager, e.g. with an upload orchestrator.
    pub fn with_tokens(backend: Arc<B>, tokens: Arc<TokenManager<B>>) -> Self {
        Self {
            backend,
            tokens,
            user: Mutex::new(None),
        }
    }

    pub fn tokens(&self) -> Arc<TokenManager<B>> {
        self.tokens.clone()
    }

    /// Log in and return the canonical user name reported by the server.
    ///
    /// Any failure (token fetch, rejected credentials) leaves the session
    /// logged out.
    pub async fn login(&self, username: &str, password: &str) -> ApiResult<String> {
        if username.trim().is_empty() {
            return Err(ApiError::precondition("username is empty"));
        }
        if password.is_empty() {
            return Err(ApiError::precondition("password is empty"));
        }

        match self.attempt(username, password).await {
            Ok(name) => {
                info!(user = %name, "logged in");
                self.tokens.discard(TokenKind::Csrf);
                *self.lock() = Some(name.clone());
                Ok(name)
            }
            Err(err) => {
                warn!(user = username, error = %err, "login failed");
                *self.lock() = None;
                Err(err)
            }
        }
    }

    async fn attempt(&self, username: &str, password: &str) -> ApiResult<String> {
        self.tokens.ensure_token(TokenKind::Login).await?;
        let token = self.tokens.take_token(TokenKind::Login).ok_or_else(|| {
            ApiError::auth(None, "login token was consumed by a concurrent login")
        })?;

        match self.backend.login(username, password, &token.value).await? {
            LoginOutcome::Success { username } => Ok(username),
            LoginOutcome::Failed { reason } => Err(ApiError::auth(None, reason)),
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.lock().is_some()
    }

    pub fn logged_in_user(&self) -> Option<String> {
        self.lock().clone()
    }

    /// Uploads are only offered inside an authenticated session.
    pub fn upload_enabled(&self) -> bool {
        self.is_logged_in()
    }

    fn lock(&self) -> MutexGuard<'_, Option<String>> {
        self.user.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
