/*
    music-roast | Rust CLI tool that roasts your Spotify listening habits.
    Copyright (C) 2025  Israel Alberto Roldan Vega

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use std::fmt;

use log::{debug, info, warn};
use url::Url;

use crate::cache::{CacheKey, CredentialCache, PendingLogin};
use crate::capture::{capture_redirect, BrowserLauncher, CaptureOutcome, InboundQuery, SystemBrowser};
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::models::AccessCredential;
use crate::provider::AuthProvider;
use crate::redirect::{is_loopback, resolve_redirect};
use crate::session::Session;

/// Stages of the acquisition flow, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireState {
    CheckCache,
    TryLocalCapture,
    CheckInboundCode,
    AwaitUserAuthorization,
    Exchanging,
    Authenticated,
    Failed,
}

impl fmt::Display for AcquireState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AcquireState::CheckCache => "CHECK_CACHE",
            AcquireState::TryLocalCapture => "TRY_LOCAL_CAPTURE",
            AcquireState::CheckInboundCode => "CHECK_INBOUND_CODE",
            AcquireState::AwaitUserAuthorization => "AWAIT_USER_AUTHORIZATION",
            AcquireState::Exchanging => "EXCHANGING",
            AcquireState::Authenticated => "AUTHENTICATED",
            AcquireState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Where an issued credential came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Cache,
    Refreshed,
    LocalCapture,
    InboundCode,
}

/// Result of one pass through the flow. Provider failures end up here, never as panics.
#[derive(Debug)]
pub enum AcquireOutcome<C> {
    Authenticated { client: C, source: CredentialSource },
    /// The user has to open `authorize_url`; re-enter with the code the redirect delivers.
    AwaitingUser { authorize_url: Url },
    Failed(AuthError),
}

impl<C> AcquireOutcome<C> {
    pub fn state(&self) -> AcquireState {
        match self {
            AcquireOutcome::Authenticated { .. } => AcquireState::Authenticated,
            AcquireOutcome::AwaitingUser { .. } => AcquireState::AwaitUserAuthorization,
            AcquireOutcome::Failed(_) => AcquireState::Failed,
        }
    }

    /// Splits into `(client, authorize URL or error message)`; exactly one side is set.
    pub fn into_parts(self) -> (Option<C>, Option<String>) {
        match self {
            AcquireOutcome::Authenticated { client, .. } => (Some(client), None),
            AcquireOutcome::AwaitingUser { authorize_url } => (None, Some(authorize_url.to_string())),
            AcquireOutcome::Failed(e) => (None, Some(e.user_message())),
        }
    }
}

/// Drives cache lookup, local capture, inbound code exchange and the authorize link.
pub struct TokenAcquirer<P: AuthProvider> {
    config: AuthConfig,
    provider: P,
    cache: CredentialCache,
    browser: Box<dyn BrowserLauncher>,
}

impl<P: AuthProvider> TokenAcquirer<P> {
    pub fn new(config: AuthConfig, provider: P) -> Self {
        let cache = CredentialCache::new(config.cache_dir.clone());
        Self {
            config,
            provider,
            cache,
            browser: Box::new(SystemBrowser),
        }
    }

    pub fn with_browser(mut self, browser: impl BrowserLauncher + 'static) -> Self {
        self.browser = Box::new(browser);
        self
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn cache(&self) -> &CredentialCache {
        &self.cache
    }

    /// Runs the flow once and splits the outcome the way the UI consumes it.
    pub async fn acquire_client(
        &self,
        session: &mut Session,
        inbound: &InboundQuery,
    ) -> (Option<P::Client>, Option<String>) {
        self.acquire(session, inbound).await.into_parts()
    }

    /// Runs the flow once. Safe to call again on every re-render of the host UI.
    pub async fn acquire(
        &self,
        session: &mut Session,
        inbound: &InboundQuery,
    ) -> AcquireOutcome<P::Client> {
        let key = CacheKey::new(&self.config.client_id, session.ensure_session_id());
        let (redirect, capture_possible) = self.prepare_login(session, &key);
        let state = session.ensure_oauth_state();

        debug!("[{}] {}", AcquireState::CheckCache, key.file_name());
        if let Some((credential, source)) = self.check_cache(&key, &redirect).await {
            return self.authenticated(credential, source, &redirect);
        }

        if capture_possible && self.config.local_capture && inbound.is_empty() {
            debug!("[{}] {}", AcquireState::TryLocalCapture, redirect);
            let authorize_url = match self.provider.authorize_url(&redirect, &state) {
                Ok(url) => url,
                Err(e) => return self.failed(e),
            };
            match capture_redirect(
                &redirect,
                &authorize_url,
                &*self.browser,
                self.config.capture_timeout,
            )
            .await
            {
                CaptureOutcome::Captured(query) => {
                    if query.state.as_deref() != Some(state.as_str()) {
                        return self.failed(state_mismatch());
                    }
                    if let Some(outcome) = self
                        .redeem(session, &key, &query, &redirect, CredentialSource::LocalCapture)
                        .await
                    {
                        return outcome;
                    }
                    info!("Redirect arrived without a code, falling back");
                }
                CaptureOutcome::Unavailable(e) => {
                    info!("Local capture unavailable ({}), falling back", e);
                }
            }
        }

        debug!("[{}]", AcquireState::CheckInboundCode);
        // A bare pasted code has no state; a redirect URL must carry ours.
        if inbound.state.as_deref().is_some_and(|s| s != state) {
            return self.failed(state_mismatch());
        }
        if let Some(outcome) = self
            .redeem(session, &key, inbound, &redirect, CredentialSource::InboundCode)
            .await
        {
            return outcome;
        }

        debug!("[{}]", AcquireState::AwaitUserAuthorization);
        match self.provider.authorize_url(&redirect, &state) {
            Ok(authorize_url) => AcquireOutcome::AwaitingUser { authorize_url },
            Err(e) => self.failed(e),
        }
    }

    /// Exchanges a code handed in by the caller, e.g. pasted by the user.
    pub async fn redeem_code(
        &self,
        session: &mut Session,
        code: &str,
    ) -> AcquireOutcome<P::Client> {
        let key = CacheKey::new(&self.config.client_id, session.ensure_session_id());
        let (redirect, _) = self.prepare_login(session, &key);
        self.exchange(session, &key, code, &redirect, CredentialSource::InboundCode)
            .await
    }

    /// Deletes every cached credential of this client and starts the session over.
    pub fn clear_cache(&self, session: &mut Session) -> Result<usize, AuthError> {
        let removed = self.cache.clear(&self.config.client_id)?;
        session.reset();
        session.mark_cache_cleared();
        Ok(removed)
    }

    /// Like `clear_cache`, but only the first call in a session does anything.
    pub fn clear_cache_once(&self, session: &mut Session) -> Result<Option<usize>, AuthError> {
        if session.cache_cleared() {
            return Ok(None);
        }
        self.clear_cache(session).map(Some)
    }

    /// Resolves the session's redirect. A login started by an earlier process
    /// with the same session id is picked up from disk, so its code is exchanged
    /// against the redirect it was issued for. On local socket failure the
    /// configured URI is pinned instead and local capture is skipped.
    fn prepare_login(&self, session: &mut Session, key: &CacheKey) -> (Url, bool) {
        if session.chosen_redirect().is_none() {
            if let Some(redirect) = self.restore_login(session, key) {
                let loopback = is_loopback(&redirect);
                return (redirect, loopback);
            }
        }
        let fresh = session.chosen_redirect().is_none();

        let (redirect, loopback) = match resolve_redirect(&self.config.redirect_uri, session) {
            Ok(redirect) => {
                let loopback = is_loopback(&redirect);
                (redirect, loopback)
            }
            Err(e) => {
                warn!("Could not resolve a local redirect ({}), using the configured one", e);
                session.chosen_redirect = Some(self.config.redirect_uri.clone());
                (self.config.redirect_uri.clone(), false)
            }
        };

        if fresh {
            let login = PendingLogin {
                redirect_uri: redirect.to_string(),
                state: session.ensure_oauth_state(),
            };
            if let Err(e) = self.cache.store_login(key, &login) {
                warn!("Could not remember the pending login: {}", e);
            }
        }
        (redirect, loopback)
    }

    fn restore_login(&self, session: &mut Session, key: &CacheKey) -> Option<Url> {
        let login = match self.cache.load_login(key) {
            Ok(login) => login?,
            Err(e) => {
                warn!("Ignoring unreadable pending login: {}", e);
                return None;
            }
        };
        match Url::parse(&login.redirect_uri) {
            Ok(redirect) => {
                debug!("Resuming login of {} via {}", key.file_name(), redirect);
                session.restore_login(redirect.clone(), login.state);
                Some(redirect)
            }
            Err(e) => {
                warn!("Ignoring pending login with a bad redirect URI: {}", e);
                None
            }
        }
    }

    async fn check_cache(
        &self,
        key: &CacheKey,
        redirect: &Url,
    ) -> Option<(AccessCredential, CredentialSource)> {
        let cached = match self.cache.load(key) {
            Ok(cached) => cached?,
            Err(e) => {
                warn!("Ignoring unreadable credential cache: {}", e);
                return None;
            }
        };

        if !cached.is_expired() {
            return Some((cached, CredentialSource::Cache));
        }
        if cached.refresh_token.is_none() {
            debug!("Cached credential expired and cannot be refreshed");
            return None;
        }

        match self.provider.refresh(&cached, redirect).await {
            Ok(refreshed) => {
                self.persist(key, &refreshed);
                Some((refreshed, CredentialSource::Refreshed))
            }
            Err(e) => {
                warn!("Refreshing the cached credential failed: {}", e);
                None
            }
        }
    }

    /// Acts on a redirect's query. `None` when it carries neither code nor error.
    async fn redeem(
        &self,
        session: &mut Session,
        key: &CacheKey,
        query: &InboundQuery,
        redirect: &Url,
        source: CredentialSource,
    ) -> Option<AcquireOutcome<P::Client>> {
        if let Some(error) = &query.error {
            return Some(self.failed(AuthError::Provider(format!(
                "Spotify redirected back with error '{}'",
                error
            ))));
        }
        let code = query.code.as_deref()?;
        Some(self.exchange(session, key, code, redirect, source).await)
    }

    async fn exchange(
        &self,
        session: &mut Session,
        key: &CacheKey,
        code: &str,
        redirect: &Url,
        source: CredentialSource,
    ) -> AcquireOutcome<P::Client> {
        // Spent before the request goes out, so a failed exchange is never retried.
        if !session.consume_code(code) {
            return self.failed(AuthError::InvalidGrant(
                "this authorization code was already used; log in again to get a new one".to_string(),
            ));
        }

        debug!("[{}] redirect {}", AcquireState::Exchanging, redirect);
        match self.provider.exchange_code(code, redirect).await {
            Ok(credential) => {
                self.persist(key, &credential);
                self.authenticated(credential, source, redirect)
            }
            Err(e) => self.failed(e),
        }
    }

    fn persist(&self, key: &CacheKey, credential: &AccessCredential) {
        if let Err(e) = self.cache.store(key, credential) {
            warn!("Could not cache the credential: {}", e);
        }
    }

    fn authenticated(
        &self,
        credential: AccessCredential,
        source: CredentialSource,
        redirect: &Url,
    ) -> AcquireOutcome<P::Client> {
        info!("[{}] via {:?}", AcquireState::Authenticated, source);
        AcquireOutcome::Authenticated {
            client: self.provider.client(credential, redirect),
            source,
        }
    }

    fn failed(&self, error: AuthError) -> AcquireOutcome<P::Client> {
        warn!("[{}] {}", AcquireState::Failed, error);
        AcquireOutcome::Failed(error)
    }
}

fn state_mismatch() -> AuthError {
    AuthError::Provider(
        "the redirect's state does not match this login; start the login again".to_string(),
    )
}
