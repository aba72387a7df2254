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

use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use rspotify::{
    http::HttpError, prelude::*, scopes, AuthCodeSpotify, ClientError, Config, Credentials,
    OAuth, Token,
};
use url::Url;

use crate::config::{AuthConfig, SCOPE};
use crate::error::AuthError;
use crate::models::AccessCredential;

/// The authorization server as seen by the token acquirer.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Handle given to downstream API calls once a credential exists.
    type Client: Send;

    /// Builds the consent link. `state` comes back on the redirect unchanged.
    fn authorize_url(&self, redirect_uri: &Url, state: &str) -> Result<Url, AuthError>;

    /// Exchanges a single-use code. A stale or mismatched code yields `AuthError::InvalidGrant`.
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &Url,
    ) -> Result<AccessCredential, AuthError>;

    async fn refresh(
        &self,
        credential: &AccessCredential,
        redirect_uri: &Url,
    ) -> Result<AccessCredential, AuthError>;

    fn client(&self, credential: AccessCredential, redirect_uri: &Url) -> Self::Client;
}

/// Spotify accounts service, driven through `rspotify`.
pub struct SpotifyProvider {
    creds: Credentials,
}

impl SpotifyProvider {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            creds: Credentials::new(&config.client_id, &config.client_secret),
        }
    }

    fn oauth(redirect_uri: &Url) -> OAuth {
        OAuth {
            redirect_uri: redirect_uri.to_string(),
            scopes: scopes!(SCOPE),
            ..Default::default()
        }
    }

    fn spotify(&self, oauth: OAuth) -> AuthCodeSpotify {
        // Caching is handled by `CredentialCache`, keyed per session.
        let config = Config {
            token_cached: false,
            ..Default::default()
        };
        AuthCodeSpotify::with_config(self.creds.clone(), oauth, config)
    }

    async fn issued_credential(spotify: &AuthCodeSpotify) -> Result<AccessCredential, AuthError> {
        let token = spotify
            .get_token()
            .lock()
            .await
            .map_err(|_| AuthError::Provider("Token store is poisoned".to_string()))?
            .clone();
        token
            .map(credential_from_token)
            .ok_or_else(|| AuthError::Provider("Spotify returned no token".to_string()))
    }
}

#[async_trait]
impl AuthProvider for SpotifyProvider {
    type Client = AuthCodeSpotify;

    fn authorize_url(&self, redirect_uri: &Url, state: &str) -> Result<Url, AuthError> {
        let oauth = OAuth {
            state: state.to_string(),
            ..Self::oauth(redirect_uri)
        };
        let url = self
            .spotify(oauth)
            .get_authorize_url(true)
            .map_err(|e| AuthError::Provider(e.to_string()))?;
        Url::parse(&url).map_err(|e| AuthError::Provider(format!("Bad authorize URL: {}", e)))
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &Url,
    ) -> Result<AccessCredential, AuthError> {
        let spotify = self.spotify(Self::oauth(redirect_uri));
        debug!("Exchanging authorization code against {}", redirect_uri);
        if let Err(e) = spotify.request_token(code).await {
            return Err(classify(e).await);
        }
        Self::issued_credential(&spotify).await
    }

    async fn refresh(
        &self,
        credential: &AccessCredential,
        redirect_uri: &Url,
    ) -> Result<AccessCredential, AuthError> {
        let spotify = AuthCodeSpotify::from_token_with_config(
            token_from_credential(credential),
            self.creds.clone(),
            Self::oauth(redirect_uri),
            Config::default(),
        );
        if let Err(e) = spotify.refresh_token().await {
            return Err(classify(e).await);
        }
        let mut refreshed = Self::issued_credential(&spotify).await?;
        // Spotify may omit the refresh token on refresh; keep the old one.
        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = credential.refresh_token.clone();
        }
        Ok(refreshed)
    }

    fn client(&self, credential: AccessCredential, redirect_uri: &Url) -> AuthCodeSpotify {
        let config = Config {
            token_cached: false,
            token_refreshing: true,
            ..Default::default()
        };
        AuthCodeSpotify::from_token_with_config(
            token_from_credential(&credential),
            self.creds.clone(),
            Self::oauth(redirect_uri),
            config,
        )
    }
}

/// Maps token endpoint failures onto the error taxonomy.
async fn classify(err: ClientError) -> AuthError {
    match err {
        ClientError::Http(http) => match *http {
            HttpError::StatusCode(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                if status.as_u16() == 400 && body.contains("invalid_grant") {
                    AuthError::InvalidGrant(body)
                } else {
                    AuthError::Provider(format!("HTTP {}: {}", status, body))
                }
            }
            other => AuthError::Provider(other.to_string()),
        },
        other => AuthError::Provider(other.to_string()),
    }
}

fn credential_from_token(token: Token) -> AccessCredential {
    let expires_at = token
        .expires_at
        .unwrap_or_else(|| Utc::now() + token.expires_in);
    AccessCredential {
        access_token: token.access_token,
        refresh_token: token.refresh_token,
        expires_at,
        scopes: token.scopes.into_iter().collect(),
    }
}

fn token_from_credential(credential: &AccessCredential) -> Token {
    Token {
        access_token: credential.access_token.clone(),
        expires_in: credential.expires_at - Utc::now(),
        expires_at: Some(credential.expires_at),
        refresh_token: credential.refresh_token.clone(),
        scopes: credential.scopes.iter().cloned().collect(),
    }
}
