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

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::AuthError;

pub const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8888/callback";
/// Read-top-items permission only.
pub const SCOPE: &str = "user-top-read";
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(120);

/// Everything the authorization flow needs, built once and passed down explicitly.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: Url,
    pub cache_dir: PathBuf,
    /// Whether to try catching the redirect with a local listener.
    pub local_capture: bool,
    pub capture_timeout: Duration,
}

impl AuthConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: Url,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri,
            cache_dir: PathBuf::from("."),
            local_capture: true,
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
        }
    }

    /// Reads `RSPOTIFY_CLIENT_ID`, `RSPOTIFY_CLIENT_SECRET`, `RSPOTIFY_REDIRECT_URI`
    /// and `ROAST_CACHE_DIR` from the process environment.
    pub fn from_env() -> Result<Self, AuthError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AuthError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let (client_id, client_secret) =
            match (var("RSPOTIFY_CLIENT_ID"), var("RSPOTIFY_CLIENT_SECRET")) {
                (Some(id), Some(secret)) => (id, secret),
                _ => {
                    return Err(AuthError::Configuration(
                        "Missing RSPOTIFY_CLIENT_ID or RSPOTIFY_CLIENT_SECRET. Set both in a .env file or the environment.".to_string(),
                    ))
                }
            };

        let raw_redirect = var("RSPOTIFY_REDIRECT_URI").unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string());
        let redirect_uri = Url::parse(raw_redirect.trim()).map_err(|e| {
            AuthError::Configuration(format!("Invalid RSPOTIFY_REDIRECT_URI '{}': {}", raw_redirect, e))
        })?;

        let mut config = Self::new(client_id, client_secret, redirect_uri);
        if let Some(dir) = var("ROAST_CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }
        Ok(config)
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_local_capture(mut self, enabled: bool) -> Self {
        self.local_capture = enabled;
        self
    }

    pub fn with_capture_timeout(mut self, timeout: Duration) -> Self {
        self.capture_timeout = timeout;
        self
    }
}
