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

use thiserror::Error;

const REDIRECT_HINT: &str = "Check that the redirect URI registered in the Spotify dashboard matches the one this app uses exactly (scheme, host, port and path).";

/// Failures of the authorization flow.
///
/// Only `Infrastructure` is treated as environment-specific; every other kind
/// ends the flow for the current invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Local network error: {0}")]
    Infrastructure(String),
    #[error("Spotify rejected the authorization code: {0}")]
    InvalidGrant(String),
    #[error("Spotify authorization failed: {0}")]
    Provider(String),
    #[error("Credential cache error: {0}")]
    Cache(String),
}

impl AuthError {
    /// Whether the next acquisition strategy may still succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::Infrastructure(_) | AuthError::Cache(_))
    }

    /// A plain-language hint shown next to the error, if one applies.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            AuthError::InvalidGrant(_) | AuthError::Provider(_) => Some(REDIRECT_HINT),
            _ => None,
        }
    }

    /// The reason plus its remediation hint, ready to show to the user.
    pub fn user_message(&self) -> String {
        match self.remediation() {
            Some(hint) => format!("{} {}", self, hint),
            None => self.to_string(),
        }
    }
}

impl From<std::io::Error> for AuthError {
    fn from(e: std::io::Error) -> Self {
        AuthError::Infrastructure(e.to_string())
    }
}
