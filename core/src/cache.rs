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

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::AuthError;
use crate::models::AccessCredential;
use crate::session::SessionId;

const CACHE_PREFIX: &str = ".cache-";
const LOGIN_SUFFIX: &str = ".login";

/// Redirect URI and OAuth `state` of a login that is waiting for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingLogin {
    pub redirect_uri: String,
    pub state: String,
}

/// Identifies one cache entry. Two sessions never share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    client_id: String,
    session_id: SessionId,
}

impl CacheKey {
    pub fn new(client_id: impl Into<String>, session_id: SessionId) -> Self {
        Self {
            client_id: client_id.into(),
            session_id,
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}{}", client_prefix(&self.client_id), self.session_id)
    }

    fn login_file_name(&self) -> String {
        format!("{}{}", self.file_name(), LOGIN_SUFFIX)
    }
}

/// Client ids are used in file names; anything but `[A-Za-z0-9_-]` becomes `_`.
fn client_prefix(client_id: &str) -> String {
    let safe: String = client_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{}{}-", CACHE_PREFIX, safe)
}

#[derive(Debug, PartialEq, Eq)]
enum EntryKind {
    Credential,
    Login,
}

/// Classifies a file name as an entry of the client behind `prefix`. The rest of
/// the name has to be exactly a session id, so `client-x` never matches `client`.
fn entry_kind(name: &str, prefix: &str) -> Option<EntryKind> {
    let rest = name.strip_prefix(prefix)?;
    let (session, kind) = match rest.strip_suffix(LOGIN_SUFFIX) {
        Some(session) => (session, EntryKind::Login),
        None => (rest, EntryKind::Credential),
    };
    let id = SessionId::parse(session)?;
    (id.to_string() == session).then_some(kind)
}

/// File-backed credential store, one JSON file per `(client_id, session_id)`.
#[derive(Debug, Clone)]
pub struct CredentialCache {
    dir: PathBuf,
}

impl CredentialCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    pub fn load(&self, key: &CacheKey) -> Result<Option<AccessCredential>, AuthError> {
        read_json(&self.path_for(key))
    }

    pub fn store(&self, key: &CacheKey, credential: &AccessCredential) -> Result<(), AuthError> {
        let path = self.path_for(key);
        self.write_json(&path, credential)?;
        debug!("Stored credential in {}", path.display());
        Ok(())
    }

    pub fn load_login(&self, key: &CacheKey) -> Result<Option<PendingLogin>, AuthError> {
        read_json(&self.dir.join(key.login_file_name()))
    }

    pub fn store_login(&self, key: &CacheKey, login: &PendingLogin) -> Result<(), AuthError> {
        let path = self.dir.join(key.login_file_name());
        self.write_json(&path, login)?;
        debug!("Stored pending login in {}", path.display());
        Ok(())
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), AuthError> {
        let json = serde_json::to_string_pretty(value).map_err(|e| AuthError::Cache(e.to_string()))?;
        fs::create_dir_all(&self.dir)
            .and_then(|_| fs::write(path, json))
            .map_err(|e| AuthError::Cache(format!("{}: {}", path.display(), e)))
    }

    /// Deletes every entry of `client_id`, across all sessions, and returns how
    /// many credentials were removed. Pending logins go too but are not counted.
    pub fn clear(&self, client_id: &str) -> Result<usize, AuthError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(AuthError::Cache(format!("{}: {}", self.dir.display(), e))),
        };

        let prefix = client_prefix(client_id);
        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|e| AuthError::Cache(e.to_string()))?;
            let kind = match entry.file_name().to_str().and_then(|name| entry_kind(name, &prefix)) {
                Some(kind) => kind,
                None => continue,
            };
            match fs::remove_file(entry.path()) {
                Ok(()) if kind == EntryKind::Credential => removed += 1,
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(AuthError::Cache(format!("{}: {}", entry.path().display(), e)))
                }
            }
        }

        info!("Removed {} cached credential(s) for client {}", removed, client_id);
        Ok(removed)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, AuthError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(AuthError::Cache(format!("{}: {}", path.display(), e))),
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| AuthError::Cache(format!("{}: {}", path.display(), e)))
}
