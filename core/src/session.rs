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

use std::collections::HashSet;
use std::fmt;

use url::Url;
use uuid::Uuid;

/// Opaque identifier of one interactive session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses an identifier handed back by the caller (e.g. `--session`).
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s.trim()).ok().map(Self)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Session-scoped state. The redirect and OAuth state of a pending login are
/// also written next to the credential cache so `with_id` can pick them up.
#[derive(Debug, Default)]
pub struct Session {
    id: Option<SessionId>,
    pub(crate) chosen_redirect: Option<Url>,
    oauth_state: Option<String>,
    consumed_codes: HashSet<String>,
    cache_cleared: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a session that reuses a previously issued identifier.
    pub fn with_id(id: SessionId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    /// Returns the session identifier, generating it on first use.
    pub fn ensure_session_id(&mut self) -> SessionId {
        *self.id.get_or_insert_with(SessionId::generate)
    }

    pub fn chosen_redirect(&self) -> Option<&Url> {
        self.chosen_redirect.as_ref()
    }

    /// Returns the `state` sent with this session's authorize URL, generating it on first use.
    pub fn ensure_oauth_state(&mut self) -> String {
        self.oauth_state
            .get_or_insert_with(|| Uuid::new_v4().simple().to_string())
            .clone()
    }

    pub fn oauth_state(&self) -> Option<&str> {
        self.oauth_state.as_deref()
    }

    /// Adopts the redirect and state of a login started by an earlier process.
    pub(crate) fn restore_login(&mut self, redirect: Url, oauth_state: String) {
        self.chosen_redirect = Some(redirect);
        self.oauth_state = Some(oauth_state);
    }

    pub fn is_code_consumed(&self, code: &str) -> bool {
        self.consumed_codes.contains(code)
    }

    /// Records a code as spent. Returns `false` if it was already spent.
    pub(crate) fn consume_code(&mut self, code: &str) -> bool {
        self.consumed_codes.insert(code.to_string())
    }

    pub fn cache_cleared(&self) -> bool {
        self.cache_cleared
    }

    pub(crate) fn mark_cache_cleared(&mut self) {
        self.cache_cleared = true;
    }

    /// Forgets identity, redirect, state and spent codes. The cleared marker survives.
    pub fn reset(&mut self) {
        self.id = None;
        self.chosen_redirect = None;
        self.oauth_state = None;
        self.consumed_codes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_is_stable_within_session() {
        let mut session = Session::new();
        let first = session.ensure_session_id();
        let second = session.ensure_session_id();
        assert_eq!(first, second);
    }

    #[test]
    fn test_distinct_sessions_get_distinct_ids() {
        let mut a = Session::new();
        let mut b = Session::new();
        assert_ne!(a.ensure_session_id(), b.ensure_session_id());
    }

    #[test]
    fn test_session_id_round_trips_through_display() {
        let id = SessionId::generate();
        assert_eq!(SessionId::parse(&id.to_string()), Some(id));
        assert_eq!(SessionId::parse("not-a-uuid"), None);
    }

    #[test]
    fn test_oauth_state_is_stable_within_session() {
        let mut session = Session::new();
        let state = session.ensure_oauth_state();
        assert_eq!(state.len(), 32);
        assert_eq!(session.ensure_oauth_state(), state);
        assert_ne!(Session::new().ensure_oauth_state(), state);
    }

    #[test]
    fn test_reset_keeps_cleared_marker() {
        let mut session = Session::new();
        let old = session.ensure_session_id();
        assert!(session.consume_code("abc"));
        assert!(!session.consume_code("abc"));
        let state = session.ensure_oauth_state();
        session.mark_cache_cleared();

        session.reset();

        assert!(session.cache_cleared());
        assert!(session.oauth_state().is_none());
        assert_ne!(session.ensure_oauth_state(), state);
        assert!(!session.is_code_consumed("abc"));
        assert!(session.chosen_redirect().is_none());
        assert_ne!(session.ensure_session_id(), old);
    }
}
