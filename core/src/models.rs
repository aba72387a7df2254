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

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Seconds of slack before expiry at which a credential is already considered stale.
const EXPIRY_MARGIN_SECS: i64 = 10;

/// Bearer token plus its validity window, as stored in the credential cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessCredential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub scopes: BTreeSet<String>,
}

impl AccessCredential {
    pub fn new(access_token: impl Into<String>, expires_in: Duration) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: Utc::now() + expires_in,
            scopes: BTreeSet::new(),
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() + Duration::seconds(EXPIRY_MARGIN_SECS) >= self.expires_at
    }
}

/// One of the user's top tracks, enriched with its artists' genres.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedTrack {
    pub rank: usize,
    pub name: String,
    pub artists: String,
    pub album: String,
    pub genres: Vec<String>,
    pub ranking_score: usize,
}

impl RankedTrack {
    pub fn genres_label(&self) -> String {
        if self.genres.is_empty() {
            "N/A".to_string()
        } else {
            self.genres.join(", ")
        }
    }
}

impl fmt::Display for RankedTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}. {} by {} (Album: {}) [Genres: {}]",
            self.rank,
            self.name,
            self.artists,
            self.album,
            self.genres_label()
        )
    }
}

/// The user's ranked listening data.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TasteReport {
    pub tracks: Vec<RankedTrack>,
}

impl TasteReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// One line per track, used as input for the roast.
    pub fn listing(&self) -> String {
        self.tracks
            .iter()
            .map(|t| format!("- Track: {} by {} (Genres: {})", t.name, t.artists, t.genres_label()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(rank: usize, genres: &[&str]) -> RankedTrack {
        RankedTrack {
            rank,
            name: format!("Song {}", rank),
            artists: "Some Band".to_string(),
            album: "Some Album".to_string(),
            genres: genres.iter().map(|g| g.to_string()).collect(),
            ranking_score: 11 - rank,
        }
    }

    #[test]
    fn test_credential_expiry() {
        let fresh = AccessCredential::new("token", Duration::hours(1));
        assert!(!fresh.is_expired());

        let stale = AccessCredential::new("token", Duration::seconds(-5));
        assert!(stale.is_expired());

        let almost = AccessCredential::new("token", Duration::seconds(3));
        assert!(almost.is_expired());
    }

    #[test]
    fn test_ranked_track_display_without_genres() {
        let display = format!("{}", track(1, &[]));
        assert!(display.contains("1. Song 1 by Some Band"));
        assert!(display.contains("[Genres: N/A]"));
    }

    #[test]
    fn test_report_listing_contains_every_track() {
        let mut report = TasteReport::new();
        assert!(report.is_empty());

        report.tracks.push(track(1, &["hyperpop"]));
        report.tracks.push(track(2, &["bedroom pop", "indie"]));

        let listing = report.listing();
        assert_eq!(listing.lines().count(), 2);
        assert!(listing.contains("Song 1 by Some Band (Genres: hyperpop)"));
        assert!(listing.contains("(Genres: bedroom pop, indie)"));
    }
}
