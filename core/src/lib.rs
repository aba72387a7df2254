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

pub mod acquire;
pub mod cache;
pub mod capture;
pub mod config;
pub mod error;
pub mod models;
pub mod profile;
pub mod provider;
pub mod redirect;
pub mod roast;
pub mod session;

// Re-export key items for convenience
pub use acquire::{AcquireOutcome, AcquireState, CredentialSource, TokenAcquirer};
pub use cache::{CacheKey, CredentialCache};
pub use capture::{BrowserLauncher, InboundQuery, SystemBrowser};
pub use config::AuthConfig;
pub use error::AuthError;
pub use models::{AccessCredential, RankedTrack, TasteReport};
pub use profile::TasteProfiler;
pub use provider::{AuthProvider, SpotifyProvider};
pub use redirect::resolve_redirect;
pub use roast::RoastGenerator;
pub use session::{Session, SessionId};
pub use rspotify::AuthCodeSpotify;
