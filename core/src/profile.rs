use crate::models::{RankedTrack, TasteReport};
use futures::stream::TryStreamExt;
use log::{debug, info};
use rspotify::{
    model::{ArtistId, FullTrack, TimeRange},
    prelude::*,
    AuthCodeSpotify,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

/// Spotify's limit for `GET /artists`.
const ARTIST_BATCH_SIZE: usize = 50;
pub const DEFAULT_TOP_LIMIT: usize = 10;

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Spotify API error: {0}")]
    Spotify(#[from] rspotify::ClientError),
}

/// A top track before genre lookup.
#[derive(Debug, Clone)]
struct TrackSeed {
    name: String,
    artists: String,
    album: String,
    artist_ids: Vec<String>,
}

pub struct TasteProfiler {
    spotify: Arc<AuthCodeSpotify>,
}

impl TasteProfiler {
    pub fn new(spotify: AuthCodeSpotify) -> Self {
        Self {
            spotify: Arc::new(spotify),
        }
    }

    /// Fetches the user's short-term top tracks and tags each with its artists' genres.
    pub async fn top_tracks(&self, limit: usize) -> Result<TasteReport, ProfileError> {
        let mut stream = self
            .spotify
            .current_user_top_tracks(Some(TimeRange::ShortTerm));

        let mut seeds = Vec::new();
        let mut artist_ids: Vec<ArtistId<'static>> = Vec::new();
        let mut seen = HashSet::new();

        while seeds.len() < limit {
            let Some(track) = stream.try_next().await? else {
                break;
            };
            for id in track.artists.iter().filter_map(|a| a.id.clone()) {
                if seen.insert(id.id().to_string()) {
                    artist_ids.push(id);
                }
            }
            seeds.push(seed_from_track(&track));
        }
        info!("Fetched {} top tracks by {} artists", seeds.len(), artist_ids.len());

        let genres = self.artist_genres(artist_ids).await?;
        Ok(build_report(seeds, &genres, limit))
    }

    async fn artist_genres(
        &self,
        artist_ids: Vec<ArtistId<'static>>,
    ) -> Result<HashMap<String, Vec<String>>, ProfileError> {
        let mut genres = HashMap::new();

        for (i, chunk) in artist_ids.chunks(ARTIST_BATCH_SIZE).enumerate() {
            debug!("Looking up genres for batch {} ({} artists)", i, chunk.len());
            let artists = self.spotify.artists(chunk.to_vec()).await?;
            for artist in artists {
                genres.insert(artist.id.id().to_string(), artist.genres);
            }
        }

        Ok(genres)
    }
}

fn seed_from_track(track: &FullTrack) -> TrackSeed {
    let artists = track
        .artists
        .iter()
        .map(|a| a.name.as_str())
        .collect::<Vec<&str>>()
        .join(", ");

    TrackSeed {
        name: track.name.clone(),
        artists,
        album: track.album.name.clone(),
        artist_ids: track
            .artists
            .iter()
            .filter_map(|a| a.id.as_ref().map(|id| id.id().to_string()))
            .collect(),
    }
}

fn build_report(
    seeds: Vec<TrackSeed>,
    genres_by_artist: &HashMap<String, Vec<String>>,
    limit: usize,
) -> TasteReport {
    let tracks = seeds
        .into_iter()
        .enumerate()
        .map(|(i, seed)| {
            let genres: BTreeSet<String> = seed
                .artist_ids
                .iter()
                .filter_map(|id| genres_by_artist.get(id))
                .flatten()
                .cloned()
                .collect();

            RankedTrack {
                rank: i + 1,
                name: seed.name,
                artists: seed.artists,
                album: seed.album,
                genres: genres.into_iter().collect(),
                ranking_score: limit.saturating_sub(i),
            }
        })
        .collect();

    TasteReport { tracks }
}
