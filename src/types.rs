//!
//! src/types.rs
//!
//! Raw API records as they come off the wire, and the flat rows the
//! warehouse tables expect.
//!

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::LoaderError;

#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistPage {
    pub items: Vec<PlaylistItem>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub total: Option<u32>
}

// track is null for entries that were removed from the catalogue
#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistItem {
    pub track: Option<RawTrack>
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtistRef {
    pub id: Option<String>,
    pub name: String
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlbumRef {
    pub name: String
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTrack {
    pub id: Option<String>,
    pub name: String,
    pub artists: Vec<ArtistRef>,
    pub album: AlbumRef,
    pub popularity: i64,
    pub duration_ms: i64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Followers {
    pub total: Option<i64>
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawArtist {
    pub id: String,
    pub name: String,
    pub followers: Followers,
    #[serde(default)]
    pub genres: Vec<String>,
    pub popularity: i64
}

/// Row of the tracks table, one per playlist entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRow {
    pub id: String,
    pub name: String,
    pub artist: String,
    pub artist_id: String,
    pub album: String,
    pub popularity: i32,
    pub duration_ms: i32,
    pub date: Option<NaiveDate>
}

/// Row of the artists table, at most one per artist id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtistRow {
    pub id: String,
    pub name: String,
    pub followers: Option<i32>,
    pub genres: String,
    pub popularity: i32
}

fn to_int(field: &str, owner: &str, value: i64) -> Result<i32, LoaderError> {
    i32::try_from(value).map_err(|_| LoaderError::Parse(
        format!("{field} of {owner} out of range: {value}")
    ))
}

/// Flattens a genre list into the single text column. No escaping: a genre
/// containing a comma cannot be split back out.
pub fn join_genres(genres: &[String]) -> String {
    genres.join(",")
}

impl TrackRow {
    /// Keeps only the first listed artist.
    pub fn from_raw(track: &RawTrack, date: Option<NaiveDate>) -> Result<Self, LoaderError> {
        let id = track.id.clone().ok_or_else(|| LoaderError::Parse(
            format!("track \"{}\" has no id", track.name)
        ))?;

        let primary = track.artists.first().ok_or_else(|| LoaderError::Parse(
            format!("track {id} has no artists")
        ))?;
        let artist_id = primary.id.clone().ok_or_else(|| LoaderError::Parse(
            format!("primary artist of track {id} has no id")
        ))?;

        Ok( Self {
            popularity: to_int("popularity", &id, track.popularity)?,
            duration_ms: to_int("duration_ms", &id, track.duration_ms)?,
            name: track.name.clone(),
            artist: primary.name.clone(),
            artist_id,
            album: track.album.name.clone(),
            date,
            id,
        })
    }
}

impl ArtistRow {
    pub fn from_raw(artist: &RawArtist) -> Result<Self, LoaderError> {
        // a missing total is stored as NULL, not as zero
        let followers = artist.followers.total
            .map(|total| to_int("followers", &artist.id, total))
            .transpose()?;
        Ok( Self {
            id: artist.id.clone(),
            name: artist.name.clone(),
            followers,
            genres: join_genres(&artist.genres),
            popularity: to_int("popularity", &artist.id, artist.popularity)?
        })
    }
}
