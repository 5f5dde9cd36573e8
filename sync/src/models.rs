use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Natural key of a scrobble. The derived ordering is the canonical order:
/// `uts`, then artist, then track, with strings compared byte-wise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScrobbleKey {
    pub uts: i64,
    pub artist_name: String,
    pub track_name: String,
}

/// One played track as it is stored locally.
///
/// `fetched_at` lives only in the table; it is bookkeeping and takes no part
/// in equality, so re-fetching unchanged data compares equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, FromRow)]
pub struct Scrobble {
    pub uts: i64,
    pub artist_name: String,
    pub track_name: String,
    pub album_name: String,
    pub recording_mbid: String,
    pub release_mbid: String,
    pub loved: bool,
}

impl Scrobble {
    pub fn key(&self) -> ScrobbleKey {
        ScrobbleKey {
            uts: self.uts,
            artist_name: self.artist_name.clone(),
            track_name: self.track_name.clone(),
        }
    }
}

impl fmt::Display for Scrobble {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{uts: {}, artist_name: {:?}, track_name: {:?}, album_name: {:?}, recording_mbid: {:?}, release_mbid: {:?}, loved: {}}}",
            self.uts,
            self.artist_name,
            self.track_name,
            self.album_name,
            self.recording_mbid,
            self.release_mbid,
            self.loved as u8
        )
    }
}
