//!
//! src/pipeline.rs
//!
//! One load run: fetch the playlist, transform tracks, resolve the artists
//! that still need a row, and write both batches. Every failure aborts the
//! run where it happens; nothing is retried.
//!

use chrono::{Local, NaiveDate};
use tracing::{debug, info, instrument};

use crate::config::PipelineConfig;
use crate::dedup::ArtistLedger;
use crate::errors::LoaderError;
use crate::fetch::MusicApi;
use crate::persistent::Warehouse;
use crate::types::{ArtistRow, RawTrack, TrackRow};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub tracks_inserted: u64,
    pub artists_fetched: usize,
    pub artists_inserted: u64,
    pub artists_already_persisted: usize
}

/// Output of artist resolution: rows to insert and how many ids were found
/// already persisted by the per-row check
#[derive(Debug, Default)]
pub struct ResolvedArtists {
    pub pending: Vec<ArtistRow>,
    pub found_persisted: usize
}

/// One row per raw track, in playlist order
pub fn transform_tracks(raw: &[RawTrack], date: Option<NaiveDate>) ->
    Result<Vec<TrackRow>, LoaderError> {
    raw.iter().map(|track| TrackRow::from_raw(track, date)).collect()
}

/// Walks the tracks in order and fetches each unaccounted artist once.
pub async fn resolve_artists<A, W>(
    tracks: &[TrackRow],
    ledger: &mut ArtistLedger,
    recheck_each: bool,
    api: &A,
    warehouse: &mut W
) -> Result<ResolvedArtists, LoaderError>
where
    A: MusicApi + ?Sized,
    W: Warehouse + ?Sized
{
    let mut resolved = ResolvedArtists::default();

    for track in tracks {
        let artist_id = track.artist_id.as_str();
        if ledger.is_accounted(artist_id) {
            continue;
        }

        // the snapshot may be stale if another run wrote since it was read
        if recheck_each && warehouse.artist_exists(artist_id).await? {
            debug!(artist = %artist_id, "artist.persisted");
            ledger.record(artist_id);
            resolved.found_persisted += 1;
            continue;
        }

        debug!(artist = %artist_id, track = %track.id, "artist.fetch");
        let raw = api.artist(artist_id).await?;
        resolved.pending.push(ArtistRow::from_raw(&raw)?);
        ledger.record(artist_id);
    }

    Ok(resolved)
}

/// Runs fetch → transform → dedupe → load against injected collaborators.
#[instrument(skip_all, fields(playlist = %cfg.playlist_id))]
pub async fn run<A, W>(cfg: &PipelineConfig, api: &A, warehouse: &mut W) ->
    Result<RunReport, LoaderError>
where
    A: MusicApi + ?Sized,
    W: Warehouse + ?Sized
{
    info!("loader.start");

    let raw = api.playlist_tracks(&cfg.playlist_id).await?;
    let date = cfg.capture_date.then(|| Local::now().date_naive());
    let tracks = transform_tracks(&raw, date)?;
    info!(tracks = tracks.len(), "playlist.transformed");

    warehouse.ensure_tables().await?;

    let mut ledger = if cfg.preload_snapshot {
        ArtistLedger::new(warehouse.existing_artist_ids().await?)
    } else {
        ArtistLedger::default()
    };
    debug!(snapshot = ledger.snapshot_len(), "artists.snapshot");

    let resolved = resolve_artists(
        &tracks, &mut ledger, cfg.recheck_each, api, warehouse
    ).await?;

    let tracks_inserted = warehouse.insert_tracks(&tracks).await?;
    info!(rows = tracks_inserted, "warehouse.tracks.committed");

    let artists_inserted = if resolved.pending.is_empty() {
        0
    } else {
        warehouse.insert_artists(&resolved.pending).await?
    };
    info!(rows = artists_inserted, "warehouse.artists.committed");

    let report = RunReport {
        tracks_inserted,
        artists_fetched: resolved.pending.len(),
        artists_inserted,
        artists_already_persisted: resolved.found_persisted
    };
    info!(
        tracks = report.tracks_inserted,
        artists_fetched = report.artists_fetched,
        artists = report.artists_inserted,
        artists_persisted = report.artists_already_persisted,
        recorded = ledger.recorded_len(),
        "loader.done"
    );
    Ok(report)
}
