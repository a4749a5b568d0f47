//!
//! src/fetch.rs
//!
//! Defines the music API seam and the Spotify client behind it:
//! client-credentials token exchange, playlist listing and artist lookup.
//! Non-2xx responses are mapped to errors and never retried.
//!

use std::fmt;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, header, redirect};
use serde::{Deserialize, de::DeserializeOwned};
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::{HttpConfig, SpotifyConfig};
use crate::errors::LoaderError;
use crate::types::{PlaylistPage, RawArtist, RawTrack};

/// Only the fields the transformer reads
const PLAYLIST_FIELDS: &str =
    "items(track(id,name,popularity,duration_ms,album(name),artists(id,name))),next,total";
const PLAYLIST_LIMIT: &str = "50";

/// What the loader needs from the music platform
#[async_trait]
pub trait MusicApi: Send + Sync {
    /// Tracks of the playlist in playlist order
    async fn playlist_tracks(&self, playlist_id: &str) -> Result<Vec<RawTrack>, LoaderError>;

    async fn artist(&self, artist_id: &str) -> Result<RawArtist, LoaderError>;
}

/// Client building functionality
fn client_helper(http: &HttpConfig) -> reqwest::ClientBuilder {
    Client::builder()
        .timeout(http.timeout)
        .connect_timeout(http.connect_timeout)
        .pool_max_idle_per_host(http.pool_max_idle_per_host)
        .pool_idle_timeout(Some(http.pool_idle_timeout))
        .redirect(redirect::Policy::limited(http.max_redirects as usize))
}

pub fn base_client(http: &HttpConfig) -> Result<Client, LoaderError> {
    let mut h = header::HeaderMap::new();
    h.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
    client_helper(http)
        .default_headers(h)
        .user_agent(concat!("top50-loader/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| LoaderError::Http(format!("build client: {e}")))
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String
}

/// Decodes a success body, or classifies the failure status
async fn read_json<T: DeserializeOwned>(response: Response, what: &str) ->
    Result<T, LoaderError> {
    let status = response.status();
    if status.is_success() {
        let body = response.bytes().await?;
        return serde_json::from_slice(&body)
            .map_err(|e| LoaderError::Parse(format!("{what}: {e}")));
    }

    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = response.headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            Err(LoaderError::RateLimited(retry_after))
        }
        StatusCode::NOT_FOUND => Err(LoaderError::NotFound(what.to_string())),
        _ => {
            let body = response.text().await.unwrap_or_default();
            Err(LoaderError::Http(format!("{what}: status {status}: {body}")))
        }
    }
}

/// Playable tracks of a page in listing order; null entries are dropped
fn page_tracks(page: PlaylistPage) -> Vec<RawTrack> {
    if page.next.is_some() {
        warn!(total = ?page.total, "playlist.truncated");
    }

    let listed = page.items.len();
    let tracks: Vec<RawTrack> = page.items
        .into_iter()
        .filter_map(|item| item.track)
        .collect();
    if tracks.len() < listed {
        warn!(skipped = listed - tracks.len(), "playlist.null_tracks");
    }
    tracks
}

pub struct SpotifyClient {
    http: Client,
    cfg: SpotifyConfig,
    bearer: OnceCell<String>
}

impl fmt::Debug for SpotifyClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bearer = if self.bearer.initialized() { "<redacted>" } else { "<none>" };
        f.debug_struct("SpotifyClient")
            .field("cfg", &self.cfg)
            .field("bearer", &bearer)
            .finish_non_exhaustive()
    }
}

impl SpotifyClient {
    pub fn new(http_config: &HttpConfig, cfg: &SpotifyConfig) ->
        Result<Self, LoaderError> {

        let http = base_client(http_config)?;
        Ok( Self {
            http,
            cfg: cfg.clone(),
            bearer: OnceCell::new()
        })
    }

    /// POST accounts/api/token with client credentials
    pub fn token_request(&self) -> RequestBuilder {
        self.http
            .post(self.cfg.token_url.clone())
            .basic_auth(&self.cfg.client_id, Some(&self.cfg.client_secret))
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
    }

    /// Joins path segments onto the api base, percent-encoding each one
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, LoaderError> {
        let mut url = self.cfg.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| LoaderError::Config("SPOTIFY_API_BASE cannot be a base".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// GET /v1/playlists/{id}/tracks?limit=50&fields=...
    pub fn playlist_tracks_request(&self, playlist_id: &str, bearer: &str) ->
        Result<RequestBuilder, LoaderError> {
        let url = self.endpoint(&["playlists", playlist_id, "tracks"])?;
        Ok( self.http.get(url).bearer_auth(bearer).query(&[
            ("limit", PLAYLIST_LIMIT),
            ("fields", PLAYLIST_FIELDS),
            ("additional_types", "track")
        ]))
    }

    /// GET /v1/artists/{id}
    pub fn artist_request(&self, artist_id: &str, bearer: &str) ->
        Result<RequestBuilder, LoaderError> {
        let url = self.endpoint(&["artists", artist_id])?;
        Ok( self.http.get(url).bearer_auth(bearer) )
    }

    /// Token is requested once and reused for the rest of the run
    async fn bearer(&self) -> Result<&str, LoaderError> {
        let token = self.bearer.get_or_try_init(|| async {
            debug!("spotify.token");
            let response = self.token_request().send().await?;
            let token: TokenResponse = read_json(response, "spotify token").await?;
            Ok::<_, LoaderError>(token.access_token)
        }).await?;
        Ok(token.as_str())
    }
}

#[async_trait]
impl MusicApi for SpotifyClient {
    #[instrument(skip(self))]
    async fn playlist_tracks(&self, playlist_id: &str) -> Result<Vec<RawTrack>, LoaderError> {
        let bearer = self.bearer().await?;
        let response = self.playlist_tracks_request(playlist_id, bearer)?.send().await?;
        let page: PlaylistPage = read_json(
            response, &format!("playlist {playlist_id}")
        ).await?;

        let tracks = page_tracks(page);
        debug!(count = tracks.len(), "playlist.fetched");
        Ok(tracks)
    }

    #[instrument(skip(self))]
    async fn artist(&self, artist_id: &str) -> Result<RawArtist, LoaderError> {
        let bearer = self.bearer().await?;
        let response = self.artist_request(artist_id, bearer)?.send().await?;
        read_json(response, &format!("artist {artist_id}")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use crate::types::PlaylistItem;
    use crate::types::tests::raw_track;

    fn live() -> bool {
        std::env::var("LIVE_HTTP").ok().as_deref() == Some("1")
    }

    fn client() -> SpotifyClient {
        let cfg = SpotifyConfig {
            client_id: "id".into(),
            client_secret: "secret".into(),
            token_url: Url::parse("https://accounts.spotify.com/api/token").unwrap(),
            api_base: Url::parse("https://api.spotify.com/v1/").unwrap(),
        };
        SpotifyClient::new(&HttpConfig::default(), &cfg).unwrap()
    }

    #[test]
    fn endpoints_are_built_under_api_base() {
        let spotify = client();

        let url = spotify.endpoint(&["playlists", "37i9dQZEVXbMMy2roB9myp", "tracks"]).unwrap();
        assert_eq!(url.as_str(),
            "https://api.spotify.com/v1/playlists/37i9dQZEVXbMMy2roB9myp/tracks");

        // ids never escape their path segment
        let url = spotify.endpoint(&["artists", "../me?x=1"]).unwrap();
        assert_eq!(url.as_str(), "https://api.spotify.com/v1/artists/..%2Fme%3Fx=1");
    }

    #[test]
    fn playlist_request_asks_for_one_page_of_fifty() {
        let spotify = client();
        let request = spotify.playlist_tracks_request("abc", "token").unwrap()
            .build()
            .unwrap();

        let query: Vec<(String, String)> = request.url().query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(query.contains(&("limit".to_string(), "50".to_string())));
        assert!(query.iter().any(|(k, v)| k == "fields" && v.starts_with("items(")));
        assert_eq!(
            request.headers().get(header::AUTHORIZATION).unwrap(),
            "Bearer token"
        );
    }

    fn response(status: u16, headers: &[(&str, &str)], body: &str) -> Response {
        let mut builder = http::Response::builder().status(status);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        Response::from(builder.body(body.to_string()).unwrap())
    }

    #[test]
    fn page_tracks_keep_order_and_skip_null_entries() {
        let page = PlaylistPage {
            items: vec![
                PlaylistItem { track: Some(raw_track("t1", "a1")) },
                PlaylistItem { track: None },
                PlaylistItem { track: Some(raw_track("t2", "a2")) },
                PlaylistItem { track: None },
                PlaylistItem { track: Some(raw_track("t3", "a1")) },
            ],
            next: Some("https://api.spotify.com/v1/playlists/abc/tracks?offset=50".into()),
            total: Some(120)
        };

        let ids: Vec<Option<String>> = page_tracks(page).into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![Some("t1".into()), Some("t2".into()), Some("t3".into())]);

        let empty = PlaylistPage { items: vec![], next: None, total: Some(0) };
        assert!(page_tracks(empty).is_empty());
    }

    #[tokio::test]
    async fn success_body_is_decoded() {
        let body = r#"{"id":"a1","name":"NewJeans","followers":{"total":9000000},
            "genres":["k-pop"],"popularity":81}"#;
        let artist: RawArtist = read_json(response(200, &[], body), "artist a1").await.unwrap();
        assert_eq!(artist.name, "NewJeans");
        assert_eq!(artist.followers.total, Some(9_000_000));
        assert_eq!(artist.genres, vec!["k-pop".to_string()]);

        let bad = read_json::<RawArtist>(response(200, &[], "{\"id\":"), "artist a1").await;
        assert!(matches!(bad, Err(LoaderError::Parse(m)) if m.starts_with("artist a1")));
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after() {
        let err = read_json::<RawArtist>(
            response(429, &[("retry-after", "30")], ""), "artist a1"
        ).await.unwrap_err();
        assert!(matches!(err, LoaderError::RateLimited(Some(ref s)) if s == "30"));

        let err = read_json::<RawArtist>(response(429, &[], ""), "artist a1")
            .await
            .unwrap_err();
        assert!(matches!(err, LoaderError::RateLimited(None)));
    }

    #[tokio::test]
    async fn missing_resource_is_not_found() {
        let err = read_json::<PlaylistPage>(response(404, &[], "{}"), "playlist abc")
            .await
            .unwrap_err();
        assert!(matches!(err, LoaderError::NotFound(ref what) if what == "playlist abc"));
    }

    #[tokio::test]
    async fn other_failures_keep_status_and_body() {
        let body = r#"{"error":{"status":401,"message":"Invalid access token"}}"#;
        let err = read_json::<PlaylistPage>(response(401, &[], body), "playlist abc")
            .await
            .unwrap_err();
        match err {
            LoaderError::Http(msg) => {
                assert!(msg.starts_with("playlist abc: status 401"));
                assert!(msg.contains("Invalid access token"));
            }
            other => panic!("expected Http, got {other:?}"),
        }
    }

    #[test]
    fn debug_output_hides_credentials() {
        let spotify = client();
        assert!(format!("{spotify:?}").contains("<none>"));

        spotify.bearer.set("BQDsecretbearer".into()).unwrap();
        let shown = format!("{spotify:?}");
        assert!(!shown.contains("BQDsecretbearer"));
        assert!(!shown.contains("\"secret\""));
        assert!(shown.contains("<redacted>"));
    }

    #[tokio::test]
    #[allow(dead_code)]
    async fn spotify_playlist_testbench() -> Result<(), LoaderError> {
        dotenvy::dotenv().ok();

        if !live() {
            eprintln!("Set LIVE_HTTP=1 to run");
            return Ok(())
        }

        let cfgs = config::load_config()?;
        let spotify = SpotifyClient::new(&cfgs.http, &cfgs.spotify)?;

        let tracks = spotify.playlist_tracks(&cfgs.pipeline.playlist_id).await?;
        assert!(!tracks.is_empty());
        println!("first: {}", serde_json::to_string_pretty(&tracks[0])?);

        let artist_id = tracks[0].artists[0].id.clone().unwrap();
        let artist = spotify.artist(&artist_id).await?;
        assert_eq!(artist.id, artist_id);
        println!("artist: {}", serde_json::to_string_pretty(&artist)?);

        Ok(())
    }
}
