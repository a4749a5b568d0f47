//!
//! src/config.rs
//!
//! Reads the loader's configuration from the environment (and an optional
//! credentials file) once at startup. Every required value missing here is
//! fatal before any request or connection is made.
//!

use std::{fmt, str::FromStr, time};
use sqlx::postgres::PgSslMode;
use url::Url;
use crate::errors::LoaderError;

/// Constants for HTTP Config
pub const HTTP_TIMEOUT: u64 = 8000;
pub const HTTP_CONNECT_TIMEOUT: u64 = 2000;
pub const HTTP_POOL_MAX_IDLE: usize = 4;
pub const HTTP_POOL_IDLE_TIMEOUT: u64 = 90000;
pub const HTTP_MAX_REDIRECTS: u8 = 4;

/// Top 50 Argentina
pub const DEFAULT_PLAYLIST_ID: &str = "37i9dQZEVXbMMy2roB9myp";
pub const DEFAULT_TRACKS_TABLE: &str = "davila_spotify_tracks";
pub const DEFAULT_ARTISTS_TABLE: &str = "davila_spotify_artists";
pub const CREDENTIALS_FILE: &str = "credenciales.env";

// Redshift caps identifiers at 127 bytes
const MAX_IDENTIFIER_LEN: usize = 127;

/// Source of raw key/value settings, the process environment outside of tests
pub type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Wrapper over lookup to return an invalid enviroment var error
fn env_check(env: Lookup, s: &str) -> Result<String, LoaderError> {
    match env(s) {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(LoaderError::Config(format!("{s} was not set"))),
    }
}

fn env_or(env: Lookup, s: &str, default: &str) -> String {
    match env(s) {
        Some(v) if !v.trim().is_empty() => v,
        _ => default.to_string()
    }
}

fn env_flag(env: Lookup, s: &str, default: bool) -> Result<bool, LoaderError> {
    let Some(raw) = env(s) else { return Ok(default) };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" => Ok(default),
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(LoaderError::Config(format!("{s} is not a boolean: {other}")))
    }
}

/// Ensures that url is https
fn ensure_https(url: &Url) -> Result<(), String> {
    if url.scheme() == "https" {
        Ok(())
    } else {
        Err(format!("URL must be https: {url}"))
    }
}

fn ensure_host(url: &Url, expected_host: &str) -> Result<(), String> {
    match url.host_str() {
        Some(h) if h.eq_ignore_ascii_case(expected_host) => Ok(()),
        Some(h) => Err(
            format!("Unexpected host for {url} (got {h}, expected {expected_host})")
        ),
        None => Err(format!("URL missing host: {url}"))
    }
}

fn ensure_trailing_slash(url: &mut Url) {
    if !url.path().ends_with('/') {
        let mut path = url.path().to_string();
        path.push('/');
        url.set_path(&path);
    }
}

/// Table names are spliced into SQL text, so only plain identifiers pass
fn ensure_identifier(var: &str, name: &str) -> Result<String, LoaderError> {
    let mut chars = name.chars();
    let valid_head = chars.next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_tail = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid_head && valid_tail && name.len() <= MAX_IDENTIFIER_LEN {
        Ok(name.to_string())
    } else {
        Err(LoaderError::Config(format!("{var} is not a valid table name: {name}")))
    }
}

/// Configuration that Spotify expects when hitting endpoints
#[derive(Clone)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: Url,
    pub api_base: Url,
}

impl fmt::Debug for SpotifyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpotifyConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("token_url", &self.token_url.as_str())
            .field("api_base", &self.api_base.as_str())
            .finish()
    }
}

fn build_spotify(env: Lookup) -> Result<SpotifyConfig, LoaderError> {
    let client_id     = env_check(env, "SPOTIFY_CLIENT_ID")?;
    let client_secret = env_check(env, "SPOTIFY_CLIENT_SECRET")?;

    // form urls
    let token_url = env_or(env, "SPOTIFY_TOKEN_URL",
        "https://accounts.spotify.com/api/token");
    let api_base  = env_or(env, "SPOTIFY_API_BASE",
        "https://api.spotify.com/v1/");

    let token_url = Url::parse(&token_url)
        .map_err(|e| LoaderError::Config(format!("SPOTIFY_TOKEN_URL invalid {e}")))?;
    let mut api_base = Url::parse(&api_base)
        .map_err(|e| LoaderError::Config(format!("SPOTIFY_API_BASE invalid {e}")))?;

    // ensure valid https and hostname for both urls
    ensure_https(&token_url).map_err(LoaderError::Config)?;
    ensure_https(&api_base).map_err(LoaderError::Config)?;
    ensure_host(&token_url, "accounts.spotify.com").map_err(LoaderError::Config)?;
    ensure_host(&api_base, "api.spotify.com").map_err(LoaderError::Config)?;
    ensure_trailing_slash(&mut api_base);

    Ok( SpotifyConfig { client_id, client_secret, token_url, api_base } )
}

///
/// Configuration for the destination warehouse
///

#[derive(Clone)]
pub struct RedshiftConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub ssl_mode: PgSslMode
}

impl fmt::Debug for RedshiftConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedshiftConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum WarehouseTarget {
    Redshift(RedshiftConfig),
    Sqlite { url: String }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub tracks: String,
    pub artists: String
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            tracks: DEFAULT_TRACKS_TABLE.to_string(),
            artists: DEFAULT_ARTISTS_TABLE.to_string()
        }
    }
}

#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    pub target: WarehouseTarget,
    pub tables: TableNames
}

fn build_redshift(env: Lookup) -> Result<RedshiftConfig, LoaderError> {
    let host     = env_check(env, "REDSHIFT_HOST")?;
    let port     = env_check(env, "REDSHIFT_PORT")?;
    let user     = env_check(env, "REDSHIFT_USER")?;
    let password = env_check(env, "REDSHIFT_PASSWORD")?;
    let database = env_check(env, "REDSHIFT_DATABASE")?;

    let port = port.trim().parse::<u16>()
        .map_err(|e| LoaderError::Config(format!("REDSHIFT_PORT invalid {e}")))?;
    let ssl_mode = PgSslMode::from_str(&env_or(env, "REDSHIFT_SSL_MODE", "prefer"))
        .map_err(|e| LoaderError::Config(format!("REDSHIFT_SSL_MODE invalid {e}")))?;

    Ok( RedshiftConfig { host, port, user, password, database, ssl_mode } )
}

fn build_warehouse(env: Lookup) -> Result<WarehouseConfig, LoaderError> {
    // a local sqlite file stands in for the warehouse when given
    let target = match env("WAREHOUSE_SQLITE_URL") {
        Some(url) if !url.trim().is_empty() => WarehouseTarget::Sqlite { url },
        _ => WarehouseTarget::Redshift(build_redshift(env)?)
    };

    let tables = TableNames {
        tracks: ensure_identifier(
            "TRACKS_TABLE", &env_or(env, "TRACKS_TABLE", DEFAULT_TRACKS_TABLE))?,
        artists: ensure_identifier(
            "ARTISTS_TABLE", &env_or(env, "ARTISTS_TABLE", DEFAULT_ARTISTS_TABLE))?,
    };
    if tables.tracks.eq_ignore_ascii_case(&tables.artists) {
        return Err(LoaderError::Config(
            "TRACKS_TABLE and ARTISTS_TABLE must differ".to_string()
        ));
    }

    Ok( WarehouseConfig { target, tables } )
}

///
/// Configuration of a single load run
///
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub playlist_id: String,
    pub capture_date: bool,       // tag track rows with today's date
    pub preload_snapshot: bool,   // read persisted artist ids once up front
    pub recheck_each: bool        // primary key lookup before each artist fetch
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            playlist_id: DEFAULT_PLAYLIST_ID.to_string(),
            capture_date: true,
            preload_snapshot: true,
            recheck_each: true
        }
    }
}

fn build_pipeline(env: Lookup) -> Result<PipelineConfig, LoaderError> {
    let playlist_id = env_or(env, "PLAYLIST_ID", DEFAULT_PLAYLIST_ID);
    if !playlist_id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(LoaderError::Config(format!("PLAYLIST_ID invalid: {playlist_id}")));
    }

    Ok( PipelineConfig {
        playlist_id,
        capture_date: env_flag(env, "CAPTURE_DATE", true)?,
        preload_snapshot: env_flag(env, "ARTIST_SNAPSHOT", true)?,
        recheck_each: env_flag(env, "ARTIST_RECHECK", true)?
    })
}

///
/// Configuration for Http timeouts, etc.
///
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: time::Duration,
    pub connect_timeout: time::Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: time::Duration,
    pub max_redirects: u8,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: time::Duration::from_millis(HTTP_TIMEOUT),
            connect_timeout: time::Duration::from_millis(HTTP_CONNECT_TIMEOUT),
            pool_max_idle_per_host: HTTP_POOL_MAX_IDLE,
            pool_idle_timeout: time::Duration::from_millis(HTTP_POOL_IDLE_TIMEOUT),
            max_redirects: HTTP_MAX_REDIRECTS,
        }
    }
}

///
/// Configuration for Logger
///

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub filter_directives: String,
    pub format: LogFormat,
    pub include_file_line: bool,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter_directives: "info,top50_loader=debug,sqlx=warn,reqwest=warn".to_string(),
            format: LogFormat::Json,
            include_file_line: true,
            include_target: true,
        }
    }
}

fn build_logging(env: Lookup) -> Result<LoggingConfig, LoaderError> {
    let format = match env_or(env, "LOG_FORMAT", "json").to_ascii_lowercase().as_str() {
        "json"   => LogFormat::Json,
        "pretty" => LogFormat::Pretty,
        other => return Err(LoaderError::Config(format!("LOG_FORMAT unknown: {other}")))
    };
    Ok( LoggingConfig { format, ..LoggingConfig::default() } )
}

///
/// AppConfig which holds everything main needs to wire a run
///
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub spotify: SpotifyConfig,
    pub warehouse: WarehouseConfig,
    pub pipeline: PipelineConfig,
    pub http: HttpConfig,
    pub logging: LoggingConfig
}

/// Builds the full configuration from an arbitrary key/value source
pub fn from_lookup(env: Lookup) -> Result<AppConfig, LoaderError> {
    let spotify   = build_spotify(env)?;
    let warehouse = build_warehouse(env)?;
    let pipeline  = build_pipeline(env)?;
    let http      = HttpConfig::default();
    let logging   = build_logging(env)?;

    Ok( AppConfig { spotify, warehouse, pipeline, http, logging } )
}

///
/// Return all environment variables to caller at program start.
///
pub fn load_config() -> Result<AppConfig, LoaderError> {
    dotenvy::from_filename(CREDENTIALS_FILE).ok();
    dotenvy::dotenv().ok();

    from_lookup(&|key| std::env::var(key).ok())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use super::*;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("SPOTIFY_CLIENT_ID", "id"),
            ("SPOTIFY_CLIENT_SECRET", "secret"),
            ("REDSHIFT_HOST", "cluster.example.us-east-1.redshift.amazonaws.com"),
            ("REDSHIFT_PORT", "5439"),
            ("REDSHIFT_USER", "loader"),
            ("REDSHIFT_PASSWORD", "hunter2"),
            ("REDSHIFT_DATABASE", "data-engineer-database"),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> Result<AppConfig, LoaderError> {
        from_lookup(&|k| env.get(k).map(|v| v.to_string()))
    }

    #[test]
    fn defaults_fill_optional_values() {
        let cfg = load(&base_env()).unwrap();

        assert_eq!(cfg.spotify.api_base.as_str(), "https://api.spotify.com/v1/");
        assert_eq!(cfg.warehouse.tables, TableNames::default());
        assert_eq!(cfg.pipeline.playlist_id, DEFAULT_PLAYLIST_ID);
        assert!(cfg.pipeline.capture_date);
        assert!(cfg.pipeline.recheck_each);
        assert_eq!(cfg.logging.format, LogFormat::Json);

        match cfg.warehouse.target {
            WarehouseTarget::Redshift(r) => {
                assert_eq!(r.port, 5439);
                assert_eq!(r.database, "data-engineer-database");
            }
            other => panic!("unexpected target {other:?}"),
        }
    }

    #[test]
    fn each_required_value_is_fatal_when_missing() {
        for key in base_env().keys() {
            let mut env = base_env();
            env.remove(key);
            match load(&env) {
                Err(LoaderError::Config(msg)) => assert!(msg.contains(key), "{msg}"),
                other => panic!("{key}: expected config error, got {other:?}"),
            }
        }
    }

    #[test]
    fn blank_values_count_as_missing() {
        let mut env = base_env();
        env.insert("SPOTIFY_CLIENT_SECRET", "   ");
        assert!(matches!(load(&env), Err(LoaderError::Config(_))));
    }

    #[test]
    fn sqlite_target_skips_redshift_credentials() {
        let env = HashMap::from([
            ("SPOTIFY_CLIENT_ID", "id"),
            ("SPOTIFY_CLIENT_SECRET", "secret"),
            ("WAREHOUSE_SQLITE_URL", "sqlite:./data/top50.db"),
        ]);
        let cfg = load(&env).unwrap();
        assert!(matches!(
            cfg.warehouse.target,
            WarehouseTarget::Sqlite { ref url } if url == "sqlite:./data/top50.db"
        ));
    }

    #[test]
    fn api_urls_must_be_https_on_expected_host() {
        let mut env = base_env();
        env.insert("SPOTIFY_API_BASE", "http://api.spotify.com/v1/");
        assert!(matches!(load(&env), Err(LoaderError::Config(_))));

        let mut env = base_env();
        env.insert("SPOTIFY_TOKEN_URL", "https://evil.example.com/api/token");
        assert!(matches!(load(&env), Err(LoaderError::Config(_))));

        let mut env = base_env();
        env.insert("SPOTIFY_API_BASE", "https://api.spotify.com/v1");
        let cfg = load(&env).unwrap();
        assert_eq!(cfg.spotify.api_base.as_str(), "https://api.spotify.com/v1/");
    }

    #[test]
    fn table_names_must_be_identifiers() {
        for bad in ["tracks; DROP TABLE x", "1tracks", "my-tracks", "t\"x"] {
            let mut env = base_env();
            env.insert("TRACKS_TABLE", bad);
            assert!(matches!(load(&env), Err(LoaderError::Config(_))), "{bad}");
        }

        let mut env = base_env();
        env.insert("ARTISTS_TABLE", DEFAULT_TRACKS_TABLE);
        assert!(matches!(load(&env), Err(LoaderError::Config(_))));

        let mut env = base_env();
        env.insert("TRACKS_TABLE", "_top50_tracks");
        assert_eq!(load(&env).unwrap().warehouse.tables.tracks, "_top50_tracks");
    }

    #[test]
    fn flags_and_formats_parse() {
        let mut env = base_env();
        env.insert("CAPTURE_DATE", "off");
        env.insert("ARTIST_RECHECK", "0");
        env.insert("LOG_FORMAT", "Pretty");
        let cfg = load(&env).unwrap();
        assert!(!cfg.pipeline.capture_date);
        assert!(!cfg.pipeline.recheck_each);
        assert!(cfg.pipeline.preload_snapshot);
        assert_eq!(cfg.logging.format, LogFormat::Pretty);

        env.insert("ARTIST_SNAPSHOT", "maybe");
        assert!(matches!(load(&env), Err(LoaderError::Config(_))));
    }

    #[test]
    fn secrets_are_redacted_in_debug_output() {
        let cfg = load(&base_env()).unwrap();
        let dump = format!("{cfg:?}");
        assert!(!dump.contains("hunter2"));
        assert!(!dump.contains("\"secret\""));
    }
}
