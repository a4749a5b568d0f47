//!
//! src/persistent.rs
//!
//! Defines the warehouse seam and its two SQL backends. Redshift is reached
//! over the postgres wire protocol; sqlite serves local runs and tests.
//! Both hold a single connection for the whole run, and each insert batch
//! runs inside its own transaction.
//!

use std::collections::HashSet;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection, Postgres, QueryBuilder, Sqlite};
use tracing::{debug, info};

use crate::config::{RedshiftConfig, TableNames};
use crate::errors::LoaderError;
use crate::types::{ArtistRow, TrackRow};

/// What the loader needs from the destination store
#[async_trait]
pub trait Warehouse: Send {
    /// Creates both tables if they are absent, never touching existing data
    async fn ensure_tables(&mut self) -> Result<(), LoaderError>;

    async fn existing_artist_ids(&mut self) -> Result<HashSet<String>, LoaderError>;

    async fn artist_exists(&mut self, artist_id: &str) -> Result<bool, LoaderError>;

    /// One multi-row insert committed once; no statement for an empty batch
    async fn insert_tracks(&mut self, rows: &[TrackRow]) -> Result<u64, LoaderError>;

    async fn insert_artists(&mut self, rows: &[ArtistRow]) -> Result<u64, LoaderError>;
}

///
/// Statement text shared by both backends. Table names were validated as
/// identifiers when the configuration was loaded.
///

fn create_tracks_sql(tables: &TableNames) -> String {
    format!(
        r"
        CREATE TABLE IF NOT EXISTS {} (
            id          VARCHAR(255) PRIMARY KEY,
            name        VARCHAR(255),
            artist      VARCHAR(255),
            artist_id   VARCHAR(255),
            album       VARCHAR(255),
            popularity  INT,
            duration_ms INT,
            date        DATE
        );
        ",
        tables.tracks
    )
}

fn create_artists_sql(tables: &TableNames) -> String {
    format!(
        r"
        CREATE TABLE IF NOT EXISTS {} (
            id          VARCHAR(255) PRIMARY KEY,
            name        VARCHAR(255),
            followers   INT,
            genres      VARCHAR(255),
            popularity  INT
        );
        ",
        tables.artists
    )
}

fn insert_tracks_head(tables: &TableNames) -> String {
    format!(
        "INSERT INTO {} (id, name, artist, artist_id, album, popularity, duration_ms, date) ",
        tables.tracks
    )
}

fn insert_artists_head(tables: &TableNames) -> String {
    format!(
        "INSERT INTO {} (id, name, followers, genres, popularity) ",
        tables.artists
    )
}

fn select_artist_ids_sql(tables: &TableNames) -> String {
    format!("SELECT id FROM {};", tables.artists)
}

pub struct PgWarehouse {
    conn: PgConnection,
    tables: TableNames
}

impl PgWarehouse {
    pub async fn connect(cfg: &RedshiftConfig, tables: TableNames) ->
        Result<Self, LoaderError> {
        let opts = PgConnectOptions::new()
            .host(&cfg.host)
            .port(cfg.port)
            .username(&cfg.user)
            .password(&cfg.password)
            .database(&cfg.database)
            .ssl_mode(cfg.ssl_mode)
            // redshift has no support for server side prepared statement caching
            .statement_cache_capacity(0);

        let conn = opts.connect().await?;
        info!(host = %cfg.host, database = %cfg.database, "warehouse.connected");
        Ok( Self { conn, tables } )
    }

    pub async fn close(self) -> Result<(), LoaderError> {
        self.conn.close().await?;
        Ok(())
    }
}

#[async_trait]
impl Warehouse for PgWarehouse {
    async fn ensure_tables(&mut self) -> Result<(), LoaderError> {
        sqlx::query(&create_tracks_sql(&self.tables)).execute(&mut self.conn).await?;
        sqlx::query(&create_artists_sql(&self.tables)).execute(&mut self.conn).await?;
        Ok(())
    }

    async fn existing_artist_ids(&mut self) -> Result<HashSet<String>, LoaderError> {
        let ids: Vec<String> = sqlx::query_scalar(&select_artist_ids_sql(&self.tables))
            .fetch_all(&mut self.conn)
            .await?;
        Ok(ids.into_iter().collect())
    }

    async fn artist_exists(&mut self, artist_id: &str) -> Result<bool, LoaderError> {
        let sql = format!("SELECT id FROM {} WHERE id = $1;", self.tables.artists);
        let row: Option<String> = sqlx::query_scalar(&sql)
            .bind(artist_id)
            .fetch_optional(&mut self.conn)
            .await?;
        Ok(row.is_some())
    }

    async fn insert_tracks(&mut self, rows: &[TrackRow]) -> Result<u64, LoaderError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(insert_tracks_head(&self.tables));
        qb.push_values(rows, |mut b, row| {
            b.push_bind(row.id.clone())
                .push_bind(row.name.clone())
                .push_bind(row.artist.clone())
                .push_bind(row.artist_id.clone())
                .push_bind(row.album.clone())
                .push_bind(row.popularity)
                .push_bind(row.duration_ms)
                .push_bind(row.date);
        });

        let mut tx = self.conn.begin().await?;
        let inserted = qb.build().execute(&mut *tx).await?.rows_affected();
        tx.commit().await?;

        debug!(rows = inserted, "warehouse.insert.tracks");
        Ok(inserted)
    }

    async fn insert_artists(&mut self, rows: &[ArtistRow]) -> Result<u64, LoaderError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(insert_artists_head(&self.tables));
        qb.push_values(rows, |mut b, row| {
            b.push_bind(row.id.clone())
                .push_bind(row.name.clone())
                .push_bind(row.followers)
                .push_bind(row.genres.clone())
                .push_bind(row.popularity);
        });

        let mut tx = self.conn.begin().await?;
        let inserted = qb.build().execute(&mut *tx).await?.rows_affected();
        tx.commit().await?;

        debug!(rows = inserted, "warehouse.insert.artists");
        Ok(inserted)
    }
}

pub struct SqliteWarehouse {
    conn: SqliteConnection,
    tables: TableNames
}

impl SqliteWarehouse {
    pub async fn open(database_url: &str, tables: TableNames) -> Result<Self, LoaderError> {
        let conn = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .connect()
            .await?;
        info!(url = %database_url, "warehouse.connected");
        Ok( Self { conn, tables } )
    }

    #[cfg(test)]
    pub(crate) async fn open_in_memory(tables: TableNames) -> Result<Self, LoaderError> {
        Self::open("sqlite::memory:", tables).await
    }

    pub async fn close(self) -> Result<(), LoaderError> {
        self.conn.close().await?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn track_rows(&mut self) -> Result<Vec<TrackRow>, LoaderError> {
        let sql = format!(
            "SELECT id, name, artist, artist_id, album, popularity, duration_ms, date \
             FROM {} ORDER BY rowid;",
            self.tables.tracks
        );
        let rows: Vec<(String, String, String, String, String, i32, i32, Option<chrono::NaiveDate>)> =
            sqlx::query_as(&sql).fetch_all(&mut self.conn).await?;

        Ok(rows.into_iter()
            .map(|(id, name, artist, artist_id, album, popularity, duration_ms, date)| TrackRow {
                id, name, artist, artist_id, album, popularity, duration_ms, date
            })
            .collect())
    }

    #[cfg(test)]
    pub(crate) async fn artist_rows(&mut self) -> Result<Vec<ArtistRow>, LoaderError> {
        let sql = format!(
            "SELECT id, name, followers, genres, popularity FROM {} ORDER BY rowid;",
            self.tables.artists
        );
        let rows: Vec<(String, String, Option<i32>, String, i32)> =
            sqlx::query_as(&sql).fetch_all(&mut self.conn).await?;

        Ok(rows.into_iter()
            .map(|(id, name, followers, genres, popularity)| ArtistRow {
                id, name, followers, genres, popularity
            })
            .collect())
    }
}

#[async_trait]
impl Warehouse for SqliteWarehouse {
    async fn ensure_tables(&mut self) -> Result<(), LoaderError> {
        sqlx::query(&create_tracks_sql(&self.tables)).execute(&mut self.conn).await?;
        sqlx::query(&create_artists_sql(&self.tables)).execute(&mut self.conn).await?;
        Ok(())
    }

    async fn existing_artist_ids(&mut self) -> Result<HashSet<String>, LoaderError> {
        let ids: Vec<String> = sqlx::query_scalar(&select_artist_ids_sql(&self.tables))
            .fetch_all(&mut self.conn)
            .await?;
        Ok(ids.into_iter().collect())
    }

    async fn artist_exists(&mut self, artist_id: &str) -> Result<bool, LoaderError> {
        let sql = format!("SELECT id FROM {} WHERE id = ?1;", self.tables.artists);
        let row: Option<String> = sqlx::query_scalar(&sql)
            .bind(artist_id)
            .fetch_optional(&mut self.conn)
            .await?;
        Ok(row.is_some())
    }

    async fn insert_tracks(&mut self, rows: &[TrackRow]) -> Result<u64, LoaderError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(insert_tracks_head(&self.tables));
        qb.push_values(rows, |mut b, row| {
            b.push_bind(row.id.clone())
                .push_bind(row.name.clone())
                .push_bind(row.artist.clone())
                .push_bind(row.artist_id.clone())
                .push_bind(row.album.clone())
                .push_bind(row.popularity)
                .push_bind(row.duration_ms)
                .push_bind(row.date);
        });

        let mut tx = self.conn.begin().await?;
        let inserted = qb.build().execute(&mut *tx).await?.rows_affected();
        tx.commit().await?;

        debug!(rows = inserted, "warehouse.insert.tracks");
        Ok(inserted)
    }

    async fn insert_artists(&mut self, rows: &[ArtistRow]) -> Result<u64, LoaderError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(insert_artists_head(&self.tables));
        qb.push_values(rows, |mut b, row| {
            b.push_bind(row.id.clone())
                .push_bind(row.name.clone())
                .push_bind(row.followers)
                .push_bind(row.genres.clone())
                .push_bind(row.popularity);
        });

        let mut tx = self.conn.begin().await?;
        let inserted = qb.build().execute(&mut *tx).await?.rows_affected();
        tx.commit().await?;

        debug!(rows = inserted, "warehouse.insert.artists");
        Ok(inserted)
    }
}
