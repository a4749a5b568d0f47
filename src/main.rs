//!
//! src/main.rs
//! 
//! Entry point: loads configuration, opens the warehouse connection and 
//! runs a single load of the top-50 playlist
//!
//!

mod config; 
mod errors; 
mod logging; 

mod dedup;
mod fetch;
mod persistent; 
mod pipeline;
mod types;

use crate::config::WarehouseTarget;
use crate::errors::LoaderError;
use crate::persistent::{PgWarehouse, SqliteWarehouse};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), LoaderError> {
    let cfgs    = config::load_config()?;
    let _logger = logging::init_logging(&cfgs.logging)?;

    tracing::info!(
        service="top50-loader", 
        version=%env!("CARGO_PKG_VERSION"), 
        "starting"
    );
    tracing::debug!(config = ?cfgs, "configuration");

    let spotify = fetch::SpotifyClient::new(&cfgs.http, &cfgs.spotify)?;
    let tables  = cfgs.warehouse.tables.clone();

    let result = match &cfgs.warehouse.target {
        WarehouseTarget::Redshift(redshift) => {
            let mut warehouse = PgWarehouse::connect(redshift, tables).await?;
            let report = pipeline::run(&cfgs.pipeline, &spotify, &mut warehouse).await;
            let closed = warehouse.close().await;
            report.and_then(|r| closed.map(|()| r))
        }
        WarehouseTarget::Sqlite { url } => {
            let mut warehouse = SqliteWarehouse::open(url, tables).await?;
            let report = pipeline::run(&cfgs.pipeline, &spotify, &mut warehouse).await;
            let closed = warehouse.close().await;
            report.and_then(|r| closed.map(|()| r))
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "loader.failed");
    }
    result.map(|_| ())
}
