//!
//! src/errors.rs 
//!
//! Defines enums and methods of error conversion 
//! for errors the loader uses 
//!
//!

use thiserror::Error; 

#[derive(Error, Debug)]
pub enum LoaderError {
    /// Missing or malformed environment value, or a logger that cannot be installed
    #[error("config error: {0}")]
    Config(String),
    /// Transport failure or a non-2xx status without its own variant,
    /// including a rejected token exchange
    #[error("http error: {0}")]
    Http(String),
    /// 429 from the API; holds the Retry-After header if sent. Not retried.
    #[error("rate limited: retry after {0:?}")]
    RateLimited(Option<String>),
    /// 404 for the named playlist or artist
    #[error("not found: {0}")]
    NotFound(String),
    /// Body that does not decode, or a record unfit for a row
    /// (no id, no artists, count outside i32)
    #[error("parse error: {0}")]
    Parse(String),
    /// Connect, DDL, query or insert failure in the warehouse
    #[error("db error: {0}")]
    Db(String),
    /// Local I/O failure outside the HTTP client and the database driver
    #[error("io error: {0}")]
    Io(#[from] std::io::Error)
}

impl From<reqwest::Error> for LoaderError {
    fn from(e: reqwest::Error) -> Self { LoaderError::Http(e.to_string()) }
}

impl From<serde_json::Error> for LoaderError {
    fn from(e: serde_json::Error) -> Self { LoaderError::Parse(e.to_string()) }
}

impl From<sqlx::Error> for LoaderError {
    fn from(e: sqlx::Error) -> Self { LoaderError::Db(e.to_string()) }
}
