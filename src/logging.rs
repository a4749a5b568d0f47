//! 
//! src/logging.rs
//!
//! Initializes logger so a run leaves one structured line per step 
//! on stdout 
//!

use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use tracing_error::ErrorLayer; 
use tracing_appender::non_blocking; 

use crate::config::{LogFormat, LoggingConfig};

/// Flushes buffered log lines when dropped, keep alive for the whole run
pub struct LoggingGuard(tracing_appender::non_blocking::WorkerGuard);

fn filter(cfg: &LoggingConfig) -> EnvFilter {
    std::env::var("RUST_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(cfg.filter_directives.clone()))
}

pub fn init_logging(cfg: &LoggingConfig) -> 
    Result<LoggingGuard, crate::errors::LoaderError> {
    
    let (writer, guard) = non_blocking(std::io::stdout());
    let time = fmt::time::UtcTime::rfc_3339();

    let fmt_layer = fmt::layer()
        .with_writer(writer)
        .with_timer(time)
        .with_target(cfg.include_target)
        .with_file(cfg.include_file_line)
        .with_line_number(cfg.include_file_line);

    let fmt_layer = match cfg.format {
        LogFormat::Json => fmt_layer
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Pretty => fmt_layer.pretty().boxed()
    };

    tracing_subscriber::registry()
        .with(filter(cfg))
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .try_init()
        .map_err(|e| crate::errors::LoaderError::Config(format!("logger: {e}")))?;

    Ok( LoggingGuard(guard) )
}
