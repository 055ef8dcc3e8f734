//! Command-line argument parsing

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "docket-server",
    about = "Docket document ingestion service",
    version,
    long_about = "Orchestrates the document ingestion pipeline: OCR, chunking, \
                  embedding, vector indexing, entity extraction and graph ingest, \
                  driven through external CLI tools."
)]
pub struct Args {
    /// HTTP server port; overrides DOCKET__SERVER__PORT
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short,
        long,
        env = "LOG_LEVEL",
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub log_level: String,

    /// Enable JSON log format (useful for production)
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,

    /// Use in-memory stores even when a database URL is configured
    #[arg(long, env = "MEMORY_STORES")]
    pub memory_stores: bool,
}
