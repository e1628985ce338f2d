//! Command-line interface

use std::path::PathBuf;

use clap::Parser;

/// OIDC authentication gate - protects an upstream HTTP service
#[derive(Parser, Debug)]
#[command(name = "authgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "AUTHGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "AUTHGATE_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "AUTHGATE_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "AUTHGATE_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "AUTHGATE_LOG_FORMAT")]
    pub log_format: Option<String>,
}
