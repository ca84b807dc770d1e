//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// MCP Tool Hub - many tool servers, one small tool list
#[derive(Parser, Debug)]
#[command(name = "mcp-toolhub")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "MCP_TOOLHUB_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "MCP_TOOLHUB_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "MCP_TOOLHUB_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the hub server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, env = "MCP_TOOLHUB_PORT")]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long, env = "MCP_TOOLHUB_HOST")]
        host: Option<String>,
    },

    /// Validate the configuration and list configured backends
    Check,

    /// Connect configured backends and print the exposed operations
    Tools {
        /// Free-text query used to match operations
        #[arg(short, long)]
        query: Option<String>,

        /// Maximum number of matched operations
        #[arg(short, long)]
        limit: Option<usize>,
    },
}
