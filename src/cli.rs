use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// trackgit — realtime token sync and request analytics
#[derive(Parser)]
#[command(name = "trackgit", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a fresh token id
    NewId {
        /// How many ids to print
        #[arg(short, long, default_value = "1")]
        count: usize,
    },

    /// Shorten a URL through the configured shortener
    Shorten {
        url: String,
    },

    /// Transfer a token to the account registered under an email
    Transfer {
        #[arg(long)]
        token_id: String,
        #[arg(long)]
        email: String,
        /// Identity token sent as bearer credentials (overrides TRACKGIT_AUTH_TOKEN)
        #[arg(long)]
        auth_token: Option<String>,
    },

    /// Query a token export for events inside a time window
    Range {
        /// JSON file holding an array of tokens with raw request groups
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        token: String,
        /// Window start: UTC millis or RFC 3339
        #[arg(long)]
        start: String,
        /// Window end (inclusive): UTC millis or RFC 3339
        #[arg(long)]
        end: String,
        /// Print a histogram with buckets of this width instead of raw timestamps
        #[arg(long)]
        bucket_ms: Option<i64>,
    },

    /// Run an in-process sync session: create a token, record hits, report
    Simulate {
        #[arg(long, default_value = "demo-user")]
        owner: String,
        #[arg(long, default_value = "readme badge")]
        name: String,
        /// Number of pixel hits to record
        #[arg(long, default_value = "10")]
        hits: usize,
    },
}
