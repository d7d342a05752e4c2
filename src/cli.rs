//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Download a file through the background download agent.
///
/// Tries the configured cache host first and falls back to the origin
/// server when the cache host fails or the fallback delay passes.
#[derive(Parser, Debug)]
#[command(name = "download-agent")]
#[command(author, version, about)]
pub struct Args {
    /// URL to download (http or https)
    pub url: String,

    /// Destination file; must not exist yet
    #[arg(short, long)]
    pub output: PathBuf,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Admin configuration file (JSON)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// SDK configuration file consulted for settings the admin file leaves unset
    #[arg(long, value_name = "PATH", requires = "config")]
    pub sdk_config: Option<PathBuf>,

    /// Cache host to try before the origin (ignored when --config is given)
    #[arg(long, value_name = "HOST", conflicts_with = "config")]
    pub cache_host: Option<String>,

    /// Seconds after start before falling back to the origin (negative: never)
    #[arg(long, value_name = "SECS", allow_hyphen_values = true, conflicts_with = "config")]
    pub fallback_delay: Option<i64>,

    /// Seconds without progress before the download gives up (0 to keep the default)
    #[arg(short = 't', long, default_value_t = 0)]
    pub no_progress_timeout: u64,
}
