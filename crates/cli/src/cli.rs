use std::path::PathBuf;

use clap::Parser;

/// Run the image-fetch demo on a quay dispatcher.
///
/// Each image is fetched on a background queue by a simulated fetcher, then
/// displayed from the main queue while other UI work runs there too.
#[derive(Parser, Debug)]
#[command(name = "quay-demo", about = "Demo of the quay task dispatcher")]
pub struct CliArgs {
    /// Resource ids to fetch and display
    #[arg(default_values_t = vec!["img1".to_string()])]
    pub images: Vec<String>,

    /// Path to a dispatcher config file (TOML). Defaults plus QUAY_* env vars when unset.
    #[arg(long, env = "QUAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Background queue the fetches run on (created if the config does not declare it)
    #[arg(long, default_value = "bg")]
    pub queue: String,

    /// Concurrency limit for a created background queue (default: config's default_concurrency_limit)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Simulated fetch latency in milliseconds
    #[arg(long, env = "QUAY_DEMO_LATENCY_MS", default_value = "200")]
    pub latency_ms: u64,

    /// Make the fetch of this resource id fail (repeatable)
    #[arg(long = "fail", value_name = "ID")]
    pub fail: Vec<String>,

    /// Discard pending work on exit instead of draining it
    #[arg(long)]
    pub no_drain: bool,

    /// Print per-queue metrics as JSON on exit
    #[arg(long)]
    pub metrics: bool,

    /// Print the effective dispatcher config as JSON and exit
    #[arg(long)]
    pub print_config: bool,
}
