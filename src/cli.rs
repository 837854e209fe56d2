//! Command-line interface definitions for the news digest.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Source lists and service credentials can also come from environment
//! variables.

use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for the news digest.
///
/// # Examples
///
/// ```sh
/// # Last 7 days, sources from the config file
/// news_digest --config digest.yaml
///
/// # Two weeks, extra sites and feeds from the command line
/// news_digest -d 14 --sites https://a.example.com \
///     --feeds https://b.example.com=https://b.example.com/feed
///
/// # Re-render a previous run without fetching or calling the service
/// news_digest --records output/records_2025-05-01_to_2025-05-08.json
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Include articles published this many days back from today
    #[arg(short, long, default_value_t = 7)]
    pub days: u32,

    /// Optional path to a YAML config file
    #[arg(short, long, env = "NEWS_CONFIG")]
    pub config: Option<String>,

    /// Directory for the JSON artifacts and the report
    #[arg(short, long, default_value = "output")]
    pub output_dir: String,

    /// Extra homepage URLs, comma-separated
    #[arg(long, env = "TARGET_SITES")]
    pub sites: Option<String>,

    /// Extra feed mappings as `site=feed`, comma-separated
    #[arg(long, env = "RSS_FEEDS")]
    pub feeds: Option<String>,

    /// Enrich articles saved by a previous run instead of fetching
    #[arg(long, conflicts_with = "records")]
    pub articles: Option<PathBuf>,

    /// Re-render records saved by a previous run
    #[arg(long)]
    pub records: Option<PathBuf>,

    /// API key of the text-analysis service
    #[arg(long, env = "LLM_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Model name of the text-analysis service
    #[arg(long, env = "LLM_MODEL")]
    pub model: Option<String>,

    /// Base URL of an OpenAI-compatible API
    #[arg(long, env = "LLM_BASE_URL")]
    pub base_url: Option<String>,
}
