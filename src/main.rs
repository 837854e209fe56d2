//! # News Digest
//!
//! Collects the articles that a set of sites published within a date
//! window, runs them through an OpenAI-compatible model in small batches for
//! summaries, key persons, locations and story angles, and renders the
//! result as a Markdown digest.
//!
//! ## Features
//!
//! - Feed (RSS 2.0 / Atom) and homepage-crawl sources, with proxy to direct
//!   network fallback and backoff on transient HTTP errors
//! - Three-tier on-disk TTL cache: feeds (1 h), pages (6 h) and analysis
//!   results (7 days)
//! - Batched analysis that degrades to fallback records instead of dropping
//!   articles
//! - JSON artifacts for replaying a run without the network
//!
//! ## Usage
//!
//! ```sh
//! LLM_API_KEY=... LLM_MODEL=gpt-4o-mini news_digest --config digest.yaml
//! ```
//!
//! ## Architecture
//!
//! The application follows a pipeline architecture:
//! 1. **Housekeeping**: sweep expired cache entries
//! 2. **Fetching**: one task per source on a pool of 3
//! 3. **Normalizing**: clean text, drop duplicates and thin articles
//! 4. **Enriching**: batches of 3 on a pool of 10, one record per article
//! 5. **Output**: JSON artifacts, the Markdown report, optional publishing

use chrono::Local;
use clap::Parser;
use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod cache;
mod cli;
mod config;
mod content;
mod enrichment;
mod error;
mod models;
mod orchestrator;
mod outputs;
mod pipeline;
mod publish;
mod scrapers;
mod utils;

use api::ChatCompletionsService;
use cache::CacheStore;
use cli::Cli;
use config::{NewsConfig, ServiceCredentials};
use models::DateWindow;
use outputs::json::{self, RunPaths};
use outputs::report::{RenderConfig, decode_records, render_report};
use pipeline::Pipeline;
use publish::DisabledPublisher;
use scrapers::{HttpTransport, RetryPolicy, RetryTransport};
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("news_digest starting up");

    let args = Cli::parse();
    debug!(days = args.days, output_dir = %args.output_dir, "Parsed CLI arguments");

    // ---- Configuration (fatal on error) ----
    let mut config = match &args.config {
        Some(path) => NewsConfig::load(path)?,
        None => NewsConfig::default(),
    };
    if let Some(sites) = &args.sites {
        config.extend_sites(sites);
    }
    if let Some(feeds) = &args.feeds {
        config.extend_feeds(feeds);
    }
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }
    let config = Arc::new(config);

    let window = DateWindow::days_back(Local::now().date_naive(), args.days);
    info!(start = %window.start, end = %window.end, "Date window");

    // Early check: ensure output dir is writable
    if let Err(e) = ensure_writable_dir(&args.output_dir).await {
        error!(
            path = %args.output_dir,
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }
    let paths = RunPaths::new(&args.output_dir, window);

    // ---- Re-render only ----
    if let Some(records_path) = &args.records {
        let records = decode_records(json::read_record_values(records_path).await?);
        let report = render_report(&records, &RenderConfig::from(&*config), chrono::Utc::now());
        if report.is_empty() {
            warn!("No records to render");
        } else {
            json::write_report(&report, &paths.report).await?;
        }
        return Ok(());
    }

    // ---- Collaborators (fatal on error, before any work) ----
    let credentials = match ServiceCredentials::from_parts(
        args.api_key.clone(),
        args.model.clone(),
        args.base_url.clone(),
    ) {
        Ok(credentials) => credentials,
        Err(e) => {
            error!(error = %e, "Analysis service is not configured");
            return Err(e.into());
        }
    };
    let service = ChatCompletionsService::new(&credentials, config.service_timeout())?;
    let transport = RetryTransport::new(
        HttpTransport::new(config.proxy.as_deref())?,
        RetryPolicy::default(),
    );
    info!(model = %credentials.model, endpoint = %service.endpoint(), "Analysis service ready");

    let replay = match &args.articles {
        Some(path) => Some(json::read_articles(path).await?),
        None => None,
    };

    // ---- Run ----
    let cache = Arc::new(CacheStore::open(&config.cache_dir));
    let pipeline = Pipeline::new(
        Arc::clone(&config),
        cache,
        transport,
        service,
        DisabledPublisher,
    );
    let outcome = pipeline.run(window, replay).await;

    // ---- Outputs ----
    write_or_log(json::write_json(&outcome.articles, &paths.articles).await, &paths.articles);
    write_or_log(json::write_json(&outcome.records, &paths.records).await, &paths.records);
    match &outcome.report {
        Some(report) => write_or_log(json::write_report(report, &paths.report).await, &paths.report),
        None => warn!("Run produced no report"),
    }

    let fallbacks = outcome.records.iter().filter(|r| r.is_fallback()).count();
    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        title = %outcome.title,
        articles = outcome.articles.len(),
        records = outcome.records.len(),
        fallbacks,
        "Execution complete"
    );

    Ok(())
}

/// Output write failures are logged; the run itself already succeeded.
fn write_or_log(result: Result<(), Box<dyn Error>>, path: &Path) {
    if let Err(e) = result {
        error!(path = %path.display(), error = %e, "Failed to write output");
    }
}
