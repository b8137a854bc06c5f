mod crawl;
mod error;
mod fetch;
mod output;
mod parser;
mod settings;
mod sites;
mod urls;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use scraper::Html;
use tracing::{info, warn};
use url::Url;

use crawl::dedup::Dedup;
use crawl::{CrawlOptions, CrawlSummary};
use error::ProductSkip;
use fetch::{HttpFetcher, PageSource};
use output::JsonlWriter;
use parser::classify::FilterPolicy;
use settings::Settings;
use sites::{Site, SiteProfile};

#[derive(Parser)]
#[command(name = "tabak_scraper", about = "Shisha tobacco catalog scraper (JSONL output)")]
struct Cli {
    /// Debug output for this crate
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Settings file (default: tabak_scraper.toml, if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk a shop's tobacco category and append new products to the output file
    Crawl {
        #[arg(long, default_value = "rauchland")]
        site: String,
        /// First listing page
        #[arg(long, default_value_t = 1)]
        start: u32,
        /// Last listing page (default: per site)
        #[arg(long)]
        end: Option<u32>,
        /// Output JSONL file, also used as a dedup seed
        #[arg(long)]
        out: Option<PathBuf>,
        /// Seconds between requests
        #[arg(long)]
        delay: Option<f64>,
        /// Concurrent product fetches
        #[arg(long)]
        workers: Option<usize>,
        /// Only write products with a flavor
        #[arg(long)]
        require_flavor: bool,
        /// Prior output whose products are not written again (repeatable)
        #[arg(long = "seed")]
        seeds: Vec<PathBuf>,
        /// Override the site's product filter
        #[arg(long, value_enum)]
        filter: Option<FilterArg>,
        /// Package size in grams for the strict filter
        #[arg(long)]
        target: Option<u32>,
    },
    /// Extract a single product page and print its record
    Product {
        url: String,
        /// Site profile (default: inferred from the URL)
        #[arg(long)]
        site: Option<String>,
    },
    /// Show the product links and next page found on a listing page
    Links {
        url: String,
        #[arg(long)]
        site: Option<String>,
    },
    /// List known site profiles
    Sites,
}

#[derive(Clone, Copy, ValueEnum)]
enum FilterArg {
    Unfiltered,
    Strict,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let t0 = Instant::now();
    let mut settings = Settings::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Crawl {
            site,
            start,
            end,
            out,
            delay,
            workers,
            require_flavor,
            seeds,
            filter,
            target,
        } => {
            if let Some(out) = out {
                settings.output = out;
            }
            if let Some(delay) = delay {
                settings.delay_secs = delay;
            }
            if let Some(workers) = workers {
                settings.workers = workers;
            }
            settings.require_flavor |= require_flavor;
            settings.seeds.extend(seeds);
            settings.validate()?;

            let mut profile = settings.site(&site)?;
            apply_filter(&mut profile, filter, target);
            let end = end.unwrap_or(profile.default_end_page);
            if end < start {
                bail!("end page {end} is before start page {start}");
            }
            let site = Arc::new(Site::compile(&profile)?);
            crawl_site(&settings, site, start, end).await
        }
        Commands::Product { url, site } => {
            settings.validate()?;
            let site = site_for(&settings, &url, site.as_deref())?;
            let fetcher = HttpFetcher::new(&settings.fetch_policy()?)?;
            let body = fetcher.fetch(&url).await?;
            match parser::extract_product(&site, &url, &body) {
                Ok(record) => println!("{}", serde_json::to_string(&record)?),
                Err(ProductSkip::Rejected(evidence)) => println!("rejected: {evidence}"),
                Err(e) => return Err(e.into()),
            }
            Ok(())
        }
        Commands::Links { url, site } => {
            settings.validate()?;
            let site = site_for(&settings, &url, site.as_deref())?;
            let base = Url::parse(&url).with_context(|| format!("invalid url {url}"))?;
            let fetcher = HttpFetcher::new(&settings.fetch_policy()?)?;
            let body = fetcher.fetch(&url).await?;
            let html = Html::parse_document(&body);
            let found = parser::links::discover(&html, &base, &site);
            for link in &found {
                println!("{link}");
            }
            match parser::links::find_next_href(&html, &site)
                .and_then(|href| urls::resolve(&base, &href))
            {
                Some(next) => println!("\n{} links, next page: {next}", found.len()),
                None => println!(
                    "\n{} links, no next link (walker falls back to page numbers)",
                    found.len()
                ),
            }
            Ok(())
        }
        Commands::Sites => {
            println!("{:<16} | {:<8} | {:<10} | {}", "Site", "Filter", "Pages", "Category");
            println!("{}", "-".repeat(80));
            for name in settings.site_names() {
                let profile = settings.site(&name)?;
                let filter = match profile.filter {
                    FilterPolicy::Unfiltered => "all".to_string(),
                    FilterPolicy::StrictAttributeMatch { grams } => format!("{grams}g"),
                };
                println!(
                    "{:<16} | {:<8} | {:<10} | {}",
                    truncate(&name, 16),
                    filter,
                    format!("1-{}", profile.default_end_page),
                    truncate(&profile.category_url, 48)
                );
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "tabak_scraper=debug,info" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()),
        )
        .with_target(false)
        .init();
}

async fn crawl_site(settings: &Settings, site: Arc<Site>, start: u32, end: u32) -> Result<()> {
    let mut dedup = Dedup::new(settings.require_flavor);
    let mut seeds = settings.seeds.clone();
    if settings.output.exists() {
        seeds.push(settings.output.clone());
    }
    for seed in &seeds {
        match dedup.seed_from_path(seed) {
            Ok(n) => info!("seeded {n} products from {}", seed.display()),
            Err(e) => warn!("ignoring seed: {e:#}"),
        }
    }

    // open before the first request so an unwritable path fails fast
    let mut sink = JsonlWriter::append(&settings.output)?;
    let fetcher = Arc::new(HttpFetcher::new(&settings.fetch_policy()?)?);

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, finishing the current page");
                cancel.store(true, Ordering::Relaxed);
            }
        });
    }

    println!(
        "Crawling {} pages {start}-{end} ({} workers, {:.1}s delay, {} known products)...",
        site.name,
        settings.workers,
        settings.delay_secs,
        dedup.len()
    );
    let opts = CrawlOptions {
        start,
        end,
        workers: settings.workers,
    };
    let summary = crawl::run(fetcher, site, &opts, &mut dedup, &mut sink, cancel).await?;
    print_summary(&summary, settings);
    Ok(())
}

fn apply_filter(profile: &mut SiteProfile, filter: Option<FilterArg>, target: Option<u32>) {
    let current = match profile.filter {
        FilterPolicy::StrictAttributeMatch { grams } => Some(grams),
        FilterPolicy::Unfiltered => None,
    };
    profile.filter = match (filter, target) {
        (Some(FilterArg::Unfiltered), _) => FilterPolicy::Unfiltered,
        (Some(FilterArg::Strict), t) => FilterPolicy::StrictAttributeMatch {
            grams: t.or(current).unwrap_or(200),
        },
        (None, Some(t)) if current.is_some() => FilterPolicy::StrictAttributeMatch { grams: t },
        (None, _) => profile.filter,
    };
}

/// Named profile, or the first one whose origin matches `url`.
fn site_for(settings: &Settings, url: &str, name: Option<&str>) -> Result<Site> {
    if let Some(name) = name {
        return Site::compile(&settings.site(name)?);
    }
    let parsed = Url::parse(url).with_context(|| format!("invalid url {url}"))?;
    for name in settings.site_names() {
        let site = Site::compile(&settings.site(&name)?)?;
        if site.owns(&parsed) {
            return Ok(site);
        }
    }
    bail!("no site profile for {url}; pass --site")
}

fn print_summary(s: &CrawlSummary, settings: &Settings) {
    if s.interrupted {
        println!("Interrupted; output is complete up to the last record.");
    }
    println!(
        "Listing pages: {} | links: {} | duplicates: {} | rejected: {} | no flavor: {} | failed: {}",
        s.listing_pages, s.links, s.duplicates, s.rejected, s.missing_flavor, s.failed
    );
    println!("Saved {} products to {}", s.written, settings.output.display());
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
