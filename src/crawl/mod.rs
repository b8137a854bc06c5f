pub mod dedup;
pub mod pagination;

use std::collections::HashSet;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use scraper::Html;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{FetchError, ProductSkip};
use crate::fetch::PageSource;
use crate::output::{JsonlWriter, ProductRecord};
use crate::parser::{extract_product, links};
use crate::sites::Site;
use dedup::{Admission, Dedup};
use pagination::PageWalker;

pub struct CrawlOptions {
    pub start: u32,
    pub end: u32,
    pub workers: usize,
}

/// Counts reported at the end of a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CrawlSummary {
    pub listing_pages: usize,
    pub links: usize,
    pub written: usize,
    pub duplicates: usize,
    pub missing_flavor: usize,
    pub rejected: usize,
    pub failed: usize,
    pub interrupted: bool,
}

type Fetched = (String, Result<String, FetchError>);

/// Walk the category of `site`, writing every new product to `sink`.
///
/// Product and listing failures are logged and skipped. Only a sink write
/// error ends the run early.
pub async fn run<S: PageSource, W: Write>(
    source: Arc<S>,
    site: Arc<Site>,
    opts: &CrawlOptions,
    dedup: &mut Dedup,
    sink: &mut JsonlWriter<W>,
    cancel: Arc<AtomicBool>,
) -> Result<CrawlSummary> {
    let mut summary = CrawlSummary::default();
    let mut walker = PageWalker::new(&site, opts.start, opts.end);
    let mut next = walker.begin();

    while let Some(listing_url) = next.take() {
        if cancel.load(Ordering::Relaxed) {
            summary.interrupted = true;
            break;
        }
        summary.listing_pages += 1;
        debug!("fetching listing page {}: {listing_url}", walker.page());

        let body = match source.fetch(&listing_url).await {
            Ok(body) => body,
            Err(e) => {
                warn!("FAIL listing {listing_url}: {e}");
                walker.fetch_failed();
                break;
            }
        };

        // Html is !Send; keep it out of the awaits below
        let (product_links, follow) = {
            let html = Html::parse_document(&body);
            let found = match Url::parse(&listing_url) {
                Ok(base) => links::discover(&html, &base, &site),
                Err(_) => Vec::new(),
            };
            (found, walker.advance(&html))
        };

        if product_links.is_empty() {
            if site.stop_on_empty_listing {
                info!("{listing_url}: no products, stopping");
                break;
            }
            warn!("{listing_url}: no products, skipping page");
            next = follow;
            continue;
        }
        info!("{listing_url} -> {} links", product_links.len());

        let mut seen_on_page = HashSet::new();
        let fresh: Vec<String> = product_links
            .into_iter()
            .filter(|link| {
                let first = seen_on_page.insert(link.clone());
                if !first {
                    debug!("already seen on page: {link}");
                }
                first
            })
            .collect();
        summary.links += fresh.len();

        let fetched = fetch_all(&source, fresh, opts.workers, &cancel).await?;
        let outcomes: Vec<(String, Result<ProductRecord, ProductSkip>)> = fetched
            .into_par_iter()
            .map(|(link, body)| {
                let outcome = body
                    .map_err(ProductSkip::from)
                    .and_then(|body| extract_product(&site, &link, &body));
                (link, outcome)
            })
            .collect();

        for (link, outcome) in outcomes {
            write_outcome(&link, outcome, dedup, sink, &mut summary)?;
        }
        debug!("{} keys known, {} written", dedup.len(), summary.written);

        if cancel.load(Ordering::Relaxed) {
            summary.interrupted = true;
            break;
        }
        next = follow;
    }

    debug!("walker finished in state {:?}", walker.state());
    Ok(summary)
}

fn write_outcome<W: Write>(
    link: &str,
    outcome: Result<ProductRecord, ProductSkip>,
    dedup: &mut Dedup,
    sink: &mut JsonlWriter<W>,
    summary: &mut CrawlSummary,
) -> Result<()> {
    match outcome {
        Ok(record) => match dedup.admit(&record) {
            Admission::Accepted => {
                sink.write(&record)?;
                summary.written += 1;
                info!("OK {} - {}", record.manufacturer, record.name);
            }
            Admission::Duplicate => {
                summary.duplicates += 1;
                debug!("SKIP duplicate {} - {}", record.manufacturer, record.name);
            }
            Admission::MissingFlavor => {
                summary.missing_flavor += 1;
                info!("SKIP {} - {} (no flavor)", record.manufacturer, record.name);
            }
        },
        Err(ProductSkip::Rejected(evidence)) => {
            summary.rejected += 1;
            info!("SKIP {link}: {evidence}");
        }
        Err(ProductSkip::Fetch(e)) => {
            summary.failed += 1;
            warn!("FAIL {link}: {e}");
        }
    }
    Ok(())
}

/// Fetch `links` with at most `workers` requests in flight. Results come
/// back sorted by link so output order does not depend on timing.
async fn fetch_all<S: PageSource>(
    source: &Arc<S>,
    links: Vec<String>,
    workers: usize,
    cancel: &Arc<AtomicBool>,
) -> Result<Vec<Fetched>> {
    let workers = workers.max(1);
    let semaphore = Arc::new(Semaphore::new(workers));

    let pb = ProgressBar::new(links.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let (tx, mut rx) = mpsc::channel::<Fetched>(workers * 2);
    for link in links {
        let source = Arc::clone(source);
        let sem = Arc::clone(&semaphore);
        let cancel = Arc::clone(cancel);
        let tx = tx.clone();

        tokio::spawn(async move {
            let Ok(_permit) = sem.acquire().await else {
                return;
            };
            if cancel.load(Ordering::Relaxed) {
                return;
            }
            let result = source.fetch(&link).await;
            let _ = tx.send((link, result)).await;
        });
    }
    drop(tx);

    let mut out = Vec::new();
    while let Some(item) = rx.recv().await {
        out.push(item);
        pb.inc(1);
    }
    pb.finish_and_clear();

    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::sites::builtin;

    struct FakeSource {
        pages: HashMap<String, String>,
    }

    impl FakeSource {
        fn new(pages: &[(&str, String)]) -> Arc<Self> {
            Arc::new(Self {
                pages: pages.iter().map(|(u, b)| (u.to_string(), b.clone())).collect(),
            })
        }
    }

    impl PageSource for FakeSource {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            self.pages.get(url).cloned().ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
        }
    }

    fn listing(slugs: &[&str]) -> String {
        let items: String = slugs
            .iter()
            .map(|s| format!(r#"<div class="col-12"><a href="/{s}">{}</a></div>"#, s.replace('-', " ")))
            .collect();
        format!(r#"<html><body><div id="content">{items}</div></body></html>"#)
    }

    fn product(title: &str, flavor: &str) -> String {
        format!("<html><body><h1>{title}</h1><dl><dt>Geschmack</dt><dd>{flavor}</dd></dl></body></html>")
    }

    fn rauchland() -> Arc<Site> {
        Arc::new(Site::compile(&builtin("rauchland").unwrap()).unwrap())
    }

    fn options(end: u32) -> CrawlOptions {
        CrawlOptions {
            start: 1,
            end,
            workers: 2,
        }
    }

    async fn crawl(
        source: Arc<FakeSource>,
        site: Arc<Site>,
        end: u32,
        dedup: &mut Dedup,
    ) -> (CrawlSummary, Vec<serde_json::Value>) {
        let mut sink = JsonlWriter::new(Vec::new());
        let cancel = Arc::new(AtomicBool::new(false));
        let summary = run(source, site, &options(end), dedup, &mut sink, cancel)
            .await
            .unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        (summary, lines)
    }

    #[tokio::test]
    async fn repeated_link_across_pages_is_written_once() {
        let source = FakeSource::new(&[
            ("https://rauchland.de/Shisha-Tabak", listing(&["Adalya-Love-66", "Holster-Grape-Mint"])),
            ("https://rauchland.de/Shisha-Tabak_s2", listing(&["Holster-Grape-Mint", "Musthave-Pinkman"])),
            ("https://rauchland.de/Adalya-Love-66", product("Adalya Tabak Love 66 200g", "Maracuja, Melone")),
            ("https://rauchland.de/Holster-Grape-Mint", product("Holster Tabak Grape Mint 200g", "Traube, Minze")),
            ("https://rauchland.de/Musthave-Pinkman", product("Musthave Tabak Pinkman 200g", "Grapefruit")),
        ]);
        let mut dedup = Dedup::new(false);
        let (summary, lines) = crawl(source, rauchland(), 2, &mut dedup).await;

        assert_eq!(summary.listing_pages, 2);
        assert_eq!(summary.written, 3);
        assert_eq!(summary.duplicates, 1);
        let names: Vec<_> = lines.iter().map(|l| l["name"].as_str().unwrap()).collect();
        assert_eq!(
            names,
            vec![
                "Adalya Tabak Love 66",
                "Holster Tabak Grape Mint",
                "Musthave Tabak Pinkman",
            ]
        );
        assert_eq!(lines[0]["flavor"], "Maracuja,Melone");
        assert_eq!(lines[1]["manufacturer"]["name"], "Holster");
    }

    #[tokio::test]
    async fn failures_are_local() {
        let source = FakeSource::new(&[
            ("https://rauchland.de/Shisha-Tabak", listing(&["Adalya-Love-66", "Gone-Product"])),
            ("https://rauchland.de/Adalya-Love-66", product("Adalya Tabak Love 66 200g", "Maracuja")),
        ]);
        let mut dedup = Dedup::new(false);
        // page 2 is missing: the walk ends there without an error
        let (summary, lines) = crawl(source, rauchland(), 5, &mut dedup).await;
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.written, 1);
        assert_eq!(summary.listing_pages, 2);
        assert_eq!(lines.len(), 1);
    }

    #[tokio::test]
    async fn seeded_and_flavorless_records_are_skipped() {
        let source = FakeSource::new(&[
            ("https://rauchland.de/Shisha-Tabak", listing(&["Adalya-Love-66", "Holster-Grape-Mint"])),
            ("https://rauchland.de/Adalya-Love-66", product("Adalya Tabak Love 66 200g", "Maracuja")),
            ("https://rauchland.de/Holster-Grape-Mint", "<h1>Holster Tabak Grape Mint</h1>".to_string()),
        ]);
        let mut dedup = Dedup::new(true);
        let seed = r#"{"name":"Adalya Tabak Love 66","flavor":"","manufacturer":{"name":"Adalya"}}"#;
        dedup.seed_from_reader(seed.as_bytes());
        let (summary, lines) = crawl(source, rauchland(), 1, &mut dedup).await;
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.missing_flavor, 1);
        assert!(lines.is_empty());
    }

    #[tokio::test]
    async fn strict_site_stops_on_empty_listing() {
        let site = Arc::new(Site::compile(&builtin("shisha-world").unwrap()).unwrap());
        let first = r#"<div class="product--box"><a class="product--title" href="/nameless-808-pina-lada">Nameless 808</a></div>
                       <div class="product--box"><a class="product--title" href="/nameless-808-pina-lada-25g">Nameless 808 25g</a></div>"#;
        let source = FakeSource::new(&[
            ("https://www.shisha-world.com/shisha-tabak-200g", first.to_string()),
            ("https://www.shisha-world.com/shisha-tabak-200g?p=2", "<p>Keine Artikel</p>".to_string()),
            (
                "https://www.shisha-world.com/nameless-808-pina-lada",
                product("Nameless Tabak #808 P!NA &amp; LADA - 200g", "Ananas, Kokos"),
            ),
            (
                "https://www.shisha-world.com/nameless-808-pina-lada-25g",
                product("Nameless Tabak #808 P!NA &amp; LADA - 25g", "Ananas, Kokos"),
            ),
        ]);
        let mut dedup = Dedup::new(false);
        let (summary, lines) = crawl(source, site, 10, &mut dedup).await;
        assert_eq!(summary.listing_pages, 2);
        assert_eq!(summary.rejected, 1);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["name"], "Nameless Tabak #808 P!NA & LADA");
    }

    #[tokio::test]
    async fn cancelled_run_writes_nothing() {
        let source = FakeSource::new(&[(
            "https://rauchland.de/Shisha-Tabak",
            listing(&["Adalya-Love-66"]),
        )]);
        let mut sink = JsonlWriter::new(Vec::new());
        let mut dedup = Dedup::new(false);
        let cancel = Arc::new(AtomicBool::new(true));
        let summary = run(source, rauchland(), &options(3), &mut dedup, &mut sink, cancel)
            .await
            .unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.listing_pages, 0);
        assert_eq!(sink.written(), 0);
    }

    /// Serves `pages`, raising `cancel` as soon as a product page is requested.
    struct InterruptingSource {
        pages: HashMap<String, String>,
        cancel: Arc<AtomicBool>,
    }

    impl PageSource for InterruptingSource {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            if !url.contains("/Shisha-Tabak") {
                self.cancel.store(true, Ordering::Relaxed);
            }
            self.pages.get(url).cloned().ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
        }
    }

    #[tokio::test]
    async fn interrupt_during_product_fetches_leaves_whole_lines() {
        let cancel = Arc::new(AtomicBool::new(false));
        let pages = [
            ("https://rauchland.de/Shisha-Tabak", listing(&["Adalya-Love-66", "Holster-Grape-Mint"])),
            ("https://rauchland.de/Shisha-Tabak_s2", listing(&["Musthave-Pinkman"])),
            ("https://rauchland.de/Adalya-Love-66", product("Adalya Tabak Love 66 200g", "Maracuja")),
            ("https://rauchland.de/Holster-Grape-Mint", product("Holster Tabak Grape Mint 200g", "Traube")),
            ("https://rauchland.de/Musthave-Pinkman", product("Musthave Tabak Pinkman 200g", "Grapefruit")),
        ];
        let source = Arc::new(InterruptingSource {
            pages: pages.iter().map(|(u, b)| (u.to_string(), b.clone())).collect(),
            cancel: Arc::clone(&cancel),
        });
        let opts = CrawlOptions {
            start: 1,
            end: 2,
            workers: 1,
        };
        let mut sink = JsonlWriter::new(Vec::new());
        let mut dedup = Dedup::new(false);
        let summary = run(source, rauchland(), &opts, &mut dedup, &mut sink, cancel)
            .await
            .unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.listing_pages, 1);
        assert_eq!(summary.written, 1);

        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert!(text.ends_with('\n'));
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0]["name"].is_string());
    }
}
