//! Per-site strategy table.
//!
//! A [`SiteProfile`] lists every selector, keyword and URL convention that
//! differs between shops. [`Site`] is the compiled form the parser and
//! crawler work with.

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use scraper::Selector;
use serde::Deserialize;
use url::Url;

use crate::parser::classify::{Classifier, FilterPolicy};
use crate::parser::text::Boilerplate;
use crate::urls::{normalize_link, normalize_listing};

/// How listing page N is addressed when no "next" link is found.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", content = "key", rename_all = "snake_case")]
pub enum PageScheme {
    /// `<category>_s<N>`
    PathSuffix(String),
    /// `<category>?<key>=<N>`
    Query(String),
}

impl PageScheme {
    /// Page 1 is always the bare category URL.
    pub fn page_url(&self, category: &str, page: u32) -> String {
        if page <= 1 {
            return category.to_string();
        }
        match self {
            PageScheme::PathSuffix(suffix) => format!("{category}{suffix}{page}"),
            PageScheme::Query(key) => {
                let sep = if category.contains('?') { '&' } else { '?' };
                format!("{category}{sep}{key}={page}")
            }
        }
    }

    /// Query parameter holding the page number, if pages are addressed that way.
    pub fn page_key(&self) -> Option<&str> {
        match self {
            PageScheme::PathSuffix(_) => None,
            PageScheme::Query(key) => Some(key),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SiteProfile {
    pub name: String,
    pub base_url: String,
    pub category_url: String,
    pub pagination: PageScheme,
    pub stop_on_empty_listing: bool,
    pub filter: FilterPolicy,
    /// Last listing page crawled when the caller gives no end page.
    pub default_end_page: u32,

    /// Priority order; the first selector with a match wins.
    pub next_selectors: Vec<String>,
    pub content_selector: Option<String>,
    /// Blocks removed from the listing before link search.
    pub strip_selectors: Vec<String>,
    pub item_selectors: Vec<String>,
    /// Fallbacks when an item has no anchor around an image.
    pub anchor_selectors: Vec<String>,
    /// Regex over the URL path; matches are not products.
    pub excluded_paths: Option<String>,

    /// Group selector, first match in document order.
    pub title_selector: String,
    pub brand_selectors: Vec<String>,
    pub breadcrumb_selector: String,
    pub description_selector: String,
    pub promo_phrases: Vec<String>,
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self {
            name: String::new(),
            base_url: String::new(),
            category_url: String::new(),
            pagination: PageScheme::Query("p".into()),
            stop_on_empty_listing: false,
            filter: FilterPolicy::Unfiltered,
            default_end_page: 30,
            next_selectors: strings(&[
                r#"a[rel="next"]"#,
                "a.next",
                ".pagination a.next",
                ".pager a.next",
                "li.next a",
                r#"a[aria-label="Next"]"#,
                r#"a[title*="Weiter"]"#,
                r#"a[title*="weiter"]"#,
            ]),
            content_selector: None,
            strip_selectors: Vec::new(),
            item_selectors: strings(&[".product--box", ".product"]),
            anchor_selectors: strings(&[
                "a[href].product--title",
                "a[href].product-link",
                "a[href].product-name",
                "a[href].product--info",
                "a[href]",
            ]),
            excluded_paths: None,
            title_selector: "h1, .product--title, .product-name, .page-title".into(),
            brand_selectors: strings(&[
                r#"[itemprop="brand"]"#,
                ".product--manufacturer a",
                ".product--supplier a",
                r#"a[class*="brand"]"#,
                ".manufacturer a",
                ".hersteller a",
            ]),
            breadcrumb_selector: ".breadcrumb a, .breadcrumbs a, nav.breadcrumb a, nav a".into(),
            description_selector:
                ".product--description, .description, #description, .product-description, .short-description"
                    .into(),
            promo_phrases: Vec::new(),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub const BUILTIN: &[&str] = &["rauchland", "shisha-world"];

/// Built-in profiles for the shops the crawler was written against.
pub fn builtin(name: &str) -> Option<SiteProfile> {
    match name {
        "rauchland" => Some(SiteProfile {
            name: "rauchland".into(),
            base_url: "https://rauchland.de".into(),
            category_url: "https://rauchland.de/Shisha-Tabak".into(),
            pagination: PageScheme::PathSuffix("_s".into()),
            stop_on_empty_listing: false,
            filter: FilterPolicy::Unfiltered,
            default_end_page: 97,
            content_selector: Some("div#content".into()),
            strip_selectors: strings(&["ul.flx-ac.flx-jc.blanklist.flx-w"]),
            item_selectors: strings(&[".col-12"]),
            excluded_paths: Some(
                r"(?i)/Shisha-Tabak\b|/Tabak\b|/Tobacco\b|Pods?|Vapes?|Zubehoer|Zubehör|Kategorie|_s\d+$"
                    .into(),
            ),
            promo_phrases: strings(&["rauchland", "shisha tabak", "perfekten genuss", "riesenauswahl"]),
            ..SiteProfile::default()
        }),
        "shisha-world" => Some(SiteProfile {
            name: "shisha-world".into(),
            base_url: "https://www.shisha-world.com".into(),
            category_url: "https://www.shisha-world.com/shisha-tabak-200g".into(),
            pagination: PageScheme::Query("p".into()),
            stop_on_empty_listing: true,
            filter: FilterPolicy::StrictAttributeMatch { grams: 200 },
            default_end_page: 30,
            promo_phrases: strings(&["shisha-world", "shisha world"]),
            ..SiteProfile::default()
        }),
        _ => None,
    }
}

/// A profile with every selector and pattern compiled.
#[derive(Debug)]
pub struct Site {
    pub name: String,
    pub base: Url,
    pub category: String,
    pub pagination: PageScheme,
    pub stop_on_empty_listing: bool,
    pub classifier: Classifier,
    pub boilerplate: Boilerplate,
    pub next: Vec<Selector>,
    pub content: Option<Selector>,
    pub strip: Vec<Selector>,
    pub items: Vec<Selector>,
    pub anchors: Vec<Selector>,
    pub excluded_paths: Option<Regex>,
    pub title: Selector,
    pub brand: Vec<Selector>,
    pub breadcrumbs: Selector,
    pub description: Selector,
}

impl Site {
    pub fn compile(profile: &SiteProfile) -> Result<Self> {
        let base = Url::parse(&profile.base_url)
            .with_context(|| format!("site {}: invalid base_url {:?}", profile.name, profile.base_url))?;
        Url::parse(&profile.category_url).with_context(|| {
            format!("site {}: invalid category_url {:?}", profile.name, profile.category_url)
        })?;
        let excluded_paths = profile
            .excluded_paths
            .as_deref()
            .map(Regex::new)
            .transpose()
            .with_context(|| format!("site {}: invalid excluded_paths", profile.name))?;

        Ok(Self {
            name: profile.name.clone(),
            base,
            category: profile.category_url.trim_end_matches('/').to_string(),
            pagination: profile.pagination.clone(),
            stop_on_empty_listing: profile.stop_on_empty_listing,
            classifier: Classifier::new(profile.filter)?,
            boilerplate: Boilerplate::new(&profile.promo_phrases),
            next: compile_all(&profile.next_selectors)?,
            content: profile.content_selector.as_deref().map(compile).transpose()?,
            strip: compile_all(&profile.strip_selectors)?,
            items: compile_all(&profile.item_selectors)?,
            anchors: compile_all(&profile.anchor_selectors)?,
            excluded_paths,
            title: compile(&profile.title_selector)?,
            brand: compile_all(&profile.brand_selectors)?,
            breadcrumbs: compile(&profile.breadcrumb_selector)?,
            description: compile(&profile.description_selector)?,
        })
    }

    pub fn page_url(&self, page: u32) -> String {
        self.pagination.page_url(&self.category, page)
    }

    /// Visited-set key of a listing URL. `<category>_s1` and `?p=1` are the
    /// category page itself.
    pub fn listing_key(&self, raw: &str) -> String {
        let key = normalize_listing(raw, self.pagination.page_key());
        if let PageScheme::PathSuffix(suffix) = &self.pagination {
            let category = normalize_link(&self.category);
            if key == format!("{category}{suffix}1") {
                return category;
            }
        }
        key
    }

    /// Does `url` live on this site?
    pub fn owns(&self, url: &Url) -> bool {
        crate::urls::same_origin(&self.base, url)
    }
}

fn compile(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| anyhow!("invalid selector {selector:?}: {e}"))
}

fn compile_all(selectors: &[String]) -> Result<Vec<Selector>> {
    selectors.iter().map(|s| compile(s)).collect()
}
