use std::sync::LazyLock;

use regex::Regex;
use scraper::Html;

use super::element_text;
use super::text::normalize;
use crate::sites::Site;
use crate::urls::first_path_segment;

static TITLE_BRAND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(.*?)\s+(?:Tabak|Tobacco)\b").unwrap());
static TOBACCO_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)tabak|tobacco").unwrap());
static SLUG_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)-(?:tabak|tobacco)").unwrap());

/// Manufacturer cascade: title, structured fields, breadcrumbs, URL slug,
/// first title word. Empty only when every tier comes up empty.
pub fn resolve(html: &Html, title: &str, url: &str, site: &Site) -> String {
    from_title(title)
        .or_else(|| from_structured(html, site))
        .or_else(|| from_breadcrumbs(html, site))
        .or_else(|| from_url_slug(url))
        .unwrap_or_else(|| first_word(title))
}

/// Everything before "Tabak"/"Tobacco", else the first word of the part
/// before the first hyphen.
pub fn from_title(title: &str) -> Option<String> {
    let t = normalize(title);
    if let Some(caps) = TITLE_BRAND_RE.captures(&t) {
        let brand = normalize(&caps[1]);
        if !brand.is_empty() {
            return Some(brand);
        }
    }
    let head = t.split('-').next().unwrap_or("").trim();
    head.split(' ')
        .next()
        .filter(|w| !w.is_empty())
        .map(str::to_string)
}

fn from_structured(html: &Html, site: &Site) -> Option<String> {
    site.brand.iter().find_map(|sel| {
        let el = html.select(sel).next()?;
        let t = element_text(el);
        let lower = t.to_lowercase();
        (!t.is_empty() && lower != "tabak" && lower != "tobacco").then_some(t)
    })
}

fn from_breadcrumbs(html: &Html, site: &Site) -> Option<String> {
    html.select(&site.breadcrumbs).find_map(|a| {
        let t = element_text(a);
        if !TOBACCO_RE.is_match(&t) {
            return None;
        }
        let stripped = TOBACCO_RE.replace_all(&t, "");
        let stripped = stripped.trim_matches(|c: char| c == ' ' || c == '-');
        (!stripped.is_empty()).then(|| stripped.to_string())
    })
}

fn from_url_slug(url: &str) -> Option<String> {
    let segment = first_path_segment(url)?;
    let segment = SLUG_SUFFIX_RE.replace_all(&segment, "");
    segment
        .split('-')
        .find(|w| !w.is_empty())
        .map(capitalize)
}

fn first_word(title: &str) -> String {
    normalize(title)
        .split(' ')
        .next()
        .unwrap_or_default()
        .to_string()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
