use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::element_text;
use super::text::{
    is_numeric_only, is_placeholder, normalize, split_components, FIELD_LABEL_COLON_RE,
};
use crate::sites::Site;

static FLAVOR_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:Geschmack|Aroma|Flavou?r)\b").unwrap());
static INLINE_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:Geschmack|Aroma|Flavou?r)\s*:\s*").unwrap());
static PHRASE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:schmeckt\s+nach|tastes\s+like)\s*:?\s*").unwrap());
static SENTENCE_END_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!\n\r]").unwrap());

static DT: LazyLock<Selector> = LazyLock::new(|| Selector::parse("dt").unwrap());
static TR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").unwrap());
static TH: LazyLock<Selector> = LazyLock::new(|| Selector::parse("th").unwrap());
static TD: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").unwrap());

/// Which strategy produced the flavor list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlavorSource {
    DefinitionList,
    TableRow,
    InlineLabel,
    Phrase,
    Description,
}

impl fmt::Display for FlavorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlavorSource::DefinitionList => "dt/dd",
            FlavorSource::TableRow => "th/td",
            FlavorSource::InlineLabel => "inline label",
            FlavorSource::Phrase => "phrase",
            FlavorSource::Description => "description",
        };
        f.write_str(s)
    }
}

/// Flavor cascade. The first tier yielding at least one component wins.
pub fn resolve_with_source(
    html: &Html,
    page_text: &str,
    site: &Site,
) -> Option<(FlavorSource, Vec<String>)> {
    let parse = |raw: &str| split_components(&site.boilerplate.strip(raw));
    let mut labeled = false;

    for dt in html.select(&DT) {
        if !FLAVOR_LABEL_RE.is_match(&element_text(dt)) {
            continue;
        }
        labeled = true;
        let Some(dd) = next_sibling_named(dt, "dd") else {
            continue;
        };
        let flavors = parse(&element_text(dd));
        if !flavors.is_empty() {
            return Some((FlavorSource::DefinitionList, flavors));
        }
    }

    for row in html.select(&TR) {
        let (Some(th), Some(td)) = (row.select(&TH).next(), row.select(&TD).next()) else {
            continue;
        };
        if !FLAVOR_LABEL_RE.is_match(&element_text(th)) {
            continue;
        }
        labeled = true;
        let flavors = parse(&element_text(td));
        if !flavors.is_empty() {
            return Some((FlavorSource::TableRow, flavors));
        }
    }

    let inline = capture_after(&INLINE_LABEL_RE, page_text, false);
    if inline.is_some() {
        labeled = true;
    }
    if let Some(raw) = inline.filter(|raw| is_usable(raw)) {
        let flavors = parse(&raw);
        if !flavors.is_empty() {
            return Some((FlavorSource::InlineLabel, flavors));
        }
    }

    if let Some(raw) = capture_after(&PHRASE_RE, page_text, true).filter(|raw| is_usable(raw)) {
        let flavors = parse(&raw);
        if !flavors.is_empty() {
            return Some((FlavorSource::Phrase, flavors));
        }
    }

    if labeled {
        return None;
    }
    let raw = html.select(&site.description).next().map(element_text)?;
    let flavors = parse(&raw);
    (!flavors.is_empty()).then_some((FlavorSource::Description, flavors))
}

/// Text after the first `label` match, up to the next `Label:` field (or a
/// sentence end when `stop_at_sentence`).
fn capture_after(label: &Regex, text: &str, stop_at_sentence: bool) -> Option<String> {
    let m = label.find(text)?;
    let rest = &text[m.end()..];
    let mut end = FIELD_LABEL_COLON_RE
        .find(rest)
        .map_or(rest.len(), |stop| stop.start());
    if stop_at_sentence {
        if let Some(dot) = SENTENCE_END_RE.find(&rest[..end]) {
            end = dot.start();
        }
    }
    Some(normalize(&rest[..end]))
}

fn is_usable(raw: &str) -> bool {
    !raw.is_empty() && !is_placeholder(raw) && !is_numeric_only(raw)
}

fn next_sibling_named<'a>(el: ElementRef<'a>, name: &str) -> Option<ElementRef<'a>> {
    el.next_siblings()
        .filter_map(ElementRef::wrap)
        .find(|sib| sib.value().name() == name)
}
