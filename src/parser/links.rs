use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use super::element_text;
use super::text::normalize;
use crate::sites::Site;
use crate::urls::{normalize_link, resolve};

static IMG_IN_ANCHOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href] img").unwrap());
static IMG_ALT: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img[alt]").unwrap());
static ANY_ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static NUMERIC_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+$").unwrap());
static NEXT_TEXT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:next|weiter|mehr)\b|[»›]").unwrap());

/// Candidate product links on a listing page, normalized, deduplicated and sorted.
pub fn discover(html: &Html, listing_url: &Url, site: &Site) -> Vec<String> {
    let region = site
        .content
        .as_ref()
        .and_then(|sel| html.select(sel).next())
        .unwrap_or_else(|| html.root_element());

    let stripped: Vec<ElementRef> = site
        .strip
        .iter()
        .flat_map(|sel| region.select(sel))
        .collect();
    let is_stripped = |el: &ElementRef| inside_any(*el, &stripped);

    let items: Vec<ElementRef> = site
        .items
        .iter()
        .flat_map(|sel| region.select(sel))
        .filter(|item| !is_stripped(item))
        .collect();

    let anchors: Vec<ElementRef> = if items.is_empty() {
        debug!("{listing_url}: no product containers, scanning every anchor");
        region
            .select(&ANY_ANCHOR)
            .filter(|a| !is_stripped(a))
            .collect()
    } else {
        items
            .iter()
            .filter_map(|item| pick_anchor(*item, site, &stripped))
            .collect()
    };

    anchors
        .into_iter()
        .filter_map(|a| accept(a, listing_url, site))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Anchor around an image first, then the site's product-anchor selectors.
fn pick_anchor<'a>(
    item: ElementRef<'a>,
    site: &Site,
    stripped: &[ElementRef],
) -> Option<ElementRef<'a>> {
    let is_stripped = |el: &ElementRef| inside_any(*el, stripped);
    let wrapped_image = item.select(&IMG_IN_ANCHOR).find_map(|img| {
        img.ancestors()
            .filter_map(ElementRef::wrap)
            .find(|a| a.value().name() == "a" && a.value().attr("href").is_some())
            .filter(|a| !is_stripped(a))
    });
    wrapped_image.or_else(|| {
        site.anchors
            .iter()
            .find_map(|sel| item.select(sel).find(|a| !is_stripped(a)))
    })
}

/// Is `el` one of `blocks` or nested inside one?
fn inside_any(el: ElementRef, blocks: &[ElementRef]) -> bool {
    std::iter::once(*el)
        .chain(el.ancestors())
        .any(|node| blocks.iter().any(|b| b.id() == node.id()))
}

/// Structural checks a product URL must pass; returns its normalized form.
fn accept(anchor: ElementRef, listing_url: &Url, site: &Site) -> Option<String> {
    let href = anchor.value().attr("href")?;
    let url = resolve(listing_url, href)?;
    if !site.owns(&url) {
        return None;
    }
    if url.fragment().is_some_and(|f| !f.is_empty()) {
        return None;
    }
    if url.as_str().contains("::") {
        return None;
    }
    let path = url.path();
    if path.matches('/').count() > 2 || !path.contains('-') {
        return None;
    }
    if site.excluded_paths.as_ref().is_some_and(|re| re.is_match(path)) {
        return None;
    }
    let text = anchor_text(anchor);
    if text.is_empty() || NUMERIC_RE.is_match(&text) {
        return None;
    }
    Some(normalize_link(url.as_str()))
}

/// Link text, or the title/alt text when the anchor only wraps an image.
fn anchor_text(anchor: ElementRef) -> String {
    let text = element_text(anchor);
    if !text.is_empty() {
        return text;
    }
    if let Some(title) = anchor.value().attr("title") {
        return normalize(title);
    }
    anchor
        .select(&IMG_ALT)
        .find_map(|img| img.value().attr("alt"))
        .map(normalize)
        .unwrap_or_default()
}

/// href of the listing page's "next" affordance: site selectors first, then
/// link text such as "weiter" or a chevron.
pub fn find_next_href(html: &Html, site: &Site) -> Option<String> {
    let structural = site.next.iter().find_map(|sel| {
        html.select(sel)
            .find_map(|a| a.value().attr("href"))
            .map(str::to_string)
    });
    structural.or_else(|| {
        html.select(&ANY_ANCHOR).find_map(|a| {
            let text = element_text(a);
            if NEXT_TEXT_RE.is_match(&text) {
                a.value().attr("href").map(str::to_string)
            } else {
                None
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sites::{builtin, Site};

    fn rauchland() -> Site {
        Site::compile(&builtin("rauchland").unwrap()).unwrap()
    }

    fn listing_url() -> Url {
        Url::parse("https://rauchland.de/Shisha-Tabak").unwrap()
    }

    #[test]
    fn filters_structurally() {
        let html = Html::parse_document(
            r##"<div id="content">
              <div class="col-12"><a href="/Adalya-Love-66?ref=list">Adalya Love 66</a></div>
              <div class="col-12"><a href="https://other.shop/Adalya-Love-66">Elsewhere</a></div>
              <div class="col-12"><a href="/Al-Fakher-Minze#reviews">Al Fakher Minze</a></div>
              <div class="col-12"><a href="/Shisha-Tabak::Adalya">Adalya</a></div>
              <div class="col-12"><a href="/a/b/deep-link">Too deep</a></div>
              <div class="col-12"><a href="/Holster">No hyphen</a></div>
              <div class="col-12"><a href="/E-Shisha-Pods-Set">Pods</a></div>
              <div class="col-12"><a href="/Musthave-Pinkman">42</a></div>
              <div class="col-12"><a href="/Holster-Grape-Mint"></a></div>
              <div class="col-12"><a href="/187-Tabak-Hamburg-Kiwi/">187 Kiwi</a></div>
            </div>"##,
        );
        let links = discover(&html, &listing_url(), &rauchland());
        assert_eq!(
            links,
            vec![
                "https://rauchland.de/187-Tabak-Hamburg-Kiwi",
                "https://rauchland.de/Adalya-Love-66",
            ]
        );
    }

    #[test]
    fn prefers_image_anchor_and_ignores_stripped_blocks() {
        let html = Html::parse_document(
            r#"<div id="content">
              <ul class="flx-ac flx-jc blanklist flx-w">
                <li class="col-12"><a href="/Promo-Aktion">Sale</a></li>
              </ul>
              <div class="col-12">
                <a href="/Hersteller-Info">Hersteller-Info</a>
                <a href="/Darkside-Supernova"><img src="x.jpg" alt="Darkside Supernova"></a>
              </div>
            </div>"#,
        );
        let links = discover(&html, &listing_url(), &rauchland());
        assert_eq!(links, vec!["https://rauchland.de/Darkside-Supernova"]);
    }

    #[test]
    fn product_anchor_class_beats_first_plain_anchor() {
        let html = Html::parse_document(
            r#"<div id="content">
              <div class="col-12">
                <a href="/Hersteller-Info-Seite">Hersteller Info</a>
                <a class="product-name" href="/Adalya-Love-66">Adalya Love 66</a>
              </div>
            </div>"#,
        );
        let links = discover(&html, &listing_url(), &rauchland());
        assert_eq!(links, vec!["https://rauchland.de/Adalya-Love-66"]);
    }

    #[test]
    fn whole_document_when_no_containers() {
        let html = Html::parse_document(
            r#"<body><a href="/Adalya-Lady-Killer">Lady Killer</a><a href="/Adalya-Lady-Killer/">again</a></body>"#,
        );
        let links = discover(&html, &listing_url(), &rauchland());
        assert_eq!(links, vec!["https://rauchland.de/Adalya-Lady-Killer"]);
    }

    #[test]
    fn output_is_sorted_and_stable() {
        let body = std::fs::read_to_string("tests/fixtures/rauchland_listing.html").unwrap();
        let html = Html::parse_document(&body);
        let first = discover(&html, &listing_url(), &rauchland());
        let second = discover(&html, &listing_url(), &rauchland());
        assert_eq!(first, second);
        let mut sorted = first.clone();
        sorted.sort();
        assert_eq!(first, sorted);
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn next_by_selector_then_text() {
        let site = rauchland();
        let html = Html::parse_document(
            r#"<a href="/Shisha-Tabak_s9">weiter</a><a rel="next" href="/Shisha-Tabak_s2">2</a>"#,
        );
        assert_eq!(find_next_href(&html, &site).as_deref(), Some("/Shisha-Tabak_s2"));

        let html = Html::parse_document(r#"<a href="/x">Home</a><a href="/Shisha-Tabak_s3">»</a>"#);
        assert_eq!(find_next_href(&html, &site).as_deref(), Some("/Shisha-Tabak_s3"));

        let html = Html::parse_document(r#"<a href="/x">Home</a>"#);
        assert_eq!(find_next_href(&html, &site), None);
    }
}
