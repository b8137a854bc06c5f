pub mod classify;
pub mod flavor;
pub mod links;
pub mod manufacturer;
pub mod text;

use scraper::node::Node;
use scraper::{ElementRef, Html};
use tracing::debug;

use crate::error::ProductSkip;
use crate::output::ProductRecord;
use crate::sites::Site;
use text::{clean_product_name, normalize};

const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// Visible text of an element, whitespace-collapsed.
pub fn element_text(el: ElementRef<'_>) -> String {
    normalize(&el.text().collect::<Vec<_>>().join(" "))
}

/// Visible text of the whole page, one space between text nodes.
/// Script and style bodies are left out.
pub fn page_text(html: &Html) -> String {
    let mut parts = Vec::new();
    collect_text(html.root_element(), &mut parts);
    parts.join(" ")
}

fn collect_text<'a>(el: ElementRef<'a>, out: &mut Vec<&'a str>) {
    for child in el.children() {
        match child.value() {
            Node::Text(t) => {
                let t = t.trim();
                if !t.is_empty() {
                    out.push(t);
                }
            }
            Node::Element(e) if !SKIPPED_ELEMENTS.contains(&e.name()) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_text(child_el, out);
                }
            }
            _ => {}
        }
    }
}

/// Product title: first match of the site's title selectors.
pub fn product_title(html: &Html, site: &Site) -> String {
    html.select(&site.title)
        .next()
        .map(element_text)
        .unwrap_or_default()
}

/// Turn one product page into a record, or say why it was skipped.
pub fn extract_product(site: &Site, url: &str, body: &str) -> Result<ProductRecord, ProductSkip> {
    let html = Html::parse_document(body);
    let title = product_title(&html, site);
    let text = page_text(&html);

    let decision = site.classifier.decide(url, &title, &text);
    if !decision.accepted {
        return Err(ProductSkip::Rejected(decision.evidence));
    }

    let manufacturer = manufacturer::resolve(&html, &title, url, site);
    let name = clean_product_name(&title);
    let flavor = match flavor::resolve_with_source(&html, &text, site) {
        Some((source, flavors)) => {
            debug!("{url}: {} flavor(s) from {source}", flavors.len());
            flavors
        }
        None => {
            debug!("{url}: no flavor found");
            Vec::new()
        }
    };

    Ok(ProductRecord::new(name, flavor, manufacturer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::classify::Evidence;
    use crate::sites::{builtin, Site};

    fn site(name: &str) -> Site {
        Site::compile(&builtin(name).unwrap()).unwrap()
    }

    #[test]
    fn page_text_skips_scripts() {
        let html = Html::parse_document(
            "<html><head><script>var a = 1;</script><style>p{}</style></head><body><p> Hallo </p><p>Welt</p></body></html>",
        );
        assert_eq!(page_text(&html), "Hallo Welt");
    }

    #[test]
    fn rauchland_fixture() {
        let body = std::fs::read_to_string("tests/fixtures/rauchland_product.html").unwrap();
        let record = extract_product(
            &site("rauchland"),
            "https://rauchland.de/Adalya-Love-66-200g",
            &body,
        )
        .unwrap();
        assert_eq!(record.name, "Adalya Tabak Love 66");
        assert_eq!(record.manufacturer, "Adalya");
        assert_eq!(record.flavor, vec!["Maracuja", "Honigmelone", "Wassermelone"]);
    }

    #[test]
    fn shisha_world_fixture() {
        let body = std::fs::read_to_string("tests/fixtures/shishaworld_product.html").unwrap();
        let record = extract_product(
            &site("shisha-world"),
            "https://www.shisha-world.com/nameless-808-pina-lada",
            &body,
        )
        .unwrap();
        assert_eq!(record.name, "Nameless Tabak #808 P!NA & LADA");
        assert_eq!(record.manufacturer, "Nameless");
        assert_eq!(record.flavor, vec!["Ananas", "Kokos", "Sahne"]);
    }

    #[test]
    fn strict_site_rejects_other_size() {
        let body = "<h1>Nameless Tabak #808 P!NA & LADA - 25g</h1><p>Aroma: Ananas</p>";
        let err = extract_product(
            &site("shisha-world"),
            "https://www.shisha-world.com/nameless-808-pina-lada-25g",
            body,
        )
        .unwrap_err();
        assert!(matches!(err, ProductSkip::Rejected(Evidence::Conflicting(25))));
    }

    #[test]
    fn missing_everything_is_not_an_error() {
        let record =
            extract_product(&site("rauchland"), "https://rauchland.de/", "<html></html>").unwrap();
        assert_eq!(record.name, "");
        assert_eq!(record.manufacturer, "");
        assert!(record.flavor.is_empty());
    }
}
