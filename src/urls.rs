use url::Url;

/// Canonical form of a product link: no query, no fragment, no trailing slash.
pub fn normalize_link(raw: &str) -> String {
    match Url::parse(raw.trim()) {
        Ok(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            url.as_str().trim_end_matches('/').to_string()
        }
        Err(_) => {
            let raw = raw.trim();
            let cut = raw.find(['?', '#']).unwrap_or(raw.len());
            raw[..cut].trim_end_matches('/').to_string()
        }
    }
}

/// Identity of a listing page for the walker's visited-set.
///
/// The query is dropped except for `page_key`, the parameter that carries the
/// page number on query-paginated sites. Page 1 is the bare category URL.
pub fn normalize_listing(raw: &str, page_key: Option<&str>) -> String {
    let base = normalize_link(raw);
    let Some(key) = page_key else {
        return base;
    };
    let Ok(url) = Url::parse(raw.trim()) else {
        return base;
    };
    let page = url
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.trim().to_string());
    match page {
        Some(p) if !p.is_empty() && p != "1" => format!("{base}?{key}={p}"),
        _ => base,
    }
}

/// Resolve `href` against `base`, ignoring javascript/mailto style targets.
pub fn resolve(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let url = base.join(href).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin()
}

/// First non-empty path segment, e.g. `adalya-tabak` for `/adalya-tabak/love-66`.
pub fn first_path_segment(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    url.path()
        .split('/')
        .find(|s| !s.is_empty())
        .map(str::to_string)
}
