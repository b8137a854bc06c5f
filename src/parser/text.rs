use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

/// Tokens that open an unrelated data field. Free text is cut at the first one.
/// Longer spellings come first so alternation prefers them.
pub const FIELD_LABELS: &[&str] = &[
    "FSK",
    "Nikotinstärke",
    "Nikotin",
    "Nicotine",
    "Gewicht",
    "Weight",
    "Inhaltseinheit",
    "Inhalt",
    "Herkunftsland",
    "Grundtabak",
    "Lieferumfang",
    "Tabakart",
    "EAN",
    "Artikelnummer",
    r"Article\s+number",
    "Marke",
    "Brand",
    "Hersteller",
    "Manufacturer",
    "Einheit",
    "Produkteigenschaften",
    "Produkteigenschaft",
    "Produktbeschreibung",
    "Preis",
    "Price",
    "Verpackung",
    "Packaging",
    "Menge",
    "Quantity",
];

fn label_alternation() -> String {
    FIELD_LABELS.join("|")
}

static FIELD_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?i)\b(?:{})\b", label_alternation())).unwrap());

/// A field label followed by its colon, e.g. `Gewicht:`. Bounds label captures.
pub static FIELD_LABEL_COLON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?i)\s*\b(?:{})\b\s*:", label_alternation())).unwrap());

static UNIT_REMNANT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bEinheit\s*[:\s]*\d+\s*g\b").unwrap());
static SENTENCE_BREAK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!\n\r]+").unwrap());
static INLINE_PROMO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bshisha\s+tabak\b").unwrap());

static COMPONENT_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i),|/|\||\+|&|\b(?:und|and)\b").unwrap());
static TASTES_LIKE_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:schmeckt\s+nach|tastes\s+like)[:\s]*").unwrap());

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)nicht\s+verfügbar|nicht\s+angegeben|keine\s+angabe|not\s+available|not\s+specified|\bn/?a\b",
    )
    .unwrap()
});

static WEIGHT_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\b\d+\s*g\b").unwrap());
static KILO_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\b1\s*kg\b").unwrap());
static PARENS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\([^)]*\)").unwrap());
static TRAILING_DASH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s-\s*$").unwrap());

const MAX_STRIP_PASSES: usize = 8;

/// Collapse every whitespace run to one space and trim.
pub fn normalize(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Everything before the first field-label token.
pub fn truncate_at_label(raw: &str) -> &str {
    match FIELD_LABEL_RE.find(raw) {
        Some(m) => &raw[..m.start()],
        None => raw,
    }
}

/// Text that says "no value" rather than carrying one.
pub fn is_placeholder(raw: &str) -> bool {
    PLACEHOLDER_RE.is_match(raw)
}

/// Digits and separators only, e.g. `200`, `0,5 %`.
pub fn is_numeric_only(raw: &str) -> bool {
    let raw = raw.trim();
    raw.chars().any(|c| c.is_ascii_digit())
        && raw
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_whitespace() || ",.-%".contains(c))
}

/// Site-specific marketing filter applied to free-text captures.
#[derive(Debug, Clone, Default)]
pub struct Boilerplate {
    phrases: Vec<String>,
}

impl Boilerplate {
    pub fn new<S: AsRef<str>>(phrases: &[S]) -> Self {
        Self {
            phrases: phrases
                .iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Drop promotional sentences and cut at the first field label.
    /// Repeats until the text stops changing, so the result is a fixed point.
    pub fn strip(&self, raw: &str) -> String {
        let mut current = normalize(raw);
        for _ in 0..MAX_STRIP_PASSES {
            let next = self.strip_once(&current);
            if next == current {
                break;
            }
            current = next;
        }
        current
    }

    fn strip_once(&self, raw: &str) -> String {
        let without_units = UNIT_REMNANT_RE.replace_all(raw, "");
        let head = truncate_at_label(&without_units);
        let kept: Vec<&str> = SENTENCE_BREAK_RE
            .split(head)
            .map(str::trim)
            .filter(|s| !s.is_empty() && !self.is_promotional(s))
            .collect();
        normalize(&INLINE_PROMO_RE.replace_all(&kept.join(" "), ""))
    }

    fn is_promotional(&self, sentence: &str) -> bool {
        let lower = sentence.to_lowercase();
        self.phrases.iter().any(|p| lower.contains(p.as_str()))
    }
}

/// Split a flavor capture into components, dropping "tastes like" prefixes and
/// case-insensitive repeats. First spelling wins, order is kept.
pub fn split_components(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for part in COMPONENT_SPLIT_RE.split(raw) {
        let part = normalize(part);
        let part = TASTES_LIKE_PREFIX_RE.replace(&part, "");
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if seen.insert(part.to_lowercase()) {
            out.push(part.to_string());
        }
    }
    out
}

/// Product title without weight tokens, bracketed notes and a dangling dash.
pub fn clean_product_name(title: &str) -> String {
    let t = normalize(title);
    let t = WEIGHT_TOKEN_RE.replace_all(&t, "");
    let t = KILO_TOKEN_RE.replace_all(&t, "");
    let t = PARENS_RE.replace_all(&t, "");
    let t = normalize(&t);
    TRAILING_DASH_RE.replace(&t, "").trim().to_string()
}
