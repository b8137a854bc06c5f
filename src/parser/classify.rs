use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Package sizes the shops sell. A page naming one of these that is not the
/// target is positive evidence against it.
const KNOWN_WEIGHTS: &[u32] = &[20, 25, 50, 65, 100, 125, 150, 180, 200, 250, 500, 1000];

static TITLE_WEIGHT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d+)\s*g\b").unwrap());
static FIELD_WEIGHT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:Gewicht|Weight|Einheit|Inhalt|Unit)\s*:?\s*(\d+)\s*g\b").unwrap()
});

/// Per-site acceptance policy for product pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FilterPolicy {
    /// Every page is accepted.
    Unfiltered,
    /// Only pages with positive evidence of the target package size.
    StrictAttributeMatch { grams: u32 },
}

impl Default for FilterPolicy {
    fn default() -> Self {
        FilterPolicy::Unfiltered
    }
}

/// What the page says about its package size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evidence {
    /// No check was made.
    Unchecked,
    UrlMatch,
    TitleMatch,
    UnitField,
    WeightField,
    /// The page names a different known size.
    Conflicting(u32),
    NoEvidence,
}

impl Evidence {
    pub fn is_positive(self) -> bool {
        matches!(
            self,
            Evidence::UrlMatch | Evidence::TitleMatch | Evidence::UnitField | Evidence::WeightField
        )
    }
}

impl fmt::Display for Evidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Evidence::Unchecked => write!(f, "unchecked"),
            Evidence::UrlMatch => write!(f, "size in url"),
            Evidence::TitleMatch => write!(f, "size in title"),
            Evidence::UnitField => write!(f, "size in unit field"),
            Evidence::WeightField => write!(f, "size in weight field"),
            Evidence::Conflicting(g) => write!(f, "page says {g}g"),
            Evidence::NoEvidence => write!(f, "no size found"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub accepted: bool,
    pub evidence: Evidence,
}

#[derive(Debug)]
struct TargetPatterns {
    grams: u32,
    url_token: String,
    title: Regex,
    unit_field: Regex,
    weight_field: Regex,
}

/// Compiled form of a [`FilterPolicy`].
#[derive(Debug)]
pub struct Classifier {
    policy: FilterPolicy,
    target: Option<TargetPatterns>,
}

impl Classifier {
    pub fn new(policy: FilterPolicy) -> Result<Self, regex::Error> {
        let target = match policy {
            FilterPolicy::Unfiltered => None,
            FilterPolicy::StrictAttributeMatch { grams } => Some(TargetPatterns {
                grams,
                url_token: format!("-{grams}g"),
                title: Regex::new(&format!(r"(?i)\b{grams}\s*g\b"))?,
                unit_field: Regex::new(&format!(
                    r"(?i)\b(?:Einheit|Inhaltseinheit|Inhalt|Unit|Packungsgröße|Package\s+size)\s*:?\s*{grams}\s*g\b"
                ))?,
                weight_field: Regex::new(&format!(r"(?i)\b(?:Gewicht|Weight)\s*:\s*{grams}\s*g\b"))?,
            }),
        };
        Ok(Self { policy, target })
    }

    /// Layered evidence, strongest first; stops at the first positive hit.
    pub fn inspect(&self, url: &str, title: &str, page_text: &str) -> Evidence {
        let Some(t) = &self.target else {
            return Evidence::Unchecked;
        };
        if url.to_lowercase().contains(&t.url_token) {
            return Evidence::UrlMatch;
        }
        if t.title.is_match(title) {
            return Evidence::TitleMatch;
        }
        if t.unit_field.is_match(page_text) {
            return Evidence::UnitField;
        }
        if t.weight_field.is_match(page_text) {
            return Evidence::WeightField;
        }
        let other = TITLE_WEIGHT_RE
            .captures_iter(title)
            .chain(FIELD_WEIGHT_RE.captures_iter(page_text))
            .filter_map(|c| c[1].parse::<u32>().ok())
            .find(|g| *g != t.grams && KNOWN_WEIGHTS.contains(g));
        match other {
            Some(g) => Evidence::Conflicting(g),
            None => Evidence::NoEvidence,
        }
    }

    pub fn decide(&self, url: &str, title: &str, page_text: &str) -> Decision {
        let evidence = self.inspect(url, title, page_text);
        let accepted = match self.policy {
            FilterPolicy::Unfiltered => true,
            FilterPolicy::StrictAttributeMatch { .. } => evidence.is_positive(),
        };
        Decision { accepted, evidence }
    }

    pub fn accept(&self, url: &str, title: &str, page_text: &str) -> bool {
        self.decide(url, title, page_text).accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strict() -> Classifier {
        Classifier::new(FilterPolicy::StrictAttributeMatch { grams: 200 }).unwrap()
    }

    #[test]
    fn unfiltered_accepts_everything() {
        let c = Classifier::new(FilterPolicy::Unfiltered).unwrap();
        assert!(c.accept("https://x/foo-25g", "Foo 25g", "Gewicht: 25g"));
        assert_eq!(c.inspect("https://x/foo", "", ""), Evidence::Unchecked);
    }

    #[test]
    fn url_wins_first() {
        let d = strict().decide("https://x/Adalya-Love-66-200G", "Love 66 25g", "");
        assert!(d.accepted);
        assert_eq!(d.evidence, Evidence::UrlMatch);
    }

    #[test]
    fn title_match() {
        assert_eq!(
            strict().inspect("https://x/love-66", "Adalya Love 66 200 g", ""),
            Evidence::TitleMatch
        );
        // 1200g is not 200g
        assert_ne!(
            strict().inspect("https://x/love-66", "Adalya Love 66 1200g", ""),
            Evidence::TitleMatch
        );
    }

    #[test]
    fn labeled_fields() {
        let c = strict();
        assert_eq!(c.inspect("https://x/a", "A", "EINHEIT 200 g"), Evidence::UnitField);
        assert_eq!(c.inspect("https://x/a", "A", "Gewicht: 200g Preis"), Evidence::WeightField);
    }

    #[test]
    fn conflicting_size_rejects() {
        let d = strict().decide("https://x/a", "Adalya Love 66 25g", "");
        assert!(!d.accepted);
        assert_eq!(d.evidence, Evidence::Conflicting(25));
        let d = strict().decide("https://x/a", "Adalya Love 66", "Gewicht: 50 g");
        assert_eq!(d.evidence, Evidence::Conflicting(50));
    }

    #[test]
    fn strict_rejects_ambiguous_page() {
        let d = strict().decide("https://x/a", "Adalya Love 66", "lecker");
        assert!(!d.accepted);
        assert_eq!(d.evidence, Evidence::NoEvidence);
    }

    #[test]
    fn policy_deserializes() {
        let p: FilterPolicy =
            serde_json::from_str(r#"{"mode":"strict_attribute_match","grams":200}"#).unwrap();
        assert_eq!(p, FilterPolicy::StrictAttributeMatch { grams: 200 });
        let p: FilterPolicy = serde_json::from_str(r#"{"mode":"unfiltered"}"#).unwrap();
        assert_eq!(p, FilterPolicy::Unfiltered);
    }
}
