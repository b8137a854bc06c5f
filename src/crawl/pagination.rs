use std::collections::HashSet;

use scraper::Html;
use tracing::debug;
use url::Url;

use crate::parser::links::find_next_href;
use crate::sites::Site;
use crate::urls::resolve;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkState {
    Start,
    Following,
    /// Normal end: bound reached, cycle detected or a listing fetch failed.
    Exhausted,
    /// The "next" affordance could not be turned into a URL.
    Failed,
}

/// Enumerates listing pages of one category, never the same page twice.
///
/// The caller fetches each URL the walker hands out and feeds the parsed
/// page back through [`advance`](Self::advance).
#[derive(Debug)]
pub struct PageWalker<'a> {
    site: &'a Site,
    start: u32,
    end: u32,
    page: u32,
    current: Option<String>,
    visited: HashSet<String>,
    state: WalkState,
}

impl<'a> PageWalker<'a> {
    pub fn new(site: &'a Site, start: u32, end: u32) -> Self {
        let start = start.max(1);
        Self {
            site,
            start,
            end: end.max(start),
            page: start,
            current: None,
            visited: HashSet::new(),
            state: WalkState::Start,
        }
    }

    /// First listing URL. Only yields once.
    pub fn begin(&mut self) -> Option<String> {
        if self.state != WalkState::Start {
            return None;
        }
        let url = self.site.page_url(self.start);
        self.visited.insert(self.site.listing_key(&url));
        self.current = Some(url.clone());
        self.page = self.start;
        self.state = WalkState::Following;
        Some(url)
    }

    /// Decide the page after the one just fetched.
    pub fn advance(&mut self, html: &Html) -> Option<String> {
        if self.state != WalkState::Following {
            return None;
        }
        if self.page >= self.end {
            debug!("walker: reached end page {}", self.end);
            self.state = WalkState::Exhausted;
            return None;
        }
        let Some(current) = self.current.as_deref().and_then(|c| Url::parse(c).ok()) else {
            self.state = WalkState::Failed;
            return None;
        };

        let candidate = match find_next_href(html, self.site) {
            Some(href) => match resolve(&current, &href) {
                Some(url) if self.site.owns(&url) => url.to_string(),
                Some(url) => {
                    debug!("walker: next link {url} leaves the site, using page numbers");
                    self.site.page_url(self.page + 1)
                }
                None => {
                    debug!("walker: unusable next href {href:?} on {current}");
                    self.state = WalkState::Failed;
                    return None;
                }
            },
            None => self.site.page_url(self.page + 1),
        };

        if !self.visited.insert(self.site.listing_key(&candidate)) {
            debug!("walker: {candidate} already visited, stopping");
            self.state = WalkState::Exhausted;
            return None;
        }
        self.page += 1;
        self.current = Some(candidate.clone());
        Some(candidate)
    }

    /// The current listing page could not be fetched; stop quietly.
    pub fn fetch_failed(&mut self) {
        if self.state == WalkState::Following {
            self.state = WalkState::Exhausted;
        }
    }

    pub fn state(&self) -> WalkState {
        self.state
    }

    /// Number of the page last handed out.
    pub fn page(&self) -> u32 {
        self.page
    }
}
