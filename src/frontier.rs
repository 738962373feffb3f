use std::collections::{HashSet, VecDeque};
use tracing::debug;
use url::Url;

use crate::scope::ScopeFilter;
use crate::url_canon::CanonicalUrl;

/// Outcome of offering a link to the frontier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Queued,
    /// Already queued or visited; dropped.
    AlreadyKnown,
    /// Out of scope; never queued.
    Rejected,
}

/// Where a canonical URL stands in the crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlState {
    Unseen,
    Queued,
    Visited,
}

/// Breadth-first queue of pages plus the set of pages already processed.
///
/// A URL moves `unseen -> queued -> visited` and never back. Popping stops once
/// `max_pages` URLs have been visited, even if the queue still has entries.
#[derive(Debug)]
pub struct Frontier {
    queue: VecDeque<Url>,
    queued: HashSet<CanonicalUrl>,
    visited: HashSet<CanonicalUrl>,
    max_pages: usize,
}

impl Frontier {
    /// The seed is queued unconditionally; the crawl loop scope-checks every
    /// popped URL anyway.
    pub fn new(seed: Url, max_pages: usize) -> Self {
        let mut queued = HashSet::new();
        queued.insert(CanonicalUrl::from_url(&seed));

        Self {
            queue: VecDeque::from([seed]),
            queued,
            visited: HashSet::new(),
            max_pages,
        }
    }

    pub fn push(&mut self, url: Url, scope: &ScopeFilter) -> Enqueue {
        let canonical = match scope.check(&url) {
            Ok(canonical) => canonical,
            Err(e) => {
                debug!("{}", e);
                return Enqueue::Rejected;
            }
        };

        if self.visited.contains(&canonical) || !self.queued.insert(canonical) {
            return Enqueue::AlreadyKnown;
        }

        self.queue.push_back(url);
        Enqueue::Queued
    }

    /// Next URL to process, marking it visited. `None` when the queue is empty
    /// or the page limit has been reached.
    pub fn pop(&mut self) -> Option<Url> {
        if self.visited.len() >= self.max_pages {
            return None;
        }

        let url = self.queue.pop_front()?;
        let canonical = CanonicalUrl::from_url(&url);
        self.queued.remove(&canonical);
        self.visited.insert(canonical);
        Some(url)
    }

    pub fn state(&self, url: &CanonicalUrl) -> UrlState {
        if self.visited.contains(url) {
            UrlState::Visited
        } else if self.queued.contains(url) {
            UrlState::Queued
        } else {
            UrlState::Unseen
        }
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.queue.is_empty() || self.visited.len() >= self.max_pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    fn scope() -> ScopeFilter {
        ScopeFilter::new("ex.com", &["wp-json".to_string()])
    }

    #[test]
    fn test_breadth_first_order() {
        let scope = scope();
        let mut frontier = Frontier::new(url("https://ex.com/"), 10);

        assert_eq!(frontier.pop(), Some(url("https://ex.com/")));
        assert_eq!(frontier.push(url("https://ex.com/a"), &scope), Enqueue::Queued);
        assert_eq!(frontier.push(url("https://ex.com/b"), &scope), Enqueue::Queued);

        assert_eq!(frontier.pop(), Some(url("https://ex.com/a")));
        assert_eq!(frontier.push(url("https://ex.com/a/c"), &scope), Enqueue::Queued);

        assert_eq!(frontier.pop(), Some(url("https://ex.com/b")));
        assert_eq!(frontier.pop(), Some(url("https://ex.com/a/c")));
        assert_eq!(frontier.pop(), None);
        assert!(frontier.is_exhausted());
    }

    #[test]
    fn test_known_urls_are_not_requeued() {
        let scope = scope();
        let mut frontier = Frontier::new(url("https://ex.com/"), 10);

        assert_eq!(frontier.push(url("https://ex.com/?utm=1"), &scope), Enqueue::AlreadyKnown);
        frontier.pop();
        assert_eq!(frontier.push(url("https://EX.com/#top"), &scope), Enqueue::AlreadyKnown);

        assert_eq!(frontier.push(url("https://ex.com/a/"), &scope), Enqueue::Queued);
        assert_eq!(frontier.push(url("https://ex.com/a"), &scope), Enqueue::AlreadyKnown);
        assert_eq!(frontier.queued_count(), 1);
    }

    #[test]
    fn test_out_of_scope_is_rejected() {
        let scope = scope();
        let mut frontier = Frontier::new(url("https://ex.com/"), 10);

        assert_eq!(frontier.push(url("https://other.com/"), &scope), Enqueue::Rejected);
        assert_eq!(frontier.push(url("https://ex.com/wp-json/posts"), &scope), Enqueue::Rejected);
        assert_eq!(
            frontier.state(&CanonicalUrl::parse("https://other.com/")),
            UrlState::Unseen
        );
    }

    #[test]
    fn test_state_transitions() {
        let scope = scope();
        let mut frontier = Frontier::new(url("https://ex.com/"), 10);
        let page = CanonicalUrl::parse("https://ex.com/page");

        assert_eq!(frontier.state(&page), UrlState::Unseen);
        frontier.push(url("https://ex.com/page"), &scope);
        assert_eq!(frontier.state(&page), UrlState::Queued);

        frontier.pop();
        frontier.pop();
        assert_eq!(frontier.state(&page), UrlState::Visited);
    }

    #[test]
    fn test_page_limit() {
        let scope = scope();
        let mut frontier = Frontier::new(url("https://ex.com/"), 2);
        for path in ["a", "b", "c"] {
            frontier.push(url(&format!("https://ex.com/{}", path)), &scope);
        }

        assert!(frontier.pop().is_some());
        assert!(frontier.pop().is_some());
        assert_eq!(frontier.pop(), None);
        assert_eq!(frontier.visited_count(), 2);
    }

    #[test]
    fn test_zero_limit_visits_nothing() {
        let mut frontier = Frontier::new(url("https://ex.com/"), 0);
        assert_eq!(frontier.pop(), None);
        assert_eq!(frontier.visited_count(), 0);
    }
}
