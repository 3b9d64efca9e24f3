//! Offset/size pagination for paginated and search feeds.

use thiserror::Error;

use crate::util::{parse_query, serialize_query};

/// Works per page when the caller doesn't say otherwise.
pub const DEFAULT_PAGE_SIZE: usize = 50;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaginationParseError {
    #[error("invalid value for pagination key {key:?}: {value:?}")]
    InvalidValue { key: String, value: String },
}

/// Where in a scope's work list a feed page starts, and how many works it
/// holds.
///
/// `offset`/`size` identify the page; the other two fields are learned while
/// serving it. [`page_loaded`](Self::page_loaded) must be called after the
/// page's works are fetched so [`has_next_page`](Self::has_next_page) can
/// distinguish a full page from the end of the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pagination {
    pub offset: usize,
    pub size: usize,
    this_page_size: Option<usize>,
    total_size: Option<usize>,
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(0, DEFAULT_PAGE_SIZE)
    }
}

impl Pagination {
    pub fn new(offset: usize, size: usize) -> Self {
        Self {
            offset,
            size,
            this_page_size: None,
            total_size: None,
        }
    }

    /// A default-size first page.
    pub fn first() -> Self {
        Self::default()
    }

    /// Record the total number of matching works, when the backend knows it.
    pub fn with_total(mut self, total: usize) -> Self {
        self.total_size = Some(total);
        self
    }

    /// Record how many works the current page actually contained.
    pub fn page_loaded(&mut self, count: usize) {
        self.this_page_size = Some(count);
    }

    /// Whether a further page is known (or presumed) to exist.
    ///
    /// A known total is authoritative. Otherwise a full page implies more
    /// may follow, and an unloaded page is presumed to have a successor.
    pub fn has_next_page(&self) -> bool {
        if let Some(total) = self.total_size {
            return self.offset + self.size < total;
        }
        match self.this_page_size {
            Some(count) => count >= self.size,
            None => true,
        }
    }

    pub fn next_page(&self) -> Pagination {
        Pagination::new(self.offset + self.size, self.size)
    }

    /// `None` when this already is the first page.
    pub fn previous_page(&self) -> Option<Pagination> {
        if self.offset == 0 {
            return None;
        }
        Some(Pagination::new(self.offset.saturating_sub(self.size), self.size))
    }

    pub fn first_page(&self) -> Pagination {
        Pagination::new(0, self.size)
    }

    /// Canonical query-string form, used in URLs and cache keys.
    pub fn query_string(&self) -> String {
        let offset = self.offset.to_string();
        let size = self.size.to_string();
        serialize_query([("after", offset.as_str()), ("size", size.as_str())])
    }

    /// Parse the output of [`query_string`](Self::query_string). Unknown keys
    /// are ignored; missing keys fall back to defaults.
    pub fn parse(input: &str) -> Result<Pagination, PaginationParseError> {
        let mut pagination = Pagination::default();
        for (key, value) in parse_query(input) {
            match key.as_str() {
                "after" => {
                    pagination.offset = value.parse().map_err(|_| {
                        PaginationParseError::InvalidValue { key, value }
                    })?;
                }
                "size" => {
                    pagination.size = value.parse().map_err(|_| {
                        PaginationParseError::InvalidValue { key, value }
                    })?;
                }
                _ => {}
            }
        }
        Ok(pagination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_default_is_first_page() {
        let p = Pagination::default();
        assert_eq!(p.offset, 0);
        assert_eq!(p.size, DEFAULT_PAGE_SIZE);
        assert!(p.previous_page().is_none());
    }

    #[test]
    fn test_next_and_previous() {
        let p = Pagination::new(50, 50);
        assert_eq!(p.next_page(), Pagination::new(100, 50));
        assert_eq!(p.previous_page(), Some(Pagination::new(0, 50)));
        assert_eq!(p.first_page(), Pagination::new(0, 50));
    }

    #[test]
    fn test_previous_clamps_at_zero() {
        // An odd offset smaller than the page size still pages back to 0.
        let p = Pagination::new(10, 50);
        assert_eq!(p.previous_page(), Some(Pagination::new(0, 50)));
    }

    #[test]
    fn test_has_next_with_known_total() {
        let p = Pagination::new(0, 50).with_total(120);
        assert!(p.has_next_page());
        let p = Pagination::new(100, 50).with_total(120);
        assert!(!p.has_next_page());
    }

    #[test]
    fn test_has_next_from_page_fullness() {
        let mut p = Pagination::new(0, 2);
        assert!(p.has_next_page(), "unloaded page presumes a successor");
        p.page_loaded(2);
        assert!(p.has_next_page(), "full page presumes a successor");
        p.page_loaded(1);
        assert!(!p.has_next_page(), "short page is the last page");
    }

    #[test]
    fn test_query_string() {
        assert_eq!(Pagination::new(100, 25).query_string(), "after=100&size=25");
    }

    #[test]
    fn test_parse_round_trip() {
        let p = Pagination::new(150, 75);
        assert_eq!(Pagination::parse(&p.query_string()).unwrap(), p);
    }

    #[test]
    fn test_parse_rejects_junk_values() {
        assert!(Pagination::parse("after=soon&size=50").is_err());
    }

    proptest! {
        #[test]
        fn prop_query_string_round_trips(offset in 0usize..1_000_000, size in 1usize..10_000) {
            let p = Pagination::new(offset, size);
            let qs = p.query_string();
            let parsed = Pagination::parse(&qs).unwrap();
            prop_assert_eq!(parsed.query_string(), qs);
            prop_assert_eq!(parsed, p);
        }
    }
}
