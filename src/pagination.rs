// src/pagination.rs

use serde::{Deserialize, Serialize};

pub const MAX_LIMIT: u64 = 100;

/// Default page sizes per listing.
pub const ROUTE_LIMIT: u64 = 10;
pub const FEED_LIMIT: u64 = 12;
pub const CONVERSATION_LIMIT: u64 = 20;
pub const MESSAGE_LIMIT: u64 = 50;

/// Raw page/limit as a caller supplies them (e.g. from a query string).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct PageQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

impl PageQuery {
    pub fn new(page: u64, limit: u64) -> Self {
        PageQuery {
            page: Some(page),
            limit: Some(limit),
        }
    }

    pub fn page(page: u64) -> Self {
        PageQuery {
            page: Some(page),
            limit: None,
        }
    }

    /// Page 0 becomes 1, limit 0 becomes the listing default, limits are capped.
    pub fn resolve(self, default_limit: u64) -> PageRequest {
        let page = self.page.filter(|p| *p > 0).unwrap_or(1);
        let limit = self
            .limit
            .filter(|l| *l > 0)
            .unwrap_or(default_limit)
            .min(MAX_LIMIT);
        PageRequest { page, limit }
    }
}

/// A normalised page window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub limit: u64,
}

impl PageRequest {
    /// Saturates, and never exceeds what the database accepts as a skip.
    pub fn skip(&self) -> u64 {
        (self.page - 1)
            .saturating_mul(self.limit)
            .min(i64::MAX as u64)
    }
}

pub fn page_count(total: u64, limit: u64) -> u64 {
    if limit == 0 {
        0
    } else {
        total.div_ceil(limit)
    }
}

/// The `{ data, total, pages }` envelope returned by every listing.
#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub pages: u64,
}

impl<T> Paginated<T> {
    pub fn new(data: Vec<T>, total: u64, request: PageRequest) -> Self {
        Paginated {
            data,
            total,
            pages: page_count(total, request.limit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_applies_defaults() {
        assert_eq!(
            PageQuery::default().resolve(ROUTE_LIMIT),
            PageRequest { page: 1, limit: 10 }
        );
        assert_eq!(
            PageQuery::new(0, 0).resolve(CONVERSATION_LIMIT),
            PageRequest { page: 1, limit: 20 }
        );
        assert_eq!(PageQuery::new(3, 500).resolve(FEED_LIMIT).limit, MAX_LIMIT);
    }

    #[test]
    fn skip_is_offset_of_page() {
        assert_eq!(PageQuery::new(1, 12).resolve(FEED_LIMIT).skip(), 0);
        assert_eq!(PageQuery::new(3, 12).resolve(FEED_LIMIT).skip(), 24);
    }

    #[test]
    fn huge_page_does_not_overflow_skip() {
        let request = PageQuery::new(u64::MAX, 10).resolve(ROUTE_LIMIT);
        assert_eq!(request.skip(), i64::MAX as u64);
    }

    #[test]
    fn pages_is_ceiling_of_total_over_limit() {
        assert_eq!(page_count(0, 10), 0);
        assert_eq!(page_count(10, 10), 1);
        assert_eq!(page_count(11, 10), 2);
        assert_eq!(page_count(25, 20), 2);
    }
}
