//! Pagination and filtering primitives shared across all list endpoints.

use serde::{Deserialize, Serialize};

/// Pagination query parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct Pagination {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl Pagination {
    /// Maximum items per page.
    const MAX_PER_PAGE: i64 = 100;

    /// Default items per page.
    const DEFAULT_PER_PAGE: i64 = 25;

    pub fn limit(&self) -> i64 {
        self.per_page
            .unwrap_or(Self::DEFAULT_PER_PAGE)
            .clamp(1, Self::MAX_PER_PAGE)
    }

    pub fn offset(&self) -> i64 {
        let page = self.page.unwrap_or(1).max(1);
        (page - 1) * self.limit()
    }

    pub fn current_page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }
}

/// Paged result envelope returned by list endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct PagedResult<T: Serialize> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

impl<T: Serialize> PagedResult<T> {
    pub fn new(items: Vec<T>, total: i64, pagination: &Pagination) -> Self {
        let per_page = pagination.limit();
        let total_pages = (total + per_page - 1) / per_page;
        Self {
            items,
            total,
            page: pagination.current_page(),
            per_page,
            total_pages,
        }
    }
}

/// Cursor-paginated result for `list_events`. The cursor is the last `seq`
/// returned; `next_cursor` is set only when a `limit+1` probe row exists.
#[derive(Debug, Clone, Serialize)]
pub struct CursorPage<T: Serialize> {
    pub items: Vec<T>,
    pub next_cursor: Option<i64>,
    pub has_more: bool,
}

impl<T: Serialize> CursorPage<T> {
    /// Build a page from a probe fetch of `limit + 1` rows.
    pub fn from_probe(mut rows: Vec<T>, limit: i64, seq_of: impl Fn(&T) -> i64) -> Self {
        let has_more = rows.len() as i64 > limit;
        if has_more {
            rows.truncate(limit as usize);
        }
        let next_cursor = if has_more { rows.last().map(&seq_of) } else { None };
        Self {
            items: rows,
            next_cursor,
            has_more,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults() {
        let p = Pagination {
            page: None,
            per_page: None,
        };
        assert_eq!(p.limit(), 25);
        assert_eq!(p.offset(), 0);
        assert_eq!(p.current_page(), 1);
    }

    #[test]
    fn pagination_clamps_per_page() {
        let p = Pagination {
            page: Some(1),
            per_page: Some(500),
        };
        assert_eq!(p.limit(), 100);
    }

    #[test]
    fn pagination_offset_calculation() {
        let p = Pagination {
            page: Some(3),
            per_page: Some(10),
        };
        assert_eq!(p.offset(), 20);
    }

    #[test]
    fn paged_result_total_pages() {
        let p = Pagination {
            page: Some(1),
            per_page: Some(10),
        };
        let result = PagedResult::new(vec![1, 2, 3], 25, &p);
        assert_eq!(result.total_pages, 3);
        assert_eq!(result.total, 25);
        assert_eq!(result.page, 1);
    }

    #[test]
    fn cursor_page_sets_next_cursor_only_when_more_rows_exist() {
        let rows: Vec<i64> = (1..=5).collect();
        let page = CursorPage::from_probe(rows, 4, |n| *n);
        assert_eq!(page.items, vec![1, 2, 3, 4]);
        assert!(page.has_more);
        assert_eq!(page.next_cursor, Some(4));
    }

    #[test]
    fn cursor_page_last_page_has_no_next_cursor() {
        let rows: Vec<i64> = (1..=3).collect();
        let page = CursorPage::from_probe(rows, 4, |n| *n);
        assert_eq!(page.items, vec![1, 2, 3]);
        assert!(!page.has_more);
        assert_eq!(page.next_cursor, None);
    }
}
