//! Offset pagination for post listings.

use serde::Serialize;

/// Posts shown per page unless configured otherwise.
pub const DEFAULT_PER_PAGE: u32 = 5;

/// A 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    /// Returns `None` for page 0 or an empty page size.
    pub fn new(page: u32, per_page: u32) -> Option<Self> {
        (page >= 1 && per_page >= 1).then_some(Self { page, per_page })
    }

    /// Rows to skip before this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.per_page)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.per_page)
    }
}

/// One page of results plus the totals needed to render navigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, request: PageRequest, total: u64) -> Self {
        Self {
            items,
            page: request.page,
            per_page: request.per_page,
            total,
        }
    }

    /// Number of pages; zero when there are no items.
    pub fn pages(&self) -> u32 {
        if self.per_page == 0 {
            return 0;
        }
        let pages = self.total.div_ceil(u64::from(self.per_page));
        u32::try_from(pages).unwrap_or(u32::MAX)
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn has_next(&self) -> bool {
        self.page < self.pages()
    }

    pub fn prev_num(&self) -> Option<u32> {
        self.has_prev().then(|| self.page - 1)
    }

    pub fn next_num(&self) -> Option<u32> {
        self.has_next().then(|| self.page + 1)
    }

    /// An empty page past the first one means the caller asked for a page
    /// that does not exist.
    pub fn is_out_of_range(&self) -> bool {
        self.items.is_empty() && self.page != 1
    }

    /// Page numbers for a navigation bar, with `None` marking a gap.
    ///
    /// Keeps `left_edge` pages at the start, `right_edge` at the end, and a
    /// window around the current page of `left_current` pages before it and
    /// `right_current - 1` after it.
    pub fn iter_pages(
        &self,
        left_edge: u32,
        left_current: u32,
        right_current: u32,
        right_edge: u32,
    ) -> Vec<Option<u32>> {
        let pages = self.pages();
        let mut out = Vec::new();
        let mut last = 0;

        for num in 1..=pages {
            let in_left_edge = num <= left_edge;
            let in_window = i64::from(num) > i64::from(self.page) - i64::from(left_current) - 1
                && num < self.page.saturating_add(right_current);
            let in_right_edge = num > pages.saturating_sub(right_edge);

            if in_left_edge || in_window || in_right_edge {
                if last + 1 != num {
                    out.push(None);
                }
                out.push(Some(num));
                last = num;
            }
        }

        out
    }

    /// Convert items while keeping the paging metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            per_page: self.per_page,
            total: self.total,
        }
    }
}

/// Serializable view of a page with navigation fields precomputed.
#[derive(Debug, Clone, Serialize)]
pub struct PageView<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub pages: u32,
    pub prev_num: Option<u32>,
    pub next_num: Option<u32>,
    pub page_links: Vec<Option<u32>>,
}

impl<T> From<Page<T>> for PageView<T> {
    fn from(page: Page<T>) -> Self {
        let pages = page.pages();
        let prev_num = page.prev_num();
        let next_num = page.next_num();
        let page_links = page.iter_pages(1, 1, 2, 1);

        Self {
            items: page.items,
            page: page.page,
            per_page: page.per_page,
            total: page.total,
            pages,
            prev_num,
            next_num,
            page_links,
        }
    }
}
