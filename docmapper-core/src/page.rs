//! Pagination of query results.
//!
//! [`ModelQuery::paginate`](crate::model_query::ModelQuery::paginate) issues one count and
//! one skip/limit find and returns a [`Page`]. [`PaginationParams::paginate`] does the
//! same over an in-memory list, which is how embedded collections are paged.

use serde::{Deserialize, Serialize};
use std::cmp::min;

/// One page of results plus the navigation metadata.
///
/// # Example
///
/// ```ignore
/// use docmapper::page::PaginationParams;
///
/// let page = mapper.query("Person")?.paginate(PaginationParams::new(2, 25)).await?;
///
/// println!("{} of {} people", page.items.len(), page.count);
/// if let Some(next) = page.next_page {
///     // fetch page `next`
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Matching items across every page.
    pub count: usize,
    pub next_page: Option<usize>,
    pub previous_page: Option<usize>,
}

impl<T> Page<T> {
    pub fn builder(items: Vec<T>) -> PageBuilder<T> {
        PageBuilder::new(items)
    }

    /// Builds a page from the items of one page and the total count.
    pub fn from_parts(items: Vec<T>, count: usize, params: &PaginationParams) -> Self {
        let end = params.offset() + items.len();

        Page::builder(items)
            .with_count(count)
            .with_next_page((end < count).then_some(params.page() + 1))
            .with_previous_page((params.page() > 1).then(|| params.page() - 1))
            .build()
    }

    /// Number of pages needed for `count` items.
    pub fn total_pages(&self, per_page: usize) -> usize {
        if per_page == 0 {
            return 0;
        }

        self.count.div_ceil(per_page)
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            count: self.count,
            next_page: self.next_page,
            previous_page: self.previous_page,
        }
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            count: 0,
            next_page: None,
            previous_page: None,
        }
    }
}

pub struct PageBuilder<T> {
    items: Vec<T>,
    count: usize,
    next_page: Option<usize>,
    previous_page: Option<usize>,
}

impl<T> PageBuilder<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            count: 0,
            next_page: None,
            previous_page: None,
        }
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn with_next_page(mut self, next_page: Option<usize>) -> Self {
        self.next_page = next_page;
        self
    }

    pub fn with_previous_page(mut self, previous_page: Option<usize>) -> Self {
        self.previous_page = previous_page;
        self
    }

    pub fn build(self) -> Page<T> {
        Page {
            items: self.items,
            count: self.count,
            next_page: self.next_page,
            previous_page: self.previous_page,
        }
    }
}

/// Which page to fetch and how large pages are. Pages are 1-based; page 0 is read as
/// page 1.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PaginationParams {
    pub page: usize,
    pub per_page: usize,
}

impl PaginationParams {
    pub fn new(page: usize, per_page: usize) -> Self {
        Self { page, per_page }
    }

    pub fn builder() -> PaginationParamsBuilder {
        PaginationParamsBuilder::new()
    }

    pub fn page(&self) -> usize {
        self.page.max(1)
    }

    /// Items to skip before this page.
    pub fn offset(&self) -> usize {
        (self.page() - 1) * self.per_page
    }

    /// Pages an in-memory list.
    pub fn paginate<T>(&self, items: Vec<T>) -> Page<T> {
        let count = items.len();

        if self.offset() >= count {
            return Page::builder(Vec::new())
                .with_count(count)
                .with_previous_page((self.page() > 1).then(|| self.page() - 1))
                .build();
        }

        let end = min(self.offset() + self.per_page, count);
        let items = items
            .into_iter()
            .skip(self.offset())
            .take(end - self.offset())
            .collect();

        Page::from_parts(items, count, self)
    }
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self { page: 1, per_page: 10 }
    }
}

pub struct PaginationParamsBuilder {
    page: Option<usize>,
    per_page: Option<usize>,
}

impl PaginationParamsBuilder {
    pub fn new() -> Self {
        Self { page: None, per_page: None }
    }

    pub fn with_page(mut self, page: usize) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_per_page(mut self, per_page: usize) -> Self {
        self.per_page = Some(per_page);
        self
    }

    /// Unset values default to page 1 and 10 per page.
    pub fn build(self) -> PaginationParams {
        PaginationParams {
            page: self.page.unwrap_or(1),
            per_page: self.per_page.unwrap_or(10),
        }
    }
}

impl Default for PaginationParamsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
