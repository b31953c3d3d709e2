use serde::Serialize;

/// One page of a filtered result set. Page numbers start at 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pager<T> {
    pub items: Vec<T>,
    pub current_page: usize,
    pub items_per_page: usize,
    pub page_count: usize,
    pub total_items: usize,
}

impl<T: Clone> Pager<T> {
    /// Slice `all` into the requested page. Out-of-range pages are empty.
    #[must_use]
    pub fn paginate(all: &[T], page: usize, items_per_page: usize) -> Self {
        let page = page.max(1);
        let items_per_page = items_per_page.max(1);
        let total_items = all.len();
        let page_count = total_items.div_ceil(items_per_page);
        let start = (page - 1).saturating_mul(items_per_page);
        let items = all
            .iter()
            .skip(start)
            .take(items_per_page)
            .cloned()
            .collect();
        Self {
            items,
            current_page: page,
            items_per_page,
            page_count,
            total_items,
        }
    }
}

impl<T> Pager<T> {
    #[must_use]
    pub fn has_next_page(&self) -> bool {
        self.current_page < self.page_count
    }

    #[must_use]
    pub fn has_previous_page(&self) -> bool {
        self.current_page > 1
    }

    #[must_use]
    pub fn next_page_number(&self) -> Option<usize> {
        self.has_next_page().then(|| self.current_page + 1)
    }

    #[must_use]
    pub fn previous_page_number(&self) -> Option<usize> {
        self.has_previous_page().then(|| self.current_page - 1)
    }
}
