//! Page arithmetic over the leaf rows of a loaded result.

use std::ops::Range;

/// Page position within a loaded result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub is_paginated: bool,
    /// Zero-based page index, clamped to the last page.
    pub current_page: usize,
    pub page_size: usize,
    pub total_rows: usize,
    /// Always at least 1, even for an empty result.
    pub total_pages: usize,
}

impl Pagination {
    /// Computes page bounds, clamping `requested_page` into range.
    ///
    /// A `page_size` of zero is treated as one.
    #[must_use]
    pub fn new(
        is_paginated: bool,
        page_size: usize,
        total_rows: usize,
        requested_page: usize,
    ) -> Self {
        let page_size = page_size.max(1);
        let total_pages = if is_paginated {
            total_rows.div_ceil(page_size).max(1)
        } else {
            1
        };
        Self {
            is_paginated,
            current_page: requested_page.min(total_pages - 1),
            page_size,
            total_rows,
            total_pages,
        }
    }

    /// Leaf rows shown on the current page.
    #[must_use]
    pub fn visible_rows(&self) -> Range<usize> {
        if !self.is_paginated {
            return 0..self.total_rows;
        }
        let start = (self.current_page * self.page_size).min(self.total_rows);
        let end = (start + self.page_size).min(self.total_rows);
        start..end
    }

    #[must_use]
    pub fn has_next(&self) -> bool {
        self.current_page + 1 < self.total_pages
    }
}
