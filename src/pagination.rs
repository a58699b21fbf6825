use serde::{Deserialize, Serialize};

/// Shared query contract for every console table: page/limit plus free-text
/// search and a whitelisted sort pair. Categorical filters stay on the
/// resource's own query struct; both are extracted from the same query string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_dir: Option<String>,
}

impl ListQuery {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(20).clamp(1, 100)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.limit()
    }

    pub fn search_term(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
    }

    /// Resolves the sort pair against a column whitelist. Unknown columns fall
    /// back to the caller's default rather than erroring; direction is `asc`
    /// only when asked for explicitly.
    pub fn sort<'a>(&'a self, allowed: &[&'a str], default: &'a str) -> (&'a str, &'static str) {
        let column = self
            .sort_by
            .as_deref()
            .filter(|candidate| allowed.contains(candidate))
            .unwrap_or(default);
        let direction = match self.sort_dir.as_deref() {
            Some("asc") => "ASC",
            _ => "DESC",
        };
        (column, direction)
    }

    // The table convention: any change to search, sort, or page size lands
    // the viewer back on page 1. Only set_page leaves the rest untouched.

    pub fn set_search(&mut self, search: Option<String>) {
        self.search = search;
        self.page = Some(1);
    }

    pub fn set_sort(&mut self, sort_by: Option<String>, sort_dir: Option<String>) {
        self.sort_by = sort_by;
        self.sort_dir = sort_dir;
        self.page = Some(1);
    }

    pub fn set_limit(&mut self, limit: i64) {
        self.limit = Some(limit);
        self.page = Some(1);
    }

    /// Used by resource handlers when a categorical filter changes; the reset
    /// rule is the same as for search and sort.
    pub fn reset_page(&mut self) {
        self.page = Some(1);
    }

    pub fn set_page(&mut self, page: i64) {
        self.page = Some(page.max(1));
    }
}

/// Window metadata the console renders under each table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageWindow {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub start: i64,
    pub end: i64,
    pub has_prev: bool,
    pub has_next: bool,
}

impl PageWindow {
    pub fn compute(page: i64, limit: i64, total: i64) -> Self {
        let page = page.max(1);
        let limit = limit.max(1);
        let (start, end) = if total == 0 {
            (0, 0)
        } else {
            let start = (page - 1) * limit + 1;
            let end = (page * limit).min(total);
            (start, end)
        };
        PageWindow {
            page,
            limit,
            total,
            start,
            end,
            has_prev: total > 0 && page > 1,
            has_next: end < total,
        }
    }

    pub fn label(&self) -> String {
        format!("Showing {}-{} of {}", self.start, self.end, self.total)
    }
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub window: PageWindow,
    pub label: String,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, query: &ListQuery, total: i64) -> Self {
        let window = PageWindow::compute(query.page(), query.limit(), total);
        let label = window.label();
        Page {
            items,
            window,
            label,
        }
    }
}
