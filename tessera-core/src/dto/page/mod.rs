//! Pagination DTOs

use serde::{Deserialize, Serialize};

/// Default page size when a caller does not ask for one
pub const DEFAULT_PAGE_LIMIT: u32 = 50;

/// Largest page a caller may ask for
pub const MAX_PAGE_LIMIT: u32 = 200;

/// One page of results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Opaque token for the next page; absent on the last page
    pub next_page_token: Option<String>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_page_token: None,
        }
    }

    /// Transforms every item while keeping the page cursor
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            next_page_token: self.next_page_token,
        }
    }
}

/// Cursor parameters accepted by paged endpoints
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageQuery {
    pub page_token: Option<String>,
    pub limit: Option<u32>,
}
