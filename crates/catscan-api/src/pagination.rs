//! Cursor types for paginated list endpoints

use serde::{Deserialize, Serialize};
use std::fmt;

/// Resumption token for a paginated walk
///
/// Persist the cursor of the last page you fully processed and hand it back
/// to `paginate` to resume after a crash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PageCursor {
    /// Server-issued opaque cursor, sent as `page[cursor]`
    Opaque(String),
    /// Page number, sent as `page[number]`
    Page(u64),
}

impl PageCursor {
    /// Query parameter that requests the page this cursor points at
    #[must_use]
    pub fn query_pair(&self) -> (&'static str, String) {
        match self {
            Self::Opaque(token) => ("page[cursor]", token.clone()),
            Self::Page(number) => ("page[number]", number.to_string()),
        }
    }
}

impl fmt::Display for PageCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Opaque(token) => write!(f, "cursor:{token}"),
            Self::Page(number) => write!(f, "page:{number}"),
        }
    }
}

/// One fetched page of a list endpoint
#[derive(Debug, Clone)]
pub struct Page {
    /// Cursor that fetched this page; `None` for the first page
    pub cursor: Option<PageCursor>,
    /// Cursor for the following page; `None` on the last page
    pub next: Option<PageCursor>,
    /// Decoded JSON body
    pub body: serde_json::Value,
}

impl Page {
    /// Whether this is the final page of the walk
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.next.is_none()
    }
}
