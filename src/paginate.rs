//! Page metadata and trailing-cursor handling.
//!
//! Every page is fetched as `limit + 1` rows ordered by primary key; the
//! extra row only exists to tell whether another page follows, and its key
//! becomes `next_cursor`.

use crate::backend::Attributes;
use crate::error::{OrmError, Result};
use serde::Serialize;
use serde_json::Value;

/// Where a page starts
#[derive(Debug, Clone, PartialEq)]
pub enum PageMode {
    /// 1-based page number, translated to an offset
    Page(usize),
    /// Keyset mode: rows whose primary key is at or after the cursor
    After(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaginateOptions {
    /// Rows per page; the configured default page size when `None`
    pub limit: Option<usize>,
    pub mode: PageMode,
}

impl Default for PaginateOptions {
    fn default() -> Self {
        Self {
            limit: None,
            mode: PageMode::Page(1),
        }
    }
}

impl PaginateOptions {
    pub fn page(page: usize, limit: usize) -> Self {
        Self {
            limit: Some(limit),
            mode: PageMode::Page(page),
        }
    }

    pub fn after(cursor: impl Into<Value>, limit: usize) -> Self {
        Self {
            limit: Some(limit),
            mode: PageMode::After(cursor.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Paging {
    pub total_records: u64,
    pub page: usize,
    pub total_pages: u64,
}

/// One page of results
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub paging: Paging,
    pub next_cursor: Option<Value>,
}

impl<T> Page<T> {
    pub fn has_more(&self) -> bool {
        self.next_cursor.is_some()
    }
}

pub fn total_pages(total_records: u64, limit: usize) -> u64 {
    if limit == 0 {
        return 0;
    }
    total_records.div_ceil(limit as u64)
}

/// Offset of a 1-based page; page 0 is treated as page 1
pub fn page_offset(page: usize, limit: usize) -> usize {
    page.saturating_sub(1).saturating_mul(limit)
}

pub(crate) fn check_limit(limit: usize) -> Result<usize> {
    if limit == 0 {
        return Err(OrmError::Query("page limit must be positive".to_string()));
    }
    Ok(limit)
}

/// Drop the lookahead row, if it was fetched, and return its key as the
/// next cursor
pub fn split_lookahead(
    mut rows: Vec<Attributes>,
    limit: usize,
    primary_key: &str,
) -> (Vec<Attributes>, Option<Value>) {
    if rows.len() > limit {
        let extra = rows.split_off(limit);
        let cursor = extra
            .into_iter()
            .next()
            .and_then(|row| row.get(primary_key).cloned());
        (rows, cursor)
    } else {
        (rows, None)
    }
}
