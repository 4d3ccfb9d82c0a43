use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::aggregate::CustomerRecord;
use super::value_objects::{CustomerStatus, CustomerType};

// ============================================================================
// Query Shapes - filters, pages and statistics
// ============================================================================

pub const DEFAULT_PAGE_SIZE: u32 = 20;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    #[error("Page must be at least 1, got {0}")]
    InvalidPage(u32),

    #[error("Page size must be greater than 0")]
    InvalidPageSize,

    #[error("Date range is inverted: {from} is after {to}")]
    InvertedDateRange {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
}

pub fn validate_paging(page: u32, page_size: u32) -> Result<(), QueryError> {
    if page < 1 {
        return Err(QueryError::InvalidPage(page));
    }
    if page_size == 0 {
        return Err(QueryError::InvalidPageSize);
    }
    Ok(())
}

/// Composed predicate, built per query. Unset fields match everything;
/// when `status` is unset, deleted customers are left out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerSearchFilter {
    pub search_text: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub customer_type: Option<CustomerType>,
    pub status: Option<CustomerStatus>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub page: u32,
    pub page_size: u32,
}

impl Default for CustomerSearchFilter {
    fn default() -> Self {
        Self {
            search_text: None,
            city: None,
            state: None,
            customer_type: None,
            status: None,
            created_from: None,
            created_to: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl CustomerSearchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.search_text = Some(text.into());
        self
    }

    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_type(mut self, customer_type: CustomerType) -> Self {
        self.customer_type = Some(customer_type);
        self
    }

    pub fn with_status(mut self, status: CustomerStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn created_between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.created_from = Some(from);
        self.created_to = Some(to);
        self
    }

    pub fn page(mut self, page: u32, page_size: u32) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        validate_paging(self.page, self.page_size)?;
        if let (Some(from), Some(to)) = (self.created_from, self.created_to) {
            if from > to {
                return Err(QueryError::InvertedDateRange { from, to });
            }
        }
        Ok(())
    }

    pub fn matches(&self, record: &CustomerRecord) -> bool {
        let status_ok = match self.status {
            Some(status) => record.status == status,
            None => record.status != CustomerStatus::Deleted,
        };

        status_ok
            && self.customer_type.map_or(true, |t| record.customer_type == t)
            && eq_ignore_case(self.city.as_deref(), record.city.as_deref())
            && eq_ignore_case(self.state.as_deref(), record.state.as_deref())
            && self.created_from.map_or(true, |from| record.created_at >= from)
            && self.created_to.map_or(true, |to| record.created_at <= to)
            && self.search_text.as_deref().map_or(true, |text| text_matches(text, record))
    }
}

fn eq_ignore_case(wanted: Option<&str>, actual: Option<&str>) -> bool {
    match wanted {
        None => true,
        Some(wanted) => actual.is_some_and(|actual| actual.eq_ignore_ascii_case(wanted.trim())),
    }
}

/// Case-insensitive substring match over name, email, city and state
fn text_matches(text: &str, record: &CustomerRecord) -> bool {
    let needle = text.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }

    [
        Some(record.first_name.as_str()),
        Some(record.last_name.as_str()),
        Some(record.email.as_str()),
        record.city.as_deref(),
        record.state.as_deref(),
    ]
    .into_iter()
    .flatten()
    .any(|field| field.to_lowercase().contains(&needle))
}

/// Read-only snapshot of one page of results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    /// Matches across all pages
    pub total_count: u64,
    pub page: u32,
    pub page_size: u32,
}

impl<T> PagedResult<T> {
    pub fn new(items: Vec<T>, total_count: u64, page: u32, page_size: u32) -> Self {
        Self { items, total_count, page, page_size }
    }

    /// Slice one page out of an already ordered, already filtered list
    pub fn paginate(all: Vec<T>, page: u32, page_size: u32) -> Self {
        let total_count = all.len() as u64;
        let skip = (page.saturating_sub(1) as usize).saturating_mul(page_size as usize);
        let items = all.into_iter().skip(skip).take(page_size as usize).collect();
        Self::new(items, total_count, page, page_size)
    }

    pub fn total_pages(&self) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        self.total_count.div_ceil(self.page_size as u64)
    }

    pub fn has_next_page(&self) -> bool {
        (self.page as u64) < self.total_pages()
    }

    pub fn has_previous_page(&self) -> bool {
        self.page > 1
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PagedResult<U> {
        PagedResult {
            items: self.items.into_iter().map(f).collect(),
            total_count: self.total_count,
            page: self.page,
            page_size: self.page_size,
        }
    }
}

/// Computed projection; never stored as a source of truth.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerStatistics {
    pub total: u64,
    pub active: u64,
    pub inactive: u64,
    pub deleted: u64,
    pub by_type: BTreeMap<String, u64>,
    pub by_city: BTreeMap<String, u64>,
    pub by_state: BTreeMap<String, u64>,
}

impl CustomerStatistics {
    /// `by_*` breakdowns only count customers that are not deleted
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a CustomerRecord>) -> Self {
        let mut stats = Self::default();

        for record in records {
            stats.total += 1;
            match record.status {
                CustomerStatus::Active => stats.active += 1,
                CustomerStatus::Inactive => stats.inactive += 1,
                CustomerStatus::Deleted => {
                    stats.deleted += 1;
                    continue;
                }
            }

            *stats.by_type.entry(record.customer_type.as_str().to_string()).or_default() += 1;
            if let Some(city) = &record.city {
                *stats.by_city.entry(location_key(city)).or_default() += 1;
            }
            if let Some(state) = &record.state {
                *stats.by_state.entry(location_key(state)).or_default() += 1;
            }
        }

        stats
    }
}

/// Cities and states are grouped the way they are queried: case-insensitively
fn location_key(value: &str) -> String {
    value.trim().to_lowercase()
}
