use crate::dto::common::PaginationParams;
use crate::error::Result;
use crate::models::RacerField;
use crate::store::{Document, SortDirection};

pub type RacerSort = Vec<(RacerField, SortDirection)>;

/// Everything `paginate` needs: paging, an equality filter and a sort order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageRequest {
    pub pagination: PaginationParams,
    pub filter: Document,
    pub sort: RacerSort,
}

impl PageRequest {
    pub fn new(pagination: PaginationParams) -> Self {
        Self {
            pagination,
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, filter: Document) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_sort(mut self, sort: RacerSort) -> Self {
        self.sort = sort;
        self
    }
}

/// Parse a sort order such as `"number:desc,last_name"`.
///
/// Direction defaults to ascending. Unknown fields are skipped; an unknown
/// direction is an error.
pub fn parse_sort(order: &str) -> Result<RacerSort> {
    let mut sort = RacerSort::new();

    for part in order.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (name, direction) = match part.split_once(':') {
            Some((name, direction)) => (name.trim(), direction.parse::<SortDirection>()?),
            None => (part, SortDirection::Ascending),
        };

        match name.parse::<RacerField>() {
            Ok(field) => sort.push((field, direction)),
            Err(_) => tracing::debug!(field = name, "ignoring unknown sort field"),
        }
    }

    Ok(sort)
}
