//! Search filters.
//!
//! Filters are predicates the kernel evaluates on candidate ids during
//! traversal. They come as tagged variants instead of dynamic functors so
//! each kernel can advertise which variants it supports.

use std::collections::BTreeSet;

use shardvec_core::VectorId;

/// One filter predicate.
#[derive(Debug, Clone)]
pub enum SearchFilter {
    /// Allow ids in `[min_vector_id, max_vector_id)`. Derived from the
    /// region range; always pushed into the kernel alongside user filters.
    Range {
        /// Inclusive minimum id
        min_vector_id: VectorId,
        /// Exclusive maximum id
        max_vector_id: VectorId,
    },
    /// Allow exactly this id set.
    IdList(BTreeSet<VectorId>),
}

impl SearchFilter {
    /// Build an id-list filter from any iterator of ids.
    pub fn id_list(ids: impl IntoIterator<Item = VectorId>) -> Self {
        SearchFilter::IdList(ids.into_iter().collect())
    }

    /// True if `id` passes this filter.
    pub fn matches(&self, id: VectorId) -> bool {
        match self {
            SearchFilter::Range {
                min_vector_id,
                max_vector_id,
            } => *min_vector_id <= id && id < *max_vector_id,
            SearchFilter::IdList(ids) => ids.contains(&id),
        }
    }
}

/// Conjunction of filters: a candidate must pass every one.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    filters: Vec<SearchFilter>,
}

impl FilterSet {
    /// Empty set; matches everything.
    pub fn new() -> Self {
        FilterSet {
            filters: Vec::new(),
        }
    }

    /// Add a filter.
    pub fn push(&mut self, filter: SearchFilter) {
        self.filters.push(filter);
    }

    /// The contained filters.
    pub fn filters(&self) -> &[SearchFilter] {
        &self.filters
    }

    /// True if `id` passes every filter.
    pub fn matches(&self, id: VectorId) -> bool {
        self.filters.iter().all(|f| f.matches(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_filter_half_open() {
        let filter = SearchFilter::Range {
            min_vector_id: 10,
            max_vector_id: 20,
        };
        assert!(filter.matches(10));
        assert!(filter.matches(19));
        assert!(!filter.matches(20));
        assert!(!filter.matches(9));
    }

    #[test]
    fn test_id_list_filter() {
        let filter = SearchFilter::id_list([1, 3, 5]);
        assert!(filter.matches(3));
        assert!(!filter.matches(2));
    }

    #[test]
    fn test_filter_set_conjunction() {
        let mut set = FilterSet::new();
        assert!(set.matches(42));

        set.push(SearchFilter::Range {
            min_vector_id: 0,
            max_vector_id: 10,
        });
        set.push(SearchFilter::id_list([5, 15]));

        assert!(set.matches(5));
        assert!(!set.matches(15)); // outside range
        assert!(!set.matches(6)); // outside id list
    }
}
