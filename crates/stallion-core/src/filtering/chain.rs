use super::{FilterCache, FilterOperator, Pager, SortDirection};
use crate::model::Model;
use crate::types::FieldValue;
use std::cmp::Ordering;
use std::sync::Arc;

// =============================================================================
// FILTER OPERATION
// =============================================================================

/// One predicate of a chain. A non-empty `alternatives` list turns the
/// operation into an OR group and the own field/operator are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterOperation {
    pub field: String,
    pub operator: FilterOperator,
    pub value: FieldValue,
    /// Candidate list for `FilterOperator::In`.
    pub values: Vec<FieldValue>,
    pub case_insensitive: bool,
    pub exclude: bool,
    pub alternatives: Vec<FilterOperation>,
}

impl FilterOperation {
    #[must_use]
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: FieldValue) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
            values: Vec::new(),
            case_insensitive: false,
            exclude: false,
            alternatives: Vec::new(),
        }
    }

    #[must_use]
    pub fn one_of(field: impl Into<String>, values: Vec<FieldValue>) -> Self {
        Self {
            values,
            ..Self::new(field, FilterOperator::In, FieldValue::Null)
        }
    }

    #[must_use]
    pub fn any(alternatives: Vec<FilterOperation>) -> Self {
        Self {
            alternatives,
            ..Self::new("", FilterOperator::Equal, FieldValue::Null)
        }
    }

    #[must_use]
    pub fn ignore_case(mut self) -> Self {
        self.case_insensitive = true;
        self
    }

    #[must_use]
    pub fn negated(mut self) -> Self {
        self.exclude = !self.exclude;
        self
    }

    #[must_use]
    pub fn matches<T: Model>(&self, item: &T) -> bool {
        let hit = if self.alternatives.is_empty() {
            self.matches_condition(&item.value_of(&self.field))
        } else {
            self.alternatives.iter().any(|alt| alt.matches(item))
        };
        hit != self.exclude
    }

    fn matches_condition(&self, actual: &FieldValue) -> bool {
        if self.operator == FilterOperator::In {
            return self
                .values
                .iter()
                .any(|candidate| self.equal(actual, &candidate.coerce_to(actual)));
        }
        if actual.is_null() || self.value.is_null() {
            return match self.operator {
                FilterOperator::Equal => actual.is_null() && self.value.is_null(),
                FilterOperator::NotEqual => actual.is_null() != self.value.is_null(),
                _ => false,
            };
        }

        let expected = self.value.coerce_to(actual);
        let comparable = std::mem::discriminant(actual) == std::mem::discriminant(&expected);
        match self.operator {
            FilterOperator::Equal => self.equal(actual, &expected),
            FilterOperator::NotEqual => !self.equal(actual, &expected),
            // Values of different kinds have no order.
            _ if !comparable && self.operator != FilterOperator::Like => false,
            FilterOperator::LessThan => actual.cmp(&expected) == Ordering::Less,
            FilterOperator::LessThanOrEqual => actual.cmp(&expected) != Ordering::Greater,
            FilterOperator::GreaterThan => actual.cmp(&expected) == Ordering::Greater,
            FilterOperator::GreaterThanOrEqual => actual.cmp(&expected) != Ordering::Less,
            FilterOperator::Like => actual
                .to_string()
                .to_lowercase()
                .contains(&expected.to_string().to_lowercase()),
            FilterOperator::In => false,
        }
    }

    fn equal(&self, actual: &FieldValue, expected: &FieldValue) -> bool {
        if self.case_insensitive {
            actual.folded() == expected.folded()
        } else {
            actual == expected
        }
    }

    fn cache_fragment(&self) -> String {
        if !self.alternatives.is_empty() {
            let parts: Vec<String> = self
                .alternatives
                .iter()
                .map(FilterOperation::cache_fragment)
                .collect();
            return format!("{}any({})", if self.exclude { "!" } else { "" }, parts.join("|"));
        }
        let values: Vec<String> = self.values.iter().map(|v| format!("{:?}", v)).collect();
        format!(
            "{}{}{}{:?}[{}]{}",
            if self.exclude { "!" } else { "" },
            self.field,
            self.operator,
            self.value,
            values.join(","),
            if self.case_insensitive { "/i" } else { "" }
        )
    }
}

// =============================================================================
// FILTER CHAIN
// =============================================================================

/// Filter, sort and page over a snapshot of entities.
///
/// The chain owns detached clones, so results never alias stash originals.
/// Deleted entities are skipped unless `include_deleted` is set.
#[derive(Debug, Clone)]
pub struct FilterChain<T> {
    bucket: String,
    source: Vec<T>,
    operations: Vec<FilterOperation>,
    sorts: Vec<(String, SortDirection)>,
    include_deleted: bool,
    /// Target cache and the bucket generation the snapshot was taken at.
    cache: Option<(Arc<FilterCache>, u64)>,
}

impl<T: Model> FilterChain<T> {
    #[must_use]
    pub fn new(bucket: impl Into<String>, source: Vec<T>) -> Self {
        Self {
            bucket: bucket.into(),
            source,
            operations: Vec::new(),
            sorts: Vec::new(),
            include_deleted: false,
            cache: None,
        }
    }

    /// Cache terminal results in `cache` under this chain's bucket, at the
    /// bucket's current generation.
    #[must_use]
    pub fn with_cache(self, cache: Arc<FilterCache>) -> Self {
        let generation = cache.generation(&self.bucket);
        self.with_cache_at(cache, generation)
    }

    /// Cache terminal results at `generation`, read before the source
    /// snapshot was taken. Once the bucket is cleared past it, the chain
    /// neither serves nor stores cached results.
    #[must_use]
    pub fn with_cache_at(mut self, cache: Arc<FilterCache>, generation: u64) -> Self {
        self.cache = Some((cache, generation));
        self
    }

    #[must_use]
    pub fn use_cache(mut self, enabled: bool) -> Self {
        if !enabled {
            self.cache = None;
        }
        self
    }

    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    #[must_use]
    pub fn operations(&self) -> &[FilterOperation] {
        &self.operations
    }

    #[must_use]
    pub fn filter(self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.filter_by(field, value, FilterOperator::Equal)
    }

    #[must_use]
    pub fn filter_by(self, field: &str, value: impl Into<FieldValue>, op: FilterOperator) -> Self {
        self.apply(FilterOperation::new(field, op, value.into()))
    }

    /// Equality where text values are compared lower-cased.
    #[must_use]
    pub fn filter_ignore_case(self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.apply(FilterOperation::new(field, FilterOperator::Equal, value.into()).ignore_case())
    }

    #[must_use]
    pub fn filter_in(self, field: &str, values: Vec<FieldValue>) -> Self {
        self.apply(FilterOperation::one_of(field, values))
    }

    #[must_use]
    pub fn exclude(self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.exclude_by(field, value, FilterOperator::Equal)
    }

    #[must_use]
    pub fn exclude_by(self, field: &str, value: impl Into<FieldValue>, op: FilterOperator) -> Self {
        self.apply(FilterOperation::new(field, op, value.into()).negated())
    }

    /// Match entities for which at least one of `alternatives` holds.
    #[must_use]
    pub fn any_of(self, alternatives: Vec<FilterOperation>) -> Self {
        self.apply(FilterOperation::any(alternatives))
    }

    /// Case-insensitive substring search across `fields`.
    #[must_use]
    pub fn search(self, text: &str, fields: &[&str]) -> Self {
        let alternatives = fields
            .iter()
            .map(|field| FilterOperation::new(*field, FilterOperator::Like, text.into()))
            .collect();
        self.any_of(alternatives)
    }

    #[must_use]
    pub fn sort(mut self, field: &str, direction: SortDirection) -> Self {
        self.sorts.push((field.to_string(), direction));
        self
    }

    #[must_use]
    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    /// Append a prebuilt operation.
    #[must_use]
    pub fn apply(mut self, operation: FilterOperation) -> Self {
        self.operations.push(operation);
        self
    }

    // =========================================================================
    // TERMINAL OPERATIONS
    // =========================================================================

    #[must_use]
    pub fn all(&self) -> Vec<T> {
        self.cached("all", || self.process())
    }

    #[must_use]
    pub fn first(&self) -> Option<T> {
        self.cached("first", || self.process().into_iter().next())
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.cached("count", || self.matching().count())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    #[must_use]
    pub fn pager(&self, page: usize, items_per_page: usize) -> Pager<T> {
        let method = format!("pager:{}:{}", page, items_per_page);
        self.cached(&method, || {
            Pager::paginate(&self.process(), page, items_per_page)
        })
    }

    /// Values of one field for every matching entity, in result order.
    #[must_use]
    pub fn column(&self, field: &str) -> Vec<FieldValue> {
        self.process().iter().map(|item| item.value_of(field)).collect()
    }

    fn matching(&self) -> impl Iterator<Item = &T> {
        self.source.iter().filter(|item| {
            (self.include_deleted || !item.is_deleted())
                && self.operations.iter().all(|op| op.matches(*item))
        })
    }

    fn process(&self) -> Vec<T> {
        let mut items: Vec<T> = self.matching().cloned().collect();
        if !self.sorts.is_empty() {
            items.sort_by(|a, b| self.compare(a, b));
        }
        items
    }

    fn compare(&self, a: &T, b: &T) -> Ordering {
        for (field, direction) in &self.sorts {
            let ordering = a.value_of(field).cmp(&b.value_of(field));
            let ordering = match direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    fn cache_key(&self, method: &str) -> String {
        let ops: Vec<String> = self
            .operations
            .iter()
            .map(FilterOperation::cache_fragment)
            .collect();
        let sorts: Vec<String> = self
            .sorts
            .iter()
            .map(|(field, direction)| format!("{}:{}", field, direction))
            .collect();
        format!(
            "{}|{}|{}|deleted={}",
            method,
            ops.join("&"),
            sorts.join(","),
            self.include_deleted
        )
    }

    fn cached<V: Clone + Send + Sync + 'static>(&self, method: &str, compute: impl FnOnce() -> V) -> V {
        let Some((cache, generation)) = &self.cache else {
            return compute();
        };
        let key = self.cache_key(method);
        if let Some(hit) = cache.get::<V>(&self.bucket, &key, *generation) {
            return hit;
        }
        let value = compute();
        cache.set(&self.bucket, &key, *generation, value.clone());
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MappedModel;
    use crate::types::ModelId;
    use std::time::Duration;

    fn item(id: u64, title: &str, views: i64) -> MappedModel {
        let mut m = MappedModel::new().with("title", title).with("views", views);
        m.meta.id = Some(ModelId(id));
        m
    }

    fn chain() -> FilterChain<MappedModel> {
        let mut deleted = item(4, "Gone", 100);
        deleted.meta.deleted = true;
        FilterChain::new(
            "articles",
            vec![
                item(1, "Hello World", 10),
                item(2, "Rust Tips", 30),
                item(3, "hello again", 20).with("author", "ada"),
                deleted,
            ],
        )
    }

    fn ids(items: &[MappedModel]) -> Vec<u64> {
        items.iter().filter_map(|m| m.meta.id).map(|id| id.0).collect()
    }

    #[test]
    fn deleted_hidden_by_default() {
        assert_eq!(chain().count(), 3);
        assert_eq!(chain().include_deleted().count(), 4);
    }

    #[test]
    fn untyped_text_coerced_to_int() {
        let found = chain().filter("views", "30").all();
        assert_eq!(ids(&found), vec![2]);
    }

    #[test]
    fn comparison_operators() {
        let found = chain()
            .filter_by("views", 20, FilterOperator::GreaterThanOrEqual)
            .all();
        assert_eq!(ids(&found), vec![2, 3]);
        let found = chain().filter_by("views", 20, FilterOperator::LessThan).all();
        assert_eq!(ids(&found), vec![1]);
    }

    #[test]
    fn like_is_case_insensitive_contains() {
        let found = chain().filter_by("title", "HELLO", FilterOperator::Like).all();
        assert_eq!(ids(&found), vec![1, 3]);
    }

    #[test]
    fn null_field_fails_non_null_filter() {
        let found = chain().filter("author", "ada").all();
        assert_eq!(ids(&found), vec![3]);
        let found = chain().filter("author", FieldValue::Null).all();
        assert_eq!(ids(&found), vec![1, 2]);
        assert_eq!(
            chain()
                .filter_by("author", "a", FilterOperator::GreaterThan)
                .count(),
            1
        );
    }

    #[test]
    fn exclude_and_in() {
        let found = chain().exclude("views", 10).all();
        assert_eq!(ids(&found), vec![2, 3]);
        let found = chain()
            .filter_in("views", vec![FieldValue::Int(10), FieldValue::from("20")])
            .all();
        assert_eq!(ids(&found), vec![1, 3]);
    }

    #[test]
    fn any_of_and_search() {
        let found = chain()
            .any_of(vec![
                FilterOperation::new("views", FilterOperator::Equal, FieldValue::Int(10)),
                FilterOperation::new("views", FilterOperator::Equal, FieldValue::Int(30)),
            ])
            .all();
        assert_eq!(ids(&found), vec![1, 2]);
        assert_eq!(chain().search("tips", &["title", "author"]).count(), 1);
    }

    #[test]
    fn sort_and_page() {
        let sorted = chain().sort("views", SortDirection::Desc).all();
        assert_eq!(ids(&sorted), vec![2, 3, 1]);

        let page = chain().sort("views", SortDirection::Asc).pager(2, 2);
        assert_eq!(ids(&page.items), vec![2]);
        assert_eq!(page.page_count, 2);
        assert!(page.has_previous_page());
    }

    #[test]
    fn filter_by_builtin_id() {
        assert_eq!(ids(&chain().filter("id", 2).all()), vec![2]);
        assert_eq!(chain().column("title").len(), 3);
    }

    #[test]
    fn ignore_case_equality() {
        assert_eq!(chain().filter_ignore_case("title", "RUST TIPS").count(), 1);
        assert_eq!(chain().filter("title", "RUST TIPS").count(), 0);
    }

    #[test]
    fn results_are_cached_until_cleared() {
        let cache = Arc::new(FilterCache::new(Duration::from_secs(60)));
        let first = chain().with_cache(Arc::clone(&cache)).filter("views", 10).count();
        assert_eq!(first, 1);

        // Same operations over a different snapshot hit the cached value.
        let stale = FilterChain::<MappedModel>::new("articles", Vec::new())
            .with_cache(Arc::clone(&cache))
            .filter("views", 10)
            .count();
        assert_eq!(stale, 1);

        cache.clear_bucket("articles");
        let fresh = FilterChain::<MappedModel>::new("articles", Vec::new())
            .with_cache(cache)
            .filter("views", 10)
            .count();
        assert_eq!(fresh, 0);
    }

    #[test]
    fn chain_from_before_a_clear_does_not_repopulate_cache() {
        let cache = Arc::new(FilterCache::new(Duration::from_secs(60)));
        let held = chain().with_cache(Arc::clone(&cache)).filter("views", 10);
        cache.clear_bucket("articles");

        // The held snapshot still answers, but its result is not stored.
        assert_eq!(held.count(), 1);
        assert_eq!(cache.len("articles"), 0);

        let fresh = FilterChain::<MappedModel>::new("articles", Vec::new())
            .with_cache(Arc::clone(&cache))
            .filter("views", 10)
            .count();
        assert_eq!(fresh, 0);
        assert_eq!(cache.len("articles"), 1);
    }

    #[test]
    fn ordered_comparison_across_kinds_matches_nothing() {
        assert_eq!(chain().filter_by("views", "abc", FilterOperator::LessThan).count(), 0);
        assert_eq!(
            chain()
                .filter_by("views", "abc", FilterOperator::GreaterThanOrEqual)
                .count(),
            0
        );
        assert_eq!(chain().filter_by("views", "25", FilterOperator::GreaterThan).count(), 1);
    }
}
