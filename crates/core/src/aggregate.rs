//! Aggregate facade: a queryable, mutable collection of entities.
//!
//! An aggregate wraps the set of entities of one type held in some storage.
//! Filtering, ordering, slicing, counting, lookup, adding and removing are all
//! delegated to an [`AggregateImpl`] so the backend can be picked at runtime
//! (in-memory for tests/dev, something persistent elsewhere).

use core::cmp::Ordering;
use core::fmt;
use core::marker::PhantomData;
use std::rc::Rc;

use crate::entity::{Entity, Shared};
use crate::error::DomainResult;

/// Filter specification: a shareable predicate over entities.
pub struct FilterSpec<E> {
    predicate: Rc<dyn Fn(&E) -> bool>,
}

impl<E: 'static> FilterSpec<E> {
    pub fn new(predicate: impl Fn(&E) -> bool + 'static) -> Self {
        Self {
            predicate: Rc::new(predicate),
        }
    }

    pub fn matches(&self, entity: &E) -> bool {
        (self.predicate)(entity)
    }

    pub fn and(self, other: FilterSpec<E>) -> Self {
        Self::new(move |e| self.matches(e) && other.matches(e))
    }

    pub fn or(self, other: FilterSpec<E>) -> Self {
        Self::new(move |e| self.matches(e) || other.matches(e))
    }

    pub fn negate(self) -> Self {
        Self::new(move |e| !self.matches(e))
    }
}

impl<E> Clone for FilterSpec<E> {
    fn clone(&self) -> Self {
        Self {
            predicate: Rc::clone(&self.predicate),
        }
    }
}

impl<E> fmt::Debug for FilterSpec<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FilterSpec(..)")
    }
}

/// Order specification: a shareable comparator over entities.
pub struct OrderSpec<E> {
    compare: Rc<dyn Fn(&E, &E) -> Ordering>,
}

impl<E: 'static> OrderSpec<E> {
    pub fn new(compare: impl Fn(&E, &E) -> Ordering + 'static) -> Self {
        Self {
            compare: Rc::new(compare),
        }
    }

    /// Ascending order on a derived key.
    pub fn by_key<K: Ord>(key: impl Fn(&E) -> K + 'static) -> Self {
        Self::new(move |a, b| key(a).cmp(&key(b)))
    }

    pub fn compare(&self, a: &E, b: &E) -> Ordering {
        (self.compare)(a, b)
    }

    /// Break ties with `other`.
    pub fn then(self, other: OrderSpec<E>) -> Self {
        Self::new(move |a, b| self.compare(a, b).then_with(|| other.compare(a, b)))
    }

    pub fn reversed(self) -> Self {
        Self::new(move |a, b| self.compare(b, a))
    }
}

impl<E> Clone for OrderSpec<E> {
    fn clone(&self) -> Self {
        Self {
            compare: Rc::clone(&self.compare),
        }
    }
}

impl<E> fmt::Debug for OrderSpec<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OrderSpec(..)")
    }
}

/// Half-open slice `[start, stop)`; an absent `stop` runs to the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SliceKey {
    pub start: usize,
    pub stop: Option<usize>,
}

impl SliceKey {
    pub fn new(start: usize, stop: Option<usize>) -> Self {
        Self { start, stop }
    }

    /// Apply the slice; out-of-range bounds are clamped.
    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        let stop = self.stop.unwrap_or(usize::MAX);
        items
            .into_iter()
            .skip(self.start)
            .take(stop.saturating_sub(self.start))
            .collect()
    }
}

/// Storage backend behind an [`Aggregate`].
///
/// Implementations must:
/// - apply the filter to every read (`count`, lookups, `entities`)
/// - apply order, then slice, only to `entities`
/// - reject adding an entity whose id is already present
pub trait AggregateImpl<E: Entity> {
    /// Number of entities matching the filter (slice ignored).
    fn count(&self) -> usize;

    fn get_by_id(&self, id: &E::Id) -> Option<Shared<E>>;

    fn get_by_slug(&self, slug: &str) -> Option<Shared<E>>;

    /// Entities after filter, order and slice.
    fn entities(&self) -> Vec<Shared<E>>;

    fn add(&mut self, entity: Shared<E>) -> DomainResult<()>;

    fn remove(&mut self, entity: &Shared<E>) -> DomainResult<()>;

    fn filter(&mut self, spec: Option<FilterSpec<E>>);

    fn filter_spec(&self) -> Option<&FilterSpec<E>>;

    fn order(&mut self, spec: Option<OrderSpec<E>>);

    fn order_spec(&self) -> Option<&OrderSpec<E>>;

    fn slice(&mut self, key: Option<SliceKey>);

    fn slice_key(&self) -> Option<SliceKey>;
}

/// Aggregate of entities of type `E`, backed by implementation `I`.
pub struct Aggregate<E, I> {
    implementation: I,
    _entity: PhantomData<fn() -> E>,
}

impl<E, I> Aggregate<E, I>
where
    E: Entity,
    I: AggregateImpl<E>,
{
    pub fn new(implementation: I) -> Self {
        Self {
            implementation,
            _entity: PhantomData,
        }
    }

    pub fn implementation(&self) -> &I {
        &self.implementation
    }

    pub fn into_implementation(self) -> I {
        self.implementation
    }

    pub fn count(&self) -> usize {
        self.implementation.count()
    }

    /// Entity by id, or `None` (also when the filter excludes it).
    pub fn get_by_id(&self, id: &E::Id) -> Option<Shared<E>> {
        self.implementation.get_by_id(id)
    }

    pub fn get_by_slug(&self, slug: &str) -> Option<Shared<E>> {
        self.implementation.get_by_slug(slug)
    }

    /// Iterate entities with filter, order and slice applied.
    pub fn iter(&self) -> std::vec::IntoIter<Shared<E>> {
        self.implementation.entities().into_iter()
    }

    /// Add an entity; fails with a conflict if its id is already present.
    pub fn add(&mut self, entity: Shared<E>) -> DomainResult<()> {
        self.implementation.add(entity)
    }

    /// Remove an entity; fails with not-found if it is absent.
    pub fn remove(&mut self, entity: &Shared<E>) -> DomainResult<()> {
        self.implementation.remove(entity)
    }

    pub fn filter(&mut self, spec: FilterSpec<E>) {
        self.implementation.filter(Some(spec));
    }

    pub fn clear_filter(&mut self) {
        self.implementation.filter(None);
    }

    pub fn filter_spec(&self) -> Option<&FilterSpec<E>> {
        self.implementation.filter_spec()
    }

    pub fn order(&mut self, spec: OrderSpec<E>) {
        self.implementation.order(Some(spec));
    }

    pub fn order_spec(&self) -> Option<&OrderSpec<E>> {
        self.implementation.order_spec()
    }

    pub fn slice(&mut self, key: SliceKey) {
        self.implementation.slice(Some(key));
    }

    pub fn slice_key(&self) -> Option<SliceKey> {
        self.implementation.slice_key()
    }
}

impl<E, I: Clone> Clone for Aggregate<E, I> {
    fn clone(&self) -> Self {
        Self {
            implementation: self.implementation.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E, I: fmt::Debug> fmt::Debug for Aggregate<E, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregate")
            .field("implementation", &self.implementation)
            .finish()
    }
}
