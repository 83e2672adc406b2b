use std::cell::RefCell;
use std::rc::Rc;

use everest_core::{
    AggregateImpl, DomainError, DomainResult, Entity, FilterSpec, OrderSpec, Shared, SliceKey,
};

/// In-memory aggregate backend.
///
/// Intended for tests/dev. Clones share the underlying entity list but carry
/// their own filter/order/slice settings.
pub struct InMemoryAggregate<E> {
    entities: Rc<RefCell<Vec<Shared<E>>>>,
    filter: Option<FilterSpec<E>>,
    order: Option<OrderSpec<E>>,
    slice: Option<SliceKey>,
}

impl<E: Entity + 'static> InMemoryAggregate<E> {
    pub fn new() -> Self {
        Self {
            entities: Rc::new(RefCell::new(Vec::new())),
            filter: None,
            order: None,
            slice: None,
        }
    }

    pub fn from_entities(entities: impl IntoIterator<Item = Shared<E>>) -> Self {
        let aggregate = Self::new();
        aggregate.entities.borrow_mut().extend(entities);
        aggregate
    }

    fn filtered(&self) -> Vec<Shared<E>> {
        self.entities
            .borrow()
            .iter()
            .filter(|e| self.filter.as_ref().is_none_or(|f| f.matches(&e.borrow())))
            .cloned()
            .collect()
    }
}

impl<E: Entity + 'static> Default for InMemoryAggregate<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for InMemoryAggregate<E> {
    fn clone(&self) -> Self {
        Self {
            entities: Rc::clone(&self.entities),
            filter: self.filter.clone(),
            order: self.order.clone(),
            slice: self.slice,
        }
    }
}

impl<E> core::fmt::Debug for InMemoryAggregate<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryAggregate")
            .field("len", &self.entities.borrow().len())
            .field("filter", &self.filter)
            .field("order", &self.order)
            .field("slice", &self.slice)
            .finish()
    }
}

impl<E: Entity + 'static> AggregateImpl<E> for InMemoryAggregate<E> {
    fn count(&self) -> usize {
        self.filtered().len()
    }

    fn get_by_id(&self, id: &E::Id) -> Option<Shared<E>> {
        self.filtered()
            .into_iter()
            .find(|e| e.borrow().id() == Some(id))
    }

    fn get_by_slug(&self, slug: &str) -> Option<Shared<E>> {
        self.filtered()
            .into_iter()
            .find(|e| e.borrow().slug().as_deref() == Some(slug))
    }

    fn entities(&self) -> Vec<Shared<E>> {
        let mut items = self.filtered();
        if let Some(order) = &self.order {
            items.sort_by(|a, b| order.compare(&a.borrow(), &b.borrow()));
        }
        match self.slice {
            Some(key) => key.apply(items),
            None => items,
        }
    }

    fn add(&mut self, entity: Shared<E>) -> DomainResult<()> {
        let mut entities = self.entities.borrow_mut();
        if entities.iter().any(|e| Rc::ptr_eq(e, &entity)) {
            return Err(DomainError::conflict("entity is already part of the aggregate"));
        }
        if let Some(id) = entity.borrow().id() {
            if entities.iter().any(|e| e.borrow().id() == Some(id)) {
                return Err(DomainError::conflict(format!(
                    "an entity with id {id} already exists"
                )));
            }
        }
        entities.push(entity);
        Ok(())
    }

    fn remove(&mut self, entity: &Shared<E>) -> DomainResult<()> {
        let mut entities = self.entities.borrow_mut();
        let position = entities.iter().position(|e| {
            Rc::ptr_eq(e, entity)
                || matches!(
                    (e.borrow().id(), entity.borrow().id()),
                    (Some(a), Some(b)) if a == b
                )
        });
        match position {
            Some(idx) => {
                entities.remove(idx);
                Ok(())
            }
            None => Err(DomainError::not_found(format!(
                "entity {:?} is not part of the aggregate",
                entity.borrow().slug()
            ))),
        }
    }

    fn filter(&mut self, spec: Option<FilterSpec<E>>) {
        self.filter = spec;
    }

    fn filter_spec(&self) -> Option<&FilterSpec<E>> {
        self.filter.as_ref()
    }

    fn order(&mut self, spec: Option<OrderSpec<E>>) {
        self.order = spec;
    }

    fn order_spec(&self) -> Option<&OrderSpec<E>> {
        self.order.as_ref()
    }

    fn slice(&mut self, key: Option<SliceKey>) {
        self.slice = key;
    }

    fn slice_key(&self) -> Option<SliceKey> {
        self.slice
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Widget;
    use everest_core::{Aggregate, EntityId, shared};

    fn widget(name: &str, size: i64) -> Shared<Widget> {
        let mut w = Widget::named(name);
        w.id = Some(EntityId::new());
        w.size = size;
        shared(w)
    }

    fn names(aggregate: &Aggregate<Widget, InMemoryAggregate<Widget>>) -> Vec<String> {
        aggregate.iter().map(|w| w.borrow().name.clone()).collect()
    }

    fn populated() -> Aggregate<Widget, InMemoryAggregate<Widget>> {
        let mut aggregate = Aggregate::new(InMemoryAggregate::new());
        for (name, size) in [("c", 3), ("a", 1), ("d", 4), ("b", 2)] {
            aggregate.add(widget(name, size)).unwrap();
        }
        aggregate
    }

    #[test]
    fn add_and_lookup() {
        let aggregate = populated();
        assert_eq!(aggregate.count(), 4);

        let first = aggregate.iter().next().unwrap();
        let id = first.borrow().id.unwrap();
        let by_id = aggregate.get_by_id(&id).unwrap();
        assert!(Rc::ptr_eq(&by_id, &first));

        let by_slug = aggregate.get_by_slug(&id.to_string()).unwrap();
        assert!(Rc::ptr_eq(&by_slug, &first));
        assert!(aggregate.get_by_id(&EntityId::new()).is_none());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut aggregate = populated();
        let existing = aggregate.iter().next().unwrap();

        let err = aggregate.add(Rc::clone(&existing)).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));

        let mut twin = Widget::named("twin");
        twin.id = existing.borrow().id;
        let err = aggregate.add(shared(twin)).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));

        // Entities without ids never clash.
        aggregate.add(shared(Widget::named("x"))).unwrap();
        aggregate.add(shared(Widget::named("y"))).unwrap();
        assert_eq!(aggregate.count(), 6);
    }

    #[test]
    fn remove_by_identity_or_id() {
        let mut aggregate = populated();
        let first = aggregate.iter().next().unwrap();
        aggregate.remove(&first).unwrap();
        assert_eq!(aggregate.count(), 3);

        let err = aggregate.remove(&first).unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));

        let second = aggregate.iter().next().unwrap();
        let mut lookalike = Widget::named("other");
        lookalike.id = second.borrow().id;
        aggregate.remove(&shared(lookalike)).unwrap();
        assert_eq!(aggregate.count(), 2);
    }

    #[test]
    fn filter_order_slice_pipeline() {
        let mut aggregate = populated();
        aggregate.order(OrderSpec::by_key(|w: &Widget| w.name.clone()));
        assert_eq!(names(&aggregate), vec!["a", "b", "c", "d"]);

        aggregate.filter(FilterSpec::new(|w: &Widget| w.size > 1));
        assert_eq!(names(&aggregate), vec!["b", "c", "d"]);

        aggregate.slice(SliceKey::new(1, Some(3)));
        assert_eq!(names(&aggregate), vec!["c", "d"]);
        // Count honours the filter but not the slice.
        assert_eq!(aggregate.count(), 3);
        assert_eq!(aggregate.slice_key(), Some(SliceKey::new(1, Some(3))));

        aggregate.clear_filter();
        assert!(aggregate.filter_spec().is_none());
        assert_eq!(names(&aggregate), vec!["b", "c"]);
    }

    #[test]
    fn lookups_respect_the_filter() {
        let mut aggregate = populated();
        let small = aggregate
            .iter()
            .find(|w| w.borrow().size == 1)
            .unwrap();
        let id = small.borrow().id.unwrap();

        aggregate.filter(FilterSpec::new(|w: &Widget| w.size > 1));
        assert!(aggregate.get_by_id(&id).is_none());
        assert!(aggregate.get_by_slug(&id.to_string()).is_none());
    }

    #[test]
    fn clones_share_entities_not_settings() {
        let mut aggregate = populated();
        let mut view = aggregate.clone();
        view.filter(FilterSpec::new(|w: &Widget| w.size >= 3));
        assert_eq!(view.count(), 2);
        assert_eq!(aggregate.count(), 4);

        aggregate.add(widget("e", 5)).unwrap();
        assert_eq!(view.count(), 3);
        assert!(aggregate.order_spec().is_none());
    }
}
