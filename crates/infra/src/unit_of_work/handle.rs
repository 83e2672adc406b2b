//! Type-erased handles to tracked entities.
//!
//! The unit of work tracks entities of many types side by side. It only needs
//! three things from each of them (a field snapshot, a slug, identity
//! comparison), so it stores `Weak<dyn TrackedObject>` and hands out
//! [`EntityRef`]s that can be downcast back to `Shared<E>`.

use core::any::Any;
use core::fmt;
use std::cell::RefCell;
use std::rc::Rc;

use everest_core::{EntityKind, Shared, StateData, Trackable};

pub(crate) trait TrackedObject: Any {
    /// # Panics
    ///
    /// Panics if the entity is currently mutably borrowed.
    fn state_data(&self) -> StateData;

    fn slug(&self) -> Option<String>;

    /// Same concrete type and equal ids.
    fn same_entity(&self, other: &dyn TrackedObject) -> bool;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
}

impl<E: Trackable> TrackedObject for RefCell<E> {
    fn state_data(&self) -> StateData {
        self.borrow().state_data()
    }

    fn slug(&self) -> Option<String> {
        self.borrow().slug()
    }

    fn same_entity(&self, other: &dyn TrackedObject) -> bool {
        other
            .as_any()
            .downcast_ref::<RefCell<E>>()
            .is_some_and(|other| self.borrow().id() == other.borrow().id())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

/// Identity of a shared allocation, used as the tracking side-table key.
///
/// Stable for as long as any `Rc`/`Weak` to the allocation exists, which the
/// tracking record itself guarantees.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) struct EntityKey(usize);

impl EntityKey {
    pub(crate) fn of<T: ?Sized>(handle: &Rc<T>) -> Self {
        Self(Rc::as_ptr(handle) as *const () as usize)
    }
}

/// Strong, type-erased handle to a tracked entity.
///
/// Equality follows entity semantics: same concrete type and equal ids. Use
/// [`EntityRef::same_object`] for allocation identity.
#[derive(Clone)]
pub struct EntityRef {
    kind: EntityKind,
    object: Rc<dyn TrackedObject>,
}

impl EntityRef {
    pub(crate) fn new(kind: EntityKind, object: Rc<dyn TrackedObject>) -> Self {
        Self { kind, object }
    }

    /// Handle to a typed entity.
    pub fn from_shared<E: Trackable>(entity: &Shared<E>) -> Self {
        let object: Rc<dyn TrackedObject> = entity.clone();
        Self::new(EntityKind::of::<E>(), object)
    }

    /// Type key the entity is tracked under.
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn slug(&self) -> Option<String> {
        self.object.slug()
    }

    pub fn state_data(&self) -> StateData {
        self.object.state_data()
    }

    pub fn is<E: Trackable>(&self) -> bool {
        self.object.as_any().is::<RefCell<E>>()
    }

    /// Recover the typed handle.
    pub fn downcast<E: Trackable>(&self) -> Option<Shared<E>> {
        Rc::clone(&self.object)
            .into_any()
            .downcast::<RefCell<E>>()
            .ok()
    }

    pub fn same_object(&self, other: &EntityRef) -> bool {
        EntityKey::of(&self.object) == EntityKey::of(&other.object)
    }

    pub fn is_object<E: Trackable>(&self, entity: &Shared<E>) -> bool {
        EntityKey::of(&self.object) == EntityKey::of(entity)
    }
}

impl PartialEq for EntityRef {
    fn eq(&self, other: &Self) -> bool {
        self.object.same_entity(other.object.as_ref())
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRef")
            .field("kind", &self.kind)
            .field("slug", &self.object.slug())
            .finish()
    }
}
