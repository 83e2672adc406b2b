//! Entity traits: identity by id, field enumeration for state tracking.

use core::any::TypeId;
use core::fmt;
use core::hash::{Hash, Hasher};
use std::cell::RefCell;
use std::rc::Rc;

use crate::error::DomainResult;
use crate::state::StateData;

/// Shared, interiorly mutable entity handle.
///
/// Aggregates and application code own these; tracking bookkeeping only ever
/// keeps `Weak` copies.
pub type Shared<E> = Rc<RefCell<E>>;

/// Wrap an entity into a [`Shared`] handle.
pub fn shared<E>(entity: E) -> Shared<E> {
    Rc::new(RefCell::new(entity))
}

/// Entity marker + minimal interface.
///
/// An entity may exist without an id (not yet persisted). Two entities are
/// equal iff they have the same concrete type and equal ids; implement
/// `PartialEq` with [`impl_entity_eq!`](crate::impl_entity_eq) to get that.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + fmt::Debug + fmt::Display + 'static;

    /// Returns the entity identifier, if assigned.
    fn id(&self) -> Option<&Self::Id>;

    fn set_id(&mut self, id: Option<Self::Id>);

    /// Human-readable, URL-compatible key, unique among siblings.
    ///
    /// Defaults to the id's string form; `None` while no id is assigned.
    fn slug(&self) -> Option<String> {
        self.id().map(ToString::to_string)
    }
}

/// Entities whose fields can be enumerated and rebuilt.
///
/// This is what the unit of work needs to fingerprint an entity and to clone
/// it on clean registration. Fields whose names start with the private prefix
/// (`_` by default) are framework-private: they never affect the fingerprint
/// and are not copied onto clones.
pub trait Trackable: Entity + Sized + 'static {
    /// All fields as name/value pairs, private ones included.
    fn state_data(&self) -> StateData;

    /// Build a fresh instance from name/value pairs.
    ///
    /// `data` only carries the fields that are public under the configured
    /// private prefix, and that prefix is chosen at runtime. Any field may
    /// therefore be missing: give every absent field its default (see
    /// [`StateData::field_or_default`]) instead of failing.
    fn from_state_data(data: StateData) -> DomainResult<Self>;
}

/// Entity type key used to partition tracked entities.
#[derive(Clone, Copy)]
pub struct EntityKind {
    type_id: TypeId,
    name: &'static str,
}

impl EntityKind {
    pub fn of<E: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<E>(),
            name: core::any::type_name::<E>(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Fully qualified type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is<E: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<E>()
    }
}

impl PartialEq for EntityKind {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for EntityKind {}

impl Hash for EntityKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityKind({})", self.name)
    }
}

/// Displays the unqualified type name.
impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.name.rsplit("::").next().unwrap_or(self.name);
        f.write_str(short)
    }
}

/// Implement `PartialEq`/`Eq` as identity-by-id for one or more entity types.
///
/// ```ignore
/// impl_entity_eq!(Widget, Gadget);
/// ```
#[macro_export]
macro_rules! impl_entity_eq {
    ($($t:ty),+ $(,)?) => {
        $(
            impl PartialEq for $t {
                fn eq(&self, other: &Self) -> bool {
                    $crate::Entity::id(self) == $crate::Entity::id(other)
                }
            }

            impl Eq for $t {}
        )+
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DomainError;

    #[derive(Debug, Clone)]
    struct Widget {
        id: Option<u32>,
        name: String,
    }

    #[derive(Debug, Clone)]
    struct Gadget {
        id: Option<u32>,
    }

    impl Entity for Widget {
        type Id = u32;

        fn id(&self) -> Option<&u32> {
            self.id.as_ref()
        }

        fn set_id(&mut self, id: Option<u32>) {
            self.id = id;
        }
    }

    impl Entity for Gadget {
        type Id = u32;

        fn id(&self) -> Option<&u32> {
            self.id.as_ref()
        }

        fn set_id(&mut self, id: Option<u32>) {
            self.id = id;
        }

        fn slug(&self) -> Option<String> {
            self.id.map(|id| format!("gadget-{id}"))
        }
    }

    impl Trackable for Widget {
        fn state_data(&self) -> StateData {
            StateData::new().with("id", self.id).with("name", self.name.clone())
        }

        fn from_state_data(data: StateData) -> DomainResult<Self> {
            Ok(Self {
                id: data.field("id")?,
                name: data.field("name")?,
            })
        }
    }

    impl_entity_eq!(Widget, Gadget);

    #[test]
    fn equality_is_by_id() {
        let a = Widget { id: Some(1), name: "a".into() };
        let b = Widget { id: Some(1), name: "b".into() };
        let c = Widget { id: Some(2), name: "a".into() };
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn slug_follows_id() {
        let mut w = Widget { id: None, name: "a".into() };
        assert_eq!(w.slug(), None);
        w.set_id(Some(7));
        assert_eq!(w.slug().as_deref(), Some("7"));

        let g = Gadget { id: Some(7) };
        assert_eq!(g.slug().as_deref(), Some("gadget-7"));
    }

    #[test]
    fn kinds_distinguish_types() {
        assert_eq!(EntityKind::of::<Widget>(), EntityKind::of::<Widget>());
        assert_ne!(EntityKind::of::<Widget>(), EntityKind::of::<Gadget>());
        assert!(EntityKind::of::<Gadget>().is::<Gadget>());
        assert_eq!(EntityKind::of::<Widget>().to_string(), "Widget");
    }

    #[test]
    fn rebuild_from_state_data() {
        let w = Widget { id: Some(3), name: "a".into() };
        let copy = Widget::from_state_data(w.state_data()).unwrap();
        assert_eq!(copy, w);
        assert_eq!(copy.name, "a");

        let err = Widget::from_state_data(StateData::new().with("id", 1)).unwrap_err();
        assert!(matches!(err, DomainError::InvalidData(_)));
    }
}
