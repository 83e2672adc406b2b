//! Infrastructure layer: unit of work, in-memory backends, configuration.

pub mod aggregate;
pub mod config;
pub mod repository;
pub mod unit_of_work;

pub use aggregate::InMemoryAggregate;
pub use config::TrackingConfig;
pub use repository::{CommitReport, InMemoryRepository, RepositoryError};
pub use unit_of_work::{EntityRef, TrackedEntry, UnitOfWork, UnitOfWorkError};

/// Entity types shared by the unit tests of this crate.
#[cfg(test)]
pub(crate) mod test_support {
    use everest_core::{DomainResult, Entity, EntityId, StateData, Trackable, impl_entity_eq};

    #[derive(Debug, Clone)]
    pub struct Widget {
        pub id: Option<EntityId>,
        pub name: String,
        pub size: i64,
        /// Exposed as the framework-private `_cache` field.
        pub cache: Option<String>,
    }

    impl Widget {
        pub fn named(name: &str) -> Self {
            Self {
                id: None,
                name: name.to_string(),
                size: 1,
                cache: None,
            }
        }
    }

    impl Entity for Widget {
        type Id = EntityId;

        fn id(&self) -> Option<&EntityId> {
            self.id.as_ref()
        }

        fn set_id(&mut self, id: Option<EntityId>) {
            self.id = id;
        }
    }

    impl Trackable for Widget {
        fn state_data(&self) -> StateData {
            StateData::new()
                .with("id", self.id)
                .with("name", self.name.clone())
                .with("size", self.size)
                .with("_cache", self.cache.clone())
        }

        fn from_state_data(data: StateData) -> DomainResult<Self> {
            Ok(Self {
                id: data.field("id")?,
                name: data.field_or_default("name")?,
                size: data.field_or_default("size")?,
                cache: data.field("_cache")?,
            })
        }
    }

    #[derive(Debug, Clone)]
    pub struct Gadget {
        pub id: Option<EntityId>,
        pub label: String,
    }

    impl Entity for Gadget {
        type Id = EntityId;

        fn id(&self) -> Option<&EntityId> {
            self.id.as_ref()
        }

        fn set_id(&mut self, id: Option<EntityId>) {
            self.id = id;
        }
    }

    impl Trackable for Gadget {
        fn state_data(&self) -> StateData {
            StateData::new()
                .with("id", self.id)
                .with("label", self.label.clone())
        }

        fn from_state_data(data: StateData) -> DomainResult<Self> {
            Ok(Self {
                id: data.field("id")?,
                label: data.field_or_default("label")?,
            })
        }
    }

    impl_entity_eq!(Widget, Gadget);
}
