//! `everest-core`: entity and aggregate building blocks.
//!
//! This crate contains **pure domain** primitives (no storage concerns):
//! entity identity, the field snapshot used for state tracking, lifecycle
//! states and the aggregate facade over pluggable backends.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod state;

pub use aggregate::{Aggregate, AggregateImpl, FilterSpec, OrderSpec, SliceKey};
pub use entity::{Entity, EntityKind, Shared, Trackable, shared};
pub use error::{DomainError, DomainResult};
pub use id::EntityId;
pub use state::{EntityState, StateData};
