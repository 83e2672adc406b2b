use thiserror::Error;

use everest_core::{DomainError, EntityKind, EntityState};

/// Unit-of-work operation error.
///
/// All variants are local and synchronous; the caller can re-query the state
/// and retry with a valid transition.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UnitOfWorkError {
    /// The requested state change is not in the allowed transition table.
    #[error("invalid state transition {} -> {to}", state_label(.from))]
    InvalidTransition {
        from: Option<EntityState>,
        to: EntityState,
    },

    /// `register_new` on an entity that already has a tracking record.
    #[error("entity of kind `{kind}` is already registered")]
    AlreadyRegistered { kind: EntityKind },

    /// A mark/unregister operation on an entity without a tracking record.
    #[error("cannot {operation} an unregistered entity of kind `{kind}`")]
    NotRegistered {
        kind: EntityKind,
        operation: &'static str,
    },

    /// Building a clone from state data failed.
    #[error(transparent)]
    Domain(#[from] DomainError),
}

fn state_label(state: &Option<EntityState>) -> &'static str {
    state.as_ref().map_or("(none)", EntityState::as_str)
}
