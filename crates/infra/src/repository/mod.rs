//! Repositories: committed storage fronted by a unit of work.

pub mod in_memory;

pub use in_memory::{CommitReport, InMemoryRepository};

use thiserror::Error;

use everest_core::DomainError;

use crate::unit_of_work::UnitOfWorkError;

/// Repository operation error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error(transparent)]
    UnitOfWork(#[from] UnitOfWorkError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}
