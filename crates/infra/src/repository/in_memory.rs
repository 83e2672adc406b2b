use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use everest_core::{DomainError, Entity, EntityId, EntityState, Shared, StateData, Trackable, shared};

use super::RepositoryError;
use crate::config::TrackingConfig;
use crate::unit_of_work::UnitOfWork;

/// Outcome of [`InMemoryRepository::commit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub committed_at: DateTime<Utc>,
}

impl CommitReport {
    pub fn is_empty(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.deleted == 0
    }
}

/// A loaded row: the materialised original and the working clone handed out.
struct Loaded<E> {
    _original: Shared<E>,
    working: Shared<E>,
}

/// In-memory repository of one entity type.
///
/// Committed rows are public state data keyed by id. Reads and writes within
/// an episode go through a [`UnitOfWork`]; [`commit`](Self::commit) turns the
/// tracked NEW/DIRTY/DELETED entities into row changes.
///
/// Intended for tests/dev. Not optimized for performance.
pub struct InMemoryRepository<E> {
    rows: BTreeMap<EntityId, StateData>,
    loaded: HashMap<EntityId, Loaded<E>>,
    added: Vec<Shared<E>>,
    uow: UnitOfWork,
}

impl<E> InMemoryRepository<E>
where
    E: Trackable + Entity<Id = EntityId>,
{
    pub fn new() -> Self {
        Self::with_config(&TrackingConfig::default())
    }

    pub fn with_config(config: &TrackingConfig) -> Self {
        Self {
            rows: BTreeMap::new(),
            loaded: HashMap::new(),
            added: Vec::new(),
            uow: UnitOfWork::with_config(config),
        }
    }

    /// Working copy of the committed row `id`.
    ///
    /// The first load in an episode registers the row CLEAN; later loads
    /// return the same working copy.
    pub fn load(&mut self, id: &EntityId) -> Result<Option<Shared<E>>, RepositoryError> {
        if let Some(loaded) = self.loaded.get(id) {
            return Ok(Some(Rc::clone(&loaded.working)));
        }
        let Some(row) = self.rows.get(id) else {
            return Ok(None);
        };

        let original = shared(E::from_state_data(row.clone())?);
        let working = self.uow.register_clean(&original)?;
        self.loaded.insert(
            *id,
            Loaded {
                _original: original,
                working: Rc::clone(&working),
            },
        );
        debug!(%id, "loaded entity");
        Ok(Some(working))
    }

    /// Schedule a new entity for insertion.
    pub fn add(&mut self, entity: Shared<E>) -> Result<(), RepositoryError> {
        self.uow.register_new(&entity)?;
        self.added.push(entity);
        Ok(())
    }

    /// Schedule a tracked entity for removal.
    pub fn remove(&mut self, entity: &Shared<E>) -> Result<(), RepositoryError> {
        self.uow.mark_deleted(entity)?;
        Ok(())
    }

    pub fn state_of(&self, entity: &Shared<E>) -> Option<EntityState> {
        self.uow.state_of(entity)
    }

    /// Apply all pending changes.
    ///
    /// NEW entities get an id if they lack one and are inserted; DIRTY ones
    /// overwrite their row; both end up CLEAN. DELETED ones lose their row and
    /// are unregistered. Conflicts are detected before any row changes.
    pub fn commit(&mut self) -> Result<CommitReport, RepositoryError> {
        let new: Vec<Shared<E>> = self.uow.new_of::<E>().collect();
        let dirty: Vec<Shared<E>> = self.uow.dirty_of::<E>().collect();
        let deleted: Vec<Shared<E>> = self.uow.deleted_of::<E>().collect();

        let mut seen = HashSet::new();
        for entity in &new {
            if let Some(id) = entity.borrow().id() {
                if self.rows.contains_key(id) || !seen.insert(*id) {
                    return Err(DomainError::conflict(format!("an entity with id {id} already exists")).into());
                }
            }
        }
        if dirty.iter().any(|e| e.borrow().id().is_none()) {
            return Err(DomainError::invalid_data("dirty entity without id").into());
        }

        let prefix = self.uow.private_prefix().to_string();

        for entity in &new {
            let id = {
                let mut e = entity.borrow_mut();
                let existing = e.id().copied();
                match existing {
                    Some(id) => id,
                    None => {
                        let id = EntityId::new();
                        e.set_id(Some(id));
                        id
                    }
                }
            };
            let row = entity.borrow().state_data().public(&prefix);
            self.rows.insert(id, row);
            self.uow.mark_clean(entity)?;
        }

        for entity in &dirty {
            let (id, row) = {
                let e = entity.borrow();
                (e.id().copied(), e.state_data().public(&prefix))
            };
            if let Some(id) = id {
                self.rows.insert(id, row);
            }
            self.uow.mark_clean(entity)?;
        }

        for entity in &deleted {
            let id = entity.borrow().id().copied();
            if let Some(id) = id {
                self.rows.remove(&id);
                self.loaded.remove(&id);
            }
            self.added.retain(|e| !Rc::ptr_eq(e, entity));
            self.uow.unregister(entity)?;
        }

        let report = CommitReport {
            inserted: new.len(),
            updated: dirty.len(),
            deleted: deleted.len(),
            committed_at: Utc::now(),
        };
        info!(
            inserted = report.inserted,
            updated = report.updated,
            deleted = report.deleted,
            "commit finished"
        );
        Ok(report)
    }

    /// End the episode: drop uncommitted changes, the identity map and all
    /// tracking. Committed rows are untouched.
    pub fn rollback(&mut self) {
        self.uow.reset();
        self.loaded.clear();
        self.added.clear();
    }

    /// Committed row for `id`.
    pub fn get(&self, id: &EntityId) -> Option<&StateData> {
        self.rows.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &EntityId> {
        self.rows.keys()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn unit_of_work(&self) -> &UnitOfWork {
        &self.uow
    }
}

impl<E> Default for InMemoryRepository<E>
where
    E: Trackable + Entity<Id = EntityId>,
{
    fn default() -> Self {
        Self::new()
    }
}
