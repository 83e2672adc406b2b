//! Unit of work: records entity state changes for a later commit.
//!
//! One instance covers one work episode (a request, a session). Entities are
//! registered as NEW or CLEAN, moved through the lifecycle with the `mark_*`
//! operations, and queried by state when it is time to persist.
//!
//! ## Ownership
//!
//! Nothing here keeps an entity alive. Tracking records live in a side table
//! keyed by allocation identity and hold `Weak` handles; per-type memberships
//! hold `Weak` anchors. When an entity is dropped its membership silently
//! disappears from queries. Dead bookkeeping is swept in bulk once the record
//! table has doubled since the last sweep, so registration stays amortized
//! O(1). A dead record cannot shadow a live entity: its `Weak` keeps the
//! allocation, and therefore the key, reserved.
//!
//! ## Clean registration
//!
//! [`UnitOfWork::register_clean`] keeps two copies: the loaded original is the
//! membership anchor (the identity the unit of work indexes by), while a clone
//! carries the tracking record and is what application code mutates. Queries
//! yield the clone; [`TrackedEntry::anchor`] exposes the original.
//!
//! ## Threading
//!
//! Single-threaded by construction (`Rc`/`RefCell`, no locking). Reading a
//! state borrows the entity immutably, so do not hold a `borrow_mut` across
//! queries.

mod error;
mod handle;
mod tracker;

pub use error::UnitOfWorkError;
pub use handle::EntityRef;
pub use tracker::{Fingerprint, StateTracker, is_allowed_transition};

use std::collections::{BTreeMap, HashMap};
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use everest_core::{EntityKind, EntityState, Shared, Trackable, shared};

use crate::config::TrackingConfig;
use handle::{EntityKey, TrackedObject};

/// Record count below which dead bookkeeping is never swept.
const SWEEP_MIN: usize = 64;

/// Bookkeeping for one tracked entity.
struct TrackingRecord {
    object: Weak<dyn TrackedObject>,
    tracker: StateTracker,
}

impl TrackingRecord {
    fn is_alive(&self) -> bool {
        self.object.strong_count() > 0
    }
}

/// Non-owning membership of an entity in a per-type set.
struct Membership {
    anchor: Weak<dyn TrackedObject>,
    record: EntityKey,
}

/// Insertion-ordered set of memberships, keyed by tracking record.
#[derive(Default)]
struct EntitySet {
    members: BTreeMap<u64, Membership>,
    index: HashMap<EntityKey, u64>,
}

impl EntitySet {
    /// Adds unless a live membership for `record` exists already. A
    /// membership whose anchor was dropped is replaced.
    fn insert(&mut self, seq: u64, record: EntityKey, anchor: Weak<dyn TrackedObject>) -> bool {
        if let Some(&existing) = self.index.get(&record) {
            let alive = self
                .members
                .get(&existing)
                .is_some_and(|m| m.anchor.strong_count() > 0);
            if alive {
                return false;
            }
            self.members.remove(&existing);
        }
        self.index.insert(record, seq);
        self.members.insert(seq, Membership { anchor, record });
        true
    }

    fn remove(&mut self, record: EntityKey) {
        if let Some(seq) = self.index.remove(&record) {
            self.members.remove(&seq);
        }
    }

    fn retain(&mut self, mut keep: impl FnMut(&Membership) -> bool) {
        let index = &mut self.index;
        self.members.retain(|_, m| {
            let kept = keep(m);
            if !kept {
                index.remove(&m.record);
            }
            kept
        });
    }

    fn iter(&self) -> impl Iterator<Item = &Membership> {
        self.members.values()
    }
}

/// One tracked entity as seen by [`UnitOfWork::iter`].
#[derive(Debug, Clone)]
pub struct TrackedEntry {
    pub kind: EntityKind,
    /// The object carrying the tracking record.
    pub entity: EntityRef,
    /// The object the membership is indexed by (the loaded original after
    /// `register_clean`, otherwise the entity itself).
    pub anchor: EntityRef,
    pub state: EntityState,
}

/// Per-episode tracker of entity state changes pending commit.
pub struct UnitOfWork {
    private_prefix: Rc<str>,
    records: HashMap<EntityKey, TrackingRecord>,
    sets: HashMap<EntityKind, EntitySet>,
    kinds: Vec<EntityKind>,
    next_seq: u64,
    sweep_at: usize,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::with_config(&TrackingConfig::default())
    }

    pub fn with_config(config: &TrackingConfig) -> Self {
        Self {
            private_prefix: Rc::from(config.private_prefix.as_str()),
            records: HashMap::new(),
            sets: HashMap::new(),
            kinds: Vec::new(),
            next_seq: 0,
            sweep_at: SWEEP_MIN,
        }
    }

    pub fn private_prefix(&self) -> &str {
        &self.private_prefix
    }

    /// Register `entity` as NEW.
    ///
    /// Fails with [`UnitOfWorkError::AlreadyRegistered`] if it is tracked
    /// already; nothing is changed in that case.
    pub fn register_new<E: Trackable>(&mut self, entity: &Shared<E>) -> Result<(), UnitOfWorkError> {
        self.maybe_prune();
        let kind = EntityKind::of::<E>();
        let key = EntityKey::of(entity);
        if self.records.contains_key(&key) {
            warn!(kind = %kind, "rejected double registration");
            return Err(UnitOfWorkError::AlreadyRegistered { kind });
        }

        let data = entity.borrow().state_data();
        let mut tracker = StateTracker::create(&data, Rc::clone(&self.private_prefix));
        tracker.set_state(EntityState::New, &data)?;

        let object = downgrade(entity);
        self.records.insert(
            key,
            TrackingRecord {
                object: object.clone(),
                tracker,
            },
        );
        self.add_membership(kind, key, object);
        debug!(kind = %kind, "registered NEW entity");
        Ok(())
    }

    /// Register `entity` as CLEAN and return the working clone.
    ///
    /// The clone is built from the entity's public fields through
    /// [`Trackable::from_state_data`] and carries the CLEAN tracking record;
    /// `entity` itself becomes the membership anchor. Hand the clone out for
    /// mutation and keep the original alive for as long as the entry should
    /// stay visible.
    pub fn register_clean<E: Trackable>(
        &mut self,
        entity: &Shared<E>,
    ) -> Result<Shared<E>, UnitOfWorkError> {
        self.maybe_prune();
        let kind = EntityKind::of::<E>();
        let data = StateTracker::clone_state_data(&entity.borrow().state_data(), &self.private_prefix);
        let clone = shared(E::from_state_data(data)?);

        let clone_data = clone.borrow().state_data();
        let mut tracker = StateTracker::create(&clone_data, Rc::clone(&self.private_prefix));
        tracker.set_state(EntityState::Clean, &clone_data)?;

        let key = EntityKey::of(&clone);
        self.records.insert(
            key,
            TrackingRecord {
                object: downgrade(&clone),
                tracker,
            },
        );
        self.add_membership(kind, key, downgrade(entity));
        debug!(kind = %kind, slug = ?clone.borrow().slug(), "registered CLEAN entity");
        Ok(clone)
    }

    /// Stop tracking `entity` and discard its tracking record.
    pub fn unregister<E: Trackable>(&mut self, entity: &Shared<E>) -> Result<(), UnitOfWorkError> {
        let kind = EntityKind::of::<E>();
        let key = EntityKey::of(entity);
        if self.records.remove(&key).is_none() {
            return Err(UnitOfWorkError::NotRegistered {
                kind,
                operation: "unregister",
            });
        }
        if let Some(set) = self.sets.get_mut(&kind) {
            set.remove(key);
        }
        debug!(kind = %kind, "unregistered entity");
        Ok(())
    }

    /// Move `entity` to CLEAN (after a commit); re-baselines its fingerprint.
    pub fn mark_clean<E: Trackable>(&mut self, entity: &Shared<E>) -> Result<(), UnitOfWorkError> {
        self.transition(entity, EntityState::Clean, "mark CLEAN")
    }

    pub fn mark_dirty<E: Trackable>(&mut self, entity: &Shared<E>) -> Result<(), UnitOfWorkError> {
        self.transition(entity, EntityState::Dirty, "mark DIRTY")
    }

    pub fn mark_deleted<E: Trackable>(&mut self, entity: &Shared<E>) -> Result<(), UnitOfWorkError> {
        self.transition(entity, EntityState::Deleted, "mark DELETED")
    }

    /// Current state of a tracked entity (DIRTY derived on read), or `None`
    /// when it is not tracked.
    pub fn state_of<E: Trackable>(&self, entity: &Shared<E>) -> Option<EntityState> {
        let record = self.records.get(&EntityKey::of(entity))?;
        record.tracker.get_state(&entity.borrow().state_data())
    }

    pub fn is_registered<E: Trackable>(&self, entity: &Shared<E>) -> bool {
        self.records.contains_key(&EntityKey::of(entity))
    }

    /// CLEAN entities, optionally restricted to one kind.
    pub fn get_clean(&self, kind: Option<EntityKind>) -> impl Iterator<Item = EntityRef> + '_ {
        self.in_state(EntityState::Clean, kind)
    }

    pub fn get_new(&self, kind: Option<EntityKind>) -> impl Iterator<Item = EntityRef> + '_ {
        self.in_state(EntityState::New, kind)
    }

    pub fn get_deleted(&self, kind: Option<EntityKind>) -> impl Iterator<Item = EntityRef> + '_ {
        self.in_state(EntityState::Deleted, kind)
    }

    /// DIRTY entities, including CLEAN ones whose fields changed since they
    /// were baselined.
    pub fn get_dirty(&self, kind: Option<EntityKind>) -> impl Iterator<Item = EntityRef> + '_ {
        self.in_state(EntityState::Dirty, kind)
    }

    pub fn clean_of<E: Trackable>(&self) -> impl Iterator<Item = Shared<E>> + '_ {
        self.typed_in_state(EntityState::Clean)
    }

    pub fn new_of<E: Trackable>(&self) -> impl Iterator<Item = Shared<E>> + '_ {
        self.typed_in_state(EntityState::New)
    }

    pub fn deleted_of<E: Trackable>(&self) -> impl Iterator<Item = Shared<E>> + '_ {
        self.typed_in_state(EntityState::Deleted)
    }

    pub fn dirty_of<E: Trackable>(&self) -> impl Iterator<Item = Shared<E>> + '_ {
        self.typed_in_state(EntityState::Dirty)
    }

    /// All live tracked entities with their current state.
    ///
    /// Lazy: states are computed as the iterator advances, and every call
    /// starts over from the current bookkeeping.
    pub fn iter(&self) -> impl Iterator<Item = TrackedEntry> + '_ {
        self.entries(None)
    }

    /// Number of live memberships.
    pub fn len(&self) -> usize {
        self.entries(None).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every membership and tracking record at once.
    ///
    /// No per-entity side effects; previously tracked entities can be
    /// registered afresh afterwards.
    pub fn reset(&mut self) {
        let dropped = self.records.len();
        self.records.clear();
        self.sets.clear();
        self.kinds.clear();
        self.sweep_at = SWEEP_MIN;
        debug!(dropped, "unit of work reset");
    }

    fn transition<E: Trackable>(
        &mut self,
        entity: &Shared<E>,
        to: EntityState,
        operation: &'static str,
    ) -> Result<(), UnitOfWorkError> {
        let kind = EntityKind::of::<E>();
        let key = EntityKey::of(entity);
        let record = self
            .records
            .get_mut(&key)
            .ok_or(UnitOfWorkError::NotRegistered { kind, operation })?;

        let data = entity.borrow().state_data();
        if let Err(err) = record.tracker.set_state(to, &data) {
            warn!(kind = %kind, error = %err, "rejected state transition");
            return Err(err);
        }

        self.add_membership(kind, key, downgrade(entity));
        debug!(kind = %kind, to = %to, "state transition");
        Ok(())
    }

    fn add_membership(&mut self, kind: EntityKind, record: EntityKey, anchor: Weak<dyn TrackedObject>) {
        let seq = self.next_seq;
        let set = self.sets.entry(kind).or_insert_with(|| {
            self.kinds.push(kind);
            EntitySet::default()
        });
        if set.insert(seq, record, anchor) {
            self.next_seq += 1;
        }
    }

    /// Sweep once the record table has doubled since the last sweep.
    fn maybe_prune(&mut self) {
        if self.records.len() >= self.sweep_at {
            self.prune();
            self.sweep_at = (self.records.len() * 2).max(SWEEP_MIN);
        }
    }

    /// Forget records and memberships whose entities were dropped.
    fn prune(&mut self) {
        let before = self.records.len();
        self.records.retain(|_, record| record.is_alive());
        let records = &self.records;
        for set in self.sets.values_mut() {
            set.retain(|m| m.anchor.strong_count() > 0 && records.contains_key(&m.record));
        }
        debug!(swept = before - self.records.len(), "pruned dropped entities");
    }

    fn in_state(
        &self,
        state: EntityState,
        kind: Option<EntityKind>,
    ) -> impl Iterator<Item = EntityRef> + '_ {
        self.entries(kind)
            .filter(move |entry| entry.state == state)
            .map(|entry| entry.entity)
    }

    fn typed_in_state<E: Trackable>(&self, state: EntityState) -> impl Iterator<Item = Shared<E>> + '_ {
        self.in_state(state, Some(EntityKind::of::<E>()))
            .filter_map(|entity| entity.downcast::<E>())
    }

    fn entries(&self, kind: Option<EntityKind>) -> impl Iterator<Item = TrackedEntry> + '_ {
        let kinds = match kind {
            Some(kind) => vec![kind],
            None => self.kinds.clone(),
        };
        kinds
            .into_iter()
            .filter_map(move |kind| self.sets.get(&kind).map(|set| (kind, set)))
            .flat_map(move |(kind, set)| {
                set.iter()
                    .filter_map(move |membership| self.resolve(kind, membership))
            })
    }

    fn resolve(&self, kind: EntityKind, membership: &Membership) -> Option<TrackedEntry> {
        let anchor = membership.anchor.upgrade()?;
        let record = self.records.get(&membership.record)?;
        let object = record.object.upgrade()?;
        let state = record.tracker.get_state(&object.state_data())?;
        Some(TrackedEntry {
            kind,
            entity: EntityRef::new(kind, object),
            anchor: EntityRef::new(kind, anchor),
            state,
        })
    }
}

impl Default for UnitOfWork {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("private_prefix", &self.private_prefix)
            .field("records", &self.records.len())
            .field("kinds", &self.kinds)
            .finish()
    }
}

fn downgrade<E: Trackable>(entity: &Shared<E>) -> Weak<dyn TrackedObject> {
    let weak: Weak<std::cell::RefCell<E>> = Rc::downgrade(entity);
    weak
}
