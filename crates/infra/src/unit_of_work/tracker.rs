//! Per-entity state tracking: baseline fingerprint + lifecycle state.
//!
//! The tracker never gets told about attribute writes. Instead it remembers a
//! fingerprint of the public fields taken when the entity became CLEAN and
//! compares it against a fresh one whenever the state is read. A stored CLEAN
//! whose fingerprint diverged reads as DIRTY; the stored value stays CLEAN.

use core::fmt;
use std::rc::Rc;

use everest_core::state::is_private;
use everest_core::{EntityState, StateData};

use super::error::UnitOfWorkError;

/// Transitions accepted by [`StateTracker::set_state`]; `None` is the unset
/// marker a fresh tracker starts with.
const ALLOWED_TRANSITIONS: &[(Option<EntityState>, EntityState)] = &[
    (None, EntityState::New),
    (None, EntityState::Clean),
    (Some(EntityState::New), EntityState::Clean),
    (Some(EntityState::New), EntityState::Deleted),
    (Some(EntityState::Clean), EntityState::Dirty),
    (Some(EntityState::Clean), EntityState::Deleted),
    (Some(EntityState::Dirty), EntityState::Clean),
    (Some(EntityState::Dirty), EntityState::Deleted),
];

pub fn is_allowed_transition(from: Option<EntityState>, to: EntityState) -> bool {
    ALLOWED_TRANSITIONS.contains(&(from, to))
}

/// Content hash over an entity's public `name:value` pairs.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Hash `name:value` tokens joined by `,` in key order, skipping fields
    /// under `private_prefix`. Values are rendered as compact JSON.
    pub fn of(data: &StateData, private_prefix: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        let public = data.iter().filter(|(name, _)| !is_private(name, private_prefix));
        for (idx, (name, value)) in public.enumerate() {
            if idx > 0 {
                hasher.update(b",");
            }
            hasher.update(name.as_bytes());
            hasher.update(b":");
            hasher.update(value.to_string().as_bytes());
        }
        Self(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Lifecycle state + baseline fingerprint of one tracked entity.
///
/// Every method takes the entity's *current* field snapshot; the tracker holds
/// no reference to the entity itself.
#[derive(Debug, Clone)]
pub struct StateTracker {
    state: Option<EntityState>,
    baseline: Fingerprint,
    private_prefix: Rc<str>,
}

impl StateTracker {
    /// Take the baseline from `data`; the state starts unset.
    pub fn create(data: &StateData, private_prefix: Rc<str>) -> Self {
        let baseline = Fingerprint::of(data, &private_prefix);
        Self {
            state: None,
            baseline,
            private_prefix,
        }
    }

    /// Re-baseline from `data` and force the state to CLEAN (no validation).
    pub fn reset_to_clean(&mut self, data: &StateData) {
        self.baseline = Fingerprint::of(data, &self.private_prefix);
        self.state = Some(EntityState::Clean);
    }

    /// Current state, deriving DIRTY for a CLEAN entity whose fields changed.
    pub fn get_state(&self, data: &StateData) -> Option<EntityState> {
        match self.state {
            Some(EntityState::Clean) if self.fingerprint(data) != self.baseline => {
                Some(EntityState::Dirty)
            }
            state => state,
        }
    }

    /// The stored state, without DIRTY derivation.
    pub fn stored_state(&self) -> Option<EntityState> {
        self.state
    }

    pub fn baseline(&self) -> Fingerprint {
        self.baseline
    }

    /// Validate `(get_state(data), to)` and store `to`.
    ///
    /// Entering CLEAN also re-baselines from `data`.
    pub fn set_state(&mut self, to: EntityState, data: &StateData) -> Result<(), UnitOfWorkError> {
        let from = self.get_state(data);
        if !is_allowed_transition(from, to) {
            return Err(UnitOfWorkError::InvalidTransition { from, to });
        }
        if to == EntityState::Clean {
            self.reset_to_clean(data);
        } else {
            self.state = Some(to);
        }
        Ok(())
    }

    /// Public fields of `data` (shallow copy), as copied onto clones.
    pub fn clone_state_data(data: &StateData, private_prefix: &str) -> StateData {
        data.public(private_prefix)
    }

    fn fingerprint(&self, data: &StateData) -> Fingerprint {
        Fingerprint::of(data, &self.private_prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn prefix() -> Rc<str> {
        Rc::from("_")
    }

    fn widget(name: &str) -> StateData {
        StateData::new()
            .with("id", json!(null))
            .with("name", name)
            .with("_cache", "warm")
    }

    fn tracker_in(state: Option<EntityState>, data: &StateData) -> StateTracker {
        let mut tracker = StateTracker::create(data, prefix());
        match state {
            None => {}
            Some(EntityState::New) => tracker.set_state(EntityState::New, data).unwrap(),
            Some(EntityState::Clean) => tracker.set_state(EntityState::Clean, data).unwrap(),
            Some(EntityState::Dirty) => {
                tracker.set_state(EntityState::Clean, data).unwrap();
                tracker.set_state(EntityState::Dirty, data).unwrap();
            }
            Some(EntityState::Deleted) => {
                tracker.set_state(EntityState::New, data).unwrap();
                tracker.set_state(EntityState::Deleted, data).unwrap();
            }
        }
        tracker
    }

    #[test]
    fn fingerprint_ignores_private_fields_and_insertion_order() {
        let a = StateData::new().with("b", 2).with("a", 1).with("_x", 1);
        let b = StateData::new().with("a", 1).with("_x", 99).with("b", 2);
        assert_eq!(Fingerprint::of(&a, "_"), Fingerprint::of(&b, "_"));
        assert_eq!(Fingerprint::of(&a, "_").to_hex().len(), 64);
    }

    #[test]
    fn fingerprint_sees_added_and_removed_fields() {
        let base = StateData::new().with("a", 1);
        let added = base.clone().with("b", json!(null));
        assert_ne!(Fingerprint::of(&base, "_"), Fingerprint::of(&added, "_"));
        assert_ne!(Fingerprint::of(&base, "_"), Fingerprint::of(&StateData::new(), "_"));
    }

    #[test]
    fn fresh_tracker_is_unset() {
        let tracker = StateTracker::create(&widget("a"), prefix());
        assert_eq!(tracker.get_state(&widget("a")), None);
        assert_eq!(tracker.stored_state(), None);
    }

    #[test]
    fn clean_reads_dirty_after_public_change_without_storing_it() {
        let tracker = tracker_in(Some(EntityState::Clean), &widget("a"));
        let changed = widget("b");
        assert_eq!(tracker.get_state(&changed), Some(EntityState::Dirty));
        assert_eq!(tracker.stored_state(), Some(EntityState::Clean));
        // Reverting the change reads clean again.
        assert_eq!(tracker.get_state(&widget("a")), Some(EntityState::Clean));
    }

    #[test]
    fn private_change_stays_clean() {
        let tracker = tracker_in(Some(EntityState::Clean), &widget("a"));
        let mut data = widget("a");
        data.insert("_cache", "cold");
        data.insert("_extra", 1);
        assert_eq!(tracker.get_state(&data), Some(EntityState::Clean));
    }

    #[test]
    fn reset_to_clean_rebaselines() {
        let mut tracker = tracker_in(Some(EntityState::Clean), &widget("a"));
        let changed = widget("b");
        assert_eq!(tracker.get_state(&changed), Some(EntityState::Dirty));
        tracker.reset_to_clean(&changed);
        assert_eq!(tracker.get_state(&changed), Some(EntityState::Clean));
    }

    #[test]
    fn entering_clean_rebaselines() {
        let mut tracker = tracker_in(Some(EntityState::New), &widget("a"));
        let changed = widget("b");
        tracker.set_state(EntityState::Clean, &changed).unwrap();
        assert_eq!(tracker.get_state(&changed), Some(EntityState::Clean));
        assert_eq!(tracker.baseline(), Fingerprint::of(&changed, "_"));
    }

    #[test]
    fn derived_dirty_can_be_committed_back_to_clean() {
        let mut tracker = tracker_in(Some(EntityState::Clean), &widget("a"));
        let changed = widget("b");
        tracker.set_state(EntityState::Clean, &changed).unwrap();
        assert_eq!(tracker.get_state(&changed), Some(EntityState::Clean));
    }

    #[test]
    fn derived_dirty_cannot_be_marked_dirty_again() {
        let mut tracker = tracker_in(Some(EntityState::Clean), &widget("a"));
        let err = tracker
            .set_state(EntityState::Dirty, &widget("b"))
            .unwrap_err();
        assert_eq!(
            err,
            UnitOfWorkError::InvalidTransition {
                from: Some(EntityState::Dirty),
                to: EntityState::Dirty,
            }
        );
        assert_eq!(err.to_string(), "invalid state transition DIRTY -> DIRTY");
    }

    #[test]
    fn transition_table_is_complete() {
        let data = widget("a");
        let froms = [None]
            .into_iter()
            .chain(EntityState::ALL.into_iter().map(Some));
        for from in froms {
            for to in EntityState::ALL {
                let mut tracker = tracker_in(from, &data);
                let result = tracker.set_state(to, &data);
                if is_allowed_transition(from, to) {
                    assert!(result.is_ok(), "{from:?} -> {to:?} should be allowed");
                    assert_eq!(tracker.stored_state(), Some(to));
                } else {
                    assert_eq!(
                        result,
                        Err(UnitOfWorkError::InvalidTransition { from, to }),
                        "{from:?} -> {to:?} should be rejected"
                    );
                    assert_eq!(tracker.stored_state(), from, "failed transition must not mutate");
                }
            }
        }
        assert_eq!(ALLOWED_TRANSITIONS.len(), 8);
    }

    fn any_state() -> impl Strategy<Value = EntityState> {
        prop::sample::select(EntityState::ALL.to_vec())
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: repeated reads without mutation agree.
        #[test]
        fn get_state_is_idempotent(name in "[a-z]{0,12}", state in any_state()) {
            let data = widget(&name);
            let tracker = tracker_in(Some(state), &data);
            let first = tracker.get_state(&data);
            prop_assert_eq!(first, tracker.get_state(&data));
            prop_assert_eq!(first, Some(state));
        }

        /// Property: any change of a public value is detected, private ones never are.
        #[test]
        fn public_changes_are_detected(
            before in "[a-z]{0,12}",
            after in "[a-z]{0,12}",
            cache in ".{0,12}",
        ) {
            let tracker = tracker_in(Some(EntityState::Clean), &widget(&before));

            let mut data = widget(&after);
            data.insert("_cache", cache);
            let expected = if before == after { EntityState::Clean } else { EntityState::Dirty };
            prop_assert_eq!(tracker.get_state(&data), Some(expected));
        }
    }
}
