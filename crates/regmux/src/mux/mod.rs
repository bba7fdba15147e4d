// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Listener-registration multiplexing core.
//!
//! [`ListenerMultiplexer`] lets many independent clients register a
//! (request, listener) pair against one shared backing service while the
//! service only ever sees a single merged registration. Registrations are
//! split into active and inactive sets by the service's
//! [`BackingService::is_active`] predicate; only active registrations
//! contribute to the merged request and receive deliveries.
//!
//! # Architecture
//!
//! ```text
//! ListenerMultiplexer<K, R, S>
//! +-- service: S                        (BackingService callbacks)
//! +-- state: ReentrantMutex<RefCell<..>>
//!     +-- table: HashMap<K, RegistrationSlot<R>>
//!     +-- active_count
//!     +-- service_registered / current_request   (last merged request sent)
//!     +-- guard_count + pending_removals         (re-entrancy guard)
//!     +-- buffer_count + update_required         (update coalescing)
//! ```
//!
//! Every mutating operation takes the one lock, opens an update-buffer
//! scope and a re-entrancy-guard scope (in that nesting order, so the guard
//! closes first), mutates the table, and fires callbacks. Closing the
//! outermost guard flushes removals deferred by callbacks; closing the
//! outermost buffer performs at most one merge/service-update pass no
//! matter how many were requested inside the region.
//!
//! # Re-entrancy
//!
//! Callbacks run while the lock is held. The lock is re-entrant for the
//! owning thread, so callback code *can* call back into the multiplexer,
//! but only [`ListenerMultiplexer::remove_registration_exact`] tolerates
//! it: the registration is immediately marked inactive and unregistered,
//! and the table entry disappears once the outermost guard closes. Adding,
//! key-only removal, predicate removal and updates from inside a callback
//! are caller bugs and panic.
//!
//! # Thread Safety
//!
//! Operations from different threads serialize on the lock; no operation
//! ever observes a half-updated table. Callback sequences triggered by one
//! top-level operation complete (or are queued for guard close) before that
//! operation returns.

pub mod registration;
pub mod service;

mod guards;

#[cfg(test)]
#[path = "multiplexer_tests.rs"]
mod tests;

pub use guards::UpdateServiceLock;

use crate::identity;
use crate::mux::registration::{ListenerOperation, ListenerRegistration};
use crate::mux::service::{BackingService, ServiceStateDump};
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// One table slot: the client's registration plus the flags the multiplexer
/// maintains for it.
struct RegistrationSlot<R> {
    registration: Arc<R>,
    /// True from successful add until unregistration completes. Never
    /// becomes true again once cleared; re-adding a key installs a new
    /// slot.
    registered: bool,
    /// Cached result of `registered && is_active(..)` as last evaluated.
    active: bool,
}

struct MuxState<K, R, M> {
    table: HashMap<K, RegistrationSlot<R>>,
    active_count: usize,
    service_registered: bool,
    current_request: Option<M>,
    guard_count: usize,
    pending_removals: Vec<(K, Arc<R>)>,
    buffer_count: usize,
    update_required: bool,
}

impl<K, R, M> MuxState<K, R, M> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            table: HashMap::with_capacity(capacity),
            active_count: 0,
            service_registered: false,
            current_request: None,
            guard_count: 0,
            pending_removals: Vec::new(),
            buffer_count: 0,
            update_required: false,
        }
    }
}

/// Multiplexes client listener registrations in front of one backing
/// service.
///
/// `K` is the registration key, `R` the registration type and `S` the
/// backing-service adapter. See the [module docs](self) for the callback
/// ordering and re-entrancy contract.
pub struct ListenerMultiplexer<K, R, S>
where
    K: Eq + Hash + Clone + fmt::Debug,
    R: ListenerRegistration<K>,
    S: BackingService<K, R>,
{
    name: String,
    service: S,
    state: ReentrantMutex<RefCell<MuxState<K, R, S::MergedRequest>>>,
}

impl<K, R, S> ListenerMultiplexer<K, R, S>
where
    K: Eq + Hash + Clone + fmt::Debug,
    R: ListenerRegistration<K>,
    S: BackingService<K, R>,
{
    /// Creates a multiplexer in front of `service`. `name` tags log output
    /// and diagnostic dumps.
    pub fn new(name: impl Into<String>, service: S) -> Self {
        Self::with_capacity(name, service, 0)
    }

    /// Like [`ListenerMultiplexer::new`] with a pre-sized registration
    /// table.
    pub fn with_capacity(name: impl Into<String>, service: S, capacity: usize) -> Self {
        Self {
            name: name.into(),
            service,
            state: ReentrantMutex::new(RefCell::new(MuxState::with_capacity(capacity))),
        }
    }

    /// The name given at construction.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The backing-service adapter this multiplexer drives.
    pub fn service(&self) -> &S {
        &self.service
    }

    /// Number of registrations currently in the table, active or not.
    pub fn registration_count(&self) -> usize {
        let state = self.state.lock();
        let len = state.borrow().table.len();
        len
    }

    /// Number of currently active registrations.
    pub fn active_count(&self) -> usize {
        let state = self.state.lock();
        let count = state.borrow().active_count;
        count
    }

    /// Adds a new registration under `key`.
    ///
    /// If the registration's own [`ListenerRegistration::on_register`] hook
    /// returns `false` the add is a no-op. If `key` is already present, the
    /// old registration is fully removed (with its removal hook sequence)
    /// before the new one is installed in the same slot.
    ///
    /// # Panics
    ///
    /// Panics when called from inside a callback of this multiplexer;
    /// adding re-entrantly is not supported.
    pub fn add_registration(&self, key: K, registration: Arc<R>) {
        let state = self.state.lock();
        assert!(
            state.borrow().guard_count == 0,
            "cannot add a registration re-entrantly"
        );

        // Scope ordering matters: the guard must close before the buffer,
        // since flushing deferred removals generates more service updates.
        // The caller identity is restored last.
        let _identity = identity::clear_calling_identity();
        let _buffer = self.update_service_buffer();
        let _guard = self.reentrancy_guard();

        if state.borrow().table.is_empty() {
            self.service.on_register();
        }

        if !registration.on_register(&key) {
            if state.borrow().table.is_empty() {
                self.service.on_unregister();
            }
            return;
        }

        if state.borrow().table.contains_key(&key) {
            // replace in place: remove the old registration's callbacks
            // without letting the table go empty in between
            self.remove_slot(&key, false);
        }
        {
            let mut st = state.borrow_mut();
            st.table.insert(
                key.clone(),
                RegistrationSlot {
                    registration: Arc::clone(&registration),
                    registered: true,
                    active: false,
                },
            );
        }

        log::debug!("[ListenerMux:{}] registration added key={:?}", self.name, key);
        self.service.on_registration_added(&key, &registration);
        self.refresh_active_state(&key);
    }

    /// Removes the registration under `key`, if any.
    ///
    /// # Panics
    ///
    /// Panics when called from inside a callback of this multiplexer; use
    /// [`ListenerMultiplexer::remove_registration_exact`] there instead.
    pub fn remove_registration(&self, key: &K) {
        let state = self.state.lock();
        assert!(
            state.borrow().guard_count == 0,
            "cannot remove a registration by key re-entrantly"
        );

        if !state.borrow().table.contains_key(key) {
            return;
        }
        self.remove_slot(key, true);
    }

    /// Removes every registration whose key satisfies `predicate`.
    ///
    /// # Panics
    ///
    /// Panics when called from inside a callback of this multiplexer.
    pub fn remove_registration_if<F>(&self, mut predicate: F)
    where
        F: FnMut(&K) -> bool,
    {
        let state = self.state.lock();
        assert!(
            state.borrow().guard_count == 0,
            "cannot remove registrations by predicate re-entrantly"
        );

        // Hold the guard across the scan so removal chains triggered by
        // callbacks are deferred and the table stays stable while we walk
        // it.
        let _buffer = self.update_service_buffer();
        let _guard = self.reentrancy_guard();

        for (key, registration) in self.snapshot() {
            if predicate(&key) {
                self.remove_registration_exact(&key, &registration);
            }
        }
    }

    /// Removes the registration under `key` only if it is exactly
    /// `registration` (pointer identity).
    ///
    /// This is the one removal path that may be called re-entrantly from
    /// inside a callback. In that case the registration is immediately
    /// marked inactive and unregistered (so it receives no further
    /// deliveries and the active count stays correct) and the table entry
    /// is erased when the outermost guarded region closes.
    pub fn remove_registration_exact(&self, key: &K, registration: &Arc<R>) {
        let state = self.state.lock();

        {
            let st = state.borrow();
            match st.table.get(key) {
                Some(slot) if Arc::ptr_eq(&slot.registration, registration) => {}
                _ => return,
            }
        }

        let reentrant = state.borrow().guard_count > 0;
        if reentrant {
            self.unregister_slot(key);
            let mut st = state.borrow_mut();
            debug_assert!(st.guard_count > 0);
            st.pending_removals.push((key.clone(), Arc::clone(registration)));
            log::trace!(
                "[ListenerMux:{}] removal of key={:?} deferred to guard close",
                self.name,
                key
            );
        } else {
            self.remove_slot(key, true);
        }
    }

    /// Applies `f` to every registration. `f` returns `true` for any
    /// registration whose active state may have changed, which triggers a
    /// re-evaluation; service updates are coalesced into at most one pass.
    ///
    /// # Panics
    ///
    /// Panics when called from inside a callback of this multiplexer.
    pub fn update_registrations<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<R>) -> bool,
    {
        let state = self.state.lock();
        assert!(
            state.borrow().guard_count == 0,
            "cannot update registrations re-entrantly"
        );

        let _identity = identity::clear_calling_identity();
        let _buffer = self.update_service_buffer();
        let _guard = self.reentrancy_guard();

        for (key, registration) in self.snapshot() {
            if f(&registration) {
                self.refresh_active_state(&key);
            }
        }
    }

    /// Applies `f` to the registration under `key`, if any. `f` returns
    /// `true` if the registration's active state may have changed.
    ///
    /// # Panics
    ///
    /// Panics when called from inside a callback of this multiplexer.
    pub fn update_registration<F>(&self, key: &K, f: F)
    where
        F: FnOnce(&Arc<R>) -> bool,
    {
        let state = self.state.lock();
        assert!(
            state.borrow().guard_count == 0,
            "cannot update a registration re-entrantly"
        );

        let _identity = identity::clear_calling_identity();
        let _buffer = self.update_service_buffer();
        let _guard = self.reentrancy_guard();

        let registration = {
            let st = state.borrow();
            st.table.get(key).map(|slot| Arc::clone(&slot.registration))
        };
        if let Some(registration) = registration {
            if f(&registration) {
                self.refresh_active_state(key);
            }
        }
    }

    /// Invokes `f` for every active registration; a returned operation is
    /// executed against that registration's listener through
    /// [`ListenerRegistration::execute_operation`].
    ///
    /// `f` must not change any registration's active state; that is
    /// [`ListenerMultiplexer::update_registrations`]'s job.
    pub fn deliver_to_listeners<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<R>) -> Option<ListenerOperation<R::Listener>>,
    {
        let state = self.state.lock();

        let _identity = identity::clear_calling_identity();
        // delivery never recomputes the merged request, so no buffer scope
        let _guard = self.reentrancy_guard();

        for (key, registration) in self.snapshot() {
            let active = {
                let st = state.borrow();
                st.table.get(&key).is_some_and(|slot| {
                    slot.active && Arc::ptr_eq(&slot.registration, &registration)
                })
            };
            if !active {
                continue;
            }
            if let Some(operation) = f(&registration) {
                registration.execute_operation(operation);
            }
        }
    }

    /// Executes one operation against every active listener. Convenience
    /// form of [`ListenerMultiplexer::deliver_to_listeners`].
    pub fn deliver_operation<F>(&self, operation: F)
    where
        F: Fn(&R::Listener) + Clone + Send + 'static,
    {
        self.deliver_to_listeners(|_| {
            let operation = operation.clone();
            Some(Box::new(move |listener: &R::Listener| operation(listener))
                as ListenerOperation<R::Listener>)
        });
    }

    /// Writes a human-readable listing of the service state and all current
    /// registrations.
    ///
    /// The service's [`BackingService::dump_service_state`] hook runs while
    /// the table is borrowed and must not mutate this multiplexer.
    pub fn dump(&self, out: &mut dyn fmt::Write) -> fmt::Result
    where
        R: fmt::Debug,
        S::MergedRequest: fmt::Debug,
    {
        let state = self.state.lock();
        let st = state.borrow();

        write!(out, "service: ")?;
        self.service.dump_service_state(
            out,
            &ServiceStateDump {
                registered: st.service_registered,
                current: st.current_request.as_ref(),
            },
        )?;
        writeln!(out)?;

        if !st.table.is_empty() {
            writeln!(out, "listeners:")?;
            for (key, slot) in &st.table {
                if slot.active {
                    writeln!(out, "  {:?}: {:?}", key, slot.registration)?;
                } else {
                    writeln!(out, "  {:?}: {:?} (inactive)", key, slot.registration)?;
                }
            }
        }
        Ok(())
    }

    /// Full removal sequence for the slot under `key`: deactivate, fire
    /// removal hooks, then (unless replacing in place) erase the entry.
    fn remove_slot(&self, key: &K, remove_entry: bool) {
        let state = self.state.lock();

        let registration = {
            let st = state.borrow();
            match st.table.get(key) {
                Some(slot) => Arc::clone(&slot.registration),
                None => return,
            }
        };

        let _identity = identity::clear_calling_identity();
        let _buffer = self.update_service_buffer();
        let _guard = self.reentrancy_guard();

        self.unregister_slot(key);
        self.service.on_registration_removed(key, &registration);
        registration.on_unregister();

        if remove_entry {
            let became_empty = {
                let mut st = state.borrow_mut();
                st.table.remove(key);
                st.table.is_empty()
            };
            log::debug!("[ListenerMux:{}] registration removed key={:?}", self.name, key);
            if became_empty {
                self.service.on_unregister();
            }
        }
    }

    /// Marks the slot unregistered and re-evaluates its active state, which
    /// fires deactivation hooks if it was active.
    fn unregister_slot(&self, key: &K) {
        let state = self.state.lock();
        {
            let mut st = state.borrow_mut();
            match st.table.get_mut(key) {
                Some(slot) => slot.registered = false,
                None => return,
            }
        }
        self.refresh_active_state(key);
    }

    /// Recomputes the active flag of the registration under `key` and, on a
    /// transition, fires the activation/deactivation hooks and schedules a
    /// service-update pass.
    fn refresh_active_state(&self, key: &K) {
        let state = self.state.lock();

        let (registration, registered, currently_active) = {
            let st = state.borrow();
            match st.table.get(key) {
                Some(slot) => (
                    Arc::clone(&slot.registration),
                    slot.registered,
                    slot.active,
                ),
                None => return,
            }
        };

        let active = registered && self.service.is_active(&registration);
        if active == currently_active {
            return;
        }
        {
            let mut st = state.borrow_mut();
            match st.table.get_mut(key) {
                Some(slot) if slot.active != active => slot.active = active,
                _ => return,
            }
        }

        if active {
            let first_active = {
                let mut st = state.borrow_mut();
                st.active_count += 1;
                st.active_count == 1
            };
            if first_active {
                self.service.on_active();
            }
            if let Some(operation) = registration.on_active() {
                registration.execute_operation(operation);
            }
        } else {
            registration.on_inactive();
            let last_active = {
                let mut st = state.borrow_mut();
                debug_assert!(st.active_count > 0);
                st.active_count -= 1;
                st.active_count == 0
            };
            if last_active {
                self.service.on_inactive();
            }
        }

        self.update_service();
    }

    /// The merge/(re)registration pass. When buffered, only marks that a
    /// pass is owed; the outermost buffer close runs it.
    fn update_service(&self) {
        let state = self.state.lock();
        {
            let mut st = state.borrow_mut();
            if st.buffer_count > 0 {
                st.update_required = true;
                return;
            }
        }

        // always re-read live flags; entries unregistered mid-region have
        // already been deactivated and must not be counted
        let actives: Vec<Arc<R>> = {
            let st = state.borrow();
            st.table
                .values()
                .filter(|slot| slot.active)
                .map(|slot| Arc::clone(&slot.registration))
                .collect()
        };

        let _identity = identity::clear_calling_identity();

        if actives.is_empty() {
            let was_registered = {
                let mut st = state.borrow_mut();
                st.current_request = None;
                let was = st.service_registered;
                st.service_registered = false;
                was
            };
            if was_registered {
                log::debug!("[ListenerMux:{}] unregistering from service", self.name);
                self.service.unregister_with_service();
            }
            return;
        }

        let merged = self.service.merge_requests(&actives);
        let (was_registered, changed) = {
            let st = state.borrow();
            (st.service_registered, merged != st.current_request)
        };
        if !was_registered || changed {
            log::trace!(
                "[ListenerMux:{}] updating service registration ({} active)",
                self.name,
                actives.len()
            );
            let registered = if was_registered {
                self.service.reregister_with_service(merged.as_ref())
            } else {
                self.service.register_with_service(merged.as_ref())
            };
            let mut st = state.borrow_mut();
            st.service_registered = registered;
            st.current_request = merged;
        }
    }

    fn snapshot(&self) -> Vec<(K, Arc<R>)> {
        let state = self.state.lock();
        let st = state.borrow();
        st.table
            .iter()
            .map(|(key, slot)| (key.clone(), Arc::clone(&slot.registration)))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn debug_counts(&self) -> (usize, usize, usize) {
        let state = self.state.lock();
        let st = state.borrow();
        let computed = st.table.values().filter(|slot| slot.active).count();
        (st.table.len(), st.active_count, computed)
    }
}

impl<K, R, S> fmt::Debug for ListenerMultiplexer<K, R, S>
where
    K: Eq + Hash + Clone + fmt::Debug,
    R: ListenerRegistration<K>,
    S: BackingService<K, R>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        let st = state.borrow();
        f.debug_struct("ListenerMultiplexer")
            .field("name", &self.name)
            .field("registrations", &st.table.len())
            .field("active", &st.active_count)
            .field("service_registered", &st.service_registered)
            .finish()
    }
}
