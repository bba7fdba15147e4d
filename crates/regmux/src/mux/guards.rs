// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reference-counted scoped regions of the multiplexer.
//!
//! Two counters bracket every mutating operation:
//!
//! - the *re-entrancy guard* marks "we are inside a callback-emitting
//!   region"; removals requested by callbacks while it is held are queued
//!   and flushed the instant the outermost guard closes;
//! - the *update buffer* coalesces any number of service-update requests
//!   raised inside the region into at most one merge pass, run when the
//!   outermost buffer closes.
//!
//! Both counters live inside the multiplexer's one locked state. The
//! internal scopes are RAII tokens whose `Drop` decrements the counter and
//! performs the deferred work; [`UpdateServiceLock`] exposes the buffer
//! scope to embedders that want to batch several operations themselves.

use crate::mux::registration::ListenerRegistration;
use crate::mux::service::BackingService;
use crate::mux::ListenerMultiplexer;
use std::fmt;
use std::hash::Hash;
use std::mem;

/// Internal RAII scope for the update-service buffer.
pub(super) struct UpdateBufferScope<'m, K, R, S>
where
    K: Eq + Hash + Clone + fmt::Debug,
    R: ListenerRegistration<K>,
    S: BackingService<K, R>,
{
    mux: &'m ListenerMultiplexer<K, R, S>,
}

impl<K, R, S> Drop for UpdateBufferScope<'_, K, R, S>
where
    K: Eq + Hash + Clone + fmt::Debug,
    R: ListenerRegistration<K>,
    S: BackingService<K, R>,
{
    fn drop(&mut self) {
        self.mux.release_update_buffer();
    }
}

/// Internal RAII scope for the re-entrancy guard.
pub(super) struct ReentrancyScope<'m, K, R, S>
where
    K: Eq + Hash + Clone + fmt::Debug,
    R: ListenerRegistration<K>,
    S: BackingService<K, R>,
{
    mux: &'m ListenerMultiplexer<K, R, S>,
}

impl<K, R, S> Drop for ReentrancyScope<'_, K, R, S>
where
    K: Eq + Hash + Clone + fmt::Debug,
    R: ListenerRegistration<K>,
    S: BackingService<K, R>,
{
    fn drop(&mut self) {
        self.mux.release_reentrancy_guard();
    }
}

impl<K, R, S> ListenerMultiplexer<K, R, S>
where
    K: Eq + Hash + Clone + fmt::Debug,
    R: ListenerRegistration<K>,
    S: BackingService<K, R>,
{
    pub(super) fn update_service_buffer(&self) -> UpdateBufferScope<'_, K, R, S> {
        self.state.lock().borrow_mut().buffer_count += 1;
        UpdateBufferScope { mux: self }
    }

    pub(super) fn reentrancy_guard(&self) -> ReentrancyScope<'_, K, R, S> {
        self.state.lock().borrow_mut().guard_count += 1;
        ReentrancyScope { mux: self }
    }

    fn release_update_buffer(&self) {
        let run_update = {
            let state = self.state.lock();
            let mut st = state.borrow_mut();
            debug_assert!(st.buffer_count > 0);
            st.buffer_count -= 1;
            if st.buffer_count == 0 {
                mem::take(&mut st.update_required)
            } else {
                false
            }
        };
        if run_update {
            self.update_service();
        }
    }

    fn release_reentrancy_guard(&self) {
        let pending = {
            let state = self.state.lock();
            let mut st = state.borrow_mut();
            debug_assert!(st.guard_count > 0);
            st.guard_count -= 1;
            if st.guard_count == 0 && !st.pending_removals.is_empty() {
                mem::take(&mut st.pending_removals)
            } else {
                Vec::new()
            }
        };

        if !pending.is_empty() {
            // the flush's own updates coalesce into one pass
            let _buffer = self.update_service_buffer();
            for (key, registration) in pending {
                self.remove_registration_exact(&key, &registration);
            }
        }
    }

    /// Begins buffering service updates until the returned lock is closed
    /// or dropped.
    ///
    /// Useful to avoid redundant merge passes when issuing several
    /// add/remove/update operations in a row:
    ///
    /// ```ignore
    /// let lock = multiplexer.new_update_service_lock();
    /// for (key, registration) in batch {
    ///     multiplexer.add_registration(key, registration);
    /// }
    /// lock.close(); // one merge pass for the whole batch
    /// ```
    pub fn new_update_service_lock(&self) -> UpdateServiceLock<'_, K, R, S> {
        self.state.lock().borrow_mut().buffer_count += 1;
        UpdateServiceLock { mux: Some(self) }
    }
}

/// Externally held buffer scope returned by
/// [`ListenerMultiplexer::new_update_service_lock`].
///
/// While any such lock is alive, service-update passes are deferred; when
/// the last one closes, at most one pass runs (and only if an update was
/// actually requested in between).
#[must_use = "dropping the lock immediately defeats the batching"]
pub struct UpdateServiceLock<'m, K, R, S>
where
    K: Eq + Hash + Clone + fmt::Debug,
    R: ListenerRegistration<K>,
    S: BackingService<K, R>,
{
    mux: Option<&'m ListenerMultiplexer<K, R, S>>,
}

impl<K, R, S> UpdateServiceLock<'_, K, R, S>
where
    K: Eq + Hash + Clone + fmt::Debug,
    R: ListenerRegistration<K>,
    S: BackingService<K, R>,
{
    /// Closes the lock, running the deferred service update if this was the
    /// outermost buffer scope. Equivalent to dropping the lock.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(mux) = self.mux.take() {
            mux.release_update_buffer();
        }
    }
}

impl<K, R, S> Drop for UpdateServiceLock<'_, K, R, S>
where
    K: Eq + Hash + Clone + fmt::Debug,
    R: ListenerRegistration<K>,
    S: BackingService<K, R>,
{
    fn drop(&mut self) {
        self.release();
    }
}
