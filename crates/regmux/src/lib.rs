// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # regmux - Listener Registration Multiplexer
//!
//! A reusable engine that lets many independent clients register interest in
//! some shared backing service (each with its own request and listener)
//! while the service only ever sees a single merged registration.
//!
//! The multiplexer tracks which registrations are currently *active*,
//! recomputes the merged request only when the active set changes, delivers
//! notifications to active listeners, and tolerates removal calls issued
//! from inside its own callbacks without corrupting state or reordering the
//! documented callback sequence.
//!
//! ## Architecture
//!
//! ```text
//! client A --\
//! client B ---+--> ListenerMultiplexer --> merged request --> backing service
//! client C --/        |
//!                     +--> deliveries to active listeners
//! ```
//!
//! - [`ListenerRegistration`] is the client side: a request, a listener, and
//!   per-registration lifecycle hooks.
//! - [`BackingService`] is the service side: (re)register/unregister with a
//!   merged request, the activity predicate, the merge function, and
//!   service-wide lifecycle hooks.
//! - [`ListenerMultiplexer`] orchestrates the two.
//!
//! ## Callback ordering
//!
//! Callbacks fired for any sequence of operations are always ordered
//! according to this lifecycle list:
//!
//! 1. `BackingService::on_register`
//! 2. `ListenerRegistration::on_register`
//! 3. `BackingService::on_registration_added`
//! 4. `BackingService::on_active`
//! 5. `ListenerRegistration::on_active`
//! 6. `ListenerRegistration::on_inactive`
//! 7. `BackingService::on_inactive`
//! 8. `BackingService::on_registration_removed`
//! 9. `ListenerRegistration::on_unregister`
//! 10. `BackingService::on_unregister`
//!
//! ## Example
//!
//! ```ignore
//! use regmux::{BackingService, ListenerMultiplexer, SimpleRegistration};
//! use std::sync::Arc;
//!
//! struct Sampler;
//!
//! impl BackingService<String, SimpleRegistration<u32, Sink>> for Sampler {
//!     type MergedRequest = u32;
//!
//!     fn register_with_service(&self, merged: Option<&u32>) -> bool {
//!         // start the backend at the merged sampling interval
//!         true
//!     }
//!     fn unregister_with_service(&self) { /* stop the backend */ }
//!     fn is_active(&self, _r: &SimpleRegistration<u32, Sink>) -> bool { true }
//!     fn merge_requests(&self, actives: &[Arc<SimpleRegistration<u32, Sink>>]) -> Option<u32> {
//!         actives.iter().filter_map(|r| r.request().copied()).min()
//!     }
//! }
//!
//! let mux = ListenerMultiplexer::new("sampler", Sampler);
//! let client = Arc::new(SimpleRegistration::new(Some(100), Arc::new(Sink::default())));
//! mux.add_registration("client-1".to_string(), client.clone());
//! mux.deliver_operation(|sink: &Sink| sink.accept(42));
//! mux.remove_registration_exact(&"client-1".to_string(), &client);
//! ```
//!
//! ## Re-entrancy
//!
//! Adding registrations must not be done re-entrantly (from inside a
//! callback of the same multiplexer). Removal is allowed re-entrantly, but
//! only via [`ListenerMultiplexer::remove_registration_exact`]; the
//! identity check guarantees re-entrant removal never tears down a
//! registration that has since been replaced.
//!
//! All callbacks run with the ambient caller identity cleared; see
//! [`identity`].
//!
//! ## Modules Overview
//!
//! - [`mux`] - the multiplexing core (start here)
//! - [`dispatch`] - listener execution policy (inline vs worker thread)
//! - [`identity`] - ambient caller-identity context

pub mod dispatch;
pub mod identity;
pub mod mux;

mod error;

pub use dispatch::{DispatchTask, InlineExecutor, ListenerExecutor, WorkerExecutor};
pub use error::{Error, Result};
pub use mux::registration::{ListenerOperation, ListenerRegistration, SimpleRegistration};
pub use mux::service::{BackingService, ServiceStateDump};
pub use mux::{ListenerMultiplexer, UpdateServiceLock};
