// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Backing-service capability.
//!
//! The multiplexer presents many client registrations to one backing
//! service as a single merged registration. [`BackingService`] is the
//! contract that service side implements: how to (re)register and
//! unregister, which registrations count as active, how active requests are
//! merged, plus optional lifecycle hooks bracketing table and active-count
//! transitions.
//!
//! Hook ordering over a registration's lifetime:
//!
//! 1. [`BackingService::on_register`]
//! 2. [`ListenerRegistration::on_register`]
//! 3. [`BackingService::on_registration_added`]
//! 4. [`BackingService::on_active`]
//! 5. [`ListenerRegistration::on_active`]
//! 6. [`ListenerRegistration::on_inactive`]
//! 7. [`BackingService::on_inactive`]
//! 8. [`BackingService::on_registration_removed`]
//! 9. [`ListenerRegistration::on_unregister`]
//! 10. [`BackingService::on_unregister`]
//!
//! The bracketing is symmetric: the service-wide hook fires before the
//! per-registration hook on the way in, and after it on the way out.

use crate::mux::registration::ListenerRegistration;
use std::fmt;
use std::sync::Arc;

/// Service-side contract consumed by
/// [`ListenerMultiplexer`](crate::ListenerMultiplexer).
///
/// # Thread Safety
///
/// All methods are invoked while the multiplexer's lock is held and with the
/// ambient caller identity cleared. Implementations must be `Send + Sync`
/// and must not block.
pub trait BackingService<K, R>: Send + Sync
where
    R: ListenerRegistration<K>,
{
    /// The single request presented to the backing service, derived from
    /// all active registrations. `None` models request-less registrations.
    type MergedRequest: PartialEq + Send;

    /// Registers with the backing service using the given merged request.
    ///
    /// Returns `true` if registration succeeded, ie if a matching
    /// [`BackingService::unregister_with_service`] is later required.
    fn register_with_service(&self, merged: Option<&Self::MergedRequest>) -> bool;

    /// Replaces an existing service registration with a new merged request.
    ///
    /// The default unregisters first, then registers with the new request.
    /// Override when the service supports a cheaper in-place update. Note
    /// the default leaves a window with no registration in place; whether
    /// deliveries may be lost in that window is part of the service's own
    /// contract.
    fn reregister_with_service(&self, merged: Option<&Self::MergedRequest>) -> bool {
        self.unregister_with_service();
        self.register_with_service(merged)
    }

    /// Unregisters from the backing service.
    fn unregister_with_service(&self);

    /// Whether the given registration is currently active. Must be a pure
    /// function of registration state; it is re-evaluated whenever the
    /// owner signals a possible change via
    /// [`update_registrations`](crate::ListenerMultiplexer::update_registrations).
    fn is_active(&self, registration: &R) -> bool;

    /// Merges the requests of the given active registrations into one.
    ///
    /// `actives` is never empty. The default is only valid when every
    /// registration carries no request; services with a real request type
    /// must override it.
    fn merge_requests(&self, actives: &[Arc<R>]) -> Option<Self::MergedRequest> {
        for registration in actives {
            debug_assert!(
                registration.request().is_none(),
                "services with non-empty requests must implement merge_requests"
            );
        }
        None
    }

    /// Invoked before the first registration is added, ie on the
    /// empty-to-non-empty table transition.
    fn on_register(&self) {}

    /// Invoked after the last registration is removed, ie on the
    /// non-empty-to-empty table transition.
    fn on_unregister(&self) {}

    /// Invoked when a registration is added.
    fn on_registration_added(&self, key: &K, registration: &R) {
        let _ = (key, registration);
    }

    /// Invoked when a registration is removed.
    fn on_registration_removed(&self, key: &K, registration: &R) {
        let _ = (key, registration);
    }

    /// Invoked when the active-registration count goes from zero to
    /// non-zero.
    fn on_active(&self) {}

    /// Invoked when the active-registration count returns to zero.
    fn on_inactive(&self) {}

    /// Writes a one-line description of the service registration state into
    /// a diagnostic dump. Override to add service-specific detail.
    fn dump_service_state(
        &self,
        out: &mut dyn fmt::Write,
        state: &ServiceStateDump<'_, Self::MergedRequest>,
    ) -> fmt::Result
    where
        Self::MergedRequest: fmt::Debug,
    {
        if state.registered {
            match state.current {
                Some(current) => write!(out, "registered with {:?}", current),
                None => write!(out, "registered"),
            }
        } else {
            write!(out, "unregistered")
        }
    }
}

/// Snapshot of the multiplexer's service registration state, handed to
/// [`BackingService::dump_service_state`].
pub struct ServiceStateDump<'a, M> {
    /// Whether the multiplexer currently believes it is registered with the
    /// backing service.
    pub registered: bool,
    /// The merged request last sent to the service; meaningful only while
    /// `registered`.
    pub current: Option<&'a M>,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plain {
        request: Option<u32>,
    }

    impl ListenerRegistration<u32> for Plain {
        type Request = u32;
        type Listener = ();

        fn request(&self) -> Option<&u32> {
            self.request.as_ref()
        }

        fn listener(&self) -> &() {
            &()
        }
    }

    struct NullService;

    impl BackingService<u32, Plain> for NullService {
        type MergedRequest = u32;

        fn register_with_service(&self, _merged: Option<&u32>) -> bool {
            true
        }

        fn unregister_with_service(&self) {}

        fn is_active(&self, _registration: &Plain) -> bool {
            true
        }
    }

    #[test]
    fn test_default_merge_of_requestless_registrations() {
        let actives = vec![Arc::new(Plain { request: None }), Arc::new(Plain { request: None })];
        assert_eq!(NullService.merge_requests(&actives), None);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "must implement merge_requests")]
    fn test_default_merge_rejects_real_requests() {
        let actives = vec![Arc::new(Plain { request: Some(4) })];
        let _ = NullService.merge_requests(&actives);
    }

    #[test]
    fn test_default_reregister_is_unregister_then_register() {
        use std::sync::Mutex;

        struct Recording {
            calls: Mutex<Vec<&'static str>>,
        }

        impl BackingService<u32, Plain> for Recording {
            type MergedRequest = u32;

            fn register_with_service(&self, _merged: Option<&u32>) -> bool {
                self.calls.lock().unwrap().push("register");
                true
            }

            fn unregister_with_service(&self) {
                self.calls.lock().unwrap().push("unregister");
            }

            fn is_active(&self, _registration: &Plain) -> bool {
                true
            }
        }

        let service = Recording {
            calls: Mutex::new(Vec::new()),
        };
        assert!(service.reregister_with_service(Some(&9)));
        assert_eq!(*service.calls.lock().unwrap(), vec!["unregister", "register"]);
    }

    #[test]
    fn test_default_dump_service_state() {
        let service = NullService;

        let mut out = String::new();
        service
            .dump_service_state(
                &mut out,
                &ServiceStateDump {
                    registered: true,
                    current: Some(&17),
                },
            )
            .unwrap();
        assert_eq!(out, "registered with 17");

        let mut out = String::new();
        service
            .dump_service_state(
                &mut out,
                &ServiceStateDump {
                    registered: false,
                    current: None,
                },
            )
            .unwrap();
        assert_eq!(out, "unregistered");
    }
}
