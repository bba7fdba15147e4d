// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-client registration capability.
//!
//! A registration bundles one client's request, its listener, and the
//! client-side lifecycle hooks. The multiplexer owns registrations as
//! `Arc<R>` once added; identity-checked removal compares those `Arc`s by
//! pointer, so a client that wants to remove exactly the registration it
//! added keeps its own clone.
//!
//! All hooks have default no-op implementations; implement only the events
//! you care about.

use crate::dispatch::{InlineExecutor, ListenerExecutor};
use std::sync::Arc;

/// A deferred operation executed against one listener.
///
/// Operations are produced by delivery functions (or by
/// [`ListenerRegistration::on_active`]) and routed through
/// [`ListenerRegistration::execute_operation`], which decides whether they
/// run inline or on another execution context.
pub type ListenerOperation<L> = Box<dyn FnOnce(&L) + Send>;

/// One client's subscription to a multiplexed service.
///
/// # Thread Safety
///
/// Hooks are invoked while the multiplexer's lock is held and with the
/// ambient caller identity cleared. They must be `Send + Sync`, must not
/// block, and may re-enter the multiplexer only through identity-checked
/// removal ([`crate::ListenerMultiplexer::remove_registration_exact`]).
pub trait ListenerRegistration<K>: Send + Sync {
    /// Client-supplied request consumed by the service's merge function.
    type Request;
    /// Opaque payload delivered to client-owned code.
    type Listener;

    /// The request this registration contributes to the merged request, if
    /// any.
    fn request(&self) -> Option<&Self::Request> {
        None
    }

    /// The listener operations are delivered to.
    fn listener(&self) -> &Self::Listener;

    /// Invoked when this registration is added under `key`. Returning
    /// `false` refuses the registration; the add becomes a no-op.
    fn on_register(&self, key: &K) -> bool {
        let _ = key;
        true
    }

    /// Invoked when this registration becomes active. A returned operation
    /// is delivered immediately to this registration's listener.
    fn on_active(&self) -> Option<ListenerOperation<Self::Listener>> {
        None
    }

    /// Invoked when this registration becomes inactive.
    fn on_inactive(&self) {}

    /// Invoked when this registration is removed.
    fn on_unregister(&self) {}

    /// Runs a delivery operation against this registration's listener.
    ///
    /// The default runs the operation inline, which is appropriate when the
    /// listener is a thin forwarding shim. Override to dispatch onto an
    /// independent execution context for listeners that do real work in
    /// this process.
    fn execute_operation(&self, operation: ListenerOperation<Self::Listener>) {
        operation(self.listener());
    }
}

/// Ready-made registration carrying an optional request, a shared listener
/// and a pluggable [`ListenerExecutor`].
///
/// # Example
///
/// ```ignore
/// let registration = Arc::new(SimpleRegistration::new(Some(interval), sink));
/// multiplexer.add_registration("client-1".to_string(), registration.clone());
/// // ... later, remove exactly what was added:
/// multiplexer.remove_registration_exact(&"client-1".to_string(), &registration);
/// ```
pub struct SimpleRegistration<Q, L> {
    request: Option<Q>,
    listener: Arc<L>,
    executor: Arc<dyn ListenerExecutor>,
}

impl<Q, L> SimpleRegistration<Q, L> {
    /// Creates a registration whose operations run inline.
    pub fn new(request: Option<Q>, listener: Arc<L>) -> Self {
        Self::with_executor(request, listener, Arc::new(InlineExecutor))
    }

    /// Creates a registration whose operations run through `executor`.
    pub fn with_executor(
        request: Option<Q>,
        listener: Arc<L>,
        executor: Arc<dyn ListenerExecutor>,
    ) -> Self {
        Self {
            request,
            listener,
            executor,
        }
    }

    /// The request carried by this registration, if any.
    pub fn request(&self) -> Option<&Q> {
        self.request.as_ref()
    }

    /// The shared listener this registration delivers to.
    pub fn listener(&self) -> &Arc<L> {
        &self.listener
    }
}

impl<K, Q, L> ListenerRegistration<K> for SimpleRegistration<Q, L>
where
    Q: Send + Sync,
    L: Send + Sync + 'static,
{
    type Request = Q;
    type Listener = L;

    fn request(&self) -> Option<&Q> {
        self.request.as_ref()
    }

    fn listener(&self) -> &L {
        &self.listener
    }

    fn execute_operation(&self, operation: ListenerOperation<L>) {
        let listener = Arc::clone(&self.listener);
        let outcome = self.executor.execute(Box::new(move || operation(&listener)));
        if let Err(err) = outcome {
            log::warn!("[SimpleRegistration] dropped listener operation: {}", err);
        }
    }
}

impl<Q: std::fmt::Debug, L> std::fmt::Debug for SimpleRegistration<Q, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleRegistration")
            .field("request", &self.request)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::WorkerExecutor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    struct CountingListener(AtomicUsize);

    #[test]
    fn test_default_hooks_are_noops() {
        struct Bare;
        impl ListenerRegistration<u32> for Bare {
            type Request = ();
            type Listener = ();
            fn listener(&self) -> &() {
                &()
            }
        }

        let bare = Bare;
        assert!(bare.request().is_none());
        assert!(bare.on_register(&7));
        assert!(bare.on_active().is_none());
        bare.on_inactive();
        bare.on_unregister();
    }

    #[test]
    fn test_simple_registration_inline_delivery() {
        let listener = Arc::new(CountingListener(AtomicUsize::new(0)));
        let registration = SimpleRegistration::new(Some(5u32), listener.clone());

        assert_eq!(registration.request(), Some(&5));
        ListenerRegistration::<String>::execute_operation(
            &registration,
            Box::new(|l: &CountingListener| {
                l.0.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert_eq!(listener.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_simple_registration_worker_delivery() {
        let executor = Arc::new(WorkerExecutor::new("reg-test").unwrap());
        let listener = Arc::new(CountingListener(AtomicUsize::new(0)));
        let registration =
            SimpleRegistration::with_executor(None::<u32>, listener.clone(), executor.clone());

        let (tx, rx) = mpsc::channel();
        ListenerRegistration::<String>::execute_operation(
            &registration,
            Box::new(move |l: &CountingListener| {
                l.0.fetch_add(1, Ordering::SeqCst);
                tx.send(()).unwrap();
            }),
        );

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(listener.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_simple_registration_swallows_closed_executor() {
        let executor = Arc::new(WorkerExecutor::new("closed").unwrap());
        executor.shutdown();

        let listener = Arc::new(CountingListener(AtomicUsize::new(0)));
        let registration =
            SimpleRegistration::with_executor(None::<u32>, listener.clone(), executor);

        // dropped, logged, not panicked
        ListenerRegistration::<String>::execute_operation(
            &registration,
            Box::new(|l: &CountingListener| {
                l.0.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(listener.0.load(Ordering::SeqCst), 0);
    }
}
