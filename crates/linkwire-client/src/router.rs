//! Dispatch of inbound envelopes that no pending request claimed.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use linkwire_frame::{Envelope, RouteKey};
use tracing::{debug, warn};

/// Outcome of one handler invocation. Errors are logged, never propagated.
pub type HandlerResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

type Handler = Arc<dyn Fn(&Envelope) -> HandlerResult + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Per-route handler lists, invoked in subscription order.
#[derive(Default)]
pub struct MessageRouter {
    routes: RwLock<HashMap<RouteKey, Vec<(SubscriptionId, Handler)>>>,
    next_id: AtomicU64,
}

/// Counts from one [`MessageRouter::dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchReport {
    pub invoked: usize,
    pub faulted: usize,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `route_key`.
    pub fn subscribe<F>(self: &Arc<Self>, route_key: RouteKey, handler: F) -> Subscription
    where
        F: Fn(&Envelope) -> HandlerResult + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(route_key)
            .or_default()
            .push((id, Arc::new(handler)));
        debug!(%route_key, subscription = id.0, "handler subscribed");

        Subscription {
            id,
            route_key,
            router: Arc::downgrade(self),
        }
    }

    /// Remove exactly the handler registered under `id`.
    pub fn unsubscribe(&self, route_key: RouteKey, id: SubscriptionId) -> bool {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        let Some(handlers) = routes.get_mut(&route_key) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            routes.remove(&route_key);
        }
        removed
    }

    /// Invoke every handler for the envelope's route key.
    ///
    /// A handler that returns an error or panics is logged and skipped; the
    /// remaining handlers still run.
    pub fn dispatch(&self, envelope: &Envelope) -> DispatchReport {
        let handlers: Vec<(SubscriptionId, Handler)> = {
            let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
            match routes.get(&envelope.route_key) {
                Some(handlers) => handlers.clone(),
                None => Vec::new(),
            }
        };

        if handlers.is_empty() {
            debug!(
                route_key = %envelope.route_key,
                correlation_id = envelope.correlation_id,
                "no handler for inbound envelope"
            );
            return DispatchReport::default();
        }

        let mut report = DispatchReport::default();
        for (id, handler) in handlers {
            report.invoked += 1;
            match std::panic::catch_unwind(AssertUnwindSafe(|| handler(envelope))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    report.faulted += 1;
                    warn!(
                        route_key = %envelope.route_key,
                        subscription = id.0,
                        error = %err,
                        "route handler failed"
                    );
                }
                Err(panic) => {
                    report.faulted += 1;
                    warn!(
                        route_key = %envelope.route_key,
                        subscription = id.0,
                        panic = panic_message(panic.as_ref()),
                        "route handler panicked"
                    );
                }
            }
        }
        report
    }

    pub fn handler_count(&self, route_key: RouteKey) -> usize {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&route_key)
            .map_or(0, Vec::len)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Handle returned by [`MessageRouter::subscribe`].
///
/// The handler stays registered until [`unsubscribe`](Subscription::unsubscribe)
/// is called; dropping the handle does not remove it.
#[derive(Debug, Clone)]
pub struct Subscription {
    id: SubscriptionId,
    route_key: RouteKey,
    router: Weak<MessageRouter>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn route_key(&self) -> RouteKey {
        self.route_key
    }

    /// Remove this handler. Returns `false` if it was already removed.
    pub fn unsubscribe(&self) -> bool {
        match self.router.upgrade() {
            Some(router) => router.unsubscribe(self.route_key, self.id),
            None => false,
        }
    }
}
