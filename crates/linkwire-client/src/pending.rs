//! Correlation of outbound requests with inbound responses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use linkwire_frame::{CorrelationId, Envelope, RouteKey};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ClientError, Result};

struct Entry {
    route_key: RouteKey,
    deadline: Instant,
    timeout: Duration,
    completion: oneshot::Sender<Result<Envelope>>,
}

/// Outstanding requests keyed by correlation id.
///
/// Every entry is resolved exactly once: by its response, by deadline
/// eviction, by a drain, or by its [`PendingHandle`] going away.
pub struct PendingTable {
    entries: Mutex<HashMap<CorrelationId, Entry>>,
    next_id: AtomicU32,
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
        }
    }

    /// Next id from the wrapping counter. Never returns 0.
    pub fn next_correlation_id(&self) -> CorrelationId {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    /// Register a request under an explicit id.
    pub fn register(
        &self,
        correlation_id: CorrelationId,
        route_key: RouteKey,
        timeout: Duration,
        now: Instant,
    ) -> Result<PendingHandle<'_>> {
        let (tx, rx) = oneshot::channel();
        let deadline = now + timeout;
        {
            let mut entries = self.lock();
            if entries.contains_key(&correlation_id) {
                return Err(ClientError::DuplicateCorrelationId(correlation_id));
            }
            entries.insert(
                correlation_id,
                Entry {
                    route_key,
                    deadline,
                    timeout,
                    completion: tx,
                },
            );
        }
        Ok(PendingHandle {
            table: self,
            correlation_id,
            route_key,
            deadline,
            timeout,
            rx,
        })
    }

    /// Register under a fresh id, skipping ids still outstanding.
    pub fn register_next(
        &self,
        route_key: RouteKey,
        timeout: Duration,
        now: Instant,
    ) -> Result<PendingHandle<'_>> {
        loop {
            match self.register(self.next_correlation_id(), route_key, timeout, now) {
                Err(ClientError::DuplicateCorrelationId(_)) => continue,
                other => return other,
            }
        }
    }

    /// Resolve the entry matching `envelope.correlation_id`.
    ///
    /// Returns the envelope back when nothing is waiting for it.
    pub fn complete(&self, envelope: Envelope) -> Option<Envelope> {
        if envelope.correlation_id == 0 {
            return Some(envelope);
        }
        let Some(entry) = self.lock().remove(&envelope.correlation_id) else {
            return Some(envelope);
        };

        let result = if envelope.is_success() {
            Ok(envelope)
        } else {
            Err(ClientError::Application {
                status: envelope.response_status,
                message: envelope.error_text.clone(),
                route_key: entry.route_key,
                correlation_id: envelope.correlation_id,
            })
        };
        // The waiter may already be gone.
        let _ = entry.completion.send(result);
        None
    }

    /// Evict every entry with `deadline <= now` as `Timeout`.
    pub fn tick(&self, now: Instant) -> usize {
        let expired: Vec<(CorrelationId, Entry)> = {
            let mut entries = self.lock();
            let ids: Vec<CorrelationId> = entries
                .iter()
                .filter(|(_, entry)| entry.deadline <= now)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| entries.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        let count = expired.len();
        for (correlation_id, entry) in expired {
            debug!(correlation_id, route_key = %entry.route_key, "request timed out");
            let _ = entry.completion.send(Err(ClientError::Timeout {
                route_key: entry.route_key,
                correlation_id,
                after: entry.timeout,
            }));
        }
        count
    }

    /// Fail every outstanding entry with `NotConnected`.
    pub fn drain_all(&self, reason: &str) -> usize {
        let drained: Vec<(CorrelationId, Entry)> = self.lock().drain().collect();
        let count = drained.len();
        for (correlation_id, entry) in drained {
            let _ = entry.completion.send(Err(ClientError::NotConnected {
                reason: reason.to_string(),
                route_key: Some(entry.route_key),
                correlation_id: Some(correlation_id),
            }));
        }
        if count > 0 {
            debug!(count, reason, "drained pending requests");
        }
        count
    }

    /// Drop an entry without resolving it.
    pub fn cancel(&self, correlation_id: CorrelationId) -> bool {
        self.lock().remove(&correlation_id).is_some()
    }

    pub fn contains(&self, correlation_id: CorrelationId) -> bool {
        self.lock().contains_key(&correlation_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CorrelationId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Waiter side of one registered request.
///
/// Dropping the handle removes the entry, so an abandoned request never
/// lingers in the table.
pub struct PendingHandle<'a> {
    table: &'a PendingTable,
    correlation_id: CorrelationId,
    route_key: RouteKey,
    deadline: Instant,
    timeout: Duration,
    rx: oneshot::Receiver<Result<Envelope>>,
}

impl PendingHandle<'_> {
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn route_key(&self) -> RouteKey {
        self.route_key
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait for the response, the deadline, or `cancel`.
    pub async fn wait(mut self, cancel: Option<&CancellationToken>) -> Result<Envelope> {
        let route_key = self.route_key;
        let correlation_id = self.correlation_id;
        let cancelled = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            result = &mut self.rx => result.unwrap_or_else(|_| {
                Err(ClientError::NotConnected {
                    reason: "pending table dropped".to_string(),
                    route_key: Some(route_key),
                    correlation_id: Some(correlation_id),
                })
            }),
            _ = cancelled => Err(ClientError::Cancelled {
                route_key,
                correlation_id,
            }),
            _ = tokio::time::sleep_until(self.deadline) => Err(ClientError::Timeout {
                route_key,
                correlation_id,
                after: self.timeout,
            }),
        }
    }
}

impl Drop for PendingHandle<'_> {
    fn drop(&mut self) {
        self.table.cancel(self.correlation_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUTE: RouteKey = RouteKey::new(1, 2);

    #[test]
    fn correlation_ids_skip_zero_on_wrap() {
        let table = PendingTable::new();
        table.next_id.store(u32::MAX, Ordering::Relaxed);
        assert_eq!(table.next_correlation_id(), u32::MAX);
        assert_eq!(table.next_correlation_id(), 1);
        assert_eq!(table.next_correlation_id(), 2);
    }

    #[test]
    fn duplicate_registration_fails() {
        let table = PendingTable::new();
        let now = Instant::now();
        let _first = table.register(7, ROUTE, Duration::from_secs(1), now).unwrap();
        assert!(matches!(
            table.register(7, ROUTE, Duration::from_secs(1), now),
            Err(ClientError::DuplicateCorrelationId(7))
        ));
    }

    #[test]
    fn register_next_skips_outstanding_ids() {
        let table = PendingTable::new();
        let now = Instant::now();
        let _held = table.register(1, ROUTE, Duration::from_secs(1), now).unwrap();
        let next = table
            .register_next(ROUTE, Duration::from_secs(1), now)
            .unwrap();
        assert_eq!(next.correlation_id(), 2);
    }

    #[test]
    fn tick_evicts_once_with_timeout() {
        let table = PendingTable::new();
        let now = Instant::now();
        let timeout = Duration::from_millis(5000);
        let mut handle = table.register(9, ROUTE, timeout, now).unwrap();

        assert_eq!(table.tick(now + Duration::from_millis(4999)), 0);
        assert_eq!(table.tick(now + timeout + Duration::from_millis(1)), 1);
        assert_eq!(table.tick(now + timeout + Duration::from_millis(2)), 0);
        assert!(table.is_empty());

        match handle.rx.try_recv() {
            Ok(Err(ClientError::Timeout {
                correlation_id: 9, ..
            })) => {}
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn unmatched_response_is_returned() {
        let table = PendingTable::new();
        let push = Envelope::push(ROUTE, &b"news"[..]);
        assert_eq!(table.complete(push.clone()), Some(push));

        let stray = Envelope::request(ROUTE, 55, &b""[..]);
        assert!(table.complete(stray).is_some());
    }

    #[tokio::test]
    async fn matched_response_resolves_waiter() {
        let table = PendingTable::new();
        let handle = table
            .register_next(ROUTE, Duration::from_secs(5), Instant::now())
            .unwrap();
        let id = handle.correlation_id();

        let request = Envelope::request(ROUTE, id, &b"q"[..]);
        assert!(table
            .complete(Envelope::response_to(&request, &b"a"[..]))
            .is_none());

        let response = handle.wait(None).await.unwrap();
        assert_eq!(response.payload.as_ref(), b"a");
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn nonzero_status_becomes_application_error() {
        let table = PendingTable::new();
        let handle = table
            .register_next(ROUTE, Duration::from_secs(5), Instant::now())
            .unwrap();
        let request = Envelope::request(ROUTE, handle.correlation_id(), &b""[..]);
        table.complete(Envelope::error_response(&request, 403, "forbidden"));

        match handle.wait(None).await {
            Err(ClientError::Application {
                status, message, ..
            }) => {
                assert_eq!(status, 403);
                assert_eq!(message, "forbidden");
            }
            other => panic!("expected application error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn drain_fails_everything_with_not_connected() {
        let table = PendingTable::new();
        let now = Instant::now();
        let a = table.register(1, ROUTE, Duration::from_secs(5), now).unwrap();
        let b = table.register(2, ROUTE, Duration::from_secs(5), now).unwrap();

        assert_eq!(table.drain_all("transport lost"), 2);
        for handle in [a, b] {
            let err = handle.wait(None).await.unwrap_err();
            assert_eq!(err.code(), crate::error::ErrorCode::NotConnected);
            assert!(err.correlation_id().is_some());
        }
    }

    #[tokio::test]
    async fn cancellation_removes_entry() {
        let table = PendingTable::new();
        let handle = table
            .register(3, ROUTE, Duration::from_secs(5), Instant::now())
            .unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let err = handle.wait(Some(&token)).await.unwrap_err();
        assert!(matches!(err, ClientError::Cancelled { .. }));
        assert!(!table.contains(3));
    }

    #[test]
    fn dropping_handle_removes_entry() {
        let table = PendingTable::new();
        let handle = table
            .register(4, ROUTE, Duration::from_secs(5), Instant::now())
            .unwrap();
        assert!(table.contains(4));
        drop(handle);
        assert!(!table.contains(4));
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_times_out_at_deadline() {
        let table = PendingTable::new();
        let handle = table
            .register(5, ROUTE, Duration::from_millis(5000), Instant::now())
            .unwrap();
        let err = handle.wait(None).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Timeout {
                correlation_id: 5,
                ..
            }
        ));
    }
}
