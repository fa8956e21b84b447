use crate::{protocol::Message, FepError, FepResult};
use dashmap::DashMap;
use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    task::{Context, Poll},
    time::{Duration, Instant},
};
use tokio::sync::oneshot;

/// The cross-connection correlation table: a concurrent map from trace
/// key (field 11) to a one-shot completion handle with a per-entry
/// deadline.
///
/// Each entry resolves exactly once — by a matching response, by its
/// deadline, by an explicit cancellation, or by link shutdown — and is
/// removed on every one of those paths. Deadlines fire through a sweep on
/// each registration plus a low-rate background sweeper, so an entry
/// whose caller never polls still expires.
#[derive(Clone, Debug)]
pub struct PendingRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Debug)]
struct RegistryInner {
    entries: DashMap<String, PendingEntry>,
    soft_cap: usize,
    registered: AtomicU64,
    completed: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
}

#[derive(Debug)]
struct PendingEntry {
    tx: oneshot::Sender<FepResult<Message>>,
    #[allow(dead_code)]
    registered_at: Instant,
    deadline: Instant,
    origin: &'static str,
}

// Why an entry is being resolved without a matching response.
#[derive(Clone, Debug)]
pub(crate) enum CancelReason {
    Shutdown,
    ConnectionDown(String),
    Dropped,
}

impl CancelReason {
    fn into_error(self) -> FepError {
        match self {
            Self::Shutdown => FepError::Shutdown,
            Self::ConnectionDown(reason) => FepError::ConnectionDown(reason),
            Self::Dropped => FepError::Cancelled("caller dropped the pending response".to_string()),
        }
    }
}

impl PendingRegistry {
    /// Creates a registry whose in-flight window is `soft_cap` entries.
    pub fn new(soft_cap: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                entries: DashMap::new(),
                soft_cap,
                registered: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                timed_out: AtomicU64::new(0),
                cancelled: AtomicU64::new(0),
            }),
        }
    }

    /// Registers `key` with the given deadline and returns the future
    /// that resolves with the correlated response.
    ///
    /// Fails with `Overloaded` when the window is full and with
    /// `DuplicateTrace` when the key is already pending. Dropping the
    /// returned future removes the entry.
    pub fn register(
        &self,
        key: impl Into<String>,
        deadline: Instant,
        origin: &'static str,
    ) -> FepResult<PendingResponse> {
        self.sweep_expired();
        let key = key.into();
        if self.inner.entries.len() >= self.inner.soft_cap {
            return Err(FepError::Overloaded);
        }
        let (tx, rx) = oneshot::channel();
        match self.inner.entries.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(FepError::DuplicateTrace(key));
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(PendingEntry {
                    tx,
                    registered_at: Instant::now(),
                    deadline,
                    origin,
                });
            }
        }
        self.inner.registered.fetch_add(1, Ordering::Relaxed);
        trace!("registered trace {key}");
        Ok(PendingResponse {
            registry: self.clone(),
            key,
            rx,
            resolved: false,
        })
    }

    /// Resolves the entry for `key` with `message`. Returns false when no
    /// entry is pending — the caller then treats the message as
    /// unsolicited.
    pub fn complete(&self, key: &str, message: Message) -> bool {
        self.try_complete(key, message).is_ok()
    }

    // Like `complete`, but hands the message back on a miss so the
    // receive path can forward it unsolicited without cloning.
    pub(crate) fn try_complete(&self, key: &str, message: Message) -> Result<(), Message> {
        match self.inner.entries.remove(key) {
            Some((_, entry)) => {
                trace!("completing trace {key} (origin {})", entry.origin);
                self.inner.completed.fetch_add(1, Ordering::Relaxed);
                // a send error means the caller has already gone away;
                // the entry is removed either way
                let _ = entry.tx.send(Ok(message));
                Ok(())
            }
            None => Err(message),
        }
    }

    /// Resolves the entry for `key` with a cancellation error. Idempotent.
    pub(crate) fn cancel(&self, key: &str, reason: CancelReason) {
        if let Some((_, entry)) = self.inner.entries.remove(key) {
            debug!("cancelling trace {key}: {reason:?}");
            self.inner.cancelled.fetch_add(1, Ordering::Relaxed);
            let _ = entry.tx.send(Err(reason.into_error()));
        }
    }

    /// Cancels every pending entry. Used on link teardown and, per the
    /// failure policy, when the response path is lost.
    pub(crate) fn cancel_all(&self, reason: &CancelReason) {
        let keys: Vec<String> = self
            .inner
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        if !keys.is_empty() {
            info!("cancelling {} pending requests: {reason:?}", keys.len());
        }
        for key in keys {
            self.cancel(&key, reason.clone());
        }
    }

    /// True when `key` has a live entry.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.entries.contains_key(key)
    }

    /// Resolves every entry whose deadline has passed with `Timeout`.
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .inner
            .entries
            .iter()
            .filter(|entry| entry.deadline <= now)
            .map(|entry| entry.key().clone())
            .collect();
        for key in expired {
            if let Some((_, entry)) = self.inner.entries.remove(&key) {
                debug!("trace {key} expired after {:?}", now - entry.registered_at);
                self.inner.timed_out.fetch_add(1, Ordering::Relaxed);
                let _ = entry.tx.send(Err(FepError::Timeout));
            }
        }
    }

    /// Spawns the low-rate deadline sweeper; it ends when the last
    /// registry handle is dropped.
    pub fn spawn_sweeper(&self, period: Duration) -> tokio::task::JoinHandle<()> {
        let weak: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(inner) => PendingRegistry { inner }.sweep_expired(),
                    None => break,
                }
            }
        })
    }

    /// A snapshot of the registry counters.
    pub fn statistics(&self) -> RegistryStatistics {
        RegistryStatistics {
            registered: self.inner.registered.load(Ordering::Relaxed),
            completed: self.inner.completed.load(Ordering::Relaxed),
            timed_out: self.inner.timed_out.load(Ordering::Relaxed),
            cancelled: self.inner.cancelled.load(Ordering::Relaxed),
            current_pending: self.inner.entries.len(),
        }
    }
}

/// Counter snapshot of a [`PendingRegistry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegistryStatistics {
    registered: u64,
    completed: u64,
    timed_out: u64,
    cancelled: u64,
    current_pending: usize,
}

impl RegistryStatistics {
    /// Entries ever registered.
    pub fn registered(&self) -> u64 {
        self.registered
    }
    /// Entries resolved by a matching response.
    pub fn completed(&self) -> u64 {
        self.completed
    }
    /// Entries resolved by their deadline.
    pub fn timed_out(&self) -> u64 {
        self.timed_out
    }
    /// Entries resolved by cancellation (caller drop, policy, shutdown).
    pub fn cancelled(&self) -> u64 {
        self.cancelled
    }
    /// Entries currently awaiting a response.
    pub fn current_pending(&self) -> usize {
        self.current_pending
    }
}

/// The caller's handle on a registered request; resolves with the
/// correlated response or the entry's terminal error.
///
/// Dropping it before resolution removes the registry entry, so a late
/// response for the trace becomes unsolicited.
#[derive(Debug)]
pub struct PendingResponse {
    registry: PendingRegistry,
    key: String,
    rx: oneshot::Receiver<FepResult<Message>>,
    resolved: bool,
}

impl PendingResponse {
    /// The trace key this response is correlated by.
    pub fn trace(&self) -> &str {
        &self.key
    }
}

impl Future for PendingResponse {
    type Output = FepResult<Message>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => {
                this.resolved = true;
                Poll::Ready(result)
            }
            Poll::Ready(Err(_closed)) => {
                // the registry never drops a sender without resolving it;
                // reaching this means the whole registry went away
                this.resolved = true;
                Poll::Ready(Err(FepError::Shutdown))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if !self.resolved {
            self.registry.cancel(&self.key, CancelReason::Dropped);
        }
    }
}

#[cfg(test)]
mod test {
    use super::{CancelReason, PendingRegistry};
    use crate::{protocol::Message, FepError, Mti};
    use std::{
        str::FromStr,
        time::{Duration, Instant},
    };

    fn msg(trace: &str) -> Message {
        Message::new(Mti::from_str("0210").unwrap()).with(11, trace)
    }

    #[tokio::test]
    async fn test_register_and_complete() {
        let registry = PendingRegistry::new(16);
        let pending = registry
            .register("000001", Instant::now() + Duration::from_secs(1), "FISC")
            .unwrap();
        assert!(registry.contains("000001"));
        assert!(registry.complete("000001", msg("000001")));
        let response = pending.await.unwrap();
        assert_eq!(response.trace(), Some("000001"));
        let stats = registry.statistics();
        assert_eq!(stats.completed(), 1);
        assert_eq!(stats.current_pending(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_rejected() {
        let registry = PendingRegistry::new(16);
        let _pending = registry
            .register("000001", Instant::now() + Duration::from_secs(1), "FISC")
            .unwrap();
        assert!(matches!(
            registry.register("000001", Instant::now() + Duration::from_secs(1), "FISC"),
            Err(FepError::DuplicateTrace(_))
        ));
    }

    #[tokio::test]
    async fn test_deadline_fires() {
        let registry = PendingRegistry::new(16);
        let _sweeper = registry.spawn_sweeper(Duration::from_millis(10));
        let pending = registry
            .register("000002", Instant::now() + Duration::from_millis(30), "FISC")
            .unwrap();
        assert!(matches!(pending.await, Err(FepError::Timeout)));
        let stats = registry.statistics();
        assert_eq!(stats.timed_out(), 1);
        assert_eq!(stats.current_pending(), 0);
        // a late response is unsolicited, not applied
        assert!(!registry.complete("000002", msg("000002")));
    }

    #[tokio::test]
    async fn test_drop_removes_entry() {
        let registry = PendingRegistry::new(16);
        let pending = registry
            .register("000003", Instant::now() + Duration::from_secs(5), "FISC")
            .unwrap();
        drop(pending);
        assert!(!registry.contains("000003"));
        assert_eq!(registry.statistics().cancelled(), 1);
    }

    #[tokio::test]
    async fn test_window_cap() {
        let registry = PendingRegistry::new(2);
        let deadline = Instant::now() + Duration::from_secs(5);
        let _a = registry.register("000001", deadline, "FISC").unwrap();
        let _b = registry.register("000002", deadline, "FISC").unwrap();
        assert!(matches!(
            registry.register("000003", deadline, "FISC"),
            Err(FepError::Overloaded)
        ));
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let registry = PendingRegistry::new(16);
        let deadline = Instant::now() + Duration::from_secs(5);
        let a = registry.register("000001", deadline, "FISC").unwrap();
        let b = registry.register("000002", deadline, "FISC").unwrap();
        registry.cancel_all(&CancelReason::Shutdown);
        assert!(matches!(a.await, Err(FepError::Shutdown)));
        assert!(matches!(b.await, Err(FepError::Shutdown)));
        assert_eq!(registry.statistics().cancelled(), 2);
    }

    #[tokio::test]
    async fn test_each_key_resolves_exactly_once() {
        let registry = PendingRegistry::new(256);
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut handles = Vec::new();
        for i in 0..100 {
            let key = format!("{i:06}");
            let pending = registry.register(key.clone(), deadline, "FISC").unwrap();
            let completer = registry.clone();
            handles.push(tokio::spawn(async move {
                let done = completer.complete(&key, msg(&key));
                let second = completer.complete(&key, msg(&key));
                (done, second, pending.await)
            }));
        }
        for handle in handles {
            let (done, second, result) = handle.await.unwrap();
            assert!(done);
            assert!(!second);
            assert!(result.is_ok());
        }
        let stats = registry.statistics();
        assert_eq!(stats.completed(), 100);
        assert_eq!(stats.current_pending(), 0);
    }
}
