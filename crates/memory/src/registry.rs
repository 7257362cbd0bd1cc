//! In-process session arena with idle eviction and per-session turn locks.

use crate::session_store::{SessionStore, StoreError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use switchyard_core::Session;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

/// Outcome of waiting for a session's turn lock.
pub enum TurnAccess {
    Acquired(OwnedMutexGuard<()>),
    /// The wait timed out and the turn runs without the lock.
    Unlocked,
}

impl TurnAccess {
    pub fn is_locked(&self) -> bool {
        matches!(self, TurnAccess::Acquired(_))
    }
}

/// One live session plus its coordination state.
pub struct SessionEntry {
    session: Mutex<Session>,
    turn_lock: Arc<tokio::sync::Mutex<()>>,
    abort_generation: AtomicU64,
    last_active: Mutex<Instant>,
}

impl SessionEntry {
    fn new(session: Session) -> Self {
        Self {
            session: Mutex::new(session),
            turn_lock: Arc::new(tokio::sync::Mutex::new(())),
            abort_generation: AtomicU64::new(0),
            last_active: Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> String {
        self.session.lock().id.clone()
    }

    pub fn snapshot(&self) -> Session {
        self.session.lock().clone()
    }

    /// Mutate the session under its data lock. Keep `f` short and sync.
    pub fn update<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        self.touch();
        f(&mut self.session.lock())
    }

    pub fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    pub fn last_active(&self) -> Instant {
        *self.last_active.lock()
    }

    /// Signal any in-flight turn to stop. Returns the new generation, which
    /// the caller owns until the next signal.
    pub fn request_abort(&self) -> u64 {
        self.abort_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn generation(&self) -> u64 {
        self.abort_generation.load(Ordering::SeqCst)
    }

    /// True once a newer turn or an operator has signalled since `generation`.
    pub fn is_aborted(&self, generation: u64) -> bool {
        self.generation() != generation
    }

    /// A turn holds the lock or a caller still holds the entry.
    fn in_use(self: &Arc<Self>) -> bool {
        Arc::strong_count(self) > 1 || self.turn_lock.try_lock().is_err()
    }

    /// Wait up to `wait` for the turn lock. On timeout the caller proceeds
    /// without it; two turns may then run on this session at once.
    pub async fn acquire_turn(&self, wait: Duration) -> TurnAccess {
        match tokio::time::timeout(wait, self.turn_lock.clone().lock_owned()).await {
            Ok(guard) => TurnAccess::Acquired(guard),
            Err(_) => {
                warn!(
                    "Turn lock for session {} not released within {:?}, proceeding unlocked",
                    self.id(),
                    wait
                );
                TurnAccess::Unlocked
            }
        }
    }
}

/// Arena of live sessions keyed by id, backed by a [`SessionStore`].
pub struct SessionRegistry {
    entries: Mutex<HashMap<String, Arc<SessionEntry>>>,
    store: Arc<dyn SessionStore>,
    idle_ttl: Duration,
    capacity: usize,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn SessionStore>, idle_ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            store,
            idle_ttl,
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<SessionEntry>> {
        self.entries.lock().get(id).cloned()
    }

    /// Live entry for `id`, loading it from the store or creating it on
    /// first reference.
    pub async fn get_or_load(&self, id: &str, user_id: Option<&str>) -> Result<Arc<SessionEntry>, StoreError> {
        if let Some(entry) = self.get(id) {
            entry.touch();
            return Ok(entry);
        }

        let session = match self.store.load(id).await? {
            Some(session) => {
                debug!("Loaded session {} with {} messages", id, session.messages.len());
                session
            }
            None => {
                info!("Creating session {}", id);
                Session::new(id, user_id.map(str::to_string))
            }
        };

        let entry = {
            let mut entries = self.entries.lock();
            entries
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(SessionEntry::new(session)))
                .clone()
        };
        entry.touch();
        self.enforce_capacity();
        Ok(entry)
    }

    pub async fn persist(&self, session: &Session) -> Result<(), StoreError> {
        self.store.persist(session).await
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn evict_idle(&self) -> usize {
        self.evict_idle_at(Instant::now())
    }

    /// Drop entries idle longer than the TTL as of `now`. Entries in use
    /// are kept so their turn lock and abort signal stay shared.
    pub fn evict_idle_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| {
            entry.in_use() || now.saturating_duration_since(entry.last_active()) <= self.idle_ttl
        });
        let evicted = before - entries.len();
        if evicted > 0 {
            info!("Evicted {} idle session(s)", evicted);
        }
        evicted
    }

    /// Drop the least recently active idle entries until within capacity.
    /// Entries in use are never evicted, so the arena may run over capacity
    /// while many turns are in flight.
    fn enforce_capacity(&self) {
        let mut entries = self.entries.lock();
        while entries.len() > self.capacity {
            let oldest = entries
                .iter()
                .filter(|(_, entry)| !entry.in_use())
                .min_by_key(|(_, entry)| entry.last_active())
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    debug!("Capacity reached, evicting session {}", id);
                    entries.remove(&id);
                }
                None => {
                    warn!(
                        "Session arena over capacity ({} > {}), every entry is in use",
                        entries.len(),
                        self.capacity
                    );
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NullStore;

    #[async_trait]
    impl SessionStore for NullStore {
        async fn load(&self, _id: &str) -> Result<Option<Session>, StoreError> {
            Ok(None)
        }
        async fn persist(&self, _session: &Session) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn registry(ttl: Duration, capacity: usize) -> SessionRegistry {
        SessionRegistry::new(Arc::new(NullStore), ttl, capacity)
    }

    #[tokio::test]
    async fn test_same_entry_for_same_id() {
        let registry = registry(Duration::from_secs(60), 10);
        let a = registry.get_or_load("s", None).await.unwrap();
        let b = registry.get_or_load("s", None).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let registry = registry(Duration::from_secs(60), 2);
        registry.get_or_load("a", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        registry.get_or_load("b", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        registry.get_or_load("c", None).await.unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.get("a").is_none());
        assert!(registry.get("c").is_some());
    }

    #[tokio::test]
    async fn test_idle_eviction() {
        let registry = registry(Duration::from_secs(10), 10);
        registry.get_or_load("a", None).await.unwrap();
        assert_eq!(registry.evict_idle_at(Instant::now()), 0);
        assert_eq!(registry.evict_idle_at(Instant::now() + Duration::from_secs(11)), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_abort_generation() {
        let registry = registry(Duration::from_secs(60), 10);
        let entry = registry.get_or_load("s", None).await.unwrap();
        let first = entry.request_abort();
        assert!(!entry.is_aborted(first));
        let second = entry.request_abort();
        assert!(entry.is_aborted(first));
        assert!(!entry.is_aborted(second));
    }

    #[tokio::test]
    async fn test_turn_lock_times_out_unlocked() {
        let registry = registry(Duration::from_secs(60), 10);
        let entry = registry.get_or_load("s", None).await.unwrap();
        let held = entry.acquire_turn(Duration::from_millis(50)).await;
        assert!(held.is_locked());

        let second = entry.acquire_turn(Duration::from_millis(20)).await;
        assert!(!second.is_locked());

        drop(held);
        assert!(entry.acquire_turn(Duration::from_millis(20)).await.is_locked());
    }

    #[tokio::test]
    async fn test_capacity_keeps_entry_with_running_turn() {
        let registry = registry(Duration::from_secs(60), 1);
        let a = registry.get_or_load("a", None).await.unwrap();
        let generation = a.request_abort();
        let held = a.acquire_turn(Duration::from_millis(50)).await;
        assert!(held.is_locked());
        let a_ptr = Arc::as_ptr(&a);
        drop(a);

        registry.get_or_load("b", None).await.unwrap();
        let again = registry.get_or_load("a", None).await.unwrap();
        assert_eq!(Arc::as_ptr(&again), a_ptr);
        assert_eq!(registry.len(), 2);

        assert!(!again.acquire_turn(Duration::from_millis(20)).await.is_locked());
        again.request_abort();
        assert!(again.is_aborted(generation));
        drop(held);
    }

    #[tokio::test]
    async fn test_idle_eviction_skips_running_turn() {
        let registry = registry(Duration::from_secs(10), 10);
        let entry = registry.get_or_load("a", None).await.unwrap();
        let held = entry.acquire_turn(Duration::from_millis(50)).await;
        drop(entry);

        let later = Instant::now() + Duration::from_secs(11);
        assert_eq!(registry.evict_idle_at(later), 0);
        drop(held);
        assert_eq!(registry.evict_idle_at(later), 1);
    }
}
