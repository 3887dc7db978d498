//! Subscription Registry
//!
//! Tracks subscriber callbacks interested in account telemetry and
//! performs the synchronous fan-out after each broker update.
//!
//! # Design
//!
//! The registry tracks:
//! - Opaque subscription ids (never callback identity), so the same
//!   callback may be registered twice and removed unambiguously
//! - An optional account filter per subscription
//! - An active flag per entry, cleared on unsubscribe
//!
//! Notification iterates a snapshot of the registry taken when the pass
//! starts. A callback may unsubscribe itself or any other subscription
//! mid-pass; removed entries that have not run yet are skipped for the
//! rest of the pass.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::domain::account::{AccountId, AccountMap, AccountSnapshot};

// =============================================================================
// Types
// =============================================================================

/// Opaque identifier for one registration.
pub type SubscriptionId = u64;

/// Subscriber callback. Runs on the pump thread and must not block.
pub type Callback = Arc<dyn Fn(&AccountNotification) + Send + Sync>;

/// Payload delivered to a subscriber.
#[derive(Debug, Clone)]
pub enum AccountNotification {
    /// Post-merge snapshot of the filtered account.
    Account(Arc<AccountSnapshot>),
    /// Full post-merge map, delivered to unfiltered subscribers.
    All(Arc<AccountMap>),
}

impl AccountNotification {
    /// Snapshot for `account_id`, if this notification carries it.
    #[must_use]
    pub fn account(&self, account_id: AccountId) -> Option<&Arc<AccountSnapshot>> {
        match self {
            Self::Account(snapshot) => (snapshot.account_id == account_id).then_some(snapshot),
            Self::All(map) => map.get(&account_id),
        }
    }
}

struct SubscriptionEntry {
    filter: Option<AccountId>,
    callback: Callback,
    active: AtomicBool,
}

impl SubscriptionEntry {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Registry of subscriber callbacks keyed by opaque handles.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use telemetry_hub::domain::subscription::SubscriptionRegistry;
///
/// let registry = Arc::new(SubscriptionRegistry::new());
///
/// let handle = registry.subscribe(Some(42), |_notification| {});
/// assert_eq!(registry.len(), 1);
///
/// assert!(handle.unsubscribe());
/// assert!(registry.is_empty());
///
/// // Repeating the unsubscribe is harmless.
/// assert!(!handle.unsubscribe());
/// ```
pub struct SubscriptionRegistry {
    next_id: AtomicU64,
    entries: RwLock<BTreeMap<SubscriptionId, Arc<SubscriptionEntry>>>,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("subscriptions", &self.len())
            .finish_non_exhaustive()
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a callback and return its id.
    ///
    /// The caller is responsible for calling [`Self::unsubscribe`]. Prefer
    /// [`Self::subscribe`] which returns a guard.
    pub fn register(&self, filter: Option<AccountId>, callback: Callback) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(SubscriptionEntry {
            filter,
            callback,
            active: AtomicBool::new(true),
        });

        self.entries.write().insert(id, entry);
        tracing::debug!(subscription_id = id, filter = ?filter, "Subscription registered");

        id
    }

    /// Register a callback and return a handle that unsubscribes on drop.
    pub fn subscribe<F>(
        self: &Arc<Self>,
        filter: Option<AccountId>,
        callback: F,
    ) -> SubscriptionHandle
    where
        F: Fn(&AccountNotification) + Send + Sync + 'static,
    {
        let id = self.register(filter, Arc::new(callback));
        SubscriptionHandle {
            id,
            registry: Arc::downgrade(self),
        }
    }

    /// Remove a registration.
    ///
    /// Returns `false` if the id is unknown or was already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Some(entry) = self.entries.write().remove(&id) else {
            return false;
        };

        entry.active.store(false, Ordering::Release);
        tracing::debug!(subscription_id = id, "Subscription removed");
        true
    }

    /// Notify subscribers about changed accounts.
    ///
    /// Unfiltered subscribers receive the full map once per pass; filtered
    /// subscribers receive their account's snapshot if it changed. Returns
    /// the number of callbacks invoked.
    pub fn notify(&self, changed: &[AccountId], accounts: &Arc<AccountMap>) -> usize {
        if changed.is_empty() {
            return 0;
        }

        let pass: Vec<Arc<SubscriptionEntry>> = self.entries.read().values().cloned().collect();
        let mut invoked = 0;

        for entry in pass {
            if !entry.is_active() {
                continue;
            }

            let notification = match entry.filter {
                None => AccountNotification::All(Arc::clone(accounts)),
                Some(account_id) => {
                    if !changed.contains(&account_id) {
                        continue;
                    }
                    let Some(snapshot) = accounts.get(&account_id) else {
                        continue;
                    };
                    AccountNotification::Account(Arc::clone(snapshot))
                }
            };

            (entry.callback)(&notification);
            invoked += 1;
        }

        invoked
    }

    /// Check whether an id is currently registered.
    #[must_use]
    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.entries.read().contains_key(&id)
    }

    /// Number of live registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check whether there are no live registrations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Registration statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let entries = self.entries.read();
        let filtered = entries.values().filter(|e| e.filter.is_some()).count();
        SubscriptionStats {
            total: entries.len(),
            filtered,
            unfiltered: entries.len() - filtered,
        }
    }
}

// =============================================================================
// Subscription Handle
// =============================================================================

/// Disposable registration handle.
///
/// Dropping the handle unsubscribes. The handle holds only a weak reference
/// to the registry, so it never keeps the registry alive.
#[must_use = "dropping the handle unsubscribes immediately"]
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    registry: Weak<SubscriptionRegistry>,
}

impl SubscriptionHandle {
    /// The registration id.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Remove the registration now.
    ///
    /// Returns `false` if it was already removed or the registry is gone.
    pub fn unsubscribe(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.unsubscribe(self.id))
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registration statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Total live registrations.
    pub total: usize,
    /// Registrations with an account filter.
    pub filtered: usize,
    /// Registrations receiving the full map.
    pub unfiltered: usize,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use parking_lot::Mutex;
    use rust_decimal::Decimal;

    use super::*;

    fn accounts(ids: &[AccountId]) -> Arc<AccountMap> {
        Arc::new(
            ids.iter()
                .map(|&id| (id, Arc::new(AccountSnapshot::new(id, Decimal::from(id), 1))))
                .collect(),
        )
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&AccountNotification) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        (count, move |_: &AccountNotification| {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn subscribe_assigns_unique_ids() {
        let registry = Arc::new(SubscriptionRegistry::new());

        let a = registry.subscribe(None, |_| {});
        let b = registry.subscribe(None, |_| {});

        assert_ne!(a.id(), b.id());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn same_callback_registered_twice_is_independent() {
        let registry = SubscriptionRegistry::new();
        let (count, callback) = counter();
        let callback: Callback = Arc::new(callback);

        let first = registry.register(None, Arc::clone(&callback));
        let second = registry.register(None, callback);

        assert_eq!(registry.notify(&[1], &accounts(&[1])), 2);

        assert!(registry.unsubscribe(first));
        assert!(registry.contains(second));
        assert_eq!(registry.notify(&[1], &accounts(&[1])), 1);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn unfiltered_receives_full_map() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let _handle = registry.subscribe(None, move |n| {
            if let AccountNotification::All(map) = n {
                let mut ids: Vec<_> = map.keys().copied().collect();
                ids.sort_unstable();
                sink.lock().push(ids);
            }
        });

        registry.notify(&[2], &accounts(&[1, 2]));

        assert_eq!(*seen.lock(), vec![vec![1, 2]]);
    }

    #[test]
    fn filtered_receives_only_matching_account() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let _handle = registry.subscribe(Some(2), move |n| {
            if let AccountNotification::Account(snapshot) = n {
                sink.lock().push(snapshot.account_id);
            }
        });

        // Account 2 unchanged: no notification.
        assert_eq!(registry.notify(&[1], &accounts(&[1, 2])), 0);
        assert_eq!(registry.notify(&[1, 2], &accounts(&[1, 2])), 1);

        assert_eq!(*seen.lock(), vec![2]);
    }

    #[test]
    fn notify_with_no_changes_invokes_nothing() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (count, callback) = counter();
        let _handle = registry.subscribe(None, callback);

        assert_eq!(registry.notify(&[], &accounts(&[1])), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsubscribed_callback_is_never_invoked() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (count, callback) = counter();

        let handle = registry.subscribe(None, callback);
        assert!(handle.unsubscribe());

        registry.notify(&[1], &accounts(&[1]));

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn double_unsubscribe_is_harmless() {
        let registry = SubscriptionRegistry::new();
        let id = registry.register(None, Arc::new(|_: &AccountNotification| {}));

        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        assert!(!registry.unsubscribe(999));
    }

    #[test]
    fn dropping_handle_unsubscribes() {
        let registry = Arc::new(SubscriptionRegistry::new());

        {
            let _handle = registry.subscribe(Some(1), |_| {});
            assert_eq!(registry.len(), 1);
        }

        assert!(registry.is_empty());
    }

    #[test]
    fn handle_outliving_registry_is_harmless() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let handle = registry.subscribe(None, |_| {});

        drop(registry);

        assert!(!handle.unsubscribe());
    }

    #[test]
    fn unsubscribe_of_later_entry_mid_pass_skips_it() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let victim: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        let reg = Arc::clone(&registry);
        let target = Arc::clone(&victim);
        let first = registry.register(
            None,
            Arc::new(move |_: &AccountNotification| {
                if let Some(id) = *target.lock() {
                    reg.unsubscribe(id);
                }
            }),
        );

        let (count, callback) = counter();
        let second = registry.register(None, Arc::new(callback));
        *victim.lock() = Some(second);

        let invoked = registry.notify(&[1], &accounts(&[1]));

        assert_eq!(invoked, 1);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(registry.contains(first));
        assert!(!registry.contains(second));
    }

    #[test]
    fn self_unsubscribe_mid_pass_completes_current_call() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let own_id: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicUsize::new(0));

        let reg = Arc::clone(&registry);
        let id_slot = Arc::clone(&own_id);
        let call_count = Arc::clone(&calls);
        let id = registry.register(
            None,
            Arc::new(move |_: &AccountNotification| {
                call_count.fetch_add(1, Ordering::SeqCst);
                if let Some(id) = *id_slot.lock() {
                    reg.unsubscribe(id);
                }
            }),
        );
        *own_id.lock() = Some(id);

        registry.notify(&[1], &accounts(&[1]));
        registry.notify(&[1], &accounts(&[1]));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn subscribe_mid_pass_waits_for_next_pass() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (count, callback) = counter();
        let late: Callback = Arc::new(callback);

        let reg = Arc::clone(&registry);
        let pending = Arc::new(Mutex::new(Some(late)));
        registry.register(
            None,
            Arc::new(move |_: &AccountNotification| {
                if let Some(cb) = pending.lock().take() {
                    reg.register(None, cb);
                }
            }),
        );

        registry.notify(&[1], &accounts(&[1]));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        registry.notify(&[1], &accounts(&[1]));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn notification_account_accessor() {
        let map = accounts(&[1, 2]);

        let all = AccountNotification::All(Arc::clone(&map));
        assert_eq!(all.account(2).map(|s| s.account_id), Some(2));
        assert!(all.account(3).is_none());

        let one = AccountNotification::Account(Arc::clone(&map[&1]));
        assert!(one.account(1).is_some());
        assert!(one.account(2).is_none());
    }

    #[test]
    fn stats_are_accurate() {
        let registry = Arc::new(SubscriptionRegistry::new());

        let _a = registry.subscribe(None, |_| {});
        let _b = registry.subscribe(Some(1), |_| {});
        let _c = registry.subscribe(Some(2), |_| {});

        let stats = registry.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.filtered, 2);
        assert_eq!(stats.unfiltered, 1);
    }

    #[test]
    fn thread_safety_concurrent_churn() {
        use std::thread;

        let registry = Arc::new(SubscriptionRegistry::new());
        let mut handles = vec![];

        for i in 0..10u64 {
            let r = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    let id = r.register(Some(i), Arc::new(|_: &AccountNotification| {}));
                    assert!(r.unsubscribe(id));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(registry.is_empty());
    }
}
