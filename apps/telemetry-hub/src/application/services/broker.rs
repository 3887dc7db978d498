//! Account Data Broker
//!
//! Authoritative in-memory registry of the latest snapshot per account.
//! Applies decoded updates under the sequence rule and fans the result out
//! to subscribers.
//!
//! # Architecture
//!
//! ```text
//! StreamConnection::pump ──apply──► AccountBroker ──notify──► Subscriber 1
//!                                        │                 ──► Subscriber 2
//!                                        └── snapshot() ◄──── readers
//! ```
//!
//! The broker is a single-writer, multi-reader hub. Updates are merged
//! under a short write lock into a copy-on-write `Arc<AccountMap>`;
//! notification runs after the lock is released so callbacks may call back
//! into the broker.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::application::ports::{AccountUpdateSink, ApplyOutcome};
use crate::domain::account::{AccountId, AccountMap, AccountSnapshot, merge_into};
use crate::domain::subscription::{
    AccountNotification, SubscriptionHandle, SubscriptionId, SubscriptionRegistry,
};

/// Shared broker reference.
pub type SharedAccountBroker = Arc<AccountBroker>;

/// Latest-state account broker with subscriber fan-out.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use rust_decimal::Decimal;
/// use telemetry_hub::{AccountBroker, AccountMap, AccountSnapshot};
///
/// let broker = AccountBroker::new();
///
/// let mut update = AccountMap::new();
/// update.insert(42, Arc::new(AccountSnapshot::new(42, Decimal::from(100), 5)));
/// broker.apply(update);
///
/// assert_eq!(broker.snapshot(42).unwrap().balance, Decimal::from(100));
/// assert!(broker.snapshot(7).is_none());
/// ```
#[derive(Debug)]
pub struct AccountBroker {
    accounts: RwLock<Arc<AccountMap>>,
    subscriptions: Arc<SubscriptionRegistry>,
}

impl Default for AccountBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(Arc::new(AccountMap::new())),
            subscriptions: Arc::new(SubscriptionRegistry::new()),
        }
    }

    /// Merge `update` and notify matching subscribers.
    ///
    /// Entries whose sequence is not newer than the stored snapshot are
    /// discarded; an update that changes nothing notifies nobody.
    pub fn apply(&self, update: AccountMap) -> ApplyOutcome {
        if update.is_empty() {
            return ApplyOutcome::default();
        }

        let (merge, current) = {
            let mut guard = self.accounts.write();

            let any_newer = update.iter().any(|(id, snapshot)| {
                guard
                    .get(id)
                    .is_none_or(|current| snapshot.supersedes(current))
            });
            if !any_newer {
                return ApplyOutcome {
                    changed: Vec::new(),
                    stale: update.len(),
                    notified: 0,
                };
            }

            let merge = merge_into(Arc::make_mut(&mut *guard), update);
            (merge, Arc::clone(&*guard))
        };

        let notified = self.subscriptions.notify(&merge.changed, &current);

        tracing::trace!(
            changed = merge.changed.len(),
            stale = merge.stale,
            notified,
            "Account update applied"
        );

        ApplyOutcome {
            changed: merge.changed,
            stale: merge.stale,
            notified,
        }
    }

    /// Current snapshot for an account, or `None` if never seen.
    #[must_use]
    pub fn snapshot(&self, account_id: AccountId) -> Option<Arc<AccountSnapshot>> {
        self.accounts.read().get(&account_id).cloned()
    }

    /// Current snapshot of every known account.
    #[must_use]
    pub fn accounts(&self) -> Arc<AccountMap> {
        Arc::clone(&*self.accounts.read())
    }

    /// Number of accounts with a stored snapshot.
    #[must_use]
    pub fn account_count(&self) -> usize {
        self.accounts.read().len()
    }

    /// Subscribe to updates, optionally filtered to one account.
    pub fn subscribe<F>(&self, filter: Option<AccountId>, callback: F) -> SubscriptionHandle
    where
        F: Fn(&AccountNotification) + Send + Sync + 'static,
    {
        self.subscriptions.subscribe(filter, callback)
    }

    /// Remove a subscription by id. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.unsubscribe(id)
    }

    /// The underlying subscription registry.
    #[must_use]
    pub const fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        &self.subscriptions
    }
}

impl AccountUpdateSink for AccountBroker {
    fn apply(&self, update: AccountMap) -> ApplyOutcome {
        Self::apply(self, update)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;
    use proptest::prelude::*;
    use rust_decimal::Decimal;

    use super::*;

    fn update(entries: &[(AccountId, &str, u64)]) -> AccountMap {
        entries
            .iter()
            .map(|&(id, balance, seq)| {
                (
                    id,
                    Arc::new(AccountSnapshot::new(
                        id,
                        Decimal::from_str(balance).unwrap(),
                        seq,
                    )),
                )
            })
            .collect()
    }

    #[test]
    fn out_of_order_updates_keep_highest_sequence() {
        let broker = AccountBroker::new();

        broker.apply(update(&[(42, "500.00", 5)]));
        broker.apply(update(&[(42, "300.00", 3)]));

        let snapshot = broker.snapshot(42).unwrap();
        assert_eq!(snapshot.sequence, 5);
        assert_eq!(snapshot.balance, Decimal::from_str("500.00").unwrap());
    }

    #[test]
    fn reapply_is_noop_without_notification() {
        let broker = AccountBroker::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let _handle = broker.subscribe(None, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let first = broker.apply(update(&[(1, "10", 2)]));
        assert_eq!(first.notified, 1);

        let before = broker.snapshot(1).unwrap();
        let again = broker.apply(update(&[(1, "99", 2)]));
        let older = broker.apply(update(&[(1, "99", 1)]));

        assert!(again.changed.is_empty());
        assert_eq!(again.stale, 1);
        assert_eq!(older.notified, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&before, &broker.snapshot(1).unwrap()));
    }

    #[test]
    fn unsubscribed_callback_never_invoked_by_apply() {
        let broker = AccountBroker::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let handle = broker.subscribe(Some(1), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(broker.unsubscribe(handle.id()));
        assert!(!handle.unsubscribe());

        broker.apply(update(&[(1, "10", 1)]));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn filtered_subscriber_gets_post_merge_snapshot() {
        let broker = AccountBroker::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let _handle = broker.subscribe(Some(7), move |n| {
            if let Some(snapshot) = n.account(7) {
                sink.lock().push((snapshot.sequence, snapshot.balance));
            }
        });

        broker.apply(update(&[(7, "1.5", 2), (8, "2", 1)]));
        broker.apply(update(&[(8, "3", 2)]));
        broker.apply(update(&[(7, "1.0", 1)]));

        assert_eq!(
            *seen.lock(),
            vec![(2, Decimal::from_str("1.5").unwrap())]
        );
    }

    #[test]
    fn unfiltered_subscriber_sees_full_map() {
        let broker = AccountBroker::new();
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sizes);

        let _handle = broker.subscribe(None, move |n| {
            if let AccountNotification::All(map) = n {
                sink.lock().push(map.len());
            }
        });

        broker.apply(update(&[(1, "1", 1)]));
        broker.apply(update(&[(2, "2", 1)]));

        assert_eq!(*sizes.lock(), vec![1, 2]);
    }

    #[test]
    fn callback_can_read_broker_during_fanout() {
        let broker = Arc::new(AccountBroker::new());
        let observed = Arc::new(Mutex::new(None));

        let reader = Arc::clone(&broker);
        let sink = Arc::clone(&observed);
        let _handle = broker.subscribe(Some(3), move |_| {
            *sink.lock() = reader.snapshot(3).map(|s| s.sequence);
        });

        broker.apply(update(&[(3, "1", 9)]));

        assert_eq!(*observed.lock(), Some(9));
    }

    #[test]
    fn notification_payload_is_immutable_snapshot() {
        let broker = AccountBroker::new();
        broker.apply(update(&[(1, "1", 1)]));

        let before = broker.accounts();
        broker.apply(update(&[(1, "2", 2)]));

        assert_eq!(before[&1].sequence, 1);
        assert_eq!(broker.accounts()[&1].sequence, 2);
    }

    #[test]
    fn empty_update_is_noop() {
        let broker = AccountBroker::new();
        assert_eq!(broker.apply(AccountMap::new()), ApplyOutcome::default());
        assert_eq!(broker.account_count(), 0);
    }

    #[test]
    fn broker_as_sink_port() {
        let broker: Arc<dyn AccountUpdateSink> = Arc::new(AccountBroker::new());
        let outcome = broker.apply(update(&[(5, "5", 1)]));
        assert_eq!(outcome.changed, vec![5]);
    }

    proptest! {
        #[test]
        fn final_snapshot_has_highest_sequence(
            updates in prop::collection::vec((0u64..5, 0u64..50, 0i64..1_000_000), 1..60)
        ) {
            let broker = AccountBroker::new();

            for &(id, seq, cents) in &updates {
                let mut map = AccountMap::new();
                map.insert(id, Arc::new(AccountSnapshot::new(id, Decimal::new(cents, 2), seq)));
                broker.apply(map);
            }

            for id in 0u64..5 {
                // First arrival wins among equal sequences.
                let expected = updates
                    .iter()
                    .filter(|u| u.0 == id)
                    .fold(None::<(u64, i64)>, |best, &(_, seq, cents)| match best {
                        Some((s, _)) if seq <= s => best,
                        _ => Some((seq, cents)),
                    });

                match expected {
                    None => prop_assert!(broker.snapshot(id).is_none()),
                    Some((seq, cents)) => {
                        let snapshot = broker.snapshot(id).unwrap();
                        prop_assert_eq!(snapshot.sequence, seq);
                        prop_assert_eq!(snapshot.balance, Decimal::new(cents, 2));
                    }
                }
            }
        }
    }
}
