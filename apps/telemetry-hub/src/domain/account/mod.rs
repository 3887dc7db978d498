//! Account Telemetry Types
//!
//! Core domain types for per-account telemetry: the immutable snapshot of
//! one account and the map of latest snapshots keyed by account id.
//!
//! # Ordering
//!
//! Snapshots are ordered by their `sequence`, never by arrival. A snapshot
//! only supersedes the stored one when its sequence is strictly greater, so
//! out-of-order and duplicate deliveries are harmless.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};

// =============================================================================
// Types
// =============================================================================

/// Numeric account identifier (stringified integer on the wire).
pub type AccountId = u64;

/// Monotonically increasing ordering token for snapshots of one account.
pub type Sequence = u64;

/// Latest snapshot per account.
///
/// Values are shared immutably; an update replaces the `Arc`, it never
/// mutates the snapshot behind it.
pub type AccountMap = HashMap<AccountId, Arc<AccountSnapshot>>;

// =============================================================================
// Account Snapshot
// =============================================================================

/// Immutable telemetry for one account at one sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountSnapshot {
    /// Account identifier.
    pub account_id: AccountId,
    /// Account balance.
    pub balance: Decimal,
    /// Ordering token.
    pub sequence: Sequence,
    /// Time the frame carrying this snapshot was decoded.
    pub received_at: DateTime<Utc>,
    /// Additional domain-specific fields, passed through untouched.
    pub fields: Map<String, Value>,
}

impl AccountSnapshot {
    /// Create a snapshot with no additional fields.
    #[must_use]
    pub fn new(account_id: AccountId, balance: Decimal, sequence: Sequence) -> Self {
        Self {
            account_id,
            balance,
            sequence,
            received_at: Utc::now(),
            fields: Map::new(),
        }
    }

    /// Attach additional wire fields.
    #[must_use]
    pub fn with_fields(mut self, fields: Map<String, Value>) -> Self {
        self.fields = fields;
        self
    }

    /// Look up an additional field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Look up an additional numeric field as a decimal.
    ///
    /// Accepts JSON numbers and numeric strings.
    #[must_use]
    pub fn decimal_field(&self, name: &str) -> Option<Decimal> {
        match self.fields.get(name)? {
            Value::Number(n) => n.to_string().parse().ok(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Whether this snapshot should replace `current`.
    #[must_use]
    pub fn supersedes(&self, current: &Self) -> bool {
        self.sequence > current.sequence
    }
}

// =============================================================================
// Merge
// =============================================================================

/// Result of merging an update into an account map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Accounts whose stored snapshot was replaced or created.
    pub changed: Vec<AccountId>,
    /// Number of entries discarded because their sequence was not newer.
    pub stale: usize,
}

impl MergeOutcome {
    /// Check whether the merge changed anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }
}

/// Merge `update` into `target` using last-writer-wins by sequence.
///
/// Entries with a lower or equal sequence than the stored snapshot are
/// dropped. Changed ids are returned in ascending order.
pub fn merge_into(target: &mut AccountMap, update: AccountMap) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();

    for (account_id, snapshot) in update {
        let newer = target
            .get(&account_id)
            .is_none_or(|current| snapshot.supersedes(current));

        if newer {
            target.insert(account_id, snapshot);
            outcome.changed.push(account_id);
        } else {
            outcome.stale += 1;
        }
    }

    outcome.changed.sort_unstable();
    outcome
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn snap(id: AccountId, balance: &str, sequence: Sequence) -> Arc<AccountSnapshot> {
        Arc::new(AccountSnapshot::new(
            id,
            Decimal::from_str(balance).unwrap(),
            sequence,
        ))
    }

    fn update(entries: &[Arc<AccountSnapshot>]) -> AccountMap {
        entries
            .iter()
            .map(|s| (s.account_id, Arc::clone(s)))
            .collect()
    }

    #[test]
    fn merge_inserts_new_accounts() {
        let mut map = AccountMap::new();

        let outcome = merge_into(&mut map, update(&[snap(1, "100", 1), snap(2, "200", 1)]));

        assert_eq!(outcome.changed, vec![1, 2]);
        assert_eq!(outcome.stale, 0);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn merge_replaces_on_newer_sequence() {
        let mut map = update(&[snap(42, "100", 3)]);

        let outcome = merge_into(&mut map, update(&[snap(42, "150", 5)]));

        assert_eq!(outcome.changed, vec![42]);
        assert_eq!(map[&42].balance, Decimal::from(150));
    }

    #[test]
    fn merge_discards_older_sequence() {
        let mut map = update(&[snap(42, "150", 5)]);

        let outcome = merge_into(&mut map, update(&[snap(42, "100", 3)]));

        assert!(outcome.is_empty());
        assert_eq!(outcome.stale, 1);
        assert_eq!(map[&42].balance, Decimal::from(150));
        assert_eq!(map[&42].sequence, 5);
    }

    #[test]
    fn merge_discards_equal_sequence() {
        let mut map = update(&[snap(42, "150", 5)]);

        let outcome = merge_into(&mut map, update(&[snap(42, "999", 5)]));

        assert!(outcome.is_empty());
        assert_eq!(map[&42].balance, Decimal::from(150));
    }

    #[test]
    fn merge_mixed_update_counts_each_entry() {
        let mut map = update(&[snap(1, "10", 10), snap(2, "20", 1)]);

        let outcome = merge_into(
            &mut map,
            update(&[snap(1, "11", 9), snap(2, "21", 2), snap(3, "30", 1)]),
        );

        assert_eq!(outcome.changed, vec![2, 3]);
        assert_eq!(outcome.stale, 1);
    }

    #[test]
    fn decimal_field_reads_numbers_and_strings() {
        let mut fields = Map::new();
        fields.insert("equity".to_string(), serde_json::json!(1234.5));
        fields.insert("margin".to_string(), serde_json::json!("12.25"));
        fields.insert("name".to_string(), serde_json::json!("demo"));

        let snapshot = AccountSnapshot::new(7, Decimal::ZERO, 1).with_fields(fields);

        assert_eq!(
            snapshot.decimal_field("equity"),
            Some(Decimal::from_str("1234.5").unwrap())
        );
        assert_eq!(
            snapshot.decimal_field("margin"),
            Some(Decimal::from_str("12.25").unwrap())
        );
        assert_eq!(snapshot.decimal_field("name"), None);
        assert_eq!(snapshot.decimal_field("missing"), None);
        assert_eq!(snapshot.field("name"), Some(&serde_json::json!("demo")));
    }
}
