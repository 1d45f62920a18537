//! Type-Tagged Keyspace Engine
//!
//! The keyspace is the shared mutable heart of the server: a tag map
//! assigning each key to a value group (string, list or sorted set), one
//! map per group holding the actual values, and the modification counter
//! that drives the snapshotter. All of it lives behind a single `RwLock`;
//! every public operation locks internally, so callers never see the lock.
//!
//! Two invariants are load-bearing:
//!
//! - a key present in the tag map has its value in exactly one group map,
//!   and group switches (SET over a list key, for example) swap both under
//!   one write-lock critical section;
//! - the modification counter is only touched under the lock, and every
//!   successful write operation counts exactly once.
//!
//! Expiration is wall-clock based (`SystemTime`), since deadlines must
//! survive snapshot/restore as absolute unix timestamps. Expired keys are
//! reaped lazily on `get` and actively by the [`super::expiry`] ticker.
//! The clock is injected through the [`Clock`] trait so expiry behavior is
//! testable without sleeping.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ordered_float::OrderedFloat;
use thiserror::Error;
use tracing::debug;

use crate::storage::list::List;
use crate::storage::rbtree::RbTree;

/// A source of wall-clock time. Injected so tests can control expiry.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> SystemTime;
}

/// The production clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// The value group a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    String,
    List,
    SortedSet,
}

/// Tag-map entry: which group holds the key's value, and when it expires.
#[derive(Debug, Clone, Copy)]
struct KeyEntry {
    group: Group,
    expires_at: Option<SystemTime>,
}

impl KeyEntry {
    fn is_expired_at(&self, now: SystemTime) -> bool {
        self.expires_at.map_or(false, |deadline| now > deadline)
    }
}

/// Errors surfaced by keyspace operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyspaceError {
    /// The key's group does not allow the requested operation
    #[error("key '{0}' does not support this operation")]
    Unsupported(String),

    /// The key's string value is not a decimal integer
    #[error("key '{0}' cannot be parsed to integer")]
    NotAnInteger(String),

    /// Tag map and group map disagree. This is a synchronization bug, not
    /// a client error; the command layer logs it and answers generically.
    #[error("key '{0}' not found")]
    Missing(String),
}

/// What a read found under a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyResult {
    /// No live value (absent, expired, or a group `get` does not read)
    Missing,
    /// A string value
    Str(String),
    /// A list value, head→tail
    Items(Vec<String>),
}

impl KeyResult {
    pub fn is_valid(&self) -> bool {
        !matches!(self, KeyResult::Missing)
    }

    pub fn is_string(&self) -> bool {
        matches!(self, KeyResult::Str(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            KeyResult::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// A value being written under a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    Items(Vec<String>),
}

/// One key's worth of snapshot state.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRecord {
    pub key: String,
    pub value: RecordValue,
    /// Deadline quantized to whole unix seconds, when volatile.
    pub expires_at_unix: Option<i64>,
}

/// The value payload of a [`SnapshotRecord`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    Str(String),
    Items(Vec<String>),
    Scored(Vec<(f64, String)>),
}

type SortedSet = RbTree<OrderedFloat<f64>, String>;

#[derive(Default)]
struct Inner {
    keys: HashMap<String, KeyEntry>,
    strings: HashMap<String, String>,
    lists: HashMap<String, List>,
    sorted_sets: HashMap<String, SortedSet>,
    modifications: u64,
}

impl Inner {
    /// Removes `key` from the tag map and whichever group map holds it.
    fn drop_key(&mut self, key: &str) {
        if let Some(entry) = self.keys.remove(key) {
            match entry.group {
                Group::String => {
                    self.strings.remove(key);
                }
                Group::List => {
                    self.lists.remove(key);
                }
                Group::SortedSet => {
                    self.sorted_sets.remove(key);
                }
            }
        }
    }

    fn drop_group_value(&mut self, key: &str, group: Group) {
        match group {
            Group::String => {
                self.strings.remove(key);
            }
            Group::List => {
                self.lists.remove(key);
            }
            Group::SortedSet => {
                self.sorted_sets.remove(key);
            }
        }
    }
}

/// The keyspace engine. Cheap to share: wrap it in an `Arc` and hand it to
/// the consumer, the expirer and the snapshotter.
pub struct Keyspace {
    clock: Arc<dyn Clock>,
    inner: RwLock<Inner>,
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new()
    }
}

impl Keyspace {
    /// Creates a keyspace using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates a keyspace with an injected clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Keyspace {
            clock,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Reads the value under `key`.
    ///
    /// Takes the read lock; if the key is observed past its deadline the
    /// lock is upgraded and the key is dropped (lazy expiration), counting
    /// one modification before `Missing` is returned. Sorted-set keys read
    /// as `Missing`; GET only serves strings and lists.
    pub fn get(&self, key: &str) -> KeyResult {
        let expired = {
            let inner = self.inner.read().unwrap();
            match inner.keys.get(key) {
                None => return KeyResult::Missing,
                Some(entry) => entry.is_expired_at(self.clock.now()),
            }
        };

        if expired {
            let mut inner = self.inner.write().unwrap();
            // Re-check under the write lock: the key may have been
            // rewritten between the two lock acquisitions.
            let still_expired = inner
                .keys
                .get(key)
                .map(|entry| entry.is_expired_at(self.clock.now()));
            match still_expired {
                None => return KeyResult::Missing,
                Some(true) => {
                    inner.drop_key(key);
                    inner.modifications += 1;
                    debug!(key, "lazily expired key on access");
                    return KeyResult::Missing;
                }
                Some(false) => {}
            }
        }

        let inner = self.inner.read().unwrap();
        match inner.keys.get(key) {
            None => KeyResult::Missing,
            Some(entry) => match entry.group {
                Group::String => inner
                    .strings
                    .get(key)
                    .cloned()
                    .map_or(KeyResult::Missing, KeyResult::Str),
                Group::List => inner
                    .lists
                    .get(key)
                    .map_or(KeyResult::Missing, |l| KeyResult::Items(l.to_vec())),
                Group::SortedSet => KeyResult::Missing,
            },
        }
    }

    /// Writes a string or list value under `key`, with an optional expiry
    /// relative to now.
    ///
    /// If the key previously belonged to a different group, the old value
    /// is dropped in the same critical section, so the tag and the value
    /// never disagree.
    pub fn set(&self, key: &str, value: Value, expiry: Option<Duration>) {
        let mut inner = self.inner.write().unwrap();
        let now = self.clock.now();

        let new_group = match &value {
            Value::Str(_) => Group::String,
            Value::Items(_) => Group::List,
        };

        let prev_group = inner.keys.get(key).map(|e| e.group);
        if let Some(prev) = prev_group {
            if prev != new_group {
                inner.drop_group_value(key, prev);
            }
        }

        match value {
            Value::Str(s) => {
                inner.strings.insert(key.to_string(), s);
            }
            Value::Items(values) => {
                inner.lists.insert(key.to_string(), List::from_values(values));
            }
        }

        inner.keys.insert(
            key.to_string(),
            KeyEntry {
                group: new_group,
                expires_at: expiry.and_then(|d| now.checked_add(d)),
            },
        );
        inner.modifications += 1;
    }

    /// Shifts the key's deadline by `delta_secs` seconds.
    ///
    /// A persistent key gets `now + delta`; a volatile key *accumulates*:
    /// its existing deadline moves by `delta`. Returns false when the key
    /// does not exist.
    pub fn expire(&self, key: &str, delta_secs: i64) -> bool {
        let mut inner = self.inner.write().unwrap();
        let now = self.clock.now();

        let Some(entry) = inner.keys.get_mut(key) else {
            return false;
        };

        let base = entry.expires_at.unwrap_or(now);
        entry.expires_at = Some(shift_by_secs(base, delta_secs));
        inner.modifications += 1;
        true
    }

    /// Sets the key's deadline to an absolute instant, replacing any
    /// previous deadline. Returns false when the key does not exist.
    pub fn expire_at(&self, key: &str, deadline: SystemTime) -> bool {
        let mut inner = self.inner.write().unwrap();

        let Some(entry) = inner.keys.get_mut(key) else {
            return false;
        };

        entry.expires_at = Some(deadline);
        inner.modifications += 1;
        true
    }

    /// Counts, per key, how many of its occurrences in `keys` exist.
    ///
    /// Duplicate arguments each count: asking for `[a, a]` when `a` exists
    /// yields `{a: 2}`. Absent keys map to 0.
    pub fn bulk_exists(&self, keys: &[String]) -> HashMap<String, usize> {
        let inner = self.inner.read().unwrap();

        let mut counts = HashMap::new();
        for key in keys {
            if inner.keys.contains_key(key) {
                *counts.entry(key.clone()).or_insert(0) += 1;
            } else {
                counts.insert(key.clone(), 0);
            }
        }
        counts
    }

    /// Deletes each named key once, returning per key 1 if it was removed
    /// and 0 if it was absent. Duplicate arguments deduplicate (the second
    /// occurrence finds the key already gone). Counts one modification per
    /// actual removal.
    pub fn bulk_delete(&self, keys: &[String]) -> HashMap<String, usize> {
        let mut inner = self.inner.write().unwrap();

        let mut counts = HashMap::new();
        for key in keys {
            if inner.keys.contains_key(key) {
                inner.drop_key(key);
                inner.modifications += 1;
                *counts.entry(key.clone()).or_insert(0) += 1;
            } else {
                counts.entry(key.clone()).or_insert(0);
            }
        }
        counts
    }

    /// Adds `delta` to the integer stored under `key`.
    ///
    /// An absent key is created holding `"0"` and 0 is returned. A key of
    /// another group fails with `Unsupported`; a non-numeric string with
    /// `NotAnInteger`. Every successful path counts one modification.
    pub fn increment_by(&self, key: &str, delta: i64) -> Result<i64, KeyspaceError> {
        let mut inner = self.inner.write().unwrap();

        match inner.keys.get(key).map(|e| e.group) {
            None => {
                inner.keys.insert(
                    key.to_string(),
                    KeyEntry {
                        group: Group::String,
                        expires_at: None,
                    },
                );
                inner.strings.insert(key.to_string(), "0".to_string());
                inner.modifications += 1;
                Ok(0)
            }
            Some(Group::String) => {
                let current = inner
                    .strings
                    .get(key)
                    .ok_or_else(|| KeyspaceError::Missing(key.to_string()))?;
                let value: i64 = current
                    .parse()
                    .map_err(|_| KeyspaceError::NotAnInteger(key.to_string()))?;

                let new_value = value.wrapping_add(delta);
                inner.strings.insert(key.to_string(), new_value.to_string());
                inner.modifications += 1;
                Ok(new_value)
            }
            Some(_) => Err(KeyspaceError::Unsupported(key.to_string())),
        }
    }

    /// Appends `values` at the tail of the list under `key`, creating the
    /// list (in the given order) when absent. Returns the new length.
    pub fn push_tail(&self, key: &str, values: Vec<String>) -> Result<usize, KeyspaceError> {
        self.push(key, values, false)
    }

    /// Prepends each of `values` in turn at the head of the list under
    /// `key`, creating the list (in the given order) when absent. Returns
    /// the new length.
    pub fn push_head(&self, key: &str, values: Vec<String>) -> Result<usize, KeyspaceError> {
        self.push(key, values, true)
    }

    fn push(&self, key: &str, values: Vec<String>, head: bool) -> Result<usize, KeyspaceError> {
        let mut inner = self.inner.write().unwrap();

        match inner.keys.get(key).map(|e| e.group) {
            None => {
                let len = values.len();
                inner.lists.insert(key.to_string(), List::from_values(values));
                inner.keys.insert(
                    key.to_string(),
                    KeyEntry {
                        group: Group::List,
                        expires_at: None,
                    },
                );
                inner.modifications += 1;
                Ok(len)
            }
            Some(Group::List) => {
                let list = inner
                    .lists
                    .get_mut(key)
                    .ok_or_else(|| KeyspaceError::Missing(key.to_string()))?;
                if head {
                    list.push_head_all(values);
                } else {
                    list.push_tail_all(values);
                }
                let len = list.len();
                inner.modifications += 1;
                Ok(len)
            }
            Some(_) => Err(KeyspaceError::Unsupported(key.to_string())),
        }
    }

    /// Inserts alternating `score member` pairs into the sorted set under
    /// `key`, creating it when absent. Pairs whose score does not parse as
    /// a float are skipped (the command layer pre-validates, so in the
    /// normal path nothing is skipped). Insertion is additive: duplicate
    /// scores accumulate. Counts one modification and returns the number
    /// of pairs inserted.
    pub fn put_in_sorted_set(
        &self,
        key: &str,
        pairs: &[String],
    ) -> Result<usize, KeyspaceError> {
        let mut inner = self.inner.write().unwrap();

        match inner.keys.get(key).map(|e| e.group) {
            None => {
                inner.sorted_sets.insert(key.to_string(), RbTree::new());
                inner.keys.insert(
                    key.to_string(),
                    KeyEntry {
                        group: Group::SortedSet,
                        expires_at: None,
                    },
                );
            }
            Some(Group::SortedSet) => {}
            Some(_) => return Err(KeyspaceError::Unsupported(key.to_string())),
        }

        let tree = inner
            .sorted_sets
            .get_mut(key)
            .ok_or_else(|| KeyspaceError::Missing(key.to_string()))?;

        let mut added = 0;
        for pair in pairs.chunks(2) {
            if pair.len() != 2 {
                continue;
            }
            let Ok(score) = pair[0].parse::<f64>() else {
                continue;
            };
            tree.put(OrderedFloat(score), pair[1].clone());
            added += 1;
        }

        inner.modifications += 1;
        Ok(added)
    }

    /// Members of the sorted set under `key` between in-order indices
    /// `start..=stop` (negative indices wrap). A missing key or one of
    /// another group fails with `Unsupported`.
    pub fn range_sorted_set(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, KeyspaceError> {
        let inner = self.inner.read().unwrap();

        match inner.keys.get(key).map(|e| e.group) {
            Some(Group::SortedSet) => {}
            _ => return Err(KeyspaceError::Unsupported(key.to_string())),
        }

        let tree = inner
            .sorted_sets
            .get(key)
            .ok_or_else(|| KeyspaceError::Missing(key.to_string()))?;
        Ok(tree.range_by_index(start, stop))
    }

    /// Keys whose deadline has passed, for the active expirer.
    pub fn expired_keys(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap();
        let now = self.clock.now();

        inner
            .keys
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Write operations since the last snapshot.
    pub fn modifications(&self) -> u64 {
        self.inner.read().unwrap().modifications
    }

    /// Resets the modification counter after a successful snapshot.
    pub fn reset_modifications(&self) {
        self.inner.write().unwrap().modifications = 0;
    }

    /// Point-in-time dump of every key for the snapshot writer: value by
    /// group plus the deadline quantized to unix seconds. Empty lists and
    /// empty sorted sets are omitted, as they cannot be rebuilt by replay.
    pub fn snapshot_records(&self) -> Vec<SnapshotRecord> {
        let inner = self.inner.read().unwrap();

        let mut records = Vec::with_capacity(inner.keys.len());
        for (key, entry) in &inner.keys {
            let value = match entry.group {
                Group::String => match inner.strings.get(key) {
                    Some(s) => RecordValue::Str(s.clone()),
                    None => continue,
                },
                Group::List => match inner.lists.get(key) {
                    Some(list) if !list.is_empty() => RecordValue::Items(list.to_vec()),
                    _ => continue,
                },
                Group::SortedSet => match inner.sorted_sets.get(key) {
                    Some(tree) if !tree.is_empty() => {
                        let mut pairs = Vec::with_capacity(tree.len());
                        tree.in_order(|score, member| pairs.push((score.0, member.clone())));
                        RecordValue::Scored(pairs)
                    }
                    _ => continue,
                },
            };

            records.push(SnapshotRecord {
                key: key.clone(),
                value,
                expires_at_unix: entry.expires_at.map(unix_seconds),
            });
        }
        records
    }
}

/// Converts a `SystemTime` to whole unix seconds.
pub fn unix_seconds(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

/// Converts whole unix seconds to a `SystemTime`.
pub fn from_unix_seconds(secs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}

fn shift_by_secs(t: SystemTime, delta: i64) -> SystemTime {
    let d = Duration::from_secs(delta.unsigned_abs());
    if delta >= 0 {
        t.checked_add(d).unwrap_or(t)
    } else {
        t.checked_sub(d).unwrap_or(UNIX_EPOCH)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// A clock that only moves when told to.
    pub(crate) struct TestClock {
        now: Mutex<SystemTime>,
    }

    impl TestClock {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(TestClock {
                now: Mutex::new(UNIX_EPOCH + Duration::from_secs(1_700_000_000)),
            })
        }

        pub(crate) fn advance(&self, d: Duration) {
            *self.now.lock().unwrap() += d;
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> SystemTime {
            *self.now.lock().unwrap()
        }
    }

    fn keyspace() -> (Arc<TestClock>, Keyspace) {
        let clock = TestClock::new();
        let ks = Keyspace::with_clock(clock.clone());
        (clock, ks)
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_set_get_round_trip() {
        let (_, ks) = keyspace();
        ks.set("name", Value::Str("John".to_string()), None);
        assert_eq!(ks.get("name"), KeyResult::Str("John".to_string()));
    }

    #[test]
    fn test_get_missing() {
        let (_, ks) = keyspace();
        assert_eq!(ks.get("nope"), KeyResult::Missing);
    }

    #[test]
    fn test_get_list_key() {
        let (_, ks) = keyspace();
        ks.push_tail("mylist", strings(&["a", "b"])).unwrap();
        let result = ks.get("mylist");
        assert!(!result.is_string());
        assert_eq!(result, KeyResult::Items(strings(&["a", "b"])));
    }

    #[test]
    fn test_get_sorted_set_key_is_missing() {
        let (_, ks) = keyspace();
        ks.put_in_sorted_set("zs", &strings(&["1", "a"])).unwrap();
        assert_eq!(ks.get("zs"), KeyResult::Missing);
    }

    #[test]
    fn test_group_switch_drops_old_value() {
        let (_, ks) = keyspace();
        ks.push_tail("k", strings(&["a"])).unwrap();
        ks.set("k", Value::Str("now a string".to_string()), None);

        assert_eq!(ks.get("k"), KeyResult::Str("now a string".to_string()));
        // The list value is gone: pushing again onto the string must fail
        assert_eq!(
            ks.push_tail("k", strings(&["b"])),
            Err(KeyspaceError::Unsupported("k".to_string()))
        );
    }

    #[test]
    fn test_lazy_expiration_on_get() {
        let (clock, ks) = keyspace();
        ks.set("temp", Value::Str("v".to_string()), Some(Duration::from_secs(2)));
        assert!(ks.get("temp").is_valid());

        let before = ks.modifications();
        clock.advance(Duration::from_secs(3));

        assert_eq!(ks.get("temp"), KeyResult::Missing);
        assert_eq!(ks.modifications(), before + 1, "lazy deletion counts");
        // And the key is fully gone afterwards
        assert_eq!(ks.bulk_exists(&strings(&["temp"]))["temp"], 0);
    }

    #[test]
    fn test_expire_on_persistent_is_relative_to_now() {
        let (clock, ks) = keyspace();
        ks.set("k", Value::Str("v".to_string()), None);
        assert!(ks.expire("k", 8));

        let deadline = ks.snapshot_records()[0].expires_at_unix.unwrap();
        assert_eq!(deadline, unix_seconds(clock.now()) + 8);
    }

    #[test]
    fn test_expire_accumulates_on_volatile() {
        let (clock, ks) = keyspace();
        ks.set("k", Value::Str("v".to_string()), Some(Duration::from_secs(5)));
        assert!(ks.expire("k", 3));

        let deadline = ks.snapshot_records()[0].expires_at_unix.unwrap();
        assert_eq!(deadline, unix_seconds(clock.now()) + 8);
    }

    #[test]
    fn test_expire_at_replaces() {
        let (clock, ks) = keyspace();
        ks.set("k", Value::Str("v".to_string()), Some(Duration::from_secs(5)));

        let target = clock.now() + Duration::from_secs(100);
        assert!(ks.expire_at("k", target));

        let deadline = ks.snapshot_records()[0].expires_at_unix.unwrap();
        assert_eq!(deadline, unix_seconds(target));
    }

    #[test]
    fn test_expire_missing_key() {
        let (clock, ks) = keyspace();
        assert!(!ks.expire("ghost", 10));
        assert!(!ks.expire_at("ghost", clock.now()));
    }

    #[test]
    fn test_bulk_exists_counts_duplicates() {
        let (_, ks) = keyspace();
        ks.set("a", Value::Str("1".to_string()), None);

        let counts = ks.bulk_exists(&strings(&["a", "missing", "a"]));
        assert_eq!(counts["a"], 2);
        assert_eq!(counts["missing"], 0);
    }

    #[test]
    fn test_bulk_delete_deduplicates() {
        let (_, ks) = keyspace();
        ks.set("a", Value::Str("1".to_string()), None);

        let counts = ks.bulk_delete(&strings(&["a", "a", "missing"]));
        assert_eq!(counts["a"], 1);
        assert_eq!(counts["missing"], 0);
        assert_eq!(ks.get("a"), KeyResult::Missing);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (_, ks) = keyspace();
        ks.set("k", Value::Str("v".to_string()), None);

        assert_eq!(ks.bulk_delete(&strings(&["k"]))["k"], 1);
        assert_eq!(ks.bulk_delete(&strings(&["k"]))["k"], 0);
    }

    #[test]
    fn test_increment_creates_zero() {
        let (_, ks) = keyspace();
        assert_eq!(ks.increment_by("counter", 1), Ok(0));
        assert_eq!(ks.get("counter"), KeyResult::Str("0".to_string()));
        // Now the key exists, so the delta applies
        assert_eq!(ks.increment_by("counter", 1), Ok(1));
        assert_eq!(ks.increment_by("counter", -1), Ok(0));
    }

    #[test]
    fn test_increment_non_integer_string() {
        let (_, ks) = keyspace();
        ks.set("name", Value::Str("John".to_string()), None);
        assert_eq!(
            ks.increment_by("name", 1),
            Err(KeyspaceError::NotAnInteger("name".to_string()))
        );
    }

    #[test]
    fn test_increment_wrong_group() {
        let (_, ks) = keyspace();
        ks.push_tail("l", strings(&["x"])).unwrap();
        assert_eq!(
            ks.increment_by("l", 1),
            Err(KeyspaceError::Unsupported("l".to_string()))
        );
    }

    #[test]
    fn test_push_tail_order() {
        let (_, ks) = keyspace();
        assert_eq!(ks.push_tail("l", strings(&["a", "b"])), Ok(2));
        assert_eq!(ks.push_tail("l", strings(&["c"])), Ok(3));
        assert_eq!(ks.get("l"), KeyResult::Items(strings(&["a", "b", "c"])));
    }

    #[test]
    fn test_push_head_reverses_batch_on_existing_list() {
        let (_, ks) = keyspace();
        ks.push_tail("mylist", strings(&["hi"])).unwrap();
        assert_eq!(
            ks.push_head("mylist", strings(&["hello", "world", "test"])),
            Ok(4)
        );
        assert_eq!(
            ks.get("mylist"),
            KeyResult::Items(strings(&["test", "world", "hello", "hi"]))
        );
    }

    #[test]
    fn test_push_head_on_absent_key_keeps_given_order() {
        // Creation goes through the same list constructor as push_tail
        let (_, ks) = keyspace();
        assert_eq!(ks.push_head("fresh", strings(&["a", "b"])), Ok(2));
        assert_eq!(ks.get("fresh"), KeyResult::Items(strings(&["a", "b"])));
    }

    #[test]
    fn test_push_on_string_key_fails() {
        let (_, ks) = keyspace();
        ks.set("s", Value::Str("v".to_string()), None);
        assert_eq!(
            ks.push_tail("s", strings(&["a"])),
            Err(KeyspaceError::Unsupported("s".to_string()))
        );
        assert_eq!(
            ks.push_head("s", strings(&["a"])),
            Err(KeyspaceError::Unsupported("s".to_string()))
        );
    }

    #[test]
    fn test_sorted_set_put_and_range() {
        let (_, ks) = keyspace();
        let pairs = strings(&[
            "10", "Norem", "12", "Castilla", "8", "Sam-Bodden", "10", "Royce", "6", "Ford",
            "14", "Prickett",
        ]);
        assert_eq!(ks.put_in_sorted_set("racers", &pairs), Ok(6));

        assert_eq!(
            ks.range_sorted_set("racers", 0, -1),
            Ok(strings(&[
                "Ford",
                "Sam-Bodden",
                "Norem",
                "Royce",
                "Castilla",
                "Prickett"
            ]))
        );
    }

    #[test]
    fn test_sorted_set_skips_unparseable_scores() {
        let (_, ks) = keyspace();
        let pairs = strings(&["1.5", "ok", "oops", "skipped", "2", "ok2"]);
        assert_eq!(ks.put_in_sorted_set("z", &pairs), Ok(2));
        assert_eq!(ks.range_sorted_set("z", 0, -1), Ok(strings(&["ok", "ok2"])));
    }

    #[test]
    fn test_sorted_set_wrong_group() {
        let (_, ks) = keyspace();
        ks.set("s", Value::Str("v".to_string()), None);
        assert_eq!(
            ks.put_in_sorted_set("s", &strings(&["1", "a"])),
            Err(KeyspaceError::Unsupported("s".to_string()))
        );
        assert_eq!(
            ks.range_sorted_set("s", 0, -1),
            Err(KeyspaceError::Unsupported("s".to_string()))
        );
        assert_eq!(
            ks.range_sorted_set("missing", 0, -1),
            Err(KeyspaceError::Unsupported("missing".to_string()))
        );
    }

    #[test]
    fn test_expired_keys_scan() {
        let (clock, ks) = keyspace();
        ks.set("soon", Value::Str("v".to_string()), Some(Duration::from_secs(1)));
        ks.set("later", Value::Str("v".to_string()), Some(Duration::from_secs(100)));
        ks.set("forever", Value::Str("v".to_string()), None);

        assert!(ks.expired_keys().is_empty());

        clock.advance(Duration::from_secs(2));
        assert_eq!(ks.expired_keys(), vec!["soon".to_string()]);
    }

    #[test]
    fn test_modification_counter_monotonic_until_reset() {
        let (_, ks) = keyspace();
        let mut last = ks.modifications();

        ks.set("a", Value::Str("1".to_string()), None);
        assert!(ks.modifications() > last);
        last = ks.modifications();

        ks.increment_by("a", 1).unwrap();
        assert!(ks.modifications() > last);
        last = ks.modifications();

        ks.push_tail("l", strings(&["x"])).unwrap();
        ks.put_in_sorted_set("z", &strings(&["1", "m"])).unwrap();
        ks.expire("a", 100);
        ks.bulk_delete(&strings(&["a"]));
        assert!(ks.modifications() > last);

        ks.reset_modifications();
        assert_eq!(ks.modifications(), 0);
    }

    #[test]
    fn test_reads_do_not_count() {
        let (_, ks) = keyspace();
        ks.set("a", Value::Str("1".to_string()), None);
        let count = ks.modifications();

        ks.get("a");
        ks.bulk_exists(&strings(&["a"]));
        assert_eq!(ks.modifications(), count);
    }

    #[test]
    fn test_snapshot_records_cover_all_groups() {
        let (clock, ks) = keyspace();
        ks.set("s", Value::Str("v".to_string()), Some(Duration::from_secs(60)));
        ks.push_tail("l", strings(&["a", "b"])).unwrap();
        ks.put_in_sorted_set("z", &strings(&["1.5", "m"])).unwrap();

        let mut records = ks.snapshot_records();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(records.len(), 3);

        assert_eq!(records[0].key, "l");
        assert_eq!(records[0].value, RecordValue::Items(strings(&["a", "b"])));
        assert_eq!(records[0].expires_at_unix, None);

        assert_eq!(records[1].key, "s");
        assert_eq!(records[1].value, RecordValue::Str("v".to_string()));
        assert_eq!(
            records[1].expires_at_unix,
            Some(unix_seconds(clock.now()) + 60)
        );

        assert_eq!(records[2].key, "z");
        assert_eq!(
            records[2].value,
            RecordValue::Scored(vec![(1.5, "m".to_string())])
        );
    }

    #[test]
    fn test_unix_seconds_round_trip() {
        let t = UNIX_EPOCH + Duration::from_secs(1_700_000_123);
        assert_eq!(from_unix_seconds(unix_seconds(t)), t);
    }
}
