//! Common types used across store operations.
//!
//! Records are JSON objects ([`KvHash`]) wrapped in a [`VersionedRecord`]
//! that carries the CAS version and the absolute expiry. Reads hand back a
//! [`StoredEntry`], which swaps the absolute expiry for the seconds remaining.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// A value that can be written to a record field.
pub type KvValue = Value;

/// A record payload: field names mapped to JSON values.
pub type KvHash = Map<String, Value>;

/// Per-field arguments and results for the `*_multi` accessors.
pub type MultiValue<T> = BTreeMap<String, T>;

/// A stored record: payload, CAS version and optional absolute expiry.
///
/// # Examples
///
/// ```
/// use kvstash_storage::VersionedRecord;
///
/// let record = VersionedRecord::new(serde_json::Map::new(), 0, Some(1_585_273_500));
/// assert!(!record.is_expired(1_585_273_500));
/// assert!(record.is_expired(1_585_273_501));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedRecord {
    /// The record payload.
    pub value: KvHash,

    /// CAS version, starting at 0 and bumped by one on every overwrite.
    pub version: u64,

    /// Absolute expiry in epoch seconds, if the record has a TTL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl VersionedRecord {
    /// Creates a new record.
    pub fn new(value: KvHash, version: u64, expires_at: Option<u64>) -> Self {
        Self { value, version, expires_at }
    }

    /// Returns `true` once `now` has passed the expiry second.
    ///
    /// A record is still live during the second it expires in.
    #[must_use]
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at < now)
    }

    /// Seconds of TTL remaining at `now`, or `None` for a non-expiring record.
    #[must_use]
    pub fn ttl_remaining(&self, now: u64) -> Option<u64> {
        self.expires_at.map(|expires_at| expires_at.saturating_sub(now))
    }

    /// Builds the read view of this record at `now`.
    #[must_use]
    pub fn entry(&self, now: u64) -> StoredEntry {
        StoredEntry { version: self.version, ttl: self.ttl_remaining(now), value: self.value.clone() }
    }
}

/// The read view of a record returned by the backend.
///
/// Missing and expired keys both read back as [`StoredEntry::empty`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    /// CAS version of the record (0 for the empty sentinel).
    pub version: u64,

    /// Seconds until the record expires, if it has a TTL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,

    /// The record payload.
    pub value: KvHash,
}

impl StoredEntry {
    /// The sentinel returned for absent or expired keys.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Options for writing a row.
///
/// Updaters receive a mutable reference to the options in effect for the
/// record and may change the TTL as a side effect of the update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowOptions {
    /// Seconds until the row should expire; `None` for no TTL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

impl RowOptions {
    /// Options carrying the given TTL in seconds.
    #[must_use]
    pub fn ttl(seconds: u64) -> Self {
        Self { ttl: Some(seconds) }
    }
}

/// A set of numbers, stored in a record field as a JSON array.
///
/// Membership compares numeric value, so `1` and `1.0` are the same member.
/// Iteration follows insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NumberSet(Vec<f64>);

impl NumberSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `value` is a member.
    #[must_use]
    pub fn has(&self, value: f64) -> bool {
        self.0.iter().any(|member| *member == value)
    }

    /// Adds `value`, returning `true` if it was not already a member.
    pub fn add(&mut self, value: f64) -> bool {
        if self.has(value) {
            return false;
        }
        self.0.push(value);
        true
    }

    /// Removes `value`, returning `true` if it was a member.
    pub fn remove(&mut self, value: f64) -> bool {
        let before = self.0.len();
        self.0.retain(|member| *member != value);
        self.0.len() != before
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the set has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates members in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<f64> for NumberSet {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut set = Self::new();
        for value in iter {
            set.add(value);
        }
        set
    }
}

/// A set of strings, stored in a record field as a JSON array.
///
/// Iteration follows insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StringSet(Vec<String>);

impl StringSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `value` is a member.
    #[must_use]
    pub fn has(&self, value: &str) -> bool {
        self.0.iter().any(|member| member == value)
    }

    /// Adds `value`, returning `true` if it was not already a member.
    pub fn add(&mut self, value: impl Into<String>) -> bool {
        let value = value.into();
        if self.has(&value) {
            return false;
        }
        self.0.push(value);
        true
    }

    /// Removes `value`, returning `true` if it was a member.
    pub fn remove(&mut self, value: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|member| member != value);
        self.0.len() != before
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the set has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates members in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for StringSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for value in iter {
            set.add(value);
        }
        set
    }
}

/// JSON type name used in error messages.
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Converts an `f64` to a JSON number, keeping integral values integral.
///
/// Non-finite values have no JSON representation and map to `null`.
pub(crate) fn number_value(n: f64) -> Value {
    const MAX_SAFE: f64 = 9_007_199_254_740_991.0;
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE {
        // Integral and inside the exactly-representable range, so the cast is lossless.
        #[allow(clippy::cast_possible_truncation)]
        return Value::Number(Number::from(n as i64));
    }
    Number::from_f64(n).map_or(Value::Null, Value::Number)
}
