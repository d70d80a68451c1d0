//! List, set and counter operators over record fields.
//!
//! Every operator works on a single record's [`KvHash`] and may target many
//! fields at once. All targeted fields are checked before any is touched, so
//! an operator either applies to every field or fails leaving the hash as it
//! was. The store facade runs these inside
//! [`StoreBackend::atomic_patch`](crate::StoreBackend::atomic_patch), which
//! makes each call atomic without CAS retries.
//!
//! List and set fields are stored as JSON arrays. A targeted field must be
//! absent or already hold an array; anything else is a
//! [`StoreError::TypeMismatch`].

use serde_json::Value;

use crate::{
    error::{StoreError, StoreResult},
    types::{KvHash, KvValue, MultiValue, NumberSet, StringSet, number_value, type_name},
};

/// Per-field results of a mutating operator, plus whether the hash changed.
///
/// `changed` is `false` when the operator left the hash exactly as it was,
/// in which case there is nothing to write back.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChanges<T> {
    /// Result for every targeted field.
    pub results: MultiValue<T>,
    /// Whether the hash was modified.
    pub changed: bool,
}

/// Fails on the first targeted field that holds something other than an array.
fn check_arrays<'a, I>(key: &str, hash: &KvHash, fields: I) -> StoreResult<()>
where
    I: IntoIterator<Item = &'a String>,
{
    for field in fields {
        match hash.get(field) {
            None | Some(Value::Null | Value::Array(_)) => {},
            Some(other) => return Err(StoreError::type_mismatch(key, field, type_name(other))),
        }
    }
    Ok(())
}

/// Returns the array at `field`, creating it if absent or null.
fn array_entry<'h>(hash: &'h mut KvHash, field: &str) -> &'h mut Vec<KvValue> {
    let slot = hash.entry(field).or_insert(Value::Null);
    if !slot.is_array() {
        *slot = Value::Array(Vec::new());
    }
    match slot {
        Value::Array(items) => items,
        _ => unreachable!("slot was just set to an array"),
    }
}

fn existing_array<'h>(hash: &'h KvHash, field: &str) -> Option<&'h Vec<KvValue>> {
    hash.get(field).and_then(Value::as_array)
}

fn existing_array_mut<'h>(hash: &'h mut KvHash, field: &str) -> Option<&'h mut Vec<KvValue>> {
    hash.get_mut(field).and_then(Value::as_array_mut)
}

/// Pushes values onto the end of each field's list, creating missing lists.
///
/// # Errors
///
/// [`StoreError::TypeMismatch`] if a field holds a non-array value.
pub fn append_fields(
    key: &str,
    hash: &mut KvHash,
    values: &MultiValue<Vec<KvValue>>,
) -> StoreResult<()> {
    check_arrays(key, hash, values.keys())?;
    for (field, items) in values {
        array_entry(hash, field).extend(items.iter().cloned());
    }
    Ok(())
}

/// Inserts values at the front of each field's list, creating missing lists.
///
/// The inserted values keep their given order: unshifting `[1, 2]` onto
/// `[3]` yields `[1, 2, 3]`.
///
/// # Errors
///
/// [`StoreError::TypeMismatch`] if a field holds a non-array value.
pub fn unshift_fields(
    key: &str,
    hash: &mut KvHash,
    values: &MultiValue<Vec<KvValue>>,
) -> StoreResult<()> {
    check_arrays(key, hash, values.keys())?;
    for (field, items) in values {
        let list = array_entry(hash, field);
        list.splice(0..0, items.iter().cloned());
    }
    Ok(())
}

/// Removes and returns up to `count` elements from the front of each list.
///
/// Absent or empty lists yield an empty result and are not created.
///
/// # Errors
///
/// [`StoreError::TypeMismatch`] if a field holds a non-array value.
pub fn shift_fields(
    key: &str,
    hash: &mut KvHash,
    counts: &MultiValue<usize>,
) -> StoreResult<FieldChanges<Vec<KvValue>>> {
    check_arrays(key, hash, counts.keys())?;
    let mut changes = FieldChanges { results: MultiValue::new(), changed: false };
    for (field, count) in counts {
        let shifted = match existing_array_mut(hash, field) {
            Some(list) => {
                let take = (*count).min(list.len());
                list.drain(..take).collect()
            },
            None => Vec::new(),
        };
        changes.changed |= !shifted.is_empty();
        changes.results.insert(field.clone(), shifted);
    }
    Ok(changes)
}

/// Returns up to `count` elements from the front of each list without
/// removing them.
///
/// # Errors
///
/// [`StoreError::TypeMismatch`] if a field holds a non-array value.
pub fn peek_fields(
    key: &str,
    hash: &KvHash,
    counts: &MultiValue<usize>,
) -> StoreResult<MultiValue<Vec<KvValue>>> {
    check_arrays(key, hash, counts.keys())?;
    Ok(counts
        .iter()
        .map(|(field, count)| {
            let peeked = existing_array(hash, field)
                .map(|list| list.iter().take(*count).cloned().collect())
                .unwrap_or_default();
            (field.clone(), peeked)
        })
        .collect())
}

fn number_member(items: &[KvValue], value: f64) -> bool {
    items.iter().any(|item| item.as_f64() == Some(value))
}

fn string_member(items: &[KvValue], value: &str) -> bool {
    items.iter().any(|item| item.as_str() == Some(value))
}

/// Adds numbers to each field's set, creating missing sets.
///
/// Each field's result holds only the values that were newly added.
///
/// # Errors
///
/// [`StoreError::TypeMismatch`] if a field holds a non-array value.
pub fn add_numbers(
    key: &str,
    hash: &mut KvHash,
    values: &MultiValue<Vec<f64>>,
) -> StoreResult<FieldChanges<NumberSet>> {
    check_arrays(key, hash, values.keys())?;
    let mut changes = FieldChanges { results: MultiValue::new(), changed: false };
    for (field, candidates) in values {
        changes.changed |= !matches!(hash.get(field), Some(Value::Array(_)));
        let set = array_entry(hash, field);
        let mut added = NumberSet::new();
        for &value in candidates {
            if value.is_finite() && !number_member(set, value) {
                set.push(number_value(value));
                added.add(value);
            }
        }
        changes.changed |= !added.is_empty();
        changes.results.insert(field.clone(), added);
    }
    Ok(changes)
}

/// Removes numbers from each field's set.
///
/// Each field's result holds only the values that were present and removed.
/// Absent sets stay absent.
///
/// # Errors
///
/// [`StoreError::TypeMismatch`] if a field holds a non-array value.
pub fn remove_numbers(
    key: &str,
    hash: &mut KvHash,
    values: &MultiValue<Vec<f64>>,
) -> StoreResult<FieldChanges<NumberSet>> {
    check_arrays(key, hash, values.keys())?;
    let mut changes = FieldChanges { results: MultiValue::new(), changed: false };
    for (field, candidates) in values {
        let mut removed = NumberSet::new();
        if let Some(set) = existing_array_mut(hash, field) {
            for &value in candidates {
                if number_member(set, value) {
                    set.retain(|item| item.as_f64() != Some(value));
                    removed.add(value);
                }
            }
        }
        changes.changed |= !removed.is_empty();
        changes.results.insert(field.clone(), removed);
    }
    Ok(changes)
}

/// Returns, for each field, the queried numbers currently in its set.
///
/// # Errors
///
/// [`StoreError::TypeMismatch`] if a field holds a non-array value.
pub fn has_numbers(
    key: &str,
    hash: &KvHash,
    values: &MultiValue<Vec<f64>>,
) -> StoreResult<MultiValue<NumberSet>> {
    check_arrays(key, hash, values.keys())?;
    Ok(values
        .iter()
        .map(|(field, candidates)| {
            let present = existing_array(hash, field)
                .map(|set| candidates.iter().copied().filter(|v| number_member(set, *v)).collect())
                .unwrap_or_default();
            (field.clone(), present)
        })
        .collect())
}

/// Adds strings to each field's set, creating missing sets.
///
/// Each field's result holds only the values that were newly added.
///
/// # Errors
///
/// [`StoreError::TypeMismatch`] if a field holds a non-array value.
pub fn add_strings(
    key: &str,
    hash: &mut KvHash,
    values: &MultiValue<Vec<String>>,
) -> StoreResult<FieldChanges<StringSet>> {
    check_arrays(key, hash, values.keys())?;
    let mut changes = FieldChanges { results: MultiValue::new(), changed: false };
    for (field, candidates) in values {
        changes.changed |= !matches!(hash.get(field), Some(Value::Array(_)));
        let set = array_entry(hash, field);
        let mut added = StringSet::new();
        for value in candidates {
            if !string_member(set, value) {
                set.push(Value::String(value.clone()));
                added.add(value.as_str());
            }
        }
        changes.changed |= !added.is_empty();
        changes.results.insert(field.clone(), added);
    }
    Ok(changes)
}

/// Removes strings from each field's set.
///
/// Each field's result holds only the values that were present and removed.
/// Absent sets stay absent.
///
/// # Errors
///
/// [`StoreError::TypeMismatch`] if a field holds a non-array value.
pub fn remove_strings(
    key: &str,
    hash: &mut KvHash,
    values: &MultiValue<Vec<String>>,
) -> StoreResult<FieldChanges<StringSet>> {
    check_arrays(key, hash, values.keys())?;
    let mut changes = FieldChanges { results: MultiValue::new(), changed: false };
    for (field, candidates) in values {
        let mut removed = StringSet::new();
        if let Some(set) = existing_array_mut(hash, field) {
            for value in candidates {
                if string_member(set, value) {
                    set.retain(|item| item.as_str() != Some(value.as_str()));
                    removed.add(value.as_str());
                }
            }
        }
        changes.changed |= !removed.is_empty();
        changes.results.insert(field.clone(), removed);
    }
    Ok(changes)
}

/// Returns, for each field, the queried strings currently in its set.
///
/// # Errors
///
/// [`StoreError::TypeMismatch`] if a field holds a non-array value.
pub fn has_strings(
    key: &str,
    hash: &KvHash,
    values: &MultiValue<Vec<String>>,
) -> StoreResult<MultiValue<StringSet>> {
    check_arrays(key, hash, values.keys())?;
    Ok(values
        .iter()
        .map(|(field, candidates)| {
            let present = existing_array(hash, field)
                .map(|set| {
                    candidates
                        .iter()
                        .filter(|v| string_member(set, v))
                        .map(String::as_str)
                        .collect()
                })
                .unwrap_or_default();
            (field.clone(), present)
        })
        .collect())
}

/// Parses a string that is the canonical rendering of a finite number.
///
/// `"10"` and `"-2.5"` qualify; `"1e3"`, `" 5"`, `"-0"` and `"NaN"` do not.
fn numeric_string(s: &str) -> Option<f64> {
    let n: f64 = s.parse().ok()?;
    if !n.is_finite() {
        return None;
    }
    let canonical = match number_value(n) {
        Value::Number(number) => number.to_string(),
        _ => return None,
    };
    (canonical == s).then_some(n)
}

/// Reads a field as a number for incrementing. Absent and null fields count as zero.
fn numeric_field(key: &str, field: &str, value: Option<&Value>) -> StoreResult<f64> {
    match value {
        None | Some(Value::Null) => Ok(0.0),
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| StoreError::not_a_number(key, field, "number")),
        Some(Value::String(s)) => {
            numeric_string(s).ok_or_else(|| StoreError::not_a_number(key, field, "string"))
        },
        Some(other) => Err(StoreError::not_a_number(key, field, type_name(other))),
    }
}

/// Adds a signed amount to each field and returns the new values.
///
/// Missing fields start at zero and numeric strings count as their number;
/// incremented fields are always stored as JSON numbers.
///
/// # Errors
///
/// [`StoreError::NotANumber`] if a field holds anything else, or if the
/// result would not be a finite number.
pub fn increment_fields(
    key: &str,
    hash: &mut KvHash,
    amounts: &MultiValue<f64>,
) -> StoreResult<MultiValue<f64>> {
    let mut totals = MultiValue::new();
    for (field, amount) in amounts {
        let total = numeric_field(key, field, hash.get(field))? + amount;
        if !total.is_finite() {
            return Err(StoreError::not_a_number(key, field, "number"));
        }
        totals.insert(field.clone(), total);
    }
    for (field, total) in &totals {
        hash.insert(field.clone(), number_value(*total));
    }
    Ok(totals)
}

/// Removes the named fields, returning whether any was present.
pub fn delete_fields<S: AsRef<str>>(hash: &mut KvHash, fields: &[S]) -> bool {
    fields.iter().fold(false, |removed, field| hash.remove(field.as_ref()).is_some() || removed)
}
