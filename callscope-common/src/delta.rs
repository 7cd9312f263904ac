//! # Snapshot Deltas
//!
//! Structural diff between two JSON values and the inverse `apply`.
//!
//! Arrays whose items all carry a unique identity field (`specifier`, then
//! `traceId` by default) are reconciled by identity rather than position:
//!
//! ```text
//! prev:  [a b c d]        removed: [b]
//! next:  [d a c e]   ──▶  moved:   [d → 0]
//!                         inserted:[e @ 3]
//!                         changed: [a: {calls: 4}]
//! ```
//!
//! Items that keep their relative order (the longest increasing run of old
//! positions) stay put; only the rest are encoded as moves. A history where
//! one busy call site overtakes its neighbour costs one move, not a
//! remove + insert of the whole record.
//!
//! Arrays without a usable identity (stack frames, plain strings) are diffed
//! by index.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::CodecError;
use crate::snapshot::Snapshot;

/// Identity fields tried in order when reconciling arrays.
pub const DEFAULT_IDENTITY_FIELDS: &[&str] = &["specifier", "traceId"];

/// A structural difference between two values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Delta {
    /// Replace the whole value
    Replace { value: Value },
    /// Patch an object member-wise
    Object {
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        changed: BTreeMap<String, Delta>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        removed: Vec<String>,
    },
    /// Reconcile an array by item identity
    Keyed {
        field: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        removed: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        moved: Vec<Move>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        inserted: Vec<Insert>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        changed: Vec<KeyedChange>,
    },
    /// Patch an array index-wise, then truncate or extend to `len`
    Positional {
        len: usize,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        changed: Vec<IndexedChange>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub key: String,
    /// Final index in the new array
    pub to: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insert {
    pub index: usize,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyedChange {
    pub key: String,
    pub delta: Delta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedChange {
    pub index: usize,
    pub delta: Delta,
}

/// Computes and applies [`Delta`]s.
#[derive(Debug, Clone)]
pub struct DeltaCodec {
    identity_fields: Vec<String>,
}

impl Default for DeltaCodec {
    fn default() -> Self {
        Self::new(DEFAULT_IDENTITY_FIELDS.iter().copied())
    }
}

impl DeltaCodec {
    #[must_use]
    pub fn new<I, S>(identity_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { identity_fields: identity_fields.into_iter().map(Into::into).collect() }
    }

    /// Difference turning `prev` into `next`, or `None` if they are equal.
    #[must_use]
    pub fn diff(&self, prev: &Value, next: &Value) -> Option<Delta> {
        if prev == next {
            return None;
        }

        match (prev, next) {
            (Value::Object(old), Value::Object(new)) => Some(self.diff_objects(old, new)),
            (Value::Array(old), Value::Array(new)) => Some(self.diff_arrays(old, new)),
            _ => Some(Delta::Replace { value: next.clone() }),
        }
    }

    /// Apply `delta` to a copy of `prev`.
    ///
    /// # Errors
    /// Returns a [`CodecError`] if the delta does not fit the shape of `prev`.
    pub fn apply(&self, prev: &Value, delta: &Delta) -> Result<Value, CodecError> {
        let mut target = prev.clone();
        self.apply_in_place(&mut target, delta)?;
        Ok(target)
    }

    /// Apply `delta` to `target` in place.
    ///
    /// # Errors
    /// Returns a [`CodecError`] if the delta does not fit the shape of `target`.
    /// `target` may be partially patched when an error is returned.
    pub fn apply_in_place(&self, target: &mut Value, delta: &Delta) -> Result<(), CodecError> {
        match delta {
            Delta::Replace { value } => {
                *target = value.clone();
                Ok(())
            }
            Delta::Object { changed, removed } => {
                let object = as_object_mut(target)?;
                for key in removed {
                    object.remove(key);
                }
                for (key, member_delta) in changed {
                    match object.get_mut(key) {
                        Some(member) => self.apply_in_place(member, member_delta)?,
                        None => {
                            let mut member = Value::Null;
                            self.apply_in_place(&mut member, member_delta)?;
                            object.insert(key.clone(), member);
                        }
                    }
                }
                Ok(())
            }
            Delta::Keyed { field, removed, moved, inserted, changed } => {
                self.apply_keyed(target, field, removed, moved, inserted, changed)
            }
            Delta::Positional { len, changed } => self.apply_positional(target, *len, changed),
        }
    }

    fn diff_objects(&self, old: &Map<String, Value>, new: &Map<String, Value>) -> Delta {
        let mut changed = BTreeMap::new();
        for (key, value) in new {
            match old.get(key) {
                Some(previous) => {
                    if let Some(delta) = self.diff(previous, value) {
                        changed.insert(key.clone(), delta);
                    }
                }
                None => {
                    changed.insert(key.clone(), Delta::Replace { value: value.clone() });
                }
            }
        }

        let removed = old.keys().filter(|key| !new.contains_key(*key)).cloned().collect();
        Delta::Object { changed, removed }
    }

    fn diff_arrays(&self, old: &[Value], new: &[Value]) -> Delta {
        match self.identity_field(old, new) {
            Some(field) => self.diff_keyed(old, new, field),
            None => self.diff_positional(old, new),
        }
    }

    /// First identity field present and unique on every item of both arrays.
    fn identity_field(&self, old: &[Value], new: &[Value]) -> Option<&str> {
        if old.is_empty() && new.is_empty() {
            return None;
        }
        self.identity_fields
            .iter()
            .map(String::as_str)
            .find(|field| unique_keys(old, field).is_some() && unique_keys(new, field).is_some())
    }

    fn diff_keyed(&self, old: &[Value], new: &[Value], field: &str) -> Delta {
        // identity_field() already checked every item has a unique key
        let old_keys = unique_keys(old, field).unwrap_or_default();
        let new_keys = unique_keys(new, field).unwrap_or_default();

        let old_index: HashMap<&str, usize> =
            old_keys.iter().enumerate().map(|(i, k)| (k.as_str(), i)).collect();
        let new_index: HashSet<&str> = new_keys.iter().map(String::as_str).collect();

        let removed: Vec<String> =
            old_keys.iter().filter(|k| !new_index.contains(k.as_str())).cloned().collect();

        // Rank of each surviving item in the old order, listed in new order
        let survivor_rank: HashMap<&str, usize> = old_keys
            .iter()
            .filter(|k| new_index.contains(k.as_str()))
            .enumerate()
            .map(|(rank, k)| (k.as_str(), rank))
            .collect();

        let survivors: Vec<(usize, &str)> = new_keys
            .iter()
            .enumerate()
            .filter_map(|(i, k)| survivor_rank.get(k.as_str()).map(|_| (i, k.as_str())))
            .collect();
        let ranks: Vec<usize> = survivors.iter().map(|(_, k)| survivor_rank[k]).collect();
        let staying: HashSet<usize> = longest_increasing_run(&ranks).into_iter().collect();

        let moved = survivors
            .iter()
            .enumerate()
            .filter(|(pos, _)| !staying.contains(pos))
            .map(|(_, (to, key))| Move { key: (*key).to_owned(), to: *to })
            .collect();

        let mut inserted = Vec::new();
        let mut changed = Vec::new();
        for (i, key) in new_keys.iter().enumerate() {
            match old_index.get(key.as_str()) {
                Some(&j) => {
                    if let Some(delta) = self.diff(&old[j], &new[i]) {
                        changed.push(KeyedChange { key: key.clone(), delta });
                    }
                }
                None => inserted.push(Insert { index: i, value: new[i].clone() }),
            }
        }

        Delta::Keyed { field: field.to_owned(), removed, moved, inserted, changed }
    }

    fn diff_positional(&self, old: &[Value], new: &[Value]) -> Delta {
        let changed = new
            .iter()
            .enumerate()
            .filter_map(|(index, value)| {
                let delta = match old.get(index) {
                    Some(previous) => self.diff(previous, value)?,
                    None => Delta::Replace { value: value.clone() },
                };
                Some(IndexedChange { index, delta })
            })
            .collect();

        Delta::Positional { len: new.len(), changed }
    }

    fn apply_keyed(
        &self,
        target: &mut Value,
        field: &str,
        removed: &[String],
        moved: &[Move],
        inserted: &[Insert],
        changed: &[KeyedChange],
    ) -> Result<(), CodecError> {
        let items = as_array_mut(target)?;

        let mut keyed: Vec<(String, Value)> = Vec::with_capacity(items.len());
        for item in items.drain(..) {
            let key = item_key(&item, field).ok_or_else(|| CodecError::MissingKey(field.to_owned()))?;
            keyed.push((key, item));
        }

        for key in removed {
            let pos = position_of(&keyed, key)?;
            keyed.remove(pos);
        }

        for change in changed {
            let pos = position_of(&keyed, &change.key)?;
            self.apply_in_place(&mut keyed[pos].1, &change.delta)?;
        }

        let mut placements: Vec<(usize, Value)> = Vec::with_capacity(moved.len() + inserted.len());
        for mv in moved {
            let pos = position_of(&keyed, &mv.key)?;
            placements.push((mv.to, keyed.remove(pos).1));
        }
        placements.extend(inserted.iter().map(|ins| (ins.index, ins.value.clone())));
        placements.sort_by_key(|(index, _)| *index);

        items.extend(keyed.into_iter().map(|(_, item)| item));
        for (index, value) in placements {
            if index > items.len() {
                return Err(CodecError::IndexOutOfRange { index, len: items.len() });
            }
            items.insert(index, value);
        }
        Ok(())
    }

    fn apply_positional(
        &self,
        target: &mut Value,
        len: usize,
        changed: &[IndexedChange],
    ) -> Result<(), CodecError> {
        let items = as_array_mut(target)?;
        items.truncate(len);

        for change in changed {
            if change.index < items.len() {
                self.apply_in_place(&mut items[change.index], &change.delta)?;
            } else if change.index == items.len() {
                let mut value = Value::Null;
                self.apply_in_place(&mut value, &change.delta)?;
                items.push(value);
            } else {
                return Err(CodecError::IndexOutOfRange { index: change.index, len: items.len() });
            }
        }
        Ok(())
    }
}

/// Identity of an array item: a string or number member named `field`.
fn item_key(item: &Value, field: &str) -> Option<String> {
    match item.as_object()?.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Keys of every item, or `None` if any item lacks one or a key repeats.
fn unique_keys(items: &[Value], field: &str) -> Option<Vec<String>> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .iter()
        .map(|item| item_key(item, field).filter(|key| seen.insert(key.clone())))
        .collect()
}

fn position_of(keyed: &[(String, Value)], key: &str) -> Result<usize, CodecError> {
    keyed.iter().position(|(k, _)| k == key).ok_or_else(|| CodecError::UnknownKey(key.to_owned()))
}

/// Positions (into `seq`) of one longest strictly increasing subsequence.
fn longest_increasing_run(seq: &[usize]) -> Vec<usize> {
    // tails[k] = position of the smallest tail of an increasing run of length k + 1
    let mut tails: Vec<usize> = Vec::new();
    let mut prev: Vec<Option<usize>> = vec![None; seq.len()];

    for (i, &value) in seq.iter().enumerate() {
        let slot = tails.partition_point(|&t| seq[t] < value);
        if slot > 0 {
            prev[i] = Some(tails[slot - 1]);
        }
        if slot == tails.len() {
            tails.push(i);
        } else {
            tails[slot] = i;
        }
    }

    let mut run = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        run.push(i);
        cursor = prev[i];
    }
    run.reverse();
    run
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn as_object_mut(target: &mut Value) -> Result<&mut Map<String, Value>, CodecError> {
    let found = kind_of(target);
    target.as_object_mut().ok_or(CodecError::TypeMismatch { expected: "object", found })
}

fn as_array_mut(target: &mut Value) -> Result<&mut Vec<Value>, CodecError> {
    let found = kind_of(target);
    target.as_array_mut().ok_or(CodecError::TypeMismatch { expected: "array", found })
}

// =============================================================================
// SNAPSHOT STREAMING
// =============================================================================

/// Producer side: turns successive snapshots into deltas.
#[derive(Debug, Default)]
pub struct DeltaEncoder {
    codec: DeltaCodec,
    previous: Option<Value>,
}

impl DeltaEncoder {
    #[must_use]
    pub fn new(codec: DeltaCodec) -> Self {
        Self { codec, previous: None }
    }

    /// Delta from the previously encoded snapshot, or a full `Replace` for
    /// the first one. `None` when nothing changed.
    ///
    /// # Errors
    /// Returns an error if the snapshot cannot be converted to JSON.
    pub fn encode(&mut self, snapshot: &Snapshot) -> Result<Option<Delta>, CodecError> {
        let next = serde_json::to_value(snapshot)?;
        let delta = match &self.previous {
            Some(prev) => self.codec.diff(prev, &next),
            None => Some(Delta::Replace { value: next.clone() }),
        };
        self.previous = Some(next);
        Ok(delta)
    }

    /// Forget the previous snapshot so the next encode sends it whole.
    pub fn resync(&mut self) {
        self.previous = None;
    }
}

/// Observer side: rebuilds snapshots from a stream of deltas.
#[derive(Debug, Default)]
pub struct DeltaDecoder {
    codec: DeltaCodec,
    current: Option<Value>,
}

impl DeltaDecoder {
    #[must_use]
    pub fn new(codec: DeltaCodec) -> Self {
        Self { codec, current: None }
    }

    /// Apply the next delta and return the reconstructed snapshot.
    ///
    /// # Errors
    /// Returns an error if the delta does not fit the current snapshot or
    /// the result is not a valid snapshot.
    pub fn apply(&mut self, delta: &Delta) -> Result<Snapshot, CodecError> {
        let mut next = self.current.clone().unwrap_or(Value::Null);
        self.codec.apply_in_place(&mut next, delta)?;
        let snapshot = serde_json::from_value(next.clone())?;
        self.current = Some(next);
        Ok(snapshot)
    }

    /// Current reconstructed value, if any delta has been applied.
    #[must_use]
    pub fn current(&self) -> Option<&Value> {
        self.current.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn record(id: &str, calls: u64) -> Value {
        json!({ "traceId": id, "calls": calls, "trace": [{ "name": null, "link": id }] })
    }

    fn round_trip(prev: &Value, next: &Value) -> Option<Delta> {
        let codec = DeltaCodec::default();
        let delta = codec.diff(prev, next);
        let rebuilt = match &delta {
            Some(d) => codec.apply(prev, d).unwrap(),
            None => prev.clone(),
        };
        assert_eq!(&rebuilt, next);
        delta
    }

    #[test]
    fn test_equal_values_have_no_delta() {
        let value = json!({ "a": [record("x", 1)] });
        assert!(DeltaCodec::default().diff(&value, &value).is_none());
    }

    #[test]
    fn test_reorder_is_a_single_move() {
        let prev = json!([record("a", 3), record("b", 2), record("c", 1)]);
        let next = json!([record("c", 1), record("a", 3), record("b", 2)]);

        let delta = round_trip(&prev, &next).unwrap();
        match delta {
            Delta::Keyed { field, removed, moved, inserted, changed } => {
                assert_eq!(field, "traceId");
                assert!(removed.is_empty());
                assert!(inserted.is_empty());
                assert!(changed.is_empty());
                assert_eq!(moved, vec![Move { key: "c".to_owned(), to: 0 }]);
            }
            other => panic!("expected keyed delta, got {other:?}"),
        }
    }

    #[test]
    fn test_mutation_is_keyed_change() {
        let prev = json!([record("a", 1), record("b", 1)]);
        let next = json!([record("a", 1), record("b", 2)]);

        let Some(Delta::Keyed { changed, moved, .. }) = round_trip(&prev, &next) else {
            panic!("expected keyed delta");
        };
        assert!(moved.is_empty());
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].key, "b");
    }

    #[test]
    fn test_insert_remove_and_move_together() {
        let prev = json!([record("a", 4), record("b", 3), record("c", 2), record("d", 1)]);
        let next = json!([record("d", 9), record("a", 4), record("c", 2), record("e", 1)]);
        round_trip(&prev, &next);
    }

    #[test]
    fn test_specifier_preferred_over_trace_id() {
        let prev = json!([{ "specifier": "w.js", "traceId": "t" }]);
        let next = json!([
            { "specifier": "other.js", "traceId": "t" },
            { "specifier": "w.js", "traceId": "t" }
        ]);
        let Some(Delta::Keyed { field, .. }) = round_trip(&prev, &next) else {
            panic!("expected keyed delta");
        };
        assert_eq!(field, "specifier");
    }

    #[test]
    fn test_duplicate_keys_fall_back_to_positions() {
        let prev = json!([record("a", 1)]);
        let next = json!([record("a", 1), record("a", 2)]);
        assert!(matches!(round_trip(&prev, &next), Some(Delta::Positional { len: 2, .. })));
    }

    #[test]
    fn test_positional_shrink_and_grow() {
        round_trip(&json!([1, 2, 3]), &json!([1]));
        round_trip(&json!(["x"]), &json!(["y", "z", "w"]));
        round_trip(&json!([]), &json!([{ "k": 1 }]));
    }

    #[test]
    fn test_object_member_added_and_removed() {
        let prev = json!({ "keep": 1, "drop": true, "nested": { "x": 1 } });
        let next = json!({ "keep": 1, "nested": { "x": 2, "y": null }, "added": [1] });
        round_trip(&prev, &next);
    }

    #[test]
    fn test_null_collection_becomes_list() {
        round_trip(&json!({ "eval": null }), &json!({ "eval": [record("a", 1)] }));
        round_trip(&json!({ "eval": [record("a", 1)] }), &json!({ "eval": null }));
    }

    #[test]
    fn test_apply_rejects_mismatched_shape() {
        let codec = DeltaCodec::default();
        let delta = Delta::Positional { len: 0, changed: Vec::new() };
        let err = codec.apply(&json!({ "a": 1 }), &delta).unwrap_err();
        assert!(matches!(err, CodecError::TypeMismatch { expected: "array", found: "object" }));
    }

    #[test]
    fn test_apply_rejects_unknown_key() {
        let codec = DeltaCodec::default();
        let delta = Delta::Keyed {
            field: "traceId".to_owned(),
            removed: vec!["missing".to_owned()],
            moved: Vec::new(),
            inserted: Vec::new(),
            changed: Vec::new(),
        };
        let err = codec.apply(&json!([record("a", 1)]), &delta).unwrap_err();
        assert!(matches!(err, CodecError::UnknownKey(key) if key == "missing"));
    }

    #[test]
    fn test_delta_serializes_with_op_tag() {
        let delta = Delta::Replace { value: json!(3) };
        let json = serde_json::to_value(&delta).unwrap();
        assert_eq!(json, json!({ "op": "replace", "value": 3 }));
        let back: Delta = serde_json::from_value(json).unwrap();
        assert_eq!(back, delta);
    }

    #[test]
    fn test_longest_increasing_run() {
        assert_eq!(longest_increasing_run(&[]), Vec::<usize>::new());
        assert_eq!(longest_increasing_run(&[0, 1, 2]), vec![0, 1, 2]);
        let run = longest_increasing_run(&[2, 0, 1]);
        assert_eq!(run, vec![1, 2]);
    }

    #[test]
    fn test_encoder_decoder_stream() {
        let mut encoder = DeltaEncoder::default();
        let mut decoder = DeltaDecoder::default();

        let mut snapshot = Snapshot::default();
        snapshot.calls.insert("eval".to_owned(), 1);
        let first = encoder.encode(&snapshot).unwrap().unwrap();
        assert!(matches!(first, Delta::Replace { .. }));
        assert_eq!(decoder.apply(&first).unwrap(), snapshot);

        assert!(encoder.encode(&snapshot).unwrap().is_none());

        snapshot.calls.insert("eval".to_owned(), 2);
        let second = encoder.encode(&snapshot).unwrap().unwrap();
        assert_eq!(decoder.apply(&second).unwrap(), snapshot);
    }

    fn dedup_records(raw: Vec<(u8, u8)>) -> Value {
        let mut seen = HashSet::new();
        Value::Array(
            raw.into_iter()
                .filter(|(key, _)| seen.insert(*key))
                .map(|(key, calls)| record(&format!("site-{key}"), u64::from(calls)))
                .collect(),
        )
    }

    proptest! {
        #[test]
        fn prop_apply_reproduces_next(
            prev in prop::collection::vec((0u8..24, 0u8..4), 0..20),
            next in prop::collection::vec((0u8..24, 0u8..4), 0..20),
        ) {
            let codec = DeltaCodec::default();
            let prev = json!({ "history": dedup_records(prev), "calls": { "n": 1 } });
            let next = json!({ "history": dedup_records(next), "calls": { "n": 2 } });

            let delta = codec.diff(&prev, &next).expect("calls always differ");
            let rebuilt = codec.apply(&prev, &delta).unwrap();
            prop_assert_eq!(rebuilt, next);
        }

        #[test]
        fn prop_delta_survives_transport(
            prev in prop::collection::vec((0u8..10, 0u8..3), 0..10),
            next in prop::collection::vec((0u8..10, 0u8..3), 0..10),
        ) {
            let codec = DeltaCodec::default();
            let prev = dedup_records(prev);
            let next = dedup_records(next);

            if let Some(delta) = codec.diff(&prev, &next) {
                let wire = serde_json::to_string(&delta).unwrap();
                let received: Delta = serde_json::from_str(&wire).unwrap();
                prop_assert_eq!(codec.apply(&prev, &received).unwrap(), next);
            }
        }
    }
}
