//! Order-insensitive structural comparison of JSON values.
//!
//! Lists are compared as multisets at every depth. Everything else is exact:
//! missing or extra keys, type changes and differing scalars are all
//! reported. Numbers compare by value, so `1` and `1.0` are equal.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Changes grouped by kind, then keyed by the path of the changed element.
/// Serializes to `{}` when the values are equal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diff(BTreeMap<String, BTreeMap<String, Value>>);

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn get(&self, kind: &str) -> Option<&BTreeMap<String, Value>> {
        self.0.get(kind)
    }

    /// Total number of reported changes.
    pub fn len(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    fn record(&mut self, kind: &str, path: String, detail: Value) {
        self.0.entry(kind.to_string()).or_default().insert(path, detail);
    }
}

/// Compare `expected` against `actual`. Added items are the ones only present
/// in `actual`.
pub fn compare(expected: &Value, actual: &Value) -> Diff {
    let mut diff = Diff::default();
    compare_at(expected, actual, "root".to_string(), &mut diff);
    diff
}

fn compare_at(old: &Value, new: &Value, path: String, diff: &mut Diff) {
    match (old, new) {
        (Value::Object(old), Value::Object(new)) => compare_objects(old, new, &path, diff),
        (Value::Array(old), Value::Array(new)) => compare_arrays(old, new, &path, diff),
        _ if type_name(old) != type_name(new) && !(is_number(old) && is_number(new)) => {
            diff.record(
                "type_changes",
                path,
                json!({
                    "old_type": type_name(old),
                    "new_type": type_name(new),
                    "old_value": old,
                    "new_value": new,
                }),
            );
        }
        _ => {
            if canonical(old) != canonical(new) {
                diff.record(
                    "values_changed",
                    path,
                    json!({"old_value": old, "new_value": new}),
                );
            }
        }
    }
}

fn compare_objects(old: &Map<String, Value>, new: &Map<String, Value>, path: &str, diff: &mut Diff) {
    for (key, value) in old {
        let child = format!("{path}['{key}']");
        match new.get(key) {
            Some(other) => compare_at(value, other, child, diff),
            None => diff.record("dictionary_item_removed", child, value.clone()),
        }
    }
    for (key, value) in new {
        if !old.contains_key(key) {
            diff.record("dictionary_item_added", format!("{path}['{key}']"), value.clone());
        }
    }
}

fn compare_arrays(old: &[Value], new: &[Value], path: &str, diff: &mut Diff) {
    let mut pool: HashMap<String, Vec<usize>> = HashMap::new();
    for (index, value) in new.iter().enumerate() {
        pool.entry(canonical(value)).or_default().push(index);
    }

    let mut unmatched_old = Vec::new();
    for (index, value) in old.iter().enumerate() {
        match pool.get_mut(&canonical(value)).and_then(|slots| slots.pop()) {
            Some(_) => {}
            None => unmatched_old.push(index),
        }
    }
    let mut unmatched_new: Vec<usize> = pool.into_values().flatten().collect();
    unmatched_new.sort_unstable();

    // Records with the same shape are reported field by field.
    let mut remaining_new = Vec::new();
    let mut paired = unmatched_old.iter().peekable();
    for new_index in unmatched_new {
        let candidate = paired.peek().map(|&&i| i);
        match candidate {
            Some(old_index) if same_shape(&old[old_index], &new[new_index]) => {
                paired.next();
                compare_at(&old[old_index], &new[new_index], format!("{path}[{old_index}]"), diff);
            }
            _ => remaining_new.push(new_index),
        }
    }
    for index in paired.copied() {
        diff.record("iterable_item_removed", format!("{path}[{index}]"), old[index].clone());
    }
    for index in remaining_new {
        diff.record("iterable_item_added", format!("{path}[{index}]"), new[index].clone());
    }
}

fn same_shape(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => a.len() == b.len() && a.keys().all(|k| b.contains_key(k)),
        _ => false,
    }
}

fn is_number(value: &Value) -> bool {
    matches!(value, Value::Number(_))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "NoneType",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

/// A string that is equal for two values exactly when they are equal up to
/// list ordering.
fn canonical(value: &Value) -> String {
    match value {
        Value::Array(items) => {
            let mut parts: Vec<String> = items.iter().map(canonical).collect();
            parts.sort();
            format!("[{}]", parts.join(","))
        }
        Value::Object(map) => {
            let mut parts: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), canonical(v)))
                .collect();
            parts.sort();
            format!("{{{}}}", parts.join(","))
        }
        Value::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => i.to_string(),
            (_, Some(u), _) => u.to_string(),
            (_, _, Some(f)) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 => {
                format!("{f:.0}")
            }
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meetings(dates: &[&str]) -> Value {
        Value::Array(
            dates
                .iter()
                .map(|d| json!({"date": d, "agenda": format!("https://town.gov/{d}.pdf")}))
                .collect(),
        )
    }

    #[test]
    fn list_order_is_ignored() {
        let expected = meetings(&["2024-01-08", "2024-02-12"]);
        let actual = meetings(&["2024-02-12", "2024-01-08"]);
        assert!(compare(&expected, &actual).is_empty());
    }

    #[test]
    fn empty_lists_are_equal() {
        assert!(compare(&json!([]), &json!([])).is_empty());
        assert_eq!(serde_json::to_value(compare(&json!([]), &json!([]))).unwrap(), json!({}));
    }

    #[test]
    fn extra_record_is_reported_as_added() {
        let expected = meetings(&["2024-01-08"]);
        let actual = meetings(&["2024-01-08", "2024-03-11"]);
        let diff = compare(&expected, &actual);
        assert_eq!(diff.len(), 1);
        let added = diff.get("iterable_item_added").unwrap();
        assert_eq!(added["root[1]"]["date"], json!("2024-03-11"));
    }

    #[test]
    fn missing_record_is_reported_as_removed() {
        let expected = meetings(&["2024-01-08", "2024-03-11"]);
        let actual = meetings(&["2024-03-11"]);
        let diff = compare(&expected, &actual);
        assert_eq!(diff.kinds().collect::<Vec<_>>(), vec!["iterable_item_removed"]);
        assert!(diff.get("iterable_item_removed").unwrap().contains_key("root[0]"));
    }

    #[test]
    fn changed_field_is_reported_in_place() {
        let expected = json!([{"date": "2024-01-08", "agenda": "a.pdf"}]);
        let actual = json!([{"date": "2024-01-09", "agenda": "a.pdf"}]);
        let diff = compare(&expected, &actual);
        let changed = diff.get("values_changed").unwrap();
        assert_eq!(
            changed["root[0]['date']"],
            json!({"old_value": "2024-01-08", "new_value": "2024-01-09"})
        );
    }

    #[test]
    fn missing_and_extra_keys_are_exact() {
        let diff = compare(
            &json!({"date": "2024-01-08", "agenda": "a.pdf"}),
            &json!({"date": "2024-01-08", "title": "Agenda"}),
        );
        assert!(diff.get("dictionary_item_removed").unwrap().contains_key("root['agenda']"));
        assert!(diff.get("dictionary_item_added").unwrap().contains_key("root['title']"));
    }

    #[test]
    fn none_output_is_a_type_change() {
        let diff = compare(&meetings(&["2024-01-08"]), &Value::Null);
        let change = &diff.get("type_changes").unwrap()["root"];
        assert_eq!(change["old_type"], json!("list"));
        assert_eq!(change["new_type"], json!("NoneType"));
    }

    #[test]
    fn numbers_compare_by_value() {
        assert!(compare(&json!({"n": 1}), &json!({"n": 1.0})).is_empty());
        assert!(!compare(&json!({"n": 1}), &json!({"n": 1.5})).is_empty());
        assert!(!compare(&json!("1"), &json!(1)).is_empty());
    }

    #[test]
    fn nested_lists_are_unordered_too() {
        let expected = json!([{"tags": ["a", "b"]}, {"tags": []}]);
        let actual = json!([{"tags": []}, {"tags": ["b", "a"]}]);
        assert!(compare(&expected, &actual).is_empty());
    }
}
