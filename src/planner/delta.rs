//! Field-level delta helpers.
//!
//! A delta is a sparse copy of a task: a field is populated only when the
//! desired value is set and differs from the actual value. An absent desired
//! value means "don't care" and never produces a change.

use std::collections::{BTreeMap, BTreeSet};

/// Names of changed fields. Nested fields use dotted paths such as
/// `root_volume.iops`.
pub type FieldSet = BTreeSet<String>;

/// Sparse diff for nested option groups.
pub trait Diff: Default + Clone + PartialEq {
    /// Returns the fields of `self` that differ from `actual`, or `None`
    /// when nothing differs.
    fn diff(&self, actual: &Self) -> Option<Self>;

    /// Collects populated field paths under `prefix`.
    fn collect_fields(&self, prefix: &str, out: &mut FieldSet);
}

/// Returns the desired value when it is set and differs from actual.
#[must_use]
pub fn changed<T: PartialEq + Clone>(desired: Option<&T>, actual: Option<&T>) -> Option<T> {
    match desired {
        Some(d) if actual != Some(d) => Some(d.clone()),
        _ => None,
    }
}

/// Like [`changed`], comparing the lists as sets.
#[must_use]
pub fn changed_set(desired: Option<&Vec<String>>, actual: Option<&Vec<String>>) -> Option<Vec<String>> {
    let d = desired?;
    let same = actual.is_some_and(|a| {
        a.iter().collect::<BTreeSet<_>>() == d.iter().collect::<BTreeSet<_>>()
    });
    (!same).then(|| d.clone())
}

/// Like [`changed`], treating an empty desired map as equal to an absent one.
#[must_use]
pub fn changed_map(
    desired: Option<&BTreeMap<String, String>>,
    actual: Option<&BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    let d = desired?;
    match actual {
        Some(a) if a == d => None,
        None if d.is_empty() => None,
        _ => Some(d.clone()),
    }
}

/// Recursive diff of a nested option group.
///
/// A desired group with no actual counterpart is diffed against the empty
/// group, so only its populated fields appear in the delta.
#[must_use]
pub fn changed_nested<T: Diff>(desired: Option<&T>, actual: Option<&T>) -> Option<T> {
    let d = desired?;
    match actual {
        Some(a) => d.diff(a),
        None => d.diff(&T::default()),
    }
}

/// Records `name` under `prefix` if `value` is populated.
pub fn collect<T>(value: Option<&T>, prefix: &str, name: &str, out: &mut FieldSet) {
    if value.is_some() {
        out.insert(join(prefix, name));
    }
}

/// Records the fields of a nested group under `prefix.name`.
pub fn collect_nested<T: Diff>(value: Option<&T>, prefix: &str, name: &str, out: &mut FieldSet) {
    if let Some(v) = value {
        v.collect_fields(&join(prefix, name), out);
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_unset_desired_is_never_a_change() {
        assert_eq!(changed::<i64>(None, Some(&4)), None);
        assert_eq!(changed(Some(&4), Some(&4)), None);
        assert_eq!(changed(Some(&5), Some(&4)), Some(5));
        assert_eq!(changed(Some(&5), None), Some(5));
    }

    #[test]
    fn test_set_equality_ignores_order() {
        let desired = strings(&["b", "a"]);
        let actual = strings(&["a", "b"]);
        assert_eq!(changed_set(Some(&desired), Some(&actual)), None);

        let actual = strings(&["a"]);
        assert_eq!(changed_set(Some(&desired), Some(&actual)), Some(desired.clone()));
    }

    #[test]
    fn test_empty_map_equals_absent() {
        let empty = BTreeMap::new();
        assert_eq!(changed_map(Some(&empty), None), None);

        let mut tags = BTreeMap::new();
        tags.insert(String::from("k"), String::from("v"));
        assert_eq!(changed_map(Some(&tags), None), Some(tags.clone()));
        assert_eq!(changed_map(Some(&tags), Some(&tags)), None);
    }
}
