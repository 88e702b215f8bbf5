//! Key/value graph primitives shared by every store adapter.
//!
//! A node is addressed by a [`StorePath`]. Writing an object merges it field by
//! field into leaves; writing a scalar or `null` replaces the leaf at that path
//! and tombstones everything below it. Reads assemble the live leaves under a
//! path back into a JSON value.

use serde_json::{Map, Value};
use std::fmt;

/// Slash-separated address of a node in the store graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorePath(Vec<String>);

impl StorePath {
    pub fn root(segment: impl Into<String>) -> Self {
        Self(vec![segment.into()])
    }

    /// Parse a `/`-joined path, ignoring empty segments
    pub fn parse(raw: &str) -> Self {
        Self(
            raw.split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn child(&self, segment: impl ToString) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.to_string());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// True when `other` equals this path or lives below it
    pub fn contains(&self, other: &StorePath) -> bool {
        other.0.starts_with(&self.0)
    }

    /// Segments of this path below `ancestor`, if it is one
    pub fn relative_to(&self, ancestor: &StorePath) -> Option<&[String]> {
        if self.0.starts_with(&ancestor.0) {
            Some(&self.0[ancestor.0.len()..])
        } else {
            None
        }
    }

    /// Two paths overlap when a write to one can change a read of the other
    pub fn overlaps(&self, other: &StorePath) -> bool {
        self.contains(other) || other.contains(self)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

/// One leaf mutation produced by flattening a put
#[derive(Debug, Clone, PartialEq)]
pub struct LeafWrite {
    pub path: StorePath,
    /// `None` is a tombstone
    pub value: Option<Value>,
    /// Tombstone every leaf strictly below `path` as part of this write
    pub clear_descendants: bool,
}

/// Flatten a put into leaf writes.
///
/// Objects merge into their fields. An empty object produces no writes.
pub fn flatten(path: &StorePath, value: Value) -> Vec<LeafWrite> {
    let mut writes = Vec::new();
    flatten_into(path.clone(), value, &mut writes);
    writes
}

fn flatten_into(path: StorePath, value: Value, writes: &mut Vec<LeafWrite>) {
    match value {
        Value::Object(fields) => {
            for (key, child) in fields {
                flatten_into(path.child(key), child, writes);
            }
        }
        Value::Null => writes.push(LeafWrite {
            path,
            value: None,
            clear_descendants: true,
        }),
        scalar => writes.push(LeafWrite {
            path,
            value: Some(scalar),
            clear_descendants: true,
        }),
    }
}

/// Rebuild the node at `base` from its live leaves.
///
/// Leaves outside `base` are ignored. When the node has live descendants the
/// result is an object and any scalar stored at `base` itself is hidden.
pub fn assemble<I>(base: &StorePath, leaves: I) -> Option<Value>
where
    I: IntoIterator<Item = (StorePath, Value)>,
{
    let mut own = None;
    let mut fields = Map::new();
    let mut has_children = false;

    for (path, value) in leaves {
        let Some(relative) = path.relative_to(base) else {
            continue;
        };
        if relative.is_empty() {
            own = Some(value);
        } else {
            has_children = true;
            insert_nested(&mut fields, relative, value);
        }
    }

    if has_children {
        Some(Value::Object(fields))
    } else {
        own
    }
}

fn insert_nested(fields: &mut Map<String, Value>, relative: &[String], value: Value) {
    let Some((head, rest)) = relative.split_first() else {
        return;
    };

    if rest.is_empty() {
        // a subtree always wins over a scalar at the same key
        if !matches!(fields.get(head), Some(Value::Object(_))) {
            fields.insert(head.clone(), value);
        }
        return;
    }

    let slot = fields
        .entry(head.clone())
        .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    if let Value::Object(inner) = slot {
        insert_nested(inner, rest, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_and_display() {
        let path = StorePath::parse("/locations//data/abc/");
        assert_eq!(path.segments().len(), 3);
        assert_eq!(path.to_string(), "locations/data/abc");
        assert_eq!(path.last(), Some("abc"));
    }

    #[test]
    fn test_contains_and_overlaps() {
        let location = StorePath::parse("locations/data/abc");
        let entry = location.child("queue").child(7);

        assert!(location.contains(&entry));
        assert!(!entry.contains(&location));
        assert!(entry.overlaps(&location));
        assert!(!StorePath::parse("locations/data/abd").overlaps(&entry));
        assert_eq!(
            entry.relative_to(&location),
            Some(&["queue".to_string(), "7".to_string()][..])
        );
    }

    #[test]
    fn test_flatten_merges_object_fields() {
        let base = StorePath::parse("locations/data/abc");
        let writes = flatten(
            &base,
            json!({"name": "Bakery", "queue": {"1": {"served": false}}}),
        );

        assert_eq!(writes.len(), 2);
        assert!(writes
            .iter()
            .any(|w| w.path == base.child("name") && w.value == Some(json!("Bakery"))));
        assert!(writes.iter().any(|w| w.path
            == base.child("queue").child("1").child("served")
            && w.value == Some(json!(false))));
    }

    #[test]
    fn test_flatten_null_is_tombstone() {
        let path = StorePath::parse("a/b");
        let writes = flatten(&path, Value::Null);
        assert_eq!(
            writes,
            vec![LeafWrite {
                path,
                value: None,
                clear_descendants: true
            }]
        );
    }

    #[test]
    fn test_flatten_empty_object_writes_nothing() {
        assert!(flatten(&StorePath::parse("a"), json!({})).is_empty());
    }

    #[test]
    fn test_assemble_nested_node() {
        let base = StorePath::parse("loc");
        let leaves = vec![
            (StorePath::parse("loc/name"), json!("Bakery")),
            (StorePath::parse("loc/queue/3/number"), json!(3)),
            (StorePath::parse("loc/queue/3/served"), json!(true)),
            (StorePath::parse("other/name"), json!("ignored")),
        ];

        let node = assemble(&base, leaves).unwrap();
        assert_eq!(
            node,
            json!({"name": "Bakery", "queue": {"3": {"number": 3, "served": true}}})
        );
    }

    #[test]
    fn test_assemble_scalar_and_missing() {
        let base = StorePath::parse("user/myNumbers/loc");
        assert_eq!(
            assemble(&base, vec![(base.clone(), json!(4))]),
            Some(json!(4))
        );
        assert_eq!(assemble(&base, Vec::new()), None);
    }

    #[test]
    fn test_assemble_subtree_hides_scalar() {
        let base = StorePath::parse("n");
        let node = assemble(
            &base,
            vec![
                (StorePath::parse("n/a"), json!(1)),
                (StorePath::parse("n/a/b"), json!(2)),
            ],
        )
        .unwrap();
        assert_eq!(node, json!({"a": {"b": 2}}));
    }
}
