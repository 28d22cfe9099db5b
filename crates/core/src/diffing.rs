//! Diff & patch for record data trees
//!
//! `diff(a, b)` produces the minimal patch that transforms `a` into `b`;
//! `patch(a, ops)` applies one. The record store keeps these patches
//! *backwards*: each stored diff turns a newer state into the one before it,
//! so any historical state can be rebuilt from the current data.
//!
//! The walk is queue-driven rather than recursive and is deterministic:
//! object keys are visited in sorted order. Lists are diffed index-aligned
//! (never LCS); a mid-list insertion therefore shows up as a run of `Set`s
//! plus a tail op. This matches how historical diffs were produced and must
//! not change, or old diff chains stop reconstructing.
//!
//! Round-trip law: `patch(a, &diff(a, b)) == b` for every pair of trees.

use crate::error::{Result, SplitgillError};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One step of a path into a data tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSeg {
    /// A map key
    Key(String),
    /// A list index
    Index(usize),
}

impl From<&str> for PathSeg {
    fn from(key: &str) -> Self {
        PathSeg::Key(key.to_string())
    }
}

impl From<usize> for PathSeg {
    fn from(index: usize) -> Self {
        PathSeg::Index(index)
    }
}

/// An ordered sequence of map keys and list indices.
pub type Path = Vec<PathSeg>;

/// A single patch operation.
///
/// Six op codes cover every tree-to-tree transformation. `Wrap` and `Unwrap`
/// are semantically `Set` but keep scalar↔container replacements explicit in
/// stored history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PatchOp {
    /// Set the value at a map key or list index
    Set {
        /// Target path
        path: Path,
        /// New value
        value: Value,
    },
    /// Delete a map key
    Remove {
        /// Target path
        path: Path,
    },
    /// Append values to the tail of the list at `path`
    Extend {
        /// Path of the list
        path: Path,
        /// Values to append
        values: Vec<Value>,
    },
    /// Cut the list at `path` down to `len` elements
    Truncate {
        /// Path of the list
        path: Path,
        /// New length
        len: usize,
    },
    /// Replace a scalar with a container wholesale
    Wrap {
        /// Target path
        path: Path,
        /// The container value
        value: Value,
    },
    /// Replace a container with a scalar wholesale
    Unwrap {
        /// Target path
        path: Path,
        /// The scalar value
        value: Value,
    },
}

impl PatchOp {
    /// The path this op applies at.
    pub fn path(&self) -> &Path {
        match self {
            PatchOp::Set { path, .. }
            | PatchOp::Remove { path }
            | PatchOp::Extend { path, .. }
            | PatchOp::Truncate { path, .. }
            | PatchOp::Wrap { path, .. }
            | PatchOp::Unwrap { path, .. } => path,
        }
    }
}

/// A diff: the ordered patch ops transforming one tree into another.
pub type Diff = Vec<PatchOp>;

/// Pick the replacement op for two unequal values that do not recurse.
fn replace_op(path: Path, left: &Value, right: &Value) -> PatchOp {
    match (left.is_container(), right.is_container()) {
        (false, true) => PatchOp::Wrap {
            path,
            value: right.clone(),
        },
        (true, false) => PatchOp::Unwrap {
            path,
            value: right.clone(),
        },
        _ => PatchOp::Set {
            path,
            value: right.clone(),
        },
    }
}

/// Compute the minimal patch transforming `a` into `b`.
///
/// Total over the tree grammar: any two values diff, including a bare scalar
/// against a container (one wholesale replace op at the root).
pub fn diff(a: &Value, b: &Value) -> Diff {
    if a == b {
        return Vec::new();
    }

    let mut ops = Vec::new();
    let mut queue: VecDeque<(Path, &Value, &Value)> = VecDeque::new();

    match (a, b) {
        (Value::Object(_), Value::Object(_)) | (Value::Array(_), Value::Array(_)) => {
            queue.push_back((Vec::new(), a, b));
        }
        _ => return vec![replace_op(Vec::new(), a, b)],
    }

    while let Some((path, left, right)) = queue.pop_front() {
        match (left, right) {
            (Value::Object(left_map), Value::Object(right_map)) => {
                for key in left_map.keys() {
                    if !right_map.contains_key(key) {
                        let mut sub = path.clone();
                        sub.push(PathSeg::Key(key.clone()));
                        ops.push(PatchOp::Remove { path: sub });
                    }
                }
                for (key, right_value) in right_map {
                    let mut sub = path.clone();
                    sub.push(PathSeg::Key(key.clone()));
                    match left_map.get(key) {
                        None => ops.push(PatchOp::Set {
                            path: sub,
                            value: right_value.clone(),
                        }),
                        Some(left_value) if left_value == right_value => {}
                        Some(left_value) => match (left_value, right_value) {
                            (Value::Object(_), Value::Object(_))
                            | (Value::Array(_), Value::Array(_)) => {
                                queue.push_back((sub, left_value, right_value));
                            }
                            _ => ops.push(replace_op(sub, left_value, right_value)),
                        },
                    }
                }
            }
            (Value::Array(left_arr), Value::Array(right_arr)) => {
                let common = left_arr.len().min(right_arr.len());
                for (index, (left_value, right_value)) in
                    left_arr.iter().zip(right_arr.iter()).enumerate()
                {
                    if left_value == right_value {
                        continue;
                    }
                    let mut sub = path.clone();
                    sub.push(PathSeg::Index(index));
                    // only maps recurse at list slots; nested lists are
                    // replaced wholesale so reconstruction stays simple
                    match (left_value, right_value) {
                        (Value::Object(_), Value::Object(_)) => {
                            queue.push_back((sub, left_value, right_value));
                        }
                        _ => ops.push(replace_op(sub, left_value, right_value)),
                    }
                }
                if right_arr.len() > common {
                    ops.push(PatchOp::Extend {
                        path: path.clone(),
                        values: right_arr[common..].to_vec(),
                    });
                } else if left_arr.len() > common {
                    ops.push(PatchOp::Truncate {
                        path,
                        len: right_arr.len(),
                    });
                }
            }
            _ => unreachable!("only same-kind containers are queued"),
        }
    }

    ops
}

/// Apply a diff to a tree, returning the transformed tree.
///
/// Fails only when an op's path does not resolve, which means the diff was
/// not produced against this tree.
pub fn patch(base: &Value, ops: &[PatchOp]) -> Result<Value> {
    let mut result = base.clone();
    for op in ops {
        apply_op(&mut result, op)?;
    }
    Ok(result)
}

fn apply_op(root: &mut Value, op: &PatchOp) -> Result<()> {
    match op {
        PatchOp::Set { path, value }
        | PatchOp::Wrap { path, value }
        | PatchOp::Unwrap { path, value } => set_at(root, path, value.clone()),
        PatchOp::Remove { path } => {
            let (parent, leaf) = split_path(path)?;
            match (resolve_mut(root, parent)?, leaf) {
                (Value::Object(map), PathSeg::Key(key)) => {
                    map.remove(key);
                    Ok(())
                }
                _ => Err(bad_path(path, "remove targets a map key")),
            }
        }
        PatchOp::Extend { path, values } => match resolve_mut(root, path)? {
            Value::Array(arr) => {
                arr.extend(values.iter().cloned());
                Ok(())
            }
            _ => Err(bad_path(path, "extend targets a list")),
        },
        PatchOp::Truncate { path, len } => match resolve_mut(root, path)? {
            Value::Array(arr) => {
                arr.truncate(*len);
                Ok(())
            }
            _ => Err(bad_path(path, "truncate targets a list")),
        },
    }
}

fn set_at(root: &mut Value, path: &[PathSeg], value: Value) -> Result<()> {
    if path.is_empty() {
        *root = value;
        return Ok(());
    }
    let (parent, leaf) = split_path(path)?;
    match (resolve_mut(root, parent)?, leaf) {
        (Value::Object(map), PathSeg::Key(key)) => {
            map.insert(key.clone(), value);
            Ok(())
        }
        (Value::Array(arr), PathSeg::Index(index)) => {
            let slot = arr
                .get_mut(*index)
                .ok_or_else(|| bad_path(path, "list index out of range"))?;
            *slot = value;
            Ok(())
        }
        _ => Err(bad_path(path, "path segment does not match container")),
    }
}

fn split_path(path: &[PathSeg]) -> Result<(&[PathSeg], &PathSeg)> {
    match path.split_last() {
        Some((leaf, parent)) => Ok((parent, leaf)),
        None => Err(SplitgillError::internal("patch op with empty path")),
    }
}

fn resolve_mut<'a>(root: &'a mut Value, path: &[PathSeg]) -> Result<&'a mut Value> {
    let mut current = root;
    for seg in path {
        current = match (current, seg) {
            (Value::Object(map), PathSeg::Key(key)) => map
                .get_mut(key)
                .ok_or_else(|| bad_path(path, "missing map key"))?,
            (Value::Array(arr), PathSeg::Index(index)) => arr
                .get_mut(*index)
                .ok_or_else(|| bad_path(path, "list index out of range"))?,
            _ => return Err(bad_path(path, "path segment does not match container")),
        };
    }
    Ok(current)
}

fn bad_path(path: &[PathSeg], why: &str) -> SplitgillError {
    SplitgillError::internal(format!("patch path {path:?} invalid: {why}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object;

    fn round_trip(a: Value, b: Value) {
        let forward = diff(&a, &b);
        assert_eq!(patch(&a, &forward).unwrap(), b, "forward patch");
        let backward = diff(&b, &a);
        assert_eq!(patch(&b, &backward).unwrap(), a, "backward patch");
    }

    #[test]
    fn test_equal_trees_produce_no_ops() {
        let a = object! {"x" => 1, "y" => "two"};
        assert!(diff(&a, &a.clone()).is_empty());
    }

    #[test]
    fn test_scalar_change() {
        round_trip(object! {"x" => 1}, object! {"x" => 2});
    }

    #[test]
    fn test_key_addition_and_removal() {
        round_trip(object! {"a" => 1, "b" => 2}, object! {"b" => 2, "c" => 3});
    }

    #[test]
    fn test_nested_map_recursion() {
        let a = object! {"outer" => object! {"inner" => "old", "keep" => true}};
        let b = object! {"outer" => object! {"inner" => "new", "keep" => true}};
        let ops = diff(&a, &b);
        assert_eq!(ops.len(), 1);
        round_trip(a, b);
    }

    #[test]
    fn test_list_element_change() {
        let a = object! {"xs" => Value::Array(vec![1.into(), 2.into(), 3.into()])};
        let b = object! {"xs" => Value::Array(vec![1.into(), 9.into(), 3.into()])};
        round_trip(a, b);
    }

    #[test]
    fn test_list_grow_and_shrink() {
        let short = object! {"xs" => Value::Array(vec![1.into()])};
        let long = object! {"xs" => Value::Array(vec![1.into(), 2.into(), 3.into()])};
        let grow = diff(&short, &long);
        assert!(grow
            .iter()
            .any(|op| matches!(op, PatchOp::Extend { values, .. } if values.len() == 2)));
        let shrink = diff(&long, &short);
        assert!(shrink
            .iter()
            .any(|op| matches!(op, PatchOp::Truncate { len: 1, .. })));
        round_trip(short, long);
    }

    #[test]
    fn test_mid_list_insertion_is_index_aligned() {
        let a = object! {"xs" => Value::Array(vec![1.into(), 2.into(), 3.into()])};
        let b = object! {"xs" => Value::Array(vec![1.into(), 9.into(), 2.into(), 3.into()])};
        let ops = diff(&a, &b);
        // index-aligned: sets at 1 and 2 plus a tail extend, not a single insert
        assert_eq!(
            ops.iter()
                .filter(|op| matches!(op, PatchOp::Set { .. }))
                .count(),
            2
        );
        round_trip(a, b);
    }

    #[test]
    fn test_shape_change_replaces_wholesale() {
        let a = object! {"x" => 1};
        let b = object! {"x" => Value::Array(vec![1.into()])};
        let ops = diff(&a, &b);
        assert!(matches!(ops[0], PatchOp::Wrap { .. }));
        let ops = diff(&b, &a);
        assert!(matches!(ops[0], PatchOp::Unwrap { .. }));
        round_trip(a, b);
    }

    #[test]
    fn test_list_vs_map_replaces_wholesale() {
        let a = object! {"x" => Value::Array(vec![1.into()])};
        let b = object! {"x" => object! {"k" => 1}};
        assert_eq!(diff(&a, &b).len(), 1);
        round_trip(a, b);
    }

    #[test]
    fn test_map_inside_list_recurses() {
        let a = object! {"xs" => Value::Array(vec![object! {"n" => 1, "keep" => "yes"}])};
        let b = object! {"xs" => Value::Array(vec![object! {"n" => 2, "keep" => "yes"}])};
        let ops = diff(&a, &b);
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], PatchOp::Set { path, .. } if path.len() == 3));
        round_trip(a, b);
    }

    #[test]
    fn test_list_inside_list_replaced_wholesale() {
        let a = object! {"xs" => Value::Array(vec![Value::Array(vec![1.into(), 2.into()])])};
        let b = object! {"xs" => Value::Array(vec![Value::Array(vec![1.into(), 3.into()])])};
        let ops = diff(&a, &b);
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], PatchOp::Set { .. }));
        round_trip(a, b);
    }

    #[test]
    fn test_null_versus_missing() {
        round_trip(object! {"a" => Value::Null}, Value::empty());
    }

    #[test]
    fn test_float_bit_exactness() {
        let a = object! {"f" => Value::Float(0.0)};
        let b = object! {"f" => Value::Float(-0.0)};
        assert_eq!(diff(&a, &b).len(), 1);

        let nan_a = object! {"f" => Value::Float(f64::NAN)};
        let nan_b = object! {"f" => Value::Float(f64::NAN)};
        assert!(diff(&nan_a, &nan_b).is_empty());
    }

    #[test]
    fn test_empty_to_full_and_back() {
        round_trip(
            Value::empty(),
            object! {"a" => 1, "b" => object! {"c" => Value::Array(vec!["x".into()])}},
        );
    }

    #[test]
    fn test_deterministic_emission() {
        let a = object! {"b" => 1, "a" => 1, "c" => 1};
        let b = object! {"b" => 2, "a" => 2, "c" => 2};
        assert_eq!(diff(&a, &b), diff(&a, &b));
    }

    #[test]
    fn test_diff_serde_round_trip() {
        let a = object! {"xs" => Value::Array(vec![1.into()]), "n" => 1};
        let b = object! {"xs" => Value::Array(vec![1.into(), 2.into()]), "n" => 2};
        let ops = diff(&a, &b);
        let text = serde_json::to_string(&ops).unwrap();
        let back: Diff = serde_json::from_str(&text).unwrap();
        assert_eq!(back, ops);
        assert_eq!(patch(&a, &back).unwrap(), b);
    }

    #[test]
    fn test_patch_rejects_foreign_diff() {
        let a = object! {"x" => object! {"y" => 1}};
        let b = object! {"x" => object! {"y" => 2}};
        let ops = diff(&a, &b);
        let unrelated = object! {"z" => 1};
        assert!(patch(&unrelated, &ops).is_err());
    }
}
