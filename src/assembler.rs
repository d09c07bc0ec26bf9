//! Shapes already-fetched rows into nested views. Nothing here touches a
//! database.
//!
//! Rows are JSON objects. Column presence is checked against the first row
//! only; every row is assumed to carry the same columns.

use generational_arena::{Arena, Index};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use tracing::{debug, instrument, trace};

use crate::error::ClosureTreeError;

/// A fetched row, column name to value.
pub type Record = Map<String, Value>;

/// A record together with the records that name it as their parent.
#[derive(Clone, Debug, PartialEq)]
pub struct TreeNode {
    pub record: Record,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// Number of nodes in this subtree, the node itself included.
    pub fn count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter());
        }
        count
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

// A `children` column already present in the record is shadowed by the
// assembled list.
impl Serialize for TreeNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.record.len() + 1))?;
        for (column, value) in &self.record {
            if column != "children" {
                map.serialize_entry(column, value)?;
            }
        }
        map.serialize_entry("children", &self.children)?;
        map.end()
    }
}

/// Output of [`tree`]: properly rooted nodes and the nodes whose parent
/// reference resolves to nothing.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Forest {
    pub roots: Vec<TreeNode>,
    pub orphans: Vec<TreeNode>,
}

/// Groups `records` by `key_columns`, one nesting level per column; the last
/// column maps to the record itself.
///
/// Duplicate composite keys are last-write-wins: the later record replaces
/// the earlier one at the earlier one's position.
#[instrument(level = "trace", skip(records))]
pub fn associative(records: &[Record], key_columns: &[&str]) -> Result<Record, ClosureTreeError> {
    let Some((last, path)) = key_columns.split_last() else {
        return Err(ClosureTreeError::invalid_argument(
            "at least one key column is required",
        ));
    };
    let Some(first) = records.first() else {
        return Ok(Record::new());
    };
    for column in key_columns {
        require_column(first, column)?;
    }

    let mut grouped = Record::new();
    for record in records {
        let mut cursor = &mut grouped;
        for column in path {
            let key = key_of(record, column)?;
            let slot = cursor
                .entry(key)
                .or_insert_with(|| Value::Object(Record::new()));
            cursor = match slot {
                Value::Object(nested) => nested,
                _ => {
                    return Err(ClosureTreeError::invariant(
                        "grouping level holds a record instead of a group",
                    ))
                }
            };
        }
        cursor.insert(key_of(record, last)?, Value::Object(record.clone()));
    }
    Ok(grouped)
}

/// Values of `column` across all records, in input order.
pub fn column_values(records: &[Record], column: &str) -> Result<Vec<Value>, ClosureTreeError> {
    let Some(first) = records.first() else {
        return Ok(Vec::new());
    };
    require_column(first, column)?;

    Ok(records
        .iter()
        .map(|record| record.get(column).cloned().unwrap_or(Value::Null))
        .collect())
}

/// `key` column to `value` column pairs; duplicate keys are last-write-wins.
pub fn pairs(records: &[Record], key: &str, value: &str) -> Result<Record, ClosureTreeError> {
    let Some(first) = records.first() else {
        return Ok(Record::new());
    };
    require_column(first, key)?;
    require_column(first, value)?;

    let mut out = Record::new();
    for record in records {
        out.insert(
            key_of(record, key)?,
            record.get(value).cloned().unwrap_or(Value::Null),
        );
    }
    Ok(out)
}

struct Slot {
    record: Record,
    parent: Option<String>,
    children: Vec<Index>,
}

/// Links `records` into trees by `id_column` / `parent_column` in one pass.
///
/// Records with an empty parent (null, false, 0, "" or "0") become roots. Records
/// whose parent id matches no record become orphans. Input order is kept for
/// roots, orphans and every children list. A parent cycle leaves its members
/// in neither list.
#[instrument(level = "trace", skip(records))]
pub fn tree(
    records: &[Record],
    id_column: &str,
    parent_column: &str,
) -> Result<Forest, ClosureTreeError> {
    let Some(first) = records.first() else {
        return Ok(Forest::default());
    };
    require_column(first, id_column)?;
    require_column(first, parent_column)?;

    let mut arena: Arena<Slot> = Arena::with_capacity(records.len());
    let mut by_id: HashMap<String, Index> = HashMap::with_capacity(records.len());
    let mut order: Vec<Index> = Vec::with_capacity(records.len());

    for record in records {
        let id = key_of(record, id_column)?;
        let parent = match record.get(parent_column) {
            Some(value) if !is_blank(value) => Some(scalar_key(parent_column, value)?),
            _ => None,
        };
        match by_id.get(&id) {
            Some(&index) => {
                trace!(%id, "duplicate id, keeping the later record");
                arena[index].record = record.clone();
                arena[index].parent = parent;
            }
            None => {
                let index = arena.insert(Slot {
                    record: record.clone(),
                    parent,
                    children: Vec::new(),
                });
                by_id.insert(id, index);
                order.push(index);
            }
        }
    }

    let mut roots = Vec::new();
    let mut orphans = Vec::new();
    for &index in &order {
        let parent = arena[index].parent.clone();
        match parent {
            None => roots.push(index),
            Some(parent) => match by_id.get(&parent) {
                Some(&parent_index) => arena[parent_index].children.push(index),
                None => {
                    trace!(%parent, "parent not found, record is an orphan");
                    orphans.push(index);
                }
            },
        }
    }

    let mut forest = Forest::default();
    for index in roots {
        forest.roots.extend(materialize(&mut arena, index));
    }
    for index in orphans {
        forest.orphans.extend(materialize(&mut arena, index));
    }
    if !arena.is_empty() {
        debug!(unreachable = arena.len(), "records caught in a parent cycle");
    }
    Ok(forest)
}

/// Moves the subtree rooted at `root` out of the arena, post-order, without
/// recursion.
fn materialize(arena: &mut Arena<Slot>, root: Index) -> Option<TreeNode> {
    let mut stack = vec![(root, false)];
    let mut built: Vec<TreeNode> = Vec::new();

    while let Some((index, expanded)) = stack.pop() {
        if expanded {
            let slot = arena.remove(index)?;
            let children = built.split_off(built.len().saturating_sub(slot.children.len()));
            built.push(TreeNode {
                record: slot.record,
                children,
            });
        } else {
            stack.push((index, true));
            let slot = arena.get(index)?;
            stack.extend(slot.children.iter().rev().map(|&child| (child, false)));
        }
    }

    built.pop()
}

fn require_column(record: &Record, column: &str) -> Result<(), ClosureTreeError> {
    if record.contains_key(column) {
        Ok(())
    } else {
        Err(ClosureTreeError::ColumnNotFound(column.to_string()))
    }
}

fn key_of(record: &Record, column: &str) -> Result<String, ClosureTreeError> {
    let value = record
        .get(column)
        .ok_or_else(|| ClosureTreeError::ColumnNotFound(column.to_string()))?;
    scalar_key(column, value)
}

fn scalar_key(column: &str, value: &Value) -> Result<String, ClosureTreeError> {
    match value {
        Value::Null => Ok(String::new()),
        Value::Bool(flag) => Ok(flag.to_string()),
        Value::Number(number) => Ok(number_key(number)),
        Value::String(text) => Ok(text.clone()),
        Value::Array(_) | Value::Object(_) => Err(ClosureTreeError::invalid_argument(format!(
            "column `{column}` holds a non-scalar value"
        ))),
    }
}

// Whole floats share the integer's key, so `1.0` finds id `1`.
fn number_key(number: &Number) -> String {
    if number.is_f64() {
        if let Some(float) = number.as_f64() {
            if float.fract() == 0.0 && float >= i64::MIN as f64 && float < i64::MAX as f64 {
                return (float as i64).to_string();
            }
        }
    }
    number.to_string()
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64() == Some(0.0),
        Value::String(text) => text.is_empty() || text == "0",
        Value::Array(_) | Value::Object(_) => false,
    }
}
