//! The closure relation: every `(ancestor, descendant, generations)` triple
//! implied by a strict single-parent forest.
//!
//! Every live node owns exactly one self-edge `(n, n, 0)`, at most one
//! incoming edge with `generations = 1`, and the edge set is exactly the
//! transitive closure of those parent links. [`verify_closure`] checks all of
//! this against a loaded edge set.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;

use sea_orm::sea_query::{Alias, Expr, Order, Query};
use sea_orm::{ConnectionTrait, TryGetable, Value};

use crate::error::ClosureTreeError;

/// Bounds every node identifier must satisfy.
pub trait NodeId:
    Clone + Eq + Hash + Debug + Send + Sync + Into<Value> + TryGetable + 'static
{
}

impl<T> NodeId for T where
    T: Clone + Eq + Hash + Debug + Send + Sync + Into<Value> + TryGetable + 'static
{
}

/// Table and column names of a closure relation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HierarchyTable {
    table: String,
    ancestor: String,
    descendant: String,
    generations: String,
}

impl HierarchyTable {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ancestor: "ancestor_id".to_string(),
            descendant: "descendant_id".to_string(),
            generations: "generations".to_string(),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_ancestor_column(mut self, column: impl Into<String>) -> Self {
        self.ancestor = column.into();
        self
    }

    pub fn with_descendant_column(mut self, column: impl Into<String>) -> Self {
        self.descendant = column.into();
        self
    }

    pub fn with_generations_column(mut self, column: impl Into<String>) -> Self {
        self.generations = column.into();
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn ancestor(&self) -> &str {
        &self.ancestor
    }

    pub fn descendant(&self) -> &str {
        &self.descendant
    }

    pub fn generations(&self) -> &str {
        &self.generations
    }

    pub(crate) fn table_iden(&self) -> Alias {
        Alias::new(self.table.as_str())
    }

    pub(crate) fn ancestor_iden(&self) -> Alias {
        Alias::new(self.ancestor.as_str())
    }

    pub(crate) fn descendant_iden(&self) -> Alias {
        Alias::new(self.descendant.as_str())
    }

    pub(crate) fn generations_iden(&self) -> Alias {
        Alias::new(self.generations.as_str())
    }

    /// Rejects empty identifiers before any statement is built.
    pub(crate) fn validate(&self) -> Result<(), ClosureTreeError> {
        let names = [
            ("hierarchy table", &self.table),
            ("ancestor column", &self.ancestor),
            ("descendant column", &self.descendant),
            ("generations column", &self.generations),
        ];
        for (what, name) in names {
            if name.trim().is_empty() {
                return Err(ClosureTreeError::invalid_argument(format!(
                    "{what} name is empty"
                )));
            }
        }
        Ok(())
    }
}

/// One row of the closure relation.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ClosureEdge<I> {
    pub ancestor: I,
    pub descendant: I,
    pub generations: i32,
}

impl<I> ClosureEdge<I> {
    pub fn new(ancestor: I, descendant: I, generations: i32) -> Self {
        Self {
            ancestor,
            descendant,
            generations,
        }
    }
}

/// Reads the whole closure relation, ordered by ancestor, then depth.
pub async fn load_edges<I, C>(
    conn: &C,
    hierarchy: &HierarchyTable,
) -> Result<Vec<ClosureEdge<I>>, ClosureTreeError>
where
    I: NodeId,
    C: ConnectionTrait,
{
    hierarchy.validate()?;

    let select = Query::select()
        .column(hierarchy.ancestor_iden())
        .column(hierarchy.descendant_iden())
        .column(hierarchy.generations_iden())
        .from(hierarchy.table_iden())
        .order_by(hierarchy.ancestor_iden(), Order::Asc)
        .order_by(hierarchy.generations_iden(), Order::Asc)
        .to_owned();

    let rows = conn
        .query_all(conn.get_database_backend().build(&select))
        .await?;

    let mut edges = Vec::with_capacity(rows.len());
    for row in rows {
        edges.push(ClosureEdge {
            ancestor: row.try_get::<I>("", hierarchy.ancestor())?,
            descendant: row.try_get::<I>("", hierarchy.descendant())?,
            generations: row.try_get::<i32>("", hierarchy.generations())?,
        });
    }
    Ok(edges)
}

/// Counts the edges of the relation; handy for asserting that a failed
/// mutation left it untouched.
pub async fn count_edges<C>(conn: &C, hierarchy: &HierarchyTable) -> Result<i64, ClosureTreeError>
where
    C: ConnectionTrait,
{
    hierarchy.validate()?;

    let select = Query::select()
        .expr_as(Expr::cust("COUNT(*)"), Alias::new("edge_count"))
        .from(hierarchy.table_iden())
        .to_owned();

    let row = conn
        .query_one(conn.get_database_backend().build(&select))
        .await?
        .ok_or_else(|| ClosureTreeError::invariant("COUNT(*) returned no row"))?;
    Ok(row.try_get::<i64>("", "edge_count")?)
}

/// Direct parent links implied by an edge set (`generations = 1`).
pub fn parent_links<I>(edges: &[ClosureEdge<I>]) -> HashMap<I, I>
where
    I: Clone + Eq + Hash,
{
    edges
        .iter()
        .filter(|edge| edge.generations == 1)
        .map(|edge| (edge.descendant.clone(), edge.ancestor.clone()))
        .collect()
}

/// Checks that `edges` is exactly the closure of a strict forest.
pub fn verify_closure<I>(edges: &[ClosureEdge<I>]) -> Result<(), ClosureTreeError>
where
    I: Clone + Eq + Hash + Debug,
{
    let mut nodes: HashSet<&I> = HashSet::new();
    let mut actual: HashMap<(&I, &I), i32> = HashMap::with_capacity(edges.len());
    let mut parents: HashMap<&I, &I> = HashMap::new();

    for edge in edges {
        if edge.generations < 0 {
            return Err(ClosureTreeError::invariant(format!(
                "negative distance on {:?} -> {:?}",
                edge.ancestor, edge.descendant
            )));
        }
        if actual
            .insert((&edge.ancestor, &edge.descendant), edge.generations)
            .is_some()
        {
            return Err(ClosureTreeError::invariant(format!(
                "duplicate edge {:?} -> {:?}",
                edge.ancestor, edge.descendant
            )));
        }
        let reflexive = edge.ancestor == edge.descendant;
        if reflexive != (edge.generations == 0) {
            return Err(ClosureTreeError::invariant(format!(
                "edge {:?} -> {:?} has distance {}",
                edge.ancestor, edge.descendant, edge.generations
            )));
        }
        if edge.generations == 1
            && parents.insert(&edge.descendant, &edge.ancestor).is_some()
        {
            return Err(ClosureTreeError::invariant(format!(
                "node {:?} has more than one parent",
                edge.descendant
            )));
        }
        nodes.insert(&edge.ancestor);
        nodes.insert(&edge.descendant);
    }

    let mut expected = 0usize;
    for &node in &nodes {
        if !actual.contains_key(&(node, node)) {
            return Err(ClosureTreeError::invariant(format!(
                "node {node:?} has no self-edge"
            )));
        }

        // Walk the parent chain; every step must be backed by exactly one edge.
        let mut seen: HashSet<&I> = HashSet::from([node]);
        let mut current = node;
        let mut depth = 0;
        expected += 1;
        while let Some(&parent) = parents.get(current) {
            depth += 1;
            if !seen.insert(parent) {
                return Err(ClosureTreeError::invariant(format!(
                    "node {node:?} is its own ancestor"
                )));
            }
            match actual.get(&(parent, node)) {
                Some(&generations) if generations == depth => {}
                Some(&generations) => {
                    return Err(ClosureTreeError::invariant(format!(
                        "edge {parent:?} -> {node:?} has distance {generations}, expected {depth}"
                    )));
                }
                None => {
                    return Err(ClosureTreeError::invariant(format!(
                        "missing edge {parent:?} -> {node:?}"
                    )));
                }
            }
            expected += 1;
            current = parent;
        }
    }

    if expected != actual.len() {
        return Err(ClosureTreeError::invariant(format!(
            "{} edges do not follow from any ancestry",
            actual.len() - expected
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> Vec<ClosureEdge<i32>> {
        vec![
            ClosureEdge::new(1, 1, 0),
            ClosureEdge::new(2, 2, 0),
            ClosureEdge::new(3, 3, 0),
            ClosureEdge::new(1, 2, 1),
            ClosureEdge::new(2, 3, 1),
            ClosureEdge::new(1, 3, 2),
        ]
    }

    #[test]
    fn accepts_consistent_chain() {
        assert!(verify_closure(&chain()).is_ok());
    }

    #[test]
    fn rejects_missing_transitive_edge() {
        let edges: Vec<_> = chain()
            .into_iter()
            .filter(|edge| edge.generations != 2)
            .collect();
        assert!(matches!(
            verify_closure(&edges),
            Err(ClosureTreeError::Invariant(_))
        ));
    }

    #[test]
    fn rejects_stray_edge() {
        let mut edges = chain();
        edges.push(ClosureEdge::new(3, 1, 5));
        assert!(verify_closure(&edges).is_err());
    }

    #[test]
    fn rejects_second_parent() {
        let mut edges = chain();
        edges.push(ClosureEdge::new(4, 4, 0));
        edges.push(ClosureEdge::new(4, 3, 1));
        assert!(verify_closure(&edges).is_err());
    }

    #[test]
    fn rejects_missing_self_edge() {
        let edges: Vec<_> = chain()
            .into_iter()
            .filter(|edge| !(edge.ancestor == 3 && edge.descendant == 3))
            .collect();
        assert!(verify_closure(&edges).is_err());
    }

    #[test]
    fn rejects_parent_cycle() {
        let edges = vec![
            ClosureEdge::new(1, 1, 0),
            ClosureEdge::new(2, 2, 0),
            ClosureEdge::new(1, 2, 1),
            ClosureEdge::new(2, 1, 1),
        ];
        assert!(verify_closure(&edges).is_err());
    }

    #[test]
    fn parent_links_follow_distance_one() {
        let links = parent_links(&chain());
        assert_eq!(links.get(&3), Some(&2));
        assert_eq!(links.get(&2), Some(&1));
        assert_eq!(links.get(&1), None);
    }
}
