//! Ancestry predicates expressed as a join against the closure table.
//!
//! A predicate never runs on its own: [`AncestryQueryBuilder::apply`] adds an
//! inner join plus where-clauses to an existing SeaORM select, so it composes
//! with whatever filters the caller already attached.

use std::fmt;

use sea_orm::sea_query::{Alias, Expr, JoinType, Order, SelectStatement, SimpleExpr};
use sea_orm::{EntityName, IdenStatic, QueryTrait, Value};

use crate::error::ClosureTreeError;
use crate::hierarchy::HierarchyTable;
use crate::traits::ClosureTreeModel;

/// Relationship between the filtered rows and the node named in a filter.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Ancestry {
    /// Rows that are strict ancestors of the node.
    AncestorOf,
    /// Rows that are strict descendants of the node.
    DescendantOf,
    /// The row that is the node's parent.
    ParentOf,
    /// Rows that are the node's children.
    ChildOf,
}

impl Ancestry {
    fn default_alias(self) -> &'static str {
        match self {
            Ancestry::AncestorOf => "ancestor_tree",
            Ancestry::DescendantOf => "descendant_tree",
            Ancestry::ParentOf => "parent_tree",
            Ancestry::ChildOf => "child_tree",
        }
    }
}

impl fmt::Display for Ancestry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Ancestry::AncestorOf => "ancestor-of",
            Ancestry::DescendantOf => "descendant-of",
            Ancestry::ParentOf => "parent-of",
            Ancestry::ChildOf => "child-of",
        };
        f.write_str(name)
    }
}

/// Comparison requested by a filter condition.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Comparison {
    Any,
    Equal,
    NotEqual,
    Like,
    NotLike,
    GreaterThan,
    GreaterOrEqual,
    LowerThan,
    LowerOrEqual,
    Between,
    BetweenOrEqual,
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Comparison::Any => "any",
            Comparison::Equal => "equal",
            Comparison::NotEqual => "not equal",
            Comparison::Like => "like",
            Comparison::NotLike => "not like",
            Comparison::GreaterThan => "greater than",
            Comparison::GreaterOrEqual => "greater or equal",
            Comparison::LowerThan => "lower than",
            Comparison::LowerOrEqual => "lower or equal",
            Comparison::Between => "between",
            Comparison::BetweenOrEqual => "between or equal",
        };
        f.write_str(name)
    }
}

/// One ancestry condition: "rows that are the `ancestry` of `node`".
#[derive(Clone, Debug, PartialEq)]
pub struct AncestryFilter {
    ancestry: Ancestry,
    comparison: Comparison,
    node: Value,
    alias: Option<String>,
}

impl AncestryFilter {
    pub fn new(ancestry: Ancestry, node: impl Into<Value>) -> Self {
        Self {
            ancestry,
            comparison: Comparison::Equal,
            node: node.into(),
            alias: None,
        }
    }

    pub fn ancestor_of(node: impl Into<Value>) -> Self {
        Self::new(Ancestry::AncestorOf, node)
    }

    pub fn descendant_of(node: impl Into<Value>) -> Self {
        Self::new(Ancestry::DescendantOf, node)
    }

    pub fn parent_of(node: impl Into<Value>) -> Self {
        Self::new(Ancestry::ParentOf, node)
    }

    pub fn child_of(node: impl Into<Value>) -> Self {
        Self::new(Ancestry::ChildOf, node)
    }

    /// Only [`Comparison::Equal`] is accepted when the filter is applied.
    pub fn comparison(mut self, comparison: Comparison) -> Self {
        self.comparison = comparison;
        self
    }

    /// Alias of the joined closure table; needed when one query carries two
    /// filters of the same kind.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn ancestry(&self) -> Ancestry {
        self.ancestry
    }

    pub fn node(&self) -> &Value {
        &self.node
    }
}

/// A join fragment ready to be attached to a select.
#[derive(Clone, Debug)]
pub struct AncestryJoin {
    table: Alias,
    alias: Alias,
    on: SimpleExpr,
    conditions: Vec<SimpleExpr>,
    distance: SimpleExpr,
}

impl AncestryJoin {
    /// The joined edge's distance, for ordering by depth.
    pub fn distance(&self) -> SimpleExpr {
        self.distance.clone()
    }

    pub fn attach(self, select: &mut SelectStatement) {
        select.join_as(JoinType::InnerJoin, self.table, self.alias, self.on);
        for condition in self.conditions {
            select.and_where(condition);
        }
    }
}

/// Translates ancestry filters into joins between a primary table and its
/// closure table.
#[derive(Clone, Debug)]
pub struct AncestryQueryBuilder {
    hierarchy: HierarchyTable,
    primary_table: String,
    key_column: String,
}

impl AncestryQueryBuilder {
    pub fn new(
        hierarchy: HierarchyTable,
        primary_table: impl Into<String>,
        key_column: impl Into<String>,
    ) -> Self {
        Self {
            hierarchy,
            primary_table: primary_table.into(),
            key_column: key_column.into(),
        }
    }

    /// Builder joining the model's closure table on the model's id column.
    pub fn for_model<M: ClosureTreeModel>() -> Self {
        let entity = <M::Entity as Default>::default();
        Self::new(
            M::closure_tree_config().hierarchy().clone(),
            entity.table_name(),
            M::id_column().as_str(),
        )
    }

    pub fn hierarchy(&self) -> &HierarchyTable {
        &self.hierarchy
    }

    /// Builds the join fragment for `filter` without touching any query.
    pub fn fragment(&self, filter: &AncestryFilter) -> Result<AncestryJoin, ClosureTreeError> {
        if filter.comparison != Comparison::Equal {
            return Err(ClosureTreeError::UnsupportedCondition {
                ancestry: filter.ancestry,
                comparison: filter.comparison,
            });
        }
        self.hierarchy.validate()?;

        let h = &self.hierarchy;
        let alias = Alias::new(
            filter
                .alias
                .as_deref()
                .unwrap_or_else(|| filter.ancestry.default_alias()),
        );
        let key = (
            Alias::new(self.primary_table.as_str()),
            Alias::new(self.key_column.as_str()),
        );

        // The joined row sits at one end of the edge, the filter node at the other.
        let (row_end, node_end) = match filter.ancestry {
            Ancestry::AncestorOf | Ancestry::ParentOf => (h.ancestor_iden(), h.descendant_iden()),
            Ancestry::DescendantOf | Ancestry::ChildOf => (h.descendant_iden(), h.ancestor_iden()),
        };
        let distance = Expr::col((alias.clone(), h.generations_iden()));
        let depth = match filter.ancestry {
            Ancestry::AncestorOf | Ancestry::DescendantOf => distance.clone().gt(0),
            Ancestry::ParentOf | Ancestry::ChildOf => distance.clone().eq(1),
        };

        Ok(AncestryJoin {
            table: h.table_iden(),
            on: Expr::col((alias.clone(), row_end)).equals(key),
            conditions: vec![
                Expr::col((alias.clone(), node_end)).eq(filter.node.clone()),
                depth,
            ],
            distance: distance.into(),
            alias,
        })
    }

    /// Adds the join and where-clauses for `filter` to `query`.
    pub fn apply<Q>(&self, mut query: Q, filter: &AncestryFilter) -> Result<Q, ClosureTreeError>
    where
        Q: QueryTrait<QueryStatement = SelectStatement>,
    {
        self.fragment(filter)?.attach(query.query());
        Ok(query)
    }

    /// Like [`apply`](Self::apply), also ordering by distance from the node
    /// (nearest first).
    pub fn apply_ordered<Q>(
        &self,
        mut query: Q,
        filter: &AncestryFilter,
    ) -> Result<Q, ClosureTreeError>
    where
        Q: QueryTrait<QueryStatement = SelectStatement>,
    {
        let join = self.fragment(filter)?;
        let distance = join.distance();
        let select = query.query();
        join.attach(select);
        select.order_by_expr(distance, Order::Asc);
        Ok(query)
    }
}
