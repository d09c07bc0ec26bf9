//! Set-based maintenance of the closure relation.
//!
//! Each public operation validates its arguments with reads first, then issues
//! its writes inside one [`LockedTransaction`]. Nothing is cached between
//! calls: ancestry is always re-derived from the rows currently stored.

use std::collections::HashSet;

use sea_orm::sea_query::{
    Alias, Expr, Order, OrderedStatement, Query, SelectStatement, UnionType,
};
use sea_orm::{ConnectionTrait, DbBackend, TransactionTrait};
use tracing::{debug, instrument};

use crate::config::ClosureTreeConfig;
use crate::error::ClosureTreeError;
use crate::hierarchy::{HierarchyTable, NodeId};
use crate::lock::LockedTransaction;

pub(crate) fn ensure_supported_backend(
    conn: &impl ConnectionTrait,
) -> Result<(), ClosureTreeError> {
    match conn.get_database_backend() {
        DbBackend::Postgres | DbBackend::Sqlite => Ok(()),
        _ => Err(ClosureTreeError::UnsupportedBackend),
    }
}

/// Applies `add`, `move` and `remove` to a closure table.
#[derive(Clone, Copy, Debug)]
pub struct ClosureTreeMutator<'a> {
    config: &'a ClosureTreeConfig,
}

impl<'a> ClosureTreeMutator<'a> {
    pub fn new(config: &'a ClosureTreeConfig) -> Self {
        Self { config }
    }

    pub fn hierarchy(&self) -> &'a HierarchyTable {
        self.config.hierarchy()
    }

    /// Inserts `node` below `parent`, or as a root when `parent` is `None`.
    ///
    /// Fails with [`ClosureTreeError::NotFound`] when `parent` has no self-edge.
    #[instrument(level = "debug", skip(self, conn), err)]
    pub async fn add<I, C>(
        &self,
        conn: &C,
        parent: Option<&I>,
        node: &I,
    ) -> Result<(), ClosureTreeError>
    where
        I: NodeId,
        C: ConnectionTrait + TransactionTrait,
    {
        self.prepare(conn)?;
        let guard = LockedTransaction::acquire(self.config, conn).await?;
        let result = self.add_on(guard.connection(), parent, node).await;
        guard.finish(result).await
    }

    /// Re-parents `node` and its whole subtree under `new_parent`; `None`
    /// turns `node` into a root.
    ///
    /// Fails with [`ClosureTreeError::Cycle`] when `new_parent` is `node` or
    /// one of its descendants.
    #[instrument(level = "debug", skip(self, conn), err)]
    pub async fn move_subtree<I, C>(
        &self,
        conn: &C,
        new_parent: Option<&I>,
        node: &I,
    ) -> Result<(), ClosureTreeError>
    where
        I: NodeId,
        C: ConnectionTrait + TransactionTrait,
    {
        self.prepare(conn)?;
        let guard = LockedTransaction::acquire(self.config, conn).await?;
        let result = self.move_on(guard.connection(), new_parent, node).await;
        guard.finish(result).await
    }

    /// Deletes every edge whose descendant lies in the subtree of `node`.
    ///
    /// Returns the ids of that subtree, `node` included, so the caller can
    /// delete the matching primary rows.
    #[instrument(level = "debug", skip(self, conn), err)]
    pub async fn remove<I, C>(&self, conn: &C, node: &I) -> Result<HashSet<I>, ClosureTreeError>
    where
        I: NodeId,
        C: ConnectionTrait + TransactionTrait,
    {
        self.prepare(conn)?;
        let guard = LockedTransaction::acquire(self.config, conn).await?;
        let result = self.remove_on(guard.connection(), node).await;
        guard.finish(result).await
    }

    /// Whether `node` has its self-edge.
    pub async fn contains<I, C>(&self, conn: &C, node: &I) -> Result<bool, ClosureTreeError>
    where
        I: NodeId,
        C: ConnectionTrait,
    {
        self.prepare(conn)?;
        self.edge_exists_on(conn, node, node).await
    }

    /// `node` followed by all of its descendants, shallowest first.
    pub async fn subtree<I, C>(&self, conn: &C, node: &I) -> Result<Vec<I>, ClosureTreeError>
    where
        I: NodeId,
        C: ConnectionTrait,
    {
        self.prepare(conn)?;
        self.subtree_on(conn, node).await
    }

    fn prepare(&self, conn: &impl ConnectionTrait) -> Result<(), ClosureTreeError> {
        ensure_supported_backend(conn)?;
        self.hierarchy().validate()
    }

    pub(crate) async fn add_on<I, C>(
        &self,
        conn: &C,
        parent: Option<&I>,
        node: &I,
    ) -> Result<(), ClosureTreeError>
    where
        I: NodeId,
        C: ConnectionTrait,
    {
        let h = self.hierarchy();

        if self.edge_exists_on(conn, node, node).await? {
            return Err(ClosureTreeError::invalid_argument(format!(
                "node {node:?} is already part of the hierarchy"
            )));
        }

        if let Some(parent) = parent {
            if !self.edge_exists_on(conn, parent, parent).await? {
                return Err(ClosureTreeError::not_found(parent));
            }
        }

        // One insert-from-select: the ancestors of the parent (the parent
        // included) gain the node one generation further down, plus the
        // node's own self-edge.
        let rows = match parent {
            Some(parent) => {
                let mut rows = Query::select()
                    .column(h.ancestor_iden())
                    .expr(Expr::val(node.clone()))
                    .expr(Expr::col(h.generations_iden()).add(1))
                    .from(h.table_iden())
                    .and_where(Expr::col(h.descendant_iden()).eq(parent.clone()))
                    .to_owned();
                rows.union(UnionType::All, self_edge(node));
                rows
            }
            None => self_edge(node),
        };
        let insert = Query::insert()
            .into_table(h.table_iden())
            .columns([h.ancestor_iden(), h.descendant_iden(), h.generations_iden()])
            .select_from(rows)?
            .to_owned();
        let inserted = conn
            .execute(conn.get_database_backend().build(&insert))
            .await?
            .rows_affected();

        debug!(?node, ?parent, inserted, "added node to hierarchy");
        Ok(())
    }

    /// Argument checks for a move; performs no writes.
    pub(crate) async fn check_move_on<I, C>(
        &self,
        conn: &C,
        new_parent: Option<&I>,
        node: &I,
    ) -> Result<(), ClosureTreeError>
    where
        I: NodeId,
        C: ConnectionTrait,
    {
        if !self.edge_exists_on(conn, node, node).await? {
            return Err(ClosureTreeError::not_found(node));
        }
        if let Some(parent) = new_parent {
            if parent == node || self.edge_exists_on(conn, node, parent).await? {
                return Err(ClosureTreeError::cycle(node, parent));
            }
            if !self.edge_exists_on(conn, parent, parent).await? {
                return Err(ClosureTreeError::not_found(parent));
            }
        }
        Ok(())
    }

    pub(crate) async fn move_on<I, C>(
        &self,
        conn: &C,
        new_parent: Option<&I>,
        node: &I,
    ) -> Result<(), ClosureTreeError>
    where
        I: NodeId,
        C: ConnectionTrait,
    {
        self.check_move_on(conn, new_parent, node).await?;

        let h = self.hierarchy();
        let backend = conn.get_database_backend();

        // Detach: drop edges from ancestors outside the subtree into the
        // subtree. Edges among subtree members stay untouched.
        let detach = Query::delete()
            .from_table(h.table_iden())
            .and_where(Expr::col(h.descendant_iden()).in_subquery(self.subtree_select(node)))
            .and_where(Expr::col(h.ancestor_iden()).not_in_subquery(self.subtree_select(node)))
            .to_owned();
        let detached = conn.execute(backend.build(&detach)).await?.rows_affected();

        let Some(parent) = new_parent else {
            debug!(?node, detached, "moved subtree to root");
            return Ok(());
        };

        // Attach: cross every ancestor of the new parent with every subtree
        // member, summing both distances plus the new parent link.
        let supertree = Alias::new("supertree");
        let subtree = Alias::new("subtree");
        let rows = Query::select()
            .expr(Expr::col((supertree.clone(), h.ancestor_iden())))
            .expr(Expr::col((subtree.clone(), h.descendant_iden())))
            .expr(
                Expr::col((supertree.clone(), h.generations_iden()))
                    .add(Expr::col((subtree.clone(), h.generations_iden())))
                    .add(1),
            )
            .from_as(h.table_iden(), supertree.clone())
            .from_as(h.table_iden(), subtree.clone())
            .and_where(Expr::col((supertree, h.descendant_iden())).eq(parent.clone()))
            .and_where(Expr::col((subtree, h.ancestor_iden())).eq(node.clone()))
            .to_owned();
        let attach = Query::insert()
            .into_table(h.table_iden())
            .columns([h.ancestor_iden(), h.descendant_iden(), h.generations_iden()])
            .select_from(rows)?
            .to_owned();
        let attached = conn.execute(backend.build(&attach)).await?.rows_affected();

        debug!(?node, ?parent, detached, attached, "moved subtree");
        Ok(())
    }

    pub(crate) async fn remove_on<I, C>(
        &self,
        conn: &C,
        node: &I,
    ) -> Result<HashSet<I>, ClosureTreeError>
    where
        I: NodeId,
        C: ConnectionTrait,
    {
        let removed: HashSet<I> = self.subtree_on(conn, node).await?.into_iter().collect();
        if removed.is_empty() {
            return Err(ClosureTreeError::not_found(node));
        }

        let h = self.hierarchy();
        let delete = Query::delete()
            .from_table(h.table_iden())
            .and_where(Expr::col(h.descendant_iden()).in_subquery(self.subtree_select(node)))
            .to_owned();
        let deleted = conn
            .execute(conn.get_database_backend().build(&delete))
            .await?
            .rows_affected();

        debug!(?node, nodes = removed.len(), edges = deleted, "removed subtree");
        Ok(removed)
    }

    /// Deletes every edge of the relation.
    pub(crate) async fn clear_on<C>(&self, conn: &C) -> Result<u64, ClosureTreeError>
    where
        C: ConnectionTrait,
    {
        let delete = Query::delete()
            .from_table(self.hierarchy().table_iden())
            .to_owned();
        let deleted = conn
            .execute(conn.get_database_backend().build(&delete))
            .await?
            .rows_affected();
        Ok(deleted)
    }

    pub(crate) async fn subtree_on<I, C>(
        &self,
        conn: &C,
        node: &I,
    ) -> Result<Vec<I>, ClosureTreeError>
    where
        I: NodeId,
        C: ConnectionTrait,
    {
        let h = self.hierarchy();
        let select = self
            .subtree_select(node)
            .order_by(h.generations_iden(), Order::Asc)
            .to_owned();
        let rows = conn
            .query_all(conn.get_database_backend().build(&select))
            .await?;

        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            ids.push(row.try_get::<I>("", h.descendant())?);
        }
        Ok(ids)
    }

    pub(crate) async fn edge_exists_on<I, C>(
        &self,
        conn: &C,
        ancestor: &I,
        descendant: &I,
    ) -> Result<bool, ClosureTreeError>
    where
        I: NodeId,
        C: ConnectionTrait,
    {
        let h = self.hierarchy();
        let select = Query::select()
            .column(h.generations_iden())
            .from(h.table_iden())
            .and_where(Expr::col(h.ancestor_iden()).eq(ancestor.clone()))
            .and_where(Expr::col(h.descendant_iden()).eq(descendant.clone()))
            .to_owned();
        let row = conn
            .query_one(conn.get_database_backend().build(&select))
            .await?;
        Ok(row.is_some())
    }

    fn subtree_select<I: NodeId>(&self, node: &I) -> SelectStatement {
        let h = self.hierarchy();
        Query::select()
            .column(h.descendant_iden())
            .from(h.table_iden())
            .and_where(Expr::col(h.ancestor_iden()).eq(node.clone()))
            .to_owned()
    }
}

fn self_edge<I: NodeId>(node: &I) -> SelectStatement {
    Query::select()
        .expr(Expr::val(node.clone()))
        .expr(Expr::val(node.clone()))
        .expr(Expr::val(0))
        .to_owned()
}
