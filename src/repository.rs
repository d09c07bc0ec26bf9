use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;

use sea_orm::{
    entity::prelude::*, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait,
    QueryFilter, QueryOrder, Select, TransactionTrait,
};

use sea_orm::sea_query::Expr;
use tracing::{debug, instrument};

use crate::ancestry::{AncestryFilter, AncestryQueryBuilder};
use crate::config::{ClosureTreeConfig, DependentBehavior, OrderStrategy};
use crate::error::ClosureTreeError;
use crate::hierarchy::{load_edges, verify_closure, ClosureEdge};
use crate::lock::LockedTransaction;
use crate::mutator::{ensure_supported_backend, ClosureTreeMutator};
use crate::traits::ClosureTreeModel;

/// Repository exposing the higher-level closure-table operations for a given model.
///
/// Writes keep the model's primary rows and its closure table in step inside
/// one transaction; reads go through [`AncestryQueryBuilder`] joins.
#[derive(Debug, Default)]
pub struct ClosureTreeRepository<M>
where
    M: ClosureTreeModel,
{
    _marker: PhantomData<M>,
}

impl<M> ClosureTreeRepository<M>
where
    M: ClosureTreeModel,
{
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    fn config(&self) -> &'static ClosureTreeConfig {
        M::closure_tree_config()
    }

    fn mutator(&self) -> ClosureTreeMutator<'static> {
        ClosureTreeMutator::new(self.config())
    }

    fn ancestry(&self) -> AncestryQueryBuilder {
        AncestryQueryBuilder::for_model::<M>()
    }

    fn ordered(&self, mut query: Select<M::Entity>) -> Select<M::Entity> {
        if let Some(OrderStrategy::NumericColumn { column }) = self.config().order_strategy() {
            query = query.order_by_asc(Expr::cust(column.clone()));
        }
        query.order_by_asc(M::name_column())
    }

    pub async fn parent<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
    ) -> Result<Option<M>, ClosureTreeError> {
        ensure_supported_backend(conn)?;
        let query = self
            .ancestry()
            .apply(M::Entity::find(), &AncestryFilter::parent_of(model.id()))?;
        Ok(query.one(conn).await?)
    }

    pub async fn children<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
    ) -> Result<Vec<M>, ClosureTreeError> {
        ensure_supported_backend(conn)?;
        self.children_on(conn, &model.id()).await
    }

    pub async fn roots<C: ConnectionTrait>(&self, conn: &C) -> Result<Vec<M>, ClosureTreeError> {
        ensure_supported_backend(conn)?;
        let query = M::Entity::find().filter(M::parent_column().is_null());
        Ok(self.ordered(query).all(conn).await?)
    }

    /// Strict ancestors, nearest first.
    pub async fn ancestors<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
    ) -> Result<Vec<M>, ClosureTreeError> {
        ensure_supported_backend(conn)?;
        let query = self
            .ancestry()
            .apply_ordered(M::Entity::find(), &AncestryFilter::ancestor_of(model.id()))?;
        Ok(query.all(conn).await?)
    }

    /// Strict descendants, shallowest first.
    pub async fn descendants<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
    ) -> Result<Vec<M>, ClosureTreeError> {
        ensure_supported_backend(conn)?;
        let query = self
            .ancestry()
            .apply_ordered(M::Entity::find(), &AncestryFilter::descendant_of(model.id()))?;
        Ok(self.ordered(query).all(conn).await?)
    }

    pub async fn self_and_descendants<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
    ) -> Result<Vec<M>, ClosureTreeError> {
        let mut nodes = Vec::with_capacity(1);
        nodes.push(model.clone());
        let mut descendants = self.descendants(conn, model).await?;
        nodes.append(&mut descendants);
        Ok(nodes)
    }

    pub async fn find_by_path<S: AsRef<str>, C: ConnectionTrait>(
        &self,
        conn: &C,
        segments: &[S],
    ) -> Result<Option<M>, ClosureTreeError> {
        ensure_supported_backend(conn)?;
        self.find_by_path_on(conn, segments).await
    }

    pub async fn find_or_create_by_path<S, C>(
        &self,
        conn: &C,
        segments: &[S],
    ) -> Result<M, ClosureTreeError>
    where
        S: AsRef<str>,
        C: ConnectionTrait + TransactionTrait,
    {
        ensure_supported_backend(conn)?;

        if segments.is_empty() {
            return Err(ClosureTreeError::EmptyPath);
        }

        let guard = LockedTransaction::acquire(self.config(), conn).await?;
        let result = self
            .find_or_create_by_path_on(guard.connection(), segments)
            .await;
        guard.finish(result).await
    }

    /// Inserts the primary row with its parent column set and links it into
    /// the closure table.
    #[instrument(level = "debug", skip(self, conn, active), err)]
    pub async fn create<C>(
        &self,
        conn: &C,
        parent: Option<&M::Id>,
        active: M::ActiveModel,
    ) -> Result<M, ClosureTreeError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        ensure_supported_backend(conn)?;
        let guard = LockedTransaction::acquire(self.config(), conn).await?;
        let result = self.create_on(guard.connection(), parent, active).await;
        guard.finish(result).await
    }

    /// Sets the parent of every row matching `condition` to `new_parent` and
    /// moves their subtrees along. Returns the number of rows updated.
    ///
    /// Every move is validated before the first write, so a cycle or unknown
    /// parent leaves both tables untouched.
    #[instrument(level = "debug", skip(self, conn, condition), err)]
    pub async fn reparent<C>(
        &self,
        conn: &C,
        condition: Condition,
        new_parent: Option<M::Id>,
    ) -> Result<u64, ClosureTreeError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        ensure_supported_backend(conn)?;
        let guard = LockedTransaction::acquire(self.config(), conn).await?;
        let result = self
            .reparent_on(guard.connection(), condition, new_parent)
            .await;
        guard.finish(result).await
    }

    /// Moves `model` with its subtree under `new_parent` and returns the
    /// reloaded row.
    pub async fn reparent_model<C>(
        &self,
        conn: &C,
        model: &M,
        new_parent: Option<M::Id>,
    ) -> Result<M, ClosureTreeError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let id = model.id();
        self.reparent(
            conn,
            Condition::all().add(M::id_column().eq(id.clone())),
            new_parent,
        )
        .await?;
        self.find_by_id(conn, &id)
            .await?
            .ok_or_else(|| ClosureTreeError::not_found(&id))
    }

    /// Destroys `model` according to the configured [`DependentBehavior`].
    /// Returns the number of primary rows deleted.
    #[instrument(level = "debug", skip(self, conn, model), fields(id = ?model.id()), err)]
    pub async fn destroy<C>(&self, conn: &C, model: &M) -> Result<u64, ClosureTreeError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        ensure_supported_backend(conn)?;
        let id = model.id();
        let guard = LockedTransaction::acquire(self.config(), conn).await?;
        let result: Result<u64, ClosureTreeError> = async {
            let txn = guard.connection();
            if !self.mutator().edge_exists_on(txn, &id, &id).await? {
                return Err(ClosureTreeError::not_found(&id));
            }
            self.destroy_on(txn, &id).await
        }
        .await;
        guard.finish(result).await
    }

    /// Destroys every row matching `condition`. Rows already removed as part
    /// of an earlier match's subtree are skipped.
    #[instrument(level = "debug", skip(self, conn, condition), err)]
    pub async fn destroy_where<C>(
        &self,
        conn: &C,
        condition: Condition,
    ) -> Result<u64, ClosureTreeError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        ensure_supported_backend(conn)?;
        let guard = LockedTransaction::acquire(self.config(), conn).await?;
        let result: Result<u64, ClosureTreeError> = async {
            let txn = guard.connection();
            let matches = M::Entity::find().filter(condition).all(txn).await?;
            let mut deleted = 0;
            for model in matches {
                deleted += self.destroy_on(txn, &model.id()).await?;
            }
            Ok(deleted)
        }
        .await;
        guard.finish(result).await
    }

    /// Recomputes the closure table from the parent column, breadth-first
    /// from the roots. Returns the number of nodes linked.
    #[instrument(level = "debug", skip(self, conn), err)]
    pub async fn rebuild<C>(&self, conn: &C) -> Result<usize, ClosureTreeError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        ensure_supported_backend(conn)?;
        let guard = LockedTransaction::acquire(self.config(), conn).await?;
        let result = self.rebuild_on(guard.connection()).await;
        guard.finish(result).await
    }

    /// Every edge of the model's closure table.
    pub async fn hierarchy_edges<C: ConnectionTrait>(
        &self,
        conn: &C,
    ) -> Result<Vec<ClosureEdge<M::Id>>, ClosureTreeError> {
        ensure_supported_backend(conn)?;
        load_edges(conn, self.config().hierarchy()).await
    }

    /// Checks the stored closure table against the forest invariants.
    pub async fn verify<C: ConnectionTrait>(&self, conn: &C) -> Result<(), ClosureTreeError> {
        let edges = self.hierarchy_edges(conn).await?;
        verify_closure(&edges)
    }

    async fn find_by_id<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<Option<M>, ClosureTreeError> {
        let model = M::Entity::find()
            .filter(M::id_column().eq(id.clone()))
            .one(conn)
            .await?;
        Ok(model)
    }

    async fn children_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<Vec<M>, ClosureTreeError> {
        let query = self
            .ancestry()
            .apply(M::Entity::find(), &AncestryFilter::child_of(id.clone()))?;
        Ok(self.ordered(query).all(conn).await?)
    }

    async fn create_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        parent: Option<&M::Id>,
        mut active: M::ActiveModel,
    ) -> Result<M, ClosureTreeError> {
        let mutator = self.mutator();
        if let Some(parent) = parent {
            if !mutator.edge_exists_on(conn, parent, parent).await? {
                return Err(ClosureTreeError::not_found(parent));
            }
        }

        M::set_parent(&mut active, parent.cloned());
        let model = active.insert(conn).await?;
        mutator.add_on(conn, parent, &model.id()).await?;
        Ok(model)
    }

    async fn reparent_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        condition: Condition,
        new_parent: Option<M::Id>,
    ) -> Result<u64, ClosureTreeError> {
        let mutator = self.mutator();
        let ids: Vec<M::Id> = M::Entity::find()
            .filter(condition)
            .all(conn)
            .await?
            .iter()
            .map(M::id)
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }

        for id in &ids {
            mutator.check_move_on(conn, new_parent.as_ref(), id).await?;
        }

        let mut active = <M::ActiveModel as ActiveModelTrait>::default();
        M::set_parent(&mut active, new_parent.clone());
        let updated = M::Entity::update_many()
            .set(active)
            .filter(M::id_column().is_in(ids.iter().cloned()))
            .exec(conn)
            .await?
            .rows_affected;

        for id in &ids {
            mutator.move_on(conn, new_parent.as_ref(), id).await?;
        }
        debug!(updated, "reparented rows");
        Ok(updated)
    }

    /// Returns 0 when `id` is already gone.
    async fn destroy_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<u64, ClosureTreeError> {
        let mutator = self.mutator();
        let Some(model) = self.find_by_id(conn, id).await? else {
            return Ok(0);
        };
        if !mutator.edge_exists_on(conn, id, id).await? {
            return Ok(0);
        }

        let heir = match self.config().dependent_behavior() {
            DependentBehavior::Destroy => None,
            DependentBehavior::Nullify => Some(None),
            DependentBehavior::Adopt => Some(model.parent_id()),
        };
        if let Some(new_parent) = heir {
            for child in self.children_on(conn, id).await? {
                let child_id = child.id();
                let mut active = child.into_active_model();
                M::set_parent(&mut active, new_parent.clone());
                active.update(conn).await?;
                mutator
                    .move_on(conn, new_parent.as_ref(), &child_id)
                    .await?;
            }
        }

        let removed = mutator.remove_on(conn, id).await?;
        let deleted = M::Entity::delete_many()
            .filter(M::id_column().is_in(removed.into_iter()))
            .exec(conn)
            .await?
            .rows_affected;
        debug!(?id, deleted, "destroyed node");
        Ok(deleted)
    }

    async fn rebuild_on<C: ConnectionTrait>(&self, conn: &C) -> Result<usize, ClosureTreeError> {
        let mutator = self.mutator();
        let cleared = mutator.clear_on(conn).await?;
        let models = M::Entity::find().all(conn).await?;

        let mut queue: VecDeque<(Option<M::Id>, M::Id)> = VecDeque::new();
        let mut by_parent: HashMap<M::Id, Vec<M::Id>> = HashMap::new();
        for model in &models {
            match model.parent_id() {
                None => queue.push_back((None, model.id())),
                Some(parent) => by_parent.entry(parent).or_default().push(model.id()),
            }
        }

        let mut linked = 0;
        while let Some((parent, id)) = queue.pop_front() {
            mutator.add_on(conn, parent.as_ref(), &id).await?;
            linked += 1;
            for child in by_parent.remove(&id).unwrap_or_default() {
                queue.push_back((Some(id.clone()), child));
            }
        }

        if linked != models.len() {
            return Err(ClosureTreeError::invariant(format!(
                "{} rows are unreachable from any root",
                models.len() - linked
            )));
        }
        debug!(cleared, linked, "rebuilt closure table");
        Ok(linked)
    }

    async fn find_by_path_on<S: AsRef<str>, C: ConnectionTrait>(
        &self,
        conn: &C,
        segments: &[S],
    ) -> Result<Option<M>, ClosureTreeError> {
        if segments.is_empty() {
            return Ok(None);
        }

        let mut current_parent: Option<M::Id> = None;
        let mut current: Option<M> = None;

        for segment in segments {
            let name = segment.as_ref();
            let node = self
                .find_child_by_name(conn, current_parent.as_ref(), name)
                .await?;

            match node {
                Some(model) => {
                    current_parent = Some(model.id());
                    current = Some(model);
                }
                None => return Ok(None),
            }
        }

        Ok(current)
    }

    async fn find_or_create_by_path_on<S: AsRef<str>, C: ConnectionTrait>(
        &self,
        conn: &C,
        segments: &[S],
    ) -> Result<M, ClosureTreeError> {
        let mut current_parent: Option<M::Id> = None;
        let mut current: Option<M> = None;

        for segment in segments {
            let name = segment.as_ref();
            let model = match self
                .find_child_by_name(conn, current_parent.as_ref(), name)
                .await?
            {
                Some(model) => model,
                None => {
                    let mut active = <M::ActiveModel as ActiveModelTrait>::default();
                    M::set_name(&mut active, name);
                    self.create_on(conn, current_parent.as_ref(), active)
                        .await?
                }
            };
            current_parent = Some(model.id());
            current = Some(model);
        }

        current.ok_or_else(|| ClosureTreeError::invariant("path segments produced no model"))
    }

    async fn find_child_by_name<C: ConnectionTrait>(
        &self,
        conn: &C,
        parent_id: Option<&M::Id>,
        name: &str,
    ) -> Result<Option<M>, ClosureTreeError> {
        let mut condition = Condition::all().add(M::name_column().eq(name));

        if let Some(parent_id) = parent_id {
            condition = condition.add(M::parent_column().eq(parent_id.clone()));
        } else {
            condition = condition.add(M::parent_column().is_null());
        }

        let model = M::Entity::find().filter(condition).one(conn).await?;
        Ok(model)
    }
}
