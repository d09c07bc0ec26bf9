use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, EntityTrait, FromQueryResult, IntoActiveModel,
};

use crate::config::ClosureTreeConfig;
use crate::hierarchy::NodeId;

/// Trait implemented by SeaORM `Model` types that participate in a closure table.
///
/// Implementations are normally provided by the `#[derive(ClosureTreeModel)]` macro.
pub trait ClosureTreeModel:
    Clone + Send + Sync + 'static + IntoActiveModel<Self::ActiveModel> + FromQueryResult
{
    type Entity: EntityTrait<Model = Self>;
    type ActiveModel: ActiveModelTrait<Entity = Self::Entity> + ActiveModelBehavior + Send;
    type Id: NodeId;

    fn closure_tree_config() -> &'static ClosureTreeConfig;

    fn id(&self) -> Self::Id;
    fn parent_id(&self) -> Option<Self::Id>;
    fn set_parent(active: &mut Self::ActiveModel, parent: Option<Self::Id>);

    fn name(&self) -> &str;
    fn set_name(active: &mut Self::ActiveModel, name: &str);

    fn parent_column() -> <Self::Entity as EntityTrait>::Column;
    fn id_column() -> <Self::Entity as EntityTrait>::Column;
    fn name_column() -> <Self::Entity as EntityTrait>::Column;
}
