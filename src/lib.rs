//! Closure-table hierarchies for SeaORM.
//!
//! The closure table stores every `(ancestor, descendant, generations)` pair
//! of a forest, so ancestry lookups become a single join. This crate keeps
//! that table consistent under insertion, subtree moves and removal
//! ([`ClosureTreeMutator`]), turns ancestry predicates into joins on existing
//! queries ([`AncestryQueryBuilder`]), and rebuilds nested views from flat
//! rows in memory ([`assembler`]). PostgreSQL and SQLite are supported.

pub mod ancestry;
pub mod assembler;
pub mod config;
pub mod error;
pub mod hierarchy;
pub mod lock;
pub mod mutator;
pub mod repository;
pub mod traits;

pub mod prelude {
    //! Convenient re-exports for consumers.
    pub use crate::ancestry::{Ancestry, AncestryFilter, AncestryQueryBuilder, Comparison};
    pub use crate::assembler::{Forest, Record, TreeNode};
    pub use crate::config::{
        AdvisoryLockStrategy, ClosureTreeConfig, ClosureTreeOptions, DependentBehavior,
        OrderStrategy,
    };
    pub use crate::hierarchy::{ClosureEdge, HierarchyTable, NodeId};
    pub use crate::mutator::ClosureTreeMutator;
    pub use crate::traits::ClosureTreeModel;
}

#[doc(hidden)]
pub mod __private {
    pub use once_cell;
}

pub use ancestry::{Ancestry, AncestryFilter, AncestryJoin, AncestryQueryBuilder, Comparison};
pub use closure_table_macros::ClosureTreeModel as ClosureTreeModelDerive;
#[doc(hidden)]
pub use closure_table_macros::ClosureTreeModel;
pub use config::{
    AdvisoryLockKey, AdvisoryLockStrategy, ClosureTreeConfig, ClosureTreeOptions,
    DependentBehavior, OrderStrategy,
};
pub use error::ClosureTreeError;
pub use hierarchy::{ClosureEdge, HierarchyTable, NodeId};
pub use mutator::ClosureTreeMutator;
pub use repository::ClosureTreeRepository;
pub use traits::ClosureTreeModel;
