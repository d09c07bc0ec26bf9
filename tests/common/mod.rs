#![allow(dead_code)]

use std::sync::Once;

use closure_table::hierarchy::load_edges;
use closure_table::{ClosureEdge, ClosureTreeConfig, ClosureTreeOptions};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr};
use tracing_subscriber::EnvFilter;

pub mod node {
    use closure_table::ClosureTreeModelDerive as ClosureTreeModel;
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, ClosureTreeModel)]
    #[sea_orm(table_name = "nodes")]
    #[closure_tree(hierarchy_table = "node_hierarchies")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub parent_id: Option<i32>,
        pub name: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod department {
    use closure_table::ClosureTreeModelDerive as ClosureTreeModel;
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, ClosureTreeModel)]
    #[sea_orm(table_name = "departments")]
    #[closure_tree(
        parent_field = "parent_department_id",
        name_field = "title",
        hierarchy_table = "department_tree",
        generations_column = "depth",
        order_column = "position",
        dependent = "adopt"
    )]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub parent_department_id: Option<i32>,
        pub title: String,
        pub position: i32,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod topic {
    use closure_table::ClosureTreeModelDerive as ClosureTreeModel;
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, ClosureTreeModel)]
    #[sea_orm(table_name = "topics")]
    #[closure_tree(hierarchy_table = "topic_hierarchies", dependent = "nullify")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub parent_id: Option<i32>,
        pub name: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE nodes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_id INTEGER NULL,
        name TEXT NOT NULL
    )",
    "CREATE TABLE node_hierarchies (
        ancestor_id INTEGER NOT NULL,
        descendant_id INTEGER NOT NULL,
        generations INTEGER NOT NULL,
        PRIMARY KEY (ancestor_id, descendant_id)
    )",
    "CREATE TABLE departments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_department_id INTEGER NULL,
        title TEXT NOT NULL,
        position INTEGER NOT NULL
    )",
    "CREATE TABLE department_tree (
        ancestor_id INTEGER NOT NULL,
        descendant_id INTEGER NOT NULL,
        depth INTEGER NOT NULL,
        PRIMARY KEY (ancestor_id, descendant_id)
    )",
    "CREATE TABLE topics (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_id INTEGER NULL,
        name TEXT NOT NULL
    )",
    "CREATE TABLE topic_hierarchies (
        ancestor_id INTEGER NOT NULL,
        descendant_id INTEGER NOT NULL,
        generations INTEGER NOT NULL,
        PRIMARY KEY (ancestor_id, descendant_id)
    )",
    "CREATE TABLE category_tree (
        ancestor_id INTEGER NOT NULL,
        descendant_id INTEGER NOT NULL,
        generations INTEGER NOT NULL,
        PRIMARY KEY (ancestor_id, descendant_id)
    )",
];

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A fresh in-memory SQLite database with every test table created.
///
/// The pool is capped at one connection so every statement sees the same
/// in-memory database.
pub async fn sqlite() -> Result<DatabaseConnection, DbErr> {
    init_tracing();

    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await?;

    for statement in SCHEMA {
        db.execute_unprepared(statement).await?;
    }
    Ok(db)
}

/// Config for driving the mutator directly, without a primary table.
pub fn category_config() -> ClosureTreeConfig {
    ClosureTreeOptions::default()
        .hierarchy_table("category_tree")
        .apply(ClosureTreeConfig::new("Category", "CategoryHierarchy"))
}

pub async fn edges(
    db: &DatabaseConnection,
    config: &ClosureTreeConfig,
) -> Result<Vec<ClosureEdge<i32>>, closure_table::ClosureTreeError> {
    load_edges(db, config.hierarchy()).await
}

/// Strict ancestors of `node` as `(ancestor, distance)`, nearest first.
pub fn ancestors_of(edges: &[ClosureEdge<i32>], node: i32) -> Vec<(i32, i32)> {
    let mut found: Vec<(i32, i32)> = edges
        .iter()
        .filter(|edge| edge.descendant == node && edge.generations > 0)
        .map(|edge| (edge.ancestor, edge.generations))
        .collect();
    found.sort_by_key(|&(_, generations)| generations);
    found
}

pub fn has_edge(edges: &[ClosureEdge<i32>], ancestor: i32, descendant: i32) -> bool {
    edges
        .iter()
        .any(|edge| edge.ancestor == ancestor && edge.descendant == descendant)
}
