mod common;

use closure_table::{ClosureTreeConfig, ClosureTreeOptions, ClosureTreeRepository};
use common::node;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbBackend, IsolationLevel, Statement};

/// Runs only when a PostgreSQL URL is configured; returns `None` otherwise.
async fn setup_database() -> Result<Option<DatabaseConnection>, sea_orm::DbErr> {
    let Ok(url) = std::env::var("CLOSURE_TREE_TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    else {
        return Ok(None);
    };
    if !url.starts_with("postgres") {
        return Ok(None);
    }
    common::init_tracing();

    let db = Database::connect(url).await?;
    reset_tables(&db).await?;
    Ok(Some(db))
}

async fn reset_tables(db: &DatabaseConnection) -> Result<(), sea_orm::DbErr> {
    for sql in [
        r#"
        CREATE TABLE IF NOT EXISTS nodes (
            id SERIAL PRIMARY KEY,
            parent_id INTEGER REFERENCES nodes(id) ON DELETE CASCADE,
            name TEXT NOT NULL
        );
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS node_hierarchies (
            ancestor_id INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
            descendant_id INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
            generations INTEGER NOT NULL,
            PRIMARY KEY (ancestor_id, descendant_id)
        );
        "#,
        "TRUNCATE TABLE node_hierarchies RESTART IDENTITY CASCADE;",
        "TRUNCATE TABLE nodes RESTART IDENTITY CASCADE;",
    ] {
        db.execute(Statement::from_string(DbBackend::Postgres, sql))
            .await?;
    }
    Ok(())
}

// Both cases share one database, so they run as a single test.
#[tokio::test]
async fn postgres_paths_moves_and_locks() -> Result<(), Box<dyn std::error::Error>> {
    let Some(db) = setup_database().await? else {
        return Ok(());
    };
    let repo = ClosureTreeRepository::<node::Model>::new();

    let leaf = repo
        .find_or_create_by_path(&db, &["root", "child", "leaf"])
        .await?;
    assert_eq!(leaf.name, "leaf");

    let child = repo
        .find_by_path(&db, &["root", "child"])
        .await?
        .ok_or("child node exists")?;
    let names: Vec<String> = repo
        .descendants(&db, &child)
        .await?
        .into_iter()
        .map(|node| node.name)
        .collect();
    assert_eq!(names, vec!["leaf"]);

    let other = repo.find_or_create_by_path(&db, &["other"]).await?;
    let moved = repo.reparent_model(&db, &child, Some(other.id)).await?;
    assert_eq!(moved.parent_id, Some(other.id));
    let ancestors: Vec<String> = repo
        .ancestors(&db, &leaf)
        .await?
        .into_iter()
        .map(|node| node.name)
        .collect();
    assert_eq!(ancestors, vec!["child", "other"]);
    repo.verify(&db).await?;

    // A serializable mutation transaction with the advisory lock taken.
    let config = ClosureTreeOptions::default()
        .hierarchy_table("node_hierarchies")
        .isolation_level(IsolationLevel::Serializable)
        .apply(ClosureTreeConfig::new("Node", "NodeHierarchy"));
    let mutator = closure_table::ClosureTreeMutator::new(&config);
    assert_eq!(mutator.subtree(&db, &other.id).await?.len(), 3);
    mutator.move_subtree::<i32, _>(&db, None, &child.id).await?;
    repo.verify(&db).await?;

    Ok(())
}
