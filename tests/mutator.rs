mod common;

use std::collections::HashSet;

use closure_table::hierarchy::{count_edges, parent_links, verify_closure};
use closure_table::{ClosureTreeError, ClosureTreeMutator};
use common::{ancestors_of, category_config, edges, has_edge, sqlite};
use sea_orm::{DatabaseConnection, DbBackend, MockDatabase};

type TestResult = Result<(), Box<dyn std::error::Error>>;

/// 1 ─┬─ 2 ── 4 ── 5
///    └─ 3
async fn seed(db: &DatabaseConnection, mutator: &ClosureTreeMutator<'_>) -> TestResult {
    mutator.add(db, None, &1).await?;
    mutator.add(db, Some(&1), &2).await?;
    mutator.add(db, Some(&1), &3).await?;
    mutator.add(db, Some(&2), &4).await?;
    mutator.add(db, Some(&4), &5).await?;
    Ok(())
}

#[tokio::test]
async fn add_links_node_below_every_ancestor() -> TestResult {
    let db = sqlite().await?;
    let config = category_config();
    let mutator = ClosureTreeMutator::new(&config);

    mutator.add(&db, None, &1).await?;
    mutator.add(&db, Some(&1), &2).await?;
    mutator.add(&db, Some(&2), &3).await?;
    mutator.add(&db, Some(&2), &4).await?;

    let edges = edges(&db, &config).await?;
    verify_closure(&edges)?;
    assert_eq!(ancestors_of(&edges, 4), vec![(2, 1), (1, 2)]);
    assert_eq!(parent_links(&edges).get(&4), Some(&2));
    // The sibling's link is untouched.
    assert!(edges.iter().any(|e| (e.ancestor, e.descendant, e.generations) == (2, 3, 1)));
    assert_eq!(edges.len(), 4 + 3 + 2);
    Ok(())
}

#[tokio::test]
async fn add_rejects_unknown_parent_and_existing_node() -> TestResult {
    let db = sqlite().await?;
    let config = category_config();
    let mutator = ClosureTreeMutator::new(&config);
    mutator.add(&db, None, &1).await?;
    let before = count_edges(&db, config.hierarchy()).await?;

    let missing = mutator.add(&db, Some(&42), &2).await;
    assert!(matches!(missing, Err(ClosureTreeError::NotFound(_))));

    let duplicate = mutator.add(&db, None, &1).await;
    assert!(matches!(duplicate, Err(ClosureTreeError::InvalidArgument(_))));

    assert_eq!(count_edges(&db, config.hierarchy()).await?, before);
    assert!(!mutator.contains(&db, &2).await?);
    Ok(())
}

#[tokio::test]
async fn move_rewrites_edges_of_whole_subtree() -> TestResult {
    let db = sqlite().await?;
    let config = category_config();
    let mutator = ClosureTreeMutator::new(&config);
    seed(&db, &mutator).await?;

    mutator.move_subtree(&db, Some(&3), &4).await?;

    let edges = edges(&db, &config).await?;
    verify_closure(&edges)?;
    assert_eq!(parent_links(&edges).get(&4), Some(&3));
    assert_eq!(ancestors_of(&edges, 4), vec![(3, 1), (1, 2)]);
    assert_eq!(ancestors_of(&edges, 5), vec![(4, 1), (3, 2), (1, 3)]);
    assert!(!has_edge(&edges, 2, 4));
    assert!(!has_edge(&edges, 2, 5));
    Ok(())
}

#[tokio::test]
async fn move_without_parent_makes_a_root() -> TestResult {
    let db = sqlite().await?;
    let config = category_config();
    let mutator = ClosureTreeMutator::new(&config);
    seed(&db, &mutator).await?;

    mutator.move_subtree::<i32, _>(&db, None, &4).await?;

    let edges = edges(&db, &config).await?;
    verify_closure(&edges)?;
    assert!(ancestors_of(&edges, 4).is_empty());
    assert_eq!(ancestors_of(&edges, 5), vec![(4, 1)]);
    assert_eq!(mutator.subtree(&db, &4).await?, vec![4, 5]);
    Ok(())
}

#[tokio::test]
async fn move_into_own_subtree_is_a_cycle() -> TestResult {
    let db = sqlite().await?;
    let config = category_config();
    let mutator = ClosureTreeMutator::new(&config);
    seed(&db, &mutator).await?;
    let before: HashSet<_> = edges(&db, &config).await?.into_iter().collect();

    for target in [5, 4] {
        let result = mutator.move_subtree(&db, Some(&target), &4).await;
        assert!(
            matches!(result, Err(ClosureTreeError::Cycle { .. })),
            "moving 4 under {target} returned {result:?}"
        );
    }
    let unknown = mutator.move_subtree(&db, Some(&99), &4).await;
    assert!(matches!(unknown, Err(ClosureTreeError::NotFound(_))));

    let after: HashSet<_> = edges(&db, &config).await?.into_iter().collect();
    assert_eq!(after, before);
    Ok(())
}

#[tokio::test]
async fn remove_returns_subtree_and_drops_its_edges() -> TestResult {
    let db = sqlite().await?;
    let config = category_config();
    let mutator = ClosureTreeMutator::new(&config);
    seed(&db, &mutator).await?;

    let removed = mutator.remove(&db, &2).await?;
    assert_eq!(removed, HashSet::from([2, 4, 5]));

    let edges = edges(&db, &config).await?;
    verify_closure(&edges)?;
    assert!(edges.iter().all(|edge| !removed.contains(&edge.descendant)));
    assert_eq!(edges.len(), 3);

    let again = mutator.remove(&db, &2).await;
    assert!(matches!(again, Err(ClosureTreeError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn invariants_hold_across_mixed_operations() -> TestResult {
    let db = sqlite().await?;
    let config = category_config();
    let mutator = ClosureTreeMutator::new(&config);

    for id in 1..=3 {
        mutator.add(&db, None, &id).await?;
    }
    for id in 4..=20 {
        let parent = id / 2;
        mutator.add(&db, Some(&parent), &id).await?;
    }
    verify_closure(&edges(&db, &config).await?)?;

    let moves: [(Option<i32>, i32); 5] = [
        (Some(3), 4),
        (Some(19), 5),
        (None, 8),
        (Some(1), 3),
        (Some(16), 10),
    ];
    for (parent, node) in moves {
        mutator.move_subtree(&db, parent.as_ref(), &node).await?;
        verify_closure(&edges(&db, &config).await?)?;
    }

    mutator.remove(&db, &4).await?;
    verify_closure(&edges(&db, &config).await?)?;
    mutator.add(&db, Some(&1), &4).await?;

    let edges = edges(&db, &config).await?;
    verify_closure(&edges)?;
    assert_eq!(parent_links(&edges).get(&4), Some(&1));
    Ok(())
}

#[tokio::test]
async fn unsupported_backend_is_rejected_before_any_statement() {
    let db = MockDatabase::new(DbBackend::MySql).into_connection();
    let config = category_config();
    let mutator = ClosureTreeMutator::new(&config);

    let result = mutator.add(&db, None, &1).await;
    assert!(matches!(result, Err(ClosureTreeError::UnsupportedBackend)));
    assert!(db.into_transaction_log().is_empty());
}
