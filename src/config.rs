use crc32fast::Hasher;
use sea_orm::IsolationLevel;

use crate::hierarchy::HierarchyTable;

/// Configuration describing how a model integrates with its closure table.
///
/// The configuration is always passed explicitly into statement building; no
/// part of the crate keeps shared mutable settings.
#[derive(Clone, Debug)]
pub struct ClosureTreeConfig {
    entity_name: String,
    hierarchy_name: String,
    parent_column: String,
    name_column: String,
    hierarchy: HierarchyTable,
    dependent_behavior: DependentBehavior,
    order_strategy: Option<OrderStrategy>,
    advisory_lock_strategy: AdvisoryLockStrategy,
    isolation_level: Option<IsolationLevel>,
}

impl ClosureTreeConfig {
    /// Create a new configuration using the logical entity and hierarchy names.
    pub fn new(entity_name: impl Into<String>, hierarchy_name: impl Into<String>) -> Self {
        let entity_name = entity_name.into();
        let hierarchy_name = hierarchy_name.into();

        let default_lock = AdvisoryLockStrategy::Namespaced(AdvisoryLockKey::derived_from(
            &entity_name,
            &hierarchy_name,
        ));
        let hierarchy = HierarchyTable::new(format!(
            "{}_hierarchies",
            entity_name.to_ascii_lowercase()
        ));

        Self {
            entity_name,
            hierarchy_name,
            parent_column: "parent_id".to_string(),
            name_column: "name".to_string(),
            hierarchy,
            dependent_behavior: DependentBehavior::default(),
            order_strategy: None,
            advisory_lock_strategy: default_lock,
            isolation_level: None,
        }
    }

    /// Merge options produced by [`ClosureTreeOptions`].
    pub(crate) fn apply_options(mut self, options: ClosureTreeOptions) -> Self {
        if let Some(parent_column) = options.parent_column {
            self.parent_column = parent_column;
        }
        if let Some(name_column) = options.name_column {
            self.name_column = name_column;
        }
        if let Some(hierarchy_table) = options.hierarchy_table {
            self.hierarchy = self.hierarchy.with_table(hierarchy_table);
        }
        if let Some(column) = options.ancestor_column {
            self.hierarchy = self.hierarchy.with_ancestor_column(column);
        }
        if let Some(column) = options.descendant_column {
            self.hierarchy = self.hierarchy.with_descendant_column(column);
        }
        if let Some(column) = options.generations_column {
            self.hierarchy = self.hierarchy.with_generations_column(column);
        }
        if let Some(behavior) = options.dependent_behavior {
            self.dependent_behavior = behavior;
        }
        if let Some(order_strategy) = options.order_strategy {
            self.order_strategy = Some(order_strategy);
        }
        if let Some(strategy) = options.advisory_lock_strategy {
            self.advisory_lock_strategy = strategy;
        }
        if let Some(level) = options.isolation_level {
            self.isolation_level = Some(level);
        }
        self
    }

    /// Human-readable Rust struct name for the base entity.
    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    /// Logical name of the hierarchy relation.
    pub fn hierarchy_name(&self) -> &str {
        &self.hierarchy_name
    }

    /// Column name storing the parent foreign key.
    pub fn parent_column(&self) -> &str {
        &self.parent_column
    }

    /// Column name storing the display name.
    pub fn name_column(&self) -> &str {
        &self.name_column
    }

    /// Table backing the closure relation.
    pub fn hierarchy_table(&self) -> &str {
        self.hierarchy.table()
    }

    /// Table and column names of the closure relation.
    pub fn hierarchy(&self) -> &HierarchyTable {
        &self.hierarchy
    }

    /// Dependent behavior when deleting nodes.
    pub fn dependent_behavior(&self) -> DependentBehavior {
        self.dependent_behavior
    }

    /// Ordering strategy to apply when returning siblings and descendants.
    pub fn order_strategy(&self) -> Option<&OrderStrategy> {
        self.order_strategy.as_ref()
    }

    /// Advisory lock strategy (PostgreSQL only).
    pub fn advisory_lock_strategy(&self) -> &AdvisoryLockStrategy {
        &self.advisory_lock_strategy
    }

    /// Isolation level requested for mutation transactions (PostgreSQL only).
    pub fn isolation_level(&self) -> Option<IsolationLevel> {
        self.isolation_level
    }
}

/// Builder-style options consumed by the derive macro and by standalone users.
#[derive(Clone, Debug, Default)]
pub struct ClosureTreeOptions {
    parent_column: Option<String>,
    name_column: Option<String>,
    hierarchy_table: Option<String>,
    ancestor_column: Option<String>,
    descendant_column: Option<String>,
    generations_column: Option<String>,
    dependent_behavior: Option<DependentBehavior>,
    order_strategy: Option<OrderStrategy>,
    advisory_lock_strategy: Option<AdvisoryLockStrategy>,
    isolation_level: Option<IsolationLevel>,
}

impl ClosureTreeOptions {
    pub fn parent_column(mut self, value: impl Into<String>) -> Self {
        self.parent_column = Some(value.into());
        self
    }

    pub fn name_column(mut self, value: impl Into<String>) -> Self {
        self.name_column = Some(value.into());
        self
    }

    pub fn hierarchy_table(mut self, value: impl Into<String>) -> Self {
        self.hierarchy_table = Some(value.into());
        self
    }

    pub fn ancestor_column(mut self, value: impl Into<String>) -> Self {
        self.ancestor_column = Some(value.into());
        self
    }

    pub fn descendant_column(mut self, value: impl Into<String>) -> Self {
        self.descendant_column = Some(value.into());
        self
    }

    pub fn generations_column(mut self, value: impl Into<String>) -> Self {
        self.generations_column = Some(value.into());
        self
    }

    pub fn dependent_behavior(mut self, behavior: DependentBehavior) -> Self {
        self.dependent_behavior = Some(behavior);
        self
    }

    pub fn order_strategy(mut self, strategy: OrderStrategy) -> Self {
        self.order_strategy = Some(strategy);
        self
    }

    pub fn advisory_lock_strategy(mut self, strategy: AdvisoryLockStrategy) -> Self {
        self.advisory_lock_strategy = Some(strategy);
        self
    }

    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }

    pub fn apply(self, base: ClosureTreeConfig) -> ClosureTreeConfig {
        base.apply_options(self)
    }
}

/// What happens to the children of a destroyed node.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DependentBehavior {
    /// Children become roots.
    Nullify,
    /// Children move up to the destroyed node's parent.
    Adopt,
    /// The whole subtree is destroyed.
    Destroy,
}

impl Default for DependentBehavior {
    fn default() -> Self {
        Self::Destroy
    }
}

/// Strategy used to generate deterministic sibling ordering.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OrderStrategy {
    Manual,
    NumericColumn { column: String },
}

impl OrderStrategy {
    pub fn numeric_column(column: impl Into<String>) -> Self {
        Self::NumericColumn {
            column: column.into(),
        }
    }
}

/// Key used for PostgreSQL advisory locks.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct AdvisoryLockKey(String);

impl AdvisoryLockKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    fn derived_from(entity: &str, hierarchy: &str) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(entity.as_bytes());
        hasher.update(b"/");
        hasher.update(hierarchy.as_bytes());
        let crc = hasher.finalize();
        Self(format!("closure-table::{entity}::{hierarchy}::{crc:x}"))
    }
}

/// Configuration describing how to acquire advisory locks.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AdvisoryLockStrategy {
    Disabled,
    Namespaced(AdvisoryLockKey),
}

impl AdvisoryLockStrategy {
    pub fn key(&self) -> Option<&AdvisoryLockKey> {
        match self {
            AdvisoryLockStrategy::Disabled => None,
            AdvisoryLockStrategy::Namespaced(key) => Some(key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_override_hierarchy_columns() {
        let config = ClosureTreeOptions::default()
            .hierarchy_table("category_tree")
            .generations_column("distance")
            .apply(ClosureTreeConfig::new("Category", "CategoryHierarchy"));

        assert_eq!(config.hierarchy_table(), "category_tree");
        assert_eq!(config.hierarchy().ancestor(), "ancestor_id");
        assert_eq!(config.hierarchy().generations(), "distance");
        assert_eq!(config.dependent_behavior(), DependentBehavior::Destroy);
    }

    #[test]
    fn derived_lock_key_is_stable() {
        let a = ClosureTreeConfig::new("Node", "NodeHierarchy");
        let b = ClosureTreeConfig::new("Node", "NodeHierarchy");
        let key = a.advisory_lock_strategy().key().map(AdvisoryLockKey::as_str);

        assert_eq!(key, b.advisory_lock_strategy().key().map(AdvisoryLockKey::as_str));
        assert!(key.is_some_and(|k| k.starts_with("closure-table::Node::NodeHierarchy::")));
    }
}
