//! Tool Registry - the catalog of every tool the server exposes.
//!
//! The registry is filled once during startup, then wrapped in an `Arc` and
//! shared read-only with the dispatcher and the transports. Registration
//! takes `&mut self`, so nothing can be added once serving begins and
//! lookups need no locking.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::debug;

use super::descriptor::{ToolCategory, ToolDescriptor, ToolSummary};
use super::error::{ConfigError, ToolError};

// ============================================================================
// Tool Registry
// ============================================================================

/// Tool registry - owns every registered [`ToolDescriptor`].
///
/// Listings preserve registration order.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<ToolDescriptor>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a descriptor to the catalog.
    ///
    /// Fails with [`ConfigError::DuplicateName`] if the name is taken; the
    /// first registration is kept.
    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<Arc<ToolDescriptor>, ConfigError> {
        if self.index.contains_key(descriptor.name()) {
            return Err(ConfigError::DuplicateName(descriptor.name().to_string()));
        }

        debug!(
            "Registering tool {} v{} ({})",
            descriptor.name(),
            descriptor.version(),
            descriptor.category()
        );

        let descriptor = Arc::new(descriptor);
        self.index
            .insert(descriptor.name().to_string(), self.tools.len());
        self.tools.push(descriptor.clone());
        Ok(descriptor)
    }

    /// Exact, case-sensitive lookup.
    pub fn get(&self, name: &str) -> Result<&Arc<ToolDescriptor>, ToolError> {
        self.index
            .get(name)
            .map(|&i| &self.tools[i])
            .ok_or_else(|| ToolError::not_found(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Descriptors matching every given filter, in registration order.
    pub fn list(&self, category: Option<ToolCategory>, tag: Option<&str>) -> Vec<&Arc<ToolDescriptor>> {
        self.tools
            .iter()
            .filter(|t| category.is_none_or(|c| t.category() == c))
            .filter(|t| tag.is_none_or(|tag| t.has_tag(tag)))
            .collect()
    }

    /// Public metadata of the descriptors matching every given filter.
    pub fn summaries(&self, category: Option<ToolCategory>, tag: Option<&str>) -> Vec<ToolSummary> {
        self.list(category, tag)
            .into_iter()
            .map(|t| t.summary())
            .collect()
    }

    /// Tool count for every category, including empty ones.
    pub fn counts_by_category(&self) -> BTreeMap<ToolCategory, usize> {
        let mut counts: BTreeMap<_, _> = ToolCategory::ALL.iter().map(|&c| (c, 0)).collect();
        for tool in &self.tools {
            *counts.entry(tool.category()).or_default() += 1;
        }
        counts
    }

    /// Tool names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Remove a tool. Only meant for teardown and tests.
    pub fn unregister(&mut self, name: &str) -> Option<Arc<ToolDescriptor>> {
        let position = self.index.remove(name)?;
        let removed = self.tools.remove(position);
        for slot in self.index.values_mut() {
            if *slot > position {
                *slot -= 1;
            }
        }
        Some(removed)
    }

    /// Remove every tool.
    pub fn clear(&mut self) {
        self.tools.clear();
        self.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::tools::handlers::test_support::echo_binding;

    fn descriptor(name: &str, category: ToolCategory, tags: &[&str]) -> ToolDescriptor {
        let binding = echo_binding();
        ToolDescriptor::builder(name)
            .description(format!("{} tool", name))
            .category(category)
            .tags(tags.iter().copied())
            .implementation(binding.implementation)
            .input_schema(binding.input_schema)
            .output_schema(binding.output_schema)
            .build()
            .unwrap()
    }

    fn populated() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry
            .register(descriptor("search_mofs", ToolCategory::Search, &["search", "database"]))
            .unwrap();
        registry
            .register(descriptor("calculate_energy", ToolCategory::Calculation, &["energy"]))
            .unwrap();
        registry
            .register(descriptor("lookup", ToolCategory::Search, &["database"]))
            .unwrap();
        registry
    }

    #[test]
    fn test_get_returns_registered_descriptor() {
        let mut registry = ToolRegistry::new();
        let registered = registry
            .register(descriptor("search_mofs", ToolCategory::Search, &[]))
            .unwrap();
        let found = registry.get("search_mofs").unwrap();
        assert!(Arc::ptr_eq(&registered, found));
    }

    #[test]
    fn test_get_is_exact_and_case_sensitive() {
        let registry = populated();
        assert!(matches!(registry.get("SEARCH_MOFS"), Err(ToolError::NotFound(_))));
        assert!(matches!(registry.get("search"), Err(ToolError::NotFound(_))));
    }

    #[test]
    fn test_duplicate_keeps_first() {
        let mut registry = ToolRegistry::new();
        registry
            .register(descriptor("dup", ToolCategory::Search, &[]))
            .unwrap();
        let err = registry
            .register(descriptor("dup", ToolCategory::Analysis, &[]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateName(ref n) if n == "dup"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("dup").unwrap().category(), ToolCategory::Search);
    }

    #[test]
    fn test_list_preserves_registration_order() {
        let registry = populated();
        let names: Vec<_> = registry.list(None, None).iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["search_mofs", "calculate_energy", "lookup"]);
        assert_eq!(registry.names(), names);
    }

    #[test]
    fn test_list_filters_combine() {
        let registry = populated();
        assert_eq!(registry.list(Some(ToolCategory::Search), None).len(), 2);
        assert_eq!(registry.list(None, Some("database")).len(), 2);
        let both = registry.list(Some(ToolCategory::Search), Some("search"));
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].name(), "search_mofs");
        assert!(registry.list(Some(ToolCategory::Calculation), Some("database")).is_empty());
        assert!(registry.list(Some(ToolCategory::Utils), None).is_empty());
    }

    #[test]
    fn test_counts_include_empty_categories() {
        let registry = populated();
        let counts = registry.counts_by_category();
        assert_eq!(counts.len(), ToolCategory::ALL.len());
        assert_eq!(counts[&ToolCategory::Search], 2);
        assert_eq!(counts[&ToolCategory::Calculation], 1);
        assert_eq!(counts[&ToolCategory::Utils], 0);
        assert_eq!(counts.values().sum::<usize>(), registry.len());
    }

    #[test]
    fn test_unregister_reindexes() {
        let mut registry = populated();
        assert!(registry.unregister("search_mofs").is_some());
        assert!(registry.unregister("search_mofs").is_none());
        assert_eq!(registry.get("lookup").unwrap().name(), "lookup");
        assert_eq!(registry.names(), vec!["calculate_energy", "lookup"]);

        registry
            .register(descriptor("search_mofs", ToolCategory::Search, &[]))
            .unwrap();
        assert_eq!(registry.names().last(), Some(&"search_mofs"));
    }

    #[test]
    fn test_clear() {
        let mut registry = populated();
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.counts_by_category().values().all(|&c| c == 0));
    }

    #[test]
    fn test_summaries() {
        let registry = populated();
        let summaries = registry.summaries(None, Some("energy"));
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].name, "calculate_energy");
        assert_eq!(summaries[0].version, "1.0.0");
    }
}
