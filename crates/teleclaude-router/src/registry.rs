//! Adapter registry.

use std::sync::Arc;

use teleclaude_adapters::Adapter;

/// Registered adapters in registration order.
///
/// Order matters: peer discovery deduplicates first-registered-wins.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter. Re-registering a name replaces it in place.
    pub fn register(&mut self, adapter: Arc<dyn Adapter>) {
        if let Some(slot) = self
            .adapters
            .iter_mut()
            .find(|a| a.name() == adapter.name())
        {
            tracing::warn!(adapter = %adapter.name(), "Replacing registered adapter");
            *slot = adapter;
        } else {
            self.adapters.push(adapter);
        }
    }

    /// Get an adapter by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Adapter>> {
        self.adapters.iter().find(|a| a.name() == name)
    }

    /// Get an adapter by name if it has a UI.
    #[must_use]
    pub fn get_ui(&self, name: &str) -> Option<&Arc<dyn Adapter>> {
        self.get(name).filter(|a| a.capabilities().has_ui)
    }

    /// All adapters, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Adapter>> {
        self.adapters.iter()
    }

    /// UI-capable adapters other than `except`.
    pub fn ui_except<'a>(&'a self, except: &'a str) -> impl Iterator<Item = &'a Arc<dyn Adapter>> {
        self.adapters
            .iter()
            .filter(move |a| a.capabilities().has_ui && a.name() != except)
    }

    /// List adapter names.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }

    /// Number of registered adapters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Whether no adapters are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
