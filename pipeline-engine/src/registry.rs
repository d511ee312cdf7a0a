// Step Kind Registry
// Name -> factory mapping with disjoint step and trigger namespaces

use crate::step::{StepFactory, TriggerFactory};

use std::collections::HashMap;

/// Which namespace a kind was found in.
#[derive(Clone)]
pub enum RegistryEntry {
    Step(StepFactory),
    Trigger(TriggerFactory),
}

impl RegistryEntry {
    pub fn is_trigger(&self) -> bool {
        matches!(self, RegistryEntry::Trigger(_))
    }
}

/// Registry of installable step and trigger kinds.
///
/// Duplicate registration overwrites the prior entry; at init time that is
/// how embedders replace a built-in, at run time it would be a
/// configuration bug.
#[derive(Default)]
pub struct Registry {
    steps: HashMap<String, StepFactory>,
    triggers: HashMap<String, TriggerFactory>,
}

impl Registry {
    /// Empty registry, for embedders that install their own kinds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with every built-in step and trigger kind.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::steps::register_builtins(&mut registry);
        registry
    }

    pub fn register_step(&mut self, kind: &str, factory: StepFactory) {
        self.steps.insert(kind.to_string(), factory);
    }

    pub fn register_trigger(&mut self, kind: &str, factory: TriggerFactory) {
        self.triggers.insert(kind.to_string(), factory);
    }

    /// Look up a kind in either namespace.
    pub fn lookup(&self, kind: &str) -> Option<RegistryEntry> {
        if let Some(factory) = self.steps.get(kind) {
            return Some(RegistryEntry::Step(factory.clone()));
        }
        self.triggers
            .get(kind)
            .map(|factory| RegistryEntry::Trigger(factory.clone()))
    }

    pub fn step_kinds(&self) -> impl Iterator<Item = &str> {
        self.steps.keys().map(String::as_str)
    }

    pub fn trigger_kinds(&self) -> impl Iterator<Item = &str> {
        self.triggers.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_are_registered() {
        let registry = Registry::with_builtins();

        for kind in [
            "delay",
            "file",
            "stdout",
            "uppercase",
            "mapper",
            "if",
            "foreach",
            "http-client",
            "sqlite",
            "json",
            "plugin",
        ] {
            let entry = registry.lookup(kind);
            assert!(entry.is_some(), "kind '{kind}' missing");
            assert!(!entry.unwrap().is_trigger(), "kind '{kind}' misplaced");
        }

        let webhook = registry.lookup("webhook");
        assert!(webhook.is_some());
        assert!(webhook.unwrap().is_trigger());
    }

    #[test]
    fn test_unknown_kind() {
        let registry = Registry::with_builtins();
        assert!(registry.lookup("teleport").is_none());
    }
}
