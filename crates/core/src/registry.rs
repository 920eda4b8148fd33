//! Capability registry: name-keyed dispatch table, built once at startup
//! and read-only afterwards.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::{GenerationError, RegistryError};
use crate::generation::GenerationClient;
use crate::retrieval::Retriever;

/// The handler-less view of a capability, handed to `decide` so the
/// description can bias classification. The description is never executed.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilitySpec {
    pub name: String,
    pub description: String,
    /// Expected shape of the single free-text argument.
    pub argument_contract: String,
}

/// Text produced by a capability plus context values for the workflow to
/// merge. Handlers return new context entries instead of mutating the
/// conversation state.
#[derive(Debug, Clone, Default)]
pub struct CapabilityOutput {
    pub text: String,
    pub context: BTreeMap<String, Value>,
}

impl CapabilityOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), context: BTreeMap::new() }
    }
}

/// A capability invocation: a pure async function of the argument and the
/// two adapters. Handlers never touch `ConversationState`; the dispatch
/// workflow performs all state mutation.
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    async fn invoke(
        &self,
        argument: &str,
        retriever: &dyn Retriever,
        generation: &dyn GenerationClient,
    ) -> Result<CapabilityOutput, GenerationError>;
}

#[derive(Clone)]
pub struct CapabilityDescriptor {
    spec: CapabilitySpec,
    handler: Arc<dyn CapabilityHandler>,
}

impl std::fmt::Debug for CapabilityDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityDescriptor")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

impl CapabilityDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        argument_contract: impl Into<String>,
        handler: Arc<dyn CapabilityHandler>,
    ) -> Self {
        Self {
            spec: CapabilitySpec {
                name: name.into(),
                description: description.into(),
                argument_contract: argument_contract.into(),
            },
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &CapabilitySpec {
        &self.spec
    }

    pub fn handler(&self) -> &dyn CapabilityHandler {
        self.handler.as_ref()
    }
}

/// Process-wide, read-only after initialization.
#[derive(Default, Clone)]
pub struct CapabilityRegistry {
    entries: HashMap<String, CapabilityDescriptor>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: CapabilityDescriptor) -> Result<(), RegistryError> {
        let name = descriptor.name().to_string();
        if self.entries.contains_key(&name) {
            return Err(RegistryError::DuplicateCapability(name));
        }
        self.entries.insert(name, descriptor);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<&CapabilityDescriptor, RegistryError> {
        self.entries
            .get(name)
            .ok_or_else(|| RegistryError::UnknownCapability(name.to_string()))
    }

    /// Specs for the classification call, in stable name order.
    pub fn specs(&self) -> Vec<CapabilitySpec> {
        let mut specs: Vec<CapabilitySpec> =
            self.entries.values().map(|d| d.spec.clone()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    #[async_trait]
    impl CapabilityHandler for NoopHandler {
        async fn invoke(
            &self,
            argument: &str,
            _retriever: &dyn Retriever,
            _generation: &dyn GenerationClient,
        ) -> Result<CapabilityOutput, GenerationError> {
            Ok(CapabilityOutput::text(format!("noop:{argument}")))
        }
    }

    fn descriptor(name: &str) -> CapabilityDescriptor {
        CapabilityDescriptor::new(name, "test capability", "free text", Arc::new(NoopHandler))
    }

    #[test]
    fn register_rejects_duplicate_names() {
        let mut registry = CapabilityRegistry::new();
        registry.register(descriptor("lookup")).unwrap();

        let err = registry.register(descriptor("lookup")).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateCapability("lookup".to_string()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn resolve_unknown_name_fails() {
        let registry = CapabilityRegistry::new();
        let err = registry.resolve("nonexistent").unwrap_err();
        assert_eq!(err, RegistryError::UnknownCapability("nonexistent".to_string()));
    }

    #[test]
    fn specs_are_sorted_by_name() {
        let mut registry = CapabilityRegistry::new();
        registry.register(descriptor("quiz")).unwrap();
        registry.register(descriptor("lookup")).unwrap();
        registry.register(descriptor("topic-list")).unwrap();

        let specs = registry.specs();
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["lookup", "quiz", "topic-list"]);
    }
}
