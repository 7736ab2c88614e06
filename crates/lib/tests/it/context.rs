//! Test context for managing test setup and lifecycle.
//!
//! Provides a composable `TestContext` that explicitly shows what each test needs
//! while keeping the runtime alive for as long as its entities are used.

use std::sync::Arc;

use flock::{Entity, EntityOptions, Runtime, source::MemorySource};

use crate::helpers::{memory_source, setup_runtime};

/// Test context for managing Runtime and Source lifecycle.
///
/// Use the builder methods to set up what the test needs:
/// - `TestContext::new()` - creates a runtime with the test variants
/// - `.with_source().await` - adds an open in-memory source
pub struct TestContext {
    runtime: Runtime,
    source: Option<Arc<MemorySource>>,
}

impl TestContext {
    pub fn new() -> Self {
        Self {
            runtime: setup_runtime(),
            source: None,
        }
    }

    /// Add an open in-memory source, attached to every entity this context hands out.
    pub async fn with_source(mut self) -> Self {
        self.source = Some(memory_source("context").await);
        self
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Get the source.
    ///
    /// # Panics
    /// Panics if no source was added via `with_source()`.
    pub fn source(&self) -> &Arc<MemorySource> {
        self.source
            .as_ref()
            .expect("TestContext has no source - call with_source() first")
    }

    /// The entity `(kind, id)`, with the context source attached when there is one.
    pub fn entity(&self, kind: &str, id: &str) -> Entity {
        let mut options = EntityOptions::default();
        if let Some(source) = &self.source {
            options = options.source(source.clone());
        }
        self.runtime
            .entity_with(kind, id, options)
            .expect("Failed to get entity")
    }

    pub fn crow(&self, id: &str) -> Entity {
        self.entity("Crow", id)
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
