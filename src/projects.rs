//! Project registry boundary.
//!
//! The core does not own project metadata; it only needs "does this
//! project exist, and what is its canonical id" to scope label selectors.

use crate::runtime::RuntimeError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait ProjectRegistry: Send + Sync {
    /// Resolve a raw project reference to its canonical id.
    async fn resolve_project_name(&self, raw: &str) -> Result<String, RuntimeError>;
}

/// Static registry for tests and single-node installations: projects are
/// registered up front and resolved case-insensitively.
#[derive(Default)]
pub struct StaticProjectRegistry {
    projects: RwLock<HashMap<String, String>>,
}

impl StaticProjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, canonical: impl Into<String>) {
        let canonical = canonical.into();
        self.projects
            .write()
            .await
            .insert(canonical.to_lowercase(), canonical);
    }
}

#[async_trait]
impl ProjectRegistry for StaticProjectRegistry {
    async fn resolve_project_name(&self, raw: &str) -> Result<String, RuntimeError> {
        self.projects
            .read()
            .await
            .get(&raw.to_lowercase())
            .cloned()
            .ok_or_else(|| RuntimeError::not_found(format!("project {}", raw)))
    }
}
