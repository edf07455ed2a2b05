//! # Environment Sync
//!
//! Compares the current versions of two environments of the same
//! architecture. Read-only: the engine never mutates a store's version.
//!
//! Orientation is always `source -> target`: `Added` means the entry exists
//! in the target and not in the source.

use crate::backend::EnvironmentBackend;
use crate::diff::{DiffView, TopologyDiff};
use crate::types::ArchsyncError;
use std::sync::Arc;

/// Diff and in-sync checks between environments.
#[derive(Debug)]
pub struct SyncEngine<B> {
    backend: Arc<B>,
}

impl<B> Clone for SyncEngine<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<B: EnvironmentBackend> SyncEngine<B> {
    #[must_use]
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Diff from `source`'s current version to `target`'s current version.
    ///
    /// A payload whose statuses disagree with its property maps is rejected
    /// as a transport error.
    pub async fn diff(
        &self,
        architecture_id: &str,
        source: &str,
        target: &str,
    ) -> Result<TopologyDiff, ArchsyncError> {
        let diff = self.backend.diff(architecture_id, source, target).await?;
        diff.validate()?;
        tracing::debug!(
            "Diff {}: {} -> {} has {} entries",
            architecture_id,
            source,
            target,
            diff.len()
        );
        Ok(diff)
    }

    /// Whether the two environments' current versions are equivalent.
    pub async fn in_sync(
        &self,
        architecture_id: &str,
        source: &str,
        target: &str,
    ) -> Result<bool, ArchsyncError> {
        self.backend.in_sync(architecture_id, source, target).await
    }

    /// The diff prepared for display.
    pub async fn diff_view(
        &self,
        architecture_id: &str,
        source: &str,
        target: &str,
    ) -> Result<DiffView, ArchsyncError> {
        let diff = self.diff(architecture_id, source, target).await?;
        Ok(diff.view(source, target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::EnvironmentKey;
    use crate::diff::DiffStatus;
    use crate::memory::InMemoryBackend;
    use crate::types::{Resource, TopologyId};

    fn engine() -> SyncEngine<InMemoryBackend> {
        let backend = Arc::new(InMemoryBackend::new());
        let bucket = Resource::new(TopologyId::new("aws", "s3", "assets"));
        backend
            .create_environment(&EnvironmentKey::new("arch", "dev"), vec![bucket], vec![])
            .expect("dev");
        backend
            .create_environment(&EnvironmentKey::new("arch", "prod"), vec![], vec![])
            .expect("prod");
        SyncEngine::new(backend)
    }

    #[tokio::test]
    async fn resource_only_in_target_is_added() {
        let engine = engine();
        let diff = engine.diff("arch", "prod", "dev").await.expect("diff");
        assert_eq!(diff.resources["aws:s3:assets"].status, DiffStatus::Added);
        assert!(!engine.in_sync("arch", "prod", "dev").await.expect("insync"));
    }

    #[tokio::test]
    async fn environment_is_in_sync_with_itself() {
        let engine = engine();
        assert!(engine.in_sync("arch", "dev", "dev").await.expect("insync"));
    }

    #[tokio::test]
    async fn view_badges_name_the_target() {
        let engine = engine();
        let view = engine.diff_view("arch", "dev", "prod").await.expect("view");
        let row = view.rows().next().expect("row");
        assert_eq!(row.badge.as_deref(), Some("missing from prod"));
    }
}
