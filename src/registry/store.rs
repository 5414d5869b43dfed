//! Source registry implementation
//!
//! The process-wide map from stream identity to [`Source`]. It is created
//! with the server and handed to every connection explicitly.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::config::RegistryConfig;
use super::entry::Source;
use super::frame::StreamIdentity;

/// Registry of live sources
///
/// Thread-safe via `RwLock`. Lookups of existing sources only take the read
/// lock; creation and removal serialize on the write lock.
#[derive(Debug)]
pub struct SourceRegistry {
    sources: RwLock<HashMap<StreamIdentity, Arc<Source>>>,
    config: RegistryConfig,
}

impl SourceRegistry {
    /// Create a new registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            sources: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Look up the source for `identity`, creating it on first reference
    ///
    /// Concurrent callers for the same identity always receive the same
    /// instance.
    pub async fn fetch_or_create(&self, identity: &StreamIdentity) -> Arc<Source> {
        if let Some(source) = self.sources.read().await.get(identity) {
            return Arc::clone(source);
        }

        let mut sources = self.sources.write().await;
        // Another task may have won the race between the two locks
        let source = sources.entry(identity.clone()).or_insert_with(|| {
            tracing::info!(stream = %identity, "Source created");
            Arc::new(Source::new(identity.clone(), self.config.clone()))
        });
        Arc::clone(source)
    }

    /// Look up an existing source
    pub async fn fetch(&self, identity: &StreamIdentity) -> Option<Arc<Source>> {
        self.sources.read().await.get(identity).cloned()
    }

    /// Unregister `source` if it has no publisher and no consumers
    ///
    /// Returns true when the source was removed. A removed source is
    /// retired: later publish or play attempts on a stale handle fail with
    /// [`RegistryError::SourceRetired`](super::RegistryError::SourceRetired).
    pub async fn remove_source(&self, source: &Arc<Source>) -> bool {
        let mut sources = self.sources.write().await;
        let registered = sources
            .get(source.identity())
            .is_some_and(|current| Arc::ptr_eq(current, source));
        if !registered || !source.retire_if_idle().await {
            return false;
        }

        sources.remove(source.identity());
        tracing::info!(stream = %source.identity(), "Source removed");
        true
    }

    /// Number of registered sources
    pub async fn source_count(&self) -> usize {
        self.sources.read().await.len()
    }

    /// Retire every source and release all consumers
    pub async fn shutdown(&self) {
        let drained: Vec<Arc<Source>> = self.sources.write().await.drain().map(|(_, s)| s).collect();
        for source in &drained {
            source.retire().await;
        }
        if !drained.is_empty() {
            tracing::info!(sources = drained.len(), "Registry shut down");
        }
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::registry::RegistryError;

    fn identity(stream: &str) -> StreamIdentity {
        StreamIdentity::new("__defaultVhost__", "live", stream)
    }

    #[tokio::test]
    async fn test_fetch_or_create_same_instance() {
        let registry = SourceRegistry::new();
        let a = registry.fetch_or_create(&identity("s1")).await;
        let b = registry.fetch_or_create(&identity("s1")).await;
        assert!(Arc::ptr_eq(&a, &b));

        let c = registry.fetch_or_create(&identity("s2")).await;
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.source_count().await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_creation_single_winner() {
        let registry = Arc::new(SourceRegistry::new());
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                registry.fetch_or_create(&identity("race")).await
            }));
        }

        let mut sources = Vec::new();
        for task in tasks {
            sources.push(task.await.unwrap());
        }
        assert!(sources.iter().all(|s| Arc::ptr_eq(s, &sources[0])));
        assert_eq!(registry.source_count().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_publish_single_winner() {
        let registry = Arc::new(SourceRegistry::new());
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                registry.fetch_or_create(&identity("s1")).await.on_publish().await
            }));
        }

        let mut admitted = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(()) => admitted += 1,
                Err(e) => assert!(matches!(e, RegistryError::AlreadyPublishing(_))),
            }
        }
        assert_eq!(admitted, 1);
    }

    #[tokio::test]
    async fn test_remove_requires_idle() {
        let registry = SourceRegistry::new();
        let source = registry.fetch_or_create(&identity("s1")).await;
        source.on_publish().await.unwrap();
        assert!(!registry.remove_source(&source).await);

        source.on_unpublish().await;
        assert!(registry.remove_source(&source).await);
        assert!(source.is_retired().await);
        assert!(registry.fetch(&identity("s1")).await.is_none());
    }

    #[tokio::test]
    async fn test_stale_handle_not_removed() {
        let registry = SourceRegistry::new();
        let old = registry.fetch_or_create(&identity("s1")).await;
        assert!(registry.remove_source(&old).await);

        let new = registry.fetch_or_create(&identity("s1")).await;
        assert!(!registry.remove_source(&old).await);
        assert!(Arc::ptr_eq(&registry.fetch(&identity("s1")).await.unwrap(), &new));
    }

    #[tokio::test]
    async fn test_republish_after_removal() {
        let registry = SourceRegistry::new();
        let first = registry.fetch_or_create(&identity("s1")).await;
        first.on_publish().await.unwrap();

        let second = registry.fetch_or_create(&identity("s1")).await;
        assert!(matches!(
            second.on_publish().await,
            Err(RegistryError::AlreadyPublishing(_))
        ));

        first.on_unpublish().await;
        first.remove_consumers().await;
        registry.remove_source(&first).await;

        let third = registry.fetch_or_create(&identity("s1")).await;
        third.on_publish().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_releases_consumers() {
        let registry = SourceRegistry::new();
        let source = registry.fetch_or_create(&identity("s1")).await;
        let consumer = source.create_consumer(true, true, true).await.unwrap();

        registry.shutdown().await;
        assert_eq!(registry.source_count().await, 0);
        assert_eq!(
            consumer.wait(1, Duration::from_secs(1)).await,
            Err(RegistryError::ConsumerClosed)
        );
    }
}
