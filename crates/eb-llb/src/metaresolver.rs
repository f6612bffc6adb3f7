// SPDX-License-Identifier: MIT OR Apache-2.0
//! Image meta resolution with a local single-flight cache.

use crate::engine::{BuildEngine, EngineError, ResolveImageOpt, ResolvedImage};
use eb_sync::SyncCache;
use std::sync::Arc;

/// An image meta resolver with a `(reference, platform)` cache.
///
/// Concurrent converters resolving the same base image collapse into one
/// engine round-trip.
pub struct CachedMetaResolver {
    engine: Arc<dyn BuildEngine>,
    cache: SyncCache<(String, String), ResolvedImage>,
}

impl CachedMetaResolver {
    /// Wrap an engine with a resolution cache.
    #[must_use]
    pub fn new(engine: Arc<dyn BuildEngine>) -> Self {
        Self {
            engine,
            cache: SyncCache::new(),
        }
    }

    /// Resolve an image config, caching by `(reference, platform)`.
    pub async fn resolve_image_config(
        &self,
        reference: &str,
        opt: ResolveImageOpt,
    ) -> Result<ResolvedImage, EngineError> {
        let key = (reference.to_string(), opt.platform.clone());
        let engine = Arc::clone(&self.engine);
        let reference = reference.to_string();
        self.cache
            .do_call(key, || async move {
                engine.resolve_image_config(&reference, opt).await
            })
            .await
    }

    /// Number of resolved entries (test observability).
    #[must_use]
    pub fn resolved_count(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockEngine;

    #[tokio::test]
    async fn caches_by_reference_and_platform() {
        let engine = Arc::new(MockEngine::new());
        engine.stub_image("alpine:3.18", crate::ImageConfig::default());
        let resolver = CachedMetaResolver::new(engine.clone());

        for _ in 0..3 {
            resolver
                .resolve_image_config(
                    "alpine:3.18",
                    ResolveImageOpt {
                        platform: "linux/amd64".to_string(),
                    },
                )
                .await
                .expect("resolve");
        }
        assert_eq!(engine.resolve_calls(), 1);

        resolver
            .resolve_image_config(
                "alpine:3.18",
                ResolveImageOpt {
                    platform: "linux/arm64".to_string(),
                },
            )
            .await
            .expect("resolve other platform");
        assert_eq!(engine.resolve_calls(), 2);
        assert_eq!(resolver.resolved_count(), 2);
    }

    #[tokio::test]
    async fn concurrent_resolutions_collapse() {
        let engine = Arc::new(MockEngine::new());
        engine.stub_image("debian:12", crate::ImageConfig::default());
        let resolver = Arc::new(CachedMetaResolver::new(engine.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let resolver = Arc::clone(&resolver);
            handles.push(tokio::spawn(async move {
                resolver
                    .resolve_image_config("debian:12", ResolveImageOpt::default())
                    .await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("resolve");
        }
        assert_eq!(engine.resolve_calls(), 1);
    }

    #[tokio::test]
    async fn unknown_images_error() {
        let engine = Arc::new(MockEngine::new());
        let resolver = CachedMetaResolver::new(engine);
        let err = resolver
            .resolve_image_config("ghost:latest", ResolveImageOpt::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Unknown(_)));
    }
}
