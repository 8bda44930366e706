//! Compile-time collector registry.
//!
//! Each collector module exposes a [`CollectorEntry`]; [`BUILTIN_COLLECTORS`]
//! lists them. The orchestrator only ever sees the registry, so adding a
//! source means adding a module and one line here.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use digest_shared::Result;

use crate::collector::{Collector, CollectorContext};
use crate::sources::{arxiv, hackernews, reddit, rss};

/// Constructor for one collector implementation.
pub type CollectorFactory = fn(&CollectorContext) -> Result<Arc<dyn Collector>>;

/// A named collector constructor.
#[derive(Clone, Copy)]
pub struct CollectorEntry {
    pub name: &'static str,
    pub build: CollectorFactory,
}

/// Every collector compiled into this build.
pub static BUILTIN_COLLECTORS: &[CollectorEntry] = &[
    hackernews::ENTRY,
    reddit::ENTRY,
    rss::ENTRY,
    arxiv::ENTRY,
];

/// The immutable set of collectors available for one run, keyed by name.
pub struct CollectorRegistry {
    collectors: BTreeMap<String, Arc<dyn Collector>>,
}

impl CollectorRegistry {
    /// Instantiate every built-in collector.
    pub fn discover(ctx: &CollectorContext) -> Self {
        Self::from_entries(BUILTIN_COLLECTORS, ctx)
    }

    /// Instantiate one collector per entry. An entry whose constructor fails
    /// is logged and left out; the rest still load.
    pub fn from_entries(entries: &[CollectorEntry], ctx: &CollectorContext) -> Self {
        let mut collectors: BTreeMap<String, Arc<dyn Collector>> = BTreeMap::new();

        for entry in entries {
            let key = entry.name.to_lowercase();
            if collectors.contains_key(&key) {
                warn!(collector = entry.name, "duplicate collector name, keeping the first");
                continue;
            }
            match (entry.build)(ctx) {
                Ok(collector) => {
                    debug!(collector = entry.name, source = collector.source_key(), "collector loaded");
                    collectors.insert(key, collector);
                }
                Err(e) => {
                    warn!(collector = entry.name, error = %e, "failed to load collector, skipping");
                }
            }
        }

        info!(count = collectors.len(), "collector registry ready");
        Self { collectors }
    }

    /// Look up a collector by (case-insensitive) name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Collector>> {
        self.collectors.get(&name.to_lowercase())
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.collectors.keys().map(String::as_str)
    }

    /// `(name, collector)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Collector>)> {
        self.collectors.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::CollectOutcome;
    use crate::collector::testing::test_context;
    use async_trait::async_trait;
    use digest_shared::{CollectorConfig, DigestError};
    use std::path::Path;

    struct Fixed(&'static str);

    #[async_trait]
    impl Collector for Fixed {
        fn name(&self) -> &str {
            self.0
        }
        fn source_key(&self) -> &str {
            self.0
        }
        async fn run(&self, _: &CollectorConfig, _: &Path) -> Result<CollectOutcome> {
            Ok(CollectOutcome::default())
        }
    }

    fn build_alpha(_: &CollectorContext) -> Result<Arc<dyn Collector>> {
        Ok(Arc::new(Fixed("alpha")))
    }

    fn build_broken(_: &CollectorContext) -> Result<Arc<dyn Collector>> {
        Err(DigestError::collector("broken", "optional dependency missing"))
    }

    fn build_omega(_: &CollectorContext) -> Result<Arc<dyn Collector>> {
        Ok(Arc::new(Fixed("omega")))
    }

    #[tokio::test]
    async fn discovers_builtin_collectors() {
        let (ctx, _) = test_context().await;
        let registry = CollectorRegistry::discover(&ctx);

        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec!["arxiv", "hackernews", "reddit", "rss"]
        );
        assert_eq!(registry.get("HackerNews").unwrap().source_key(), "hn");
        assert_eq!(registry.get("reddit").unwrap().name(), "reddit");
    }

    #[tokio::test]
    async fn failed_constructor_is_skipped() {
        let (ctx, _) = test_context().await;
        let entries = [
            CollectorEntry { name: "omega", build: build_omega },
            CollectorEntry { name: "broken", build: build_broken },
            CollectorEntry { name: "alpha", build: build_alpha },
        ];

        let registry = CollectorRegistry::from_entries(&entries, &ctx);

        assert_eq!(registry.len(), 2);
        assert!(registry.get("broken").is_none());
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["alpha", "omega"]);
    }

    #[tokio::test]
    async fn duplicate_names_keep_first() {
        let (ctx, _) = test_context().await;
        let entries = [
            CollectorEntry { name: "alpha", build: build_alpha },
            CollectorEntry { name: "Alpha", build: build_omega },
        ];

        let registry = CollectorRegistry::from_entries(&entries, &ctx);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("alpha").unwrap().name(), "alpha");
    }

    #[tokio::test]
    async fn empty_entry_list() {
        let (ctx, _) = test_context().await;
        assert!(CollectorRegistry::from_entries(&[], &ctx).is_empty());
    }
}
