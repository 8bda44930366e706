//! Bounded-depth, concurrent retrieval of discussion trees.
//!
//! The fetcher walks the tree one depth level at a time. Every id on the
//! current level is fetched concurrently (at most `workers` requests in
//! flight), then the kids of the surviving nodes form the next level. Total
//! latency therefore scales with depth rather than node count.
//!
//! Depth numbering: the root item's direct children sit at depth 0. A node at
//! depth `d` is fetched only while `d < max_depth`; kids past the bound are
//! dropped silently.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use digest_shared::{DigestError, DiscussionNode, Result};

// ---------------------------------------------------------------------------
// Node source
// ---------------------------------------------------------------------------

/// A node as reported by the source, before tree assembly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedNode {
    pub id: String,
    pub author: Option<String>,
    /// Markdown body (already cleaned of source markup).
    pub text: Option<String>,
    pub score: i64,
    /// Child ids in source order.
    pub kids: Vec<String>,
    /// Deleted, removed, or dead at the source.
    pub removed: bool,
}

/// Single-node lookup for one source family.
#[async_trait]
pub trait NodeSource: Send + Sync {
    /// Fetch one node. `Ok(None)` means the source has no such node.
    async fn fetch_node(&self, id: &str) -> Result<Option<FetchedNode>>;
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Result of fetching one id on a level.
enum Fetched {
    Node(FetchedNode),
    Pruned,
    Failed,
}

/// Arena slot used while levels are being fetched.
struct Slot {
    node: FetchedNode,
    depth: u32,
    children: Vec<usize>,
}

/// Concurrent tree fetcher over a [`NodeSource`].
#[derive(Clone)]
pub struct TreeFetcher {
    source: Arc<dyn NodeSource>,
    max_depth: u32,
    workers: usize,
}

impl TreeFetcher {
    /// `workers` is clamped to at least one.
    pub fn new(source: Arc<dyn NodeSource>, max_depth: u32, workers: usize) -> Self {
        Self {
            source,
            max_depth,
            workers: workers.max(1),
        }
    }

    /// Fetch the forest under a root item whose children are `child_ids`.
    ///
    /// Never fails: per-node errors are logged and that node (with its
    /// subtree) is left out. Siblings keep the order of `child_ids`.
    #[instrument(skip_all, fields(roots = child_ids.len(), max_depth = self.max_depth))]
    pub async fn fetch(&self, child_ids: &[String]) -> Vec<DiscussionNode> {
        let mut arena: Vec<Slot> = Vec::new();
        let mut roots: Vec<usize> = Vec::new();
        let mut failed = 0usize;
        let mut pruned = 0usize;

        // (parent slot, id) pairs for the current level.
        let mut frontier: Vec<(Option<usize>, String)> =
            child_ids.iter().map(|id| (None, id.clone())).collect();
        let mut depth = 0u32;

        while depth < self.max_depth && !frontier.is_empty() {
            let ids: Vec<String> = frontier.iter().map(|(_, id)| id.clone()).collect();
            let results = self.fetch_level(&ids, depth).await;

            let mut next = Vec::new();
            for ((parent, _), result) in frontier.into_iter().zip(results) {
                let node = match result {
                    Fetched::Node(node) => node,
                    Fetched::Pruned => {
                        pruned += 1;
                        continue;
                    }
                    Fetched::Failed => {
                        failed += 1;
                        continue;
                    }
                };

                let index = arena.len();
                next.extend(node.kids.iter().map(|kid| (Some(index), kid.clone())));
                arena.push(Slot {
                    node,
                    depth,
                    children: Vec::new(),
                });
                match parent {
                    Some(p) => arena[p].children.push(index),
                    None => roots.push(index),
                }
            }

            frontier = next;
            depth += 1;
        }

        debug!(
            fetched = arena.len(),
            pruned,
            failed,
            dropped_past_bound = frontier.len(),
            "discussion tree fetched"
        );

        assemble(arena, &roots)
    }

    /// Fetch every id on one level concurrently; results keep input order.
    async fn fetch_level(&self, ids: &[String], depth: u32) -> Vec<Fetched> {
        let semaphore = Arc::new(Semaphore::new(self.workers));

        let handles: Vec<_> = ids
            .iter()
            .map(|id| {
                let source = Arc::clone(&self.source);
                let sem = Arc::clone(&semaphore);
                let id = id.clone();
                tokio::spawn(async move {
                    let _permit = sem
                        .acquire()
                        .await
                        .map_err(|e| DigestError::Network(format!("fetch pool closed: {e}")))?;
                    source.fetch_node(&id).await
                })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (id, handle) in ids.iter().zip(handles) {
            let result = match handle.await {
                Ok(Ok(Some(node))) if node.removed => {
                    debug!(id = %id, depth, "node removed at source, pruning subtree");
                    Fetched::Pruned
                }
                Ok(Ok(Some(node))) => Fetched::Node(node),
                Ok(Ok(None)) => {
                    debug!(id = %id, depth, "node missing at source, pruning subtree");
                    Fetched::Pruned
                }
                Ok(Err(e)) => {
                    warn!(id = %id, depth, error = %e, "node fetch failed, skipping subtree");
                    Fetched::Failed
                }
                Err(e) => {
                    warn!(id = %id, depth, error = %e, "node fetch task aborted, skipping subtree");
                    Fetched::Failed
                }
            };
            results.push(result);
        }
        results
    }
}

/// Turn the arena into owned trees. Children always sit after their parent
/// in the arena, so one reverse pass builds every subtree before it is needed.
fn assemble(arena: Vec<Slot>, roots: &[usize]) -> Vec<DiscussionNode> {
    let mut built: Vec<Option<DiscussionNode>> = (0..arena.len()).map(|_| None).collect();

    for (index, slot) in arena.into_iter().enumerate().rev() {
        let children = slot
            .children
            .iter()
            .filter_map(|&child| built[child].take())
            .collect();
        built[index] = Some(DiscussionNode {
            id: slot.node.id,
            author: slot.node.author.unwrap_or_else(|| "unknown".into()),
            text: slot.node.text.unwrap_or_default(),
            score: slot.node.score,
            depth: slot.depth,
            children,
        });
    }

    roots.iter().filter_map(|&root| built[root].take()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// In-memory source with optional per-node delays and failures.
    #[derive(Default)]
    struct MapSource {
        nodes: HashMap<String, FetchedNode>,
        failing: Vec<String>,
        delays_ms: HashMap<String, u64>,
        requested: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
    }

    impl MapSource {
        fn with(mut self, id: &str, kids: &[&str]) -> Self {
            self.nodes.insert(
                id.into(),
                FetchedNode {
                    id: id.into(),
                    author: Some(format!("user{id}")),
                    text: Some(format!("comment {id}")),
                    score: 1,
                    kids: kids.iter().map(|k| k.to_string()).collect(),
                    removed: false,
                },
            );
            self
        }

        fn removed(mut self, id: &str, kids: &[&str]) -> Self {
            self = self.with(id, kids);
            if let Some(node) = self.nodes.get_mut(id) {
                node.removed = true;
            }
            self
        }

        fn failing(mut self, id: &str) -> Self {
            self.failing.push(id.into());
            self
        }

        fn delayed(mut self, id: &str, ms: u64) -> Self {
            self.delays_ms.insert(id.into(), ms);
            self
        }

        fn requested(&self) -> Vec<String> {
            let mut ids = self.requested.lock().unwrap().clone();
            ids.sort();
            ids
        }
    }

    #[async_trait]
    impl NodeSource for MapSource {
        async fn fetch_node(&self, id: &str) -> Result<Option<FetchedNode>> {
            self.requested.lock().unwrap().push(id.to_string());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

            let delay = self.delays_ms.get(id).copied().unwrap_or(5);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing.iter().any(|f| f == id) {
                return Err(DigestError::Network(format!("connection reset on {id}")));
            }
            Ok(self.nodes.get(id).cloned())
        }
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn child_ids(nodes: &[DiscussionNode]) -> Vec<&str> {
        nodes.iter().map(|n| n.id.as_str()).collect()
    }

    #[tokio::test]
    async fn dead_sibling_dropped_and_depth_bound_applies() {
        let source = Arc::new(
            MapSource::default()
                .with("1", &["11", "12"])
                .removed("2", &["21"])
                .with("3", &["31"])
                .with("11", &[])
                .with("12", &[])
                .with("31", &[]),
        );
        let fetcher = TreeFetcher::new(source.clone(), 1, 10);

        let tree = fetcher.fetch(&ids(&["1", "2", "3"])).await;

        assert_eq!(child_ids(&tree), vec!["1", "3"]);
        assert!(tree.iter().all(|n| n.children.is_empty()));
        assert!(tree.iter().all(|n| n.depth == 0));
        // Nothing past the bound was requested.
        assert_eq!(source.requested(), vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn no_node_deeper_than_bound() {
        // A chain five levels deep.
        let source = Arc::new(
            MapSource::default()
                .with("a", &["b"])
                .with("b", &["c"])
                .with("c", &["d"])
                .with("d", &["e"])
                .with("e", &[]),
        );
        let fetcher = TreeFetcher::new(source, 3, 4);

        let tree = fetcher.fetch(&ids(&["a"])).await;

        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].subtree_len(), 3);
        assert_eq!(tree[0].max_depth(), 2);
        assert_eq!(tree[0].children[0].children[0].id, "c");
        assert!(tree[0].children[0].children[0].children.is_empty());
    }

    #[tokio::test]
    async fn zero_depth_fetches_nothing() {
        let source = Arc::new(MapSource::default().with("1", &[]));
        let fetcher = TreeFetcher::new(source.clone(), 0, 4);

        assert!(fetcher.fetch(&ids(&["1"])).await.is_empty());
        assert!(source.requested().is_empty());
    }

    #[tokio::test]
    async fn deleted_node_removes_whole_subtree() {
        let source = Arc::new(
            MapSource::default()
                .with("1", &["2", "5"])
                .removed("2", &["3"])
                .with("3", &["4"])
                .with("4", &[])
                .with("5", &[]),
        );
        let fetcher = TreeFetcher::new(source.clone(), 5, 4);

        let tree = fetcher.fetch(&ids(&["1"])).await;

        assert_eq!(tree.len(), 1);
        assert_eq!(child_ids(&tree[0].children), vec!["5"]);
        assert_eq!(tree[0].subtree_len(), 2);
        // The pruned node's kids are never fetched.
        assert!(!source.requested().contains(&"3".to_string()));
    }

    #[tokio::test]
    async fn one_failure_keeps_other_siblings() {
        let source = Arc::new(
            MapSource::default()
                .with("1", &[])
                .with("2", &["21"])
                .with("3", &[])
                .with("4", &[])
                .with("21", &[])
                .failing("2"),
        );
        let fetcher = TreeFetcher::new(source, 3, 2);

        let tree = fetcher.fetch(&ids(&["1", "2", "3", "4"])).await;

        assert_eq!(child_ids(&tree), vec!["1", "3", "4"]);
    }

    #[tokio::test]
    async fn missing_node_is_skipped() {
        let source = Arc::new(MapSource::default().with("1", &["404", "12"]).with("12", &[]));
        let fetcher = TreeFetcher::new(source, 3, 2);

        let tree = fetcher.fetch(&ids(&["1"])).await;

        assert_eq!(child_ids(&tree[0].children), vec!["12"]);
        assert_eq!(tree[0].children[0].depth, 1);
    }

    #[tokio::test]
    async fn siblings_keep_source_order_despite_timing() {
        let source = Arc::new(
            MapSource::default()
                .with("1", &["1a", "1b", "1c"])
                .with("2", &[])
                .with("3", &[])
                .with("1a", &[])
                .with("1b", &[])
                .with("1c", &[])
                .delayed("1", 60)
                .delayed("2", 1)
                .delayed("3", 30)
                .delayed("1a", 40)
                .delayed("1c", 1),
        );
        let fetcher = TreeFetcher::new(source, 2, 8);

        let tree = fetcher.fetch(&ids(&["1", "2", "3"])).await;

        assert_eq!(child_ids(&tree), vec!["1", "2", "3"]);
        assert_eq!(child_ids(&tree[0].children), vec!["1a", "1b", "1c"]);
        assert_eq!(tree[0].children[0].text, "comment 1a");
        assert_eq!(tree[0].children[0].author, "user1a");
    }

    #[tokio::test]
    async fn in_flight_requests_bounded_by_workers() {
        let mut source = MapSource::default();
        let roots: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        for id in &roots {
            source = source.with(id, &[]).delayed(id, 20);
        }
        let source = Arc::new(source);
        let fetcher = TreeFetcher::new(source.clone(), 1, 3);

        let tree = fetcher.fetch(&roots).await;

        assert_eq!(tree.len(), 20);
        let peak = source.peak_in_flight.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak in-flight was {peak}");
        assert!(peak >= 2, "fetches did not overlap (peak {peak})");
    }
}
