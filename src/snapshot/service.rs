//! Snapshot service
//!
//! Turns a root checksum into a materialized [`Snapshot`]. Missing nodes are
//! fetched through an [`AssetSource`] and published to the shared cache;
//! nodes already cached cost no fetch at all.

use crate::asset::{Asset, AssetCache};
use crate::checksum::Checksum;
use crate::config::schema::SnapshotConfig;
use crate::error::{ReplicaError, ReplicaResult};
use crate::snapshot::node::Node;
use crate::snapshot::{Snapshot, SnapshotNode, SnapshotOptions};
use async_trait::async_trait;
use futures_util::future::{try_join_all, BoxFuture};
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Fetch collaborator: asks the host for the bytes behind a checksum
///
/// Implementations do not verify or retry; the snapshot service checks
/// every payload against the requested checksum.
#[async_trait]
pub trait AssetSource: Send + Sync {
    /// Fetch the raw payload for `checksum`
    async fn fetch(&self, checksum: Checksum) -> ReplicaResult<Vec<u8>>;
}

/// Materializes snapshots for one session
pub struct SnapshotService {
    session_id: u32,
    cache: Arc<AssetCache>,
    source: Arc<dyn AssetSource>,
    max_depth: usize,
    permits: Semaphore,
    materialized: Mutex<HashMap<Checksum, Weak<SnapshotNode>>>,
    fetches: AtomicU64,
}

impl SnapshotService {
    /// Create a snapshot service for a session
    pub fn new(
        session_id: u32,
        cache: Arc<AssetCache>,
        source: Arc<dyn AssetSource>,
        config: &SnapshotConfig,
    ) -> Self {
        Self {
            session_id,
            cache,
            source,
            max_depth: config.max_depth,
            permits: Semaphore::new(config.fetch_concurrency.max(1)),
            materialized: Mutex::new(HashMap::new()),
            fetches: AtomicU64::new(0),
        }
    }

    /// Session this service belongs to
    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    /// Number of fetches this service issued to its source
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Materialize the snapshot rooted at `root`
    ///
    /// Every fetch is a cancellation point. On cancellation, transport
    /// failure, or integrity failure, nothing from the failing fetch is
    /// published to the cache.
    #[instrument(skip(self, options, cancel), fields(session = self.session_id, root = %root.short()))]
    pub async fn snapshot(
        &self,
        root: Checksum,
        options: SnapshotOptions,
        cancel: &CancellationToken,
    ) -> ReplicaResult<Snapshot> {
        if cancel.is_cancelled() {
            return Err(ReplicaError::Cancelled);
        }

        let before = self.fetch_count();
        let node = self.resolve(root, 0, cancel).await?;
        debug!(
            "Materialized snapshot with {} fetches",
            self.fetch_count() - before
        );
        Ok(Snapshot::new(node, options))
    }

    fn resolve<'a>(
        &'a self,
        checksum: Checksum,
        depth: usize,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, ReplicaResult<Arc<SnapshotNode>>> {
        async move {
            if depth > self.max_depth {
                return Err(ReplicaError::TreeTooDeep {
                    max_depth: self.max_depth,
                });
            }

            if let Some(node) = self.live_node(&checksum) {
                return Ok(node);
            }

            let asset = self
                .cache
                .get_or_add(checksum, || self.fetch(checksum, cancel))
                .await?;
            let node = Node::decode(checksum, asset.payload())?;

            let children = try_join_all(
                node.children
                    .iter()
                    .map(|child| self.resolve(*child, depth + 1, cancel)),
            )
            .await?;

            let materialized = Arc::new(SnapshotNode {
                checksum,
                kind: node.kind,
                data: node.data,
                children,
            });
            self.materialized
                .lock()
                .insert(checksum, Arc::downgrade(&materialized));
            Ok(materialized)
        }
        .boxed()
    }

    async fn fetch(&self, checksum: Checksum, cancel: &CancellationToken) -> ReplicaResult<Asset> {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ReplicaError::Cancelled),
            permit = self.permits.acquire() => permit
                .map_err(|_| ReplicaError::Internal("fetch permits closed".to_string()))?,
        };

        self.fetches.fetch_add(1, Ordering::Relaxed);
        let payload = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ReplicaError::Cancelled),
            payload = self.source.fetch(checksum) => payload?,
        };

        Asset::verified(checksum, payload)
    }

    fn live_node(&self, checksum: &Checksum) -> Option<Arc<SnapshotNode>> {
        let mut materialized = self.materialized.lock();
        match materialized.get(checksum).map(Weak::upgrade) {
            Some(Some(node)) => Some(node),
            Some(None) => {
                materialized.remove(checksum);
                None
            }
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::builder::AssetStore;

    /// Serves payloads from a store and counts requests
    struct CountingSource {
        store: AssetStore,
        requests: AtomicU64,
    }

    impl CountingSource {
        fn new(store: AssetStore) -> Arc<Self> {
            Arc::new(Self {
                store,
                requests: AtomicU64::new(0),
            })
        }

        fn requests(&self) -> u64 {
            self.requests.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AssetSource for CountingSource {
        async fn fetch(&self, checksum: Checksum) -> ReplicaResult<Vec<u8>> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            self.store
                .get(&checksum)
                .map(|payload| payload.to_vec())
                .ok_or(ReplicaError::AssetNotFound(checksum))
        }
    }

    /// root -> [left -> [a, b], right -> [c]]
    fn sample_tree(store: &AssetStore) -> (Checksum, Checksum) {
        let a = store.put_node(&Node::leaf("file", b"a".to_vec())).unwrap();
        let b = store.put_node(&Node::leaf("file", b"b".to_vec())).unwrap();
        let c = store.put_node(&Node::leaf("file", b"c".to_vec())).unwrap();
        let left = store
            .put_node(&Node::branch("dir", b"left".to_vec(), vec![a, b]))
            .unwrap();
        let right = store
            .put_node(&Node::branch("dir", b"right".to_vec(), vec![c]))
            .unwrap();
        let root = store
            .put_node(&Node::branch("dir", b"root".to_vec(), vec![left, right]))
            .unwrap();
        (root, left)
    }

    fn service(cache: Arc<AssetCache>, source: Arc<dyn AssetSource>) -> SnapshotService {
        SnapshotService::new(1, cache, source, &SnapshotConfig::default())
    }

    #[tokio::test]
    async fn materializes_full_tree() {
        let store = AssetStore::new();
        let (root, _) = sample_tree(&store);
        let source = CountingSource::new(store);
        let cache = Arc::new(AssetCache::new());
        let snapshots = service(cache.clone(), source.clone());

        let snapshot = snapshots
            .snapshot(root, SnapshotOptions::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(snapshot.checksum(), root);
        assert_eq!(snapshot.node_count(), 6);
        assert_eq!(source.requests(), 6);
        assert_eq!(snapshots.fetch_count(), 6);
        assert_eq!(cache.len(), 6);
    }

    #[tokio::test]
    async fn shared_subtree_is_not_fetched_again() {
        let store = AssetStore::new();
        let (root, left) = sample_tree(&store);
        let d = store.put_node(&Node::leaf("file", b"d".to_vec())).unwrap();
        let other_root = store
            .put_node(&Node::branch("dir", b"other".to_vec(), vec![left, d]))
            .unwrap();
        let source = CountingSource::new(store);
        let cache = Arc::new(AssetCache::new());
        let cancel = CancellationToken::new();

        service(cache.clone(), source.clone())
            .snapshot(root, SnapshotOptions::new(), &cancel)
            .await
            .unwrap();
        assert_eq!(source.requests(), 6);

        // A fresh session shares only the asset cache
        let second = service(cache, source.clone())
            .snapshot(other_root, SnapshotOptions::new(), &cancel)
            .await
            .unwrap();

        // Only the new root and "d" are fetched; left, a, b come from cache
        assert_eq!(source.requests(), 8);
        assert_eq!(second.node_count(), 5);
    }

    #[tokio::test]
    async fn integrity_failure_is_not_cached() {
        let store = AssetStore::new();
        let claimed = Node::leaf("file", b"genuine".to_vec()).checksum().unwrap();
        store.insert_unchecked(claimed, Node::leaf("file", b"forged".to_vec()).encode().unwrap());
        let root = store
            .put_node(&Node::branch("dir", b"".to_vec(), vec![claimed]))
            .unwrap();
        let cache = Arc::new(AssetCache::new());
        let snapshots = service(cache.clone(), CountingSource::new(store));

        let err = snapshots
            .snapshot(root, SnapshotOptions::new(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ReplicaError::Integrity { expected, .. } if expected == claimed));
        assert!(!cache.contains(&claimed));
        assert!(cache.contains(&root));
    }

    #[tokio::test]
    async fn missing_asset_surfaces_source_error() {
        let store = AssetStore::new();
        let absent = Checksum::compute(b"absent");
        let root = store
            .put_node(&Node::branch("dir", b"".to_vec(), vec![absent]))
            .unwrap();
        let snapshots = service(Arc::new(AssetCache::new()), CountingSource::new(store));

        let err = snapshots
            .snapshot(root, SnapshotOptions::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ReplicaError::AssetNotFound(c) if c == absent));
    }

    #[tokio::test]
    async fn cancelled_token_fetches_nothing() {
        let store = AssetStore::new();
        let (root, _) = sample_tree(&store);
        let source = CountingSource::new(store);
        let cache = Arc::new(AssetCache::new());
        let snapshots = service(cache.clone(), source.clone());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = snapshots
            .snapshot(root, SnapshotOptions::new(), &cancel)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(source.requests(), 0);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn depth_is_bounded() {
        let store = AssetStore::new();
        let mut checksum = store.put_node(&Node::leaf("file", b"x".to_vec())).unwrap();
        for level in 0..4 {
            checksum = store
                .put_node(&Node::branch("dir", vec![level as u8], vec![checksum]))
                .unwrap();
        }
        let config = SnapshotConfig {
            max_depth: 2,
            ..SnapshotConfig::default()
        };
        let snapshots = SnapshotService::new(
            1,
            Arc::new(AssetCache::new()),
            CountingSource::new(store),
            &config,
        );

        let err = snapshots
            .snapshot(checksum, SnapshotOptions::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ReplicaError::TreeTooDeep { max_depth: 2 }));
    }

    #[tokio::test]
    async fn live_subtrees_are_reused() {
        let store = AssetStore::new();
        let (root, _) = sample_tree(&store);
        let snapshots = service(Arc::new(AssetCache::new()), CountingSource::new(store));
        let cancel = CancellationToken::new();

        let first = snapshots
            .snapshot(root, SnapshotOptions::new(), &cancel)
            .await
            .unwrap();
        let second = snapshots
            .snapshot(root, SnapshotOptions::new().with("mode", "fast"), &cancel)
            .await
            .unwrap();

        assert!(std::ptr::eq(first.root(), second.root()));
        assert_eq!(second.options().get("mode"), Some("fast"));
    }
}
