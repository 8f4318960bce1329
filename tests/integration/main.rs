//! Integration tests for Replica

use std::path::Path;
use tempfile::TempDir;

/// Directory with two identical files and a nested directory
fn sample_dir() -> TempDir {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("a.txt"), "same").unwrap();
    std::fs::write(temp.path().join("b.txt"), "same").unwrap();
    std::fs::create_dir(temp.path().join("docs")).unwrap();
    std::fs::write(temp.path().join("docs").join("readme.md"), "# docs").unwrap();
    temp
}

fn missing_config(temp: &Path) -> String {
    temp.join("absent.toml").display().to_string()
}

mod cli_tests {
    use super::*;
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;

    fn replica() -> Command {
        cargo_bin_cmd!("replica")
    }

    #[test]
    fn help_displays() {
        replica()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("content-addressed snapshot sync"));
    }

    #[test]
    fn version_displays() {
        replica()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("replica"));
    }

    #[test]
    fn hash_plain_prints_checksum() {
        let dir = sample_dir();
        replica()
            .args(["--config", &missing_config(dir.path()), "hash", "--format", "plain"])
            .arg(dir.path())
            .assert()
            .success()
            .stdout(predicate::str::is_match("^[0-9a-f]{64}\n$").unwrap());
    }

    #[test]
    fn hash_json_counts_shared_nodes_once() {
        let dir = sample_dir();
        let output = replica()
            .args(["--config", &missing_config(dir.path()), "hash", "--format", "json"])
            .arg(dir.path())
            .output()
            .unwrap();
        assert!(output.status.success());

        // root, docs, readme.md, and one node for both identical files
        let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(report["nodes"], 4);
        assert_eq!(report["kind"], "dir");
        assert_eq!(report["entries"], serde_json::json!(["a.txt", "b.txt", "docs"]));
    }

    #[test]
    fn hash_is_stable_across_runs() {
        let dir = sample_dir();
        let run = || {
            replica()
                .args(["--config", &missing_config(dir.path()), "hash", "-f", "plain"])
                .arg(dir.path())
                .output()
                .unwrap()
                .stdout
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn hash_missing_path_fails() {
        let dir = TempDir::new().unwrap();
        replica()
            .args(["--config", &missing_config(dir.path()), "hash"])
            .arg(dir.path().join("nope"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("Path not found"));
    }

    #[test]
    fn config_path() {
        let dir = TempDir::new().unwrap();
        replica()
            .args(["--config", &missing_config(dir.path()), "config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("absent.toml"));
    }

    #[test]
    fn config_show() {
        let dir = TempDir::new().unwrap();
        replica()
            .args(["--config", &missing_config(dir.path()), "config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[snapshot]"));
    }

    #[test]
    fn config_invalid_reports_hint() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[snapshot\nmax_depth = ").unwrap();

        replica()
            .args(["--config", &path.display().to_string(), "config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn sync_second_worker_hits_cache() {
        let dir = sample_dir();
        let output = replica()
            .args(["--config", &missing_config(dir.path()), "sync", "--workers", "3", "-f", "json"])
            .arg(dir.path())
            .output()
            .unwrap();
        assert!(output.status.success());

        let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        let workers = report["workers"].as_array().unwrap();
        assert_eq!(workers.len(), 3);
        assert_eq!(workers[0]["host_fetches"], 4);
        assert_eq!(workers[1]["host_fetches"], 0);
        assert_eq!(workers[2]["host_fetches"], 0);
        assert!(workers.iter().all(|w| w["nodes"] == 4));
        assert_eq!(report["cache"]["entries"], 4);
    }

    #[test]
    fn sync_table_output() {
        let dir = sample_dir();
        replica()
            .args(["--config", &missing_config(dir.path()), "sync", "--parallel"])
            .arg(dir.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("WORKER"))
            .stdout(predicate::str::contains("cached"));
    }
}

mod service_scenarios {
    use replica::asset::AssetCache;
    use replica::channel::{DisconnectReason, HostEnd, LocalChannel};
    use replica::checksum::Checksum;
    use replica::service::{
        EventKind, EventLog, JournalEventLog, MemoryEventLog, ServiceBase, ServiceConfig,
        ServiceContext, ServiceHandler,
    };
    use replica::snapshot::{AssetStore, Node};
    use replica::ReplicaError;
    use serial_test::serial;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Worker;

    #[async_trait::async_trait]
    impl ServiceHandler for Worker {
        fn type_name(&self) -> &'static str {
            "Worker"
        }
    }

    /// root -> [left -> [a, b], c]
    fn five_node_tree(store: &AssetStore) -> Checksum {
        let a = store.put_node(&Node::leaf("file", b"a".to_vec())).unwrap();
        let b = store.put_node(&Node::leaf("file", b"b".to_vec())).unwrap();
        let c = store.put_node(&Node::leaf("file", b"c".to_vec())).unwrap();
        let left = store
            .put_node(&Node::branch("dir", br#"["a","b"]"#.to_vec(), vec![a, b]))
            .unwrap();
        store
            .put_node(&Node::branch("dir", br#"["left","c"]"#.to_vec(), vec![left, c]))
            .unwrap()
    }

    struct Harness {
        store: Arc<AssetStore>,
        cache: Arc<AssetCache>,
        context: Arc<ServiceContext>,
        events: Arc<MemoryEventLog>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                store: Arc::new(AssetStore::new()),
                cache: Arc::new(AssetCache::new()),
                context: Arc::new(ServiceContext::new()),
                events: Arc::new(MemoryEventLog::new()),
            }
        }

        async fn attach(&self, delay: Duration) -> (HostEnd, Arc<ServiceBase<Worker>>) {
            let (host, channel) = LocalChannel::pair_with_delay(self.store.clone(), delay);
            let config = ServiceConfig::new(channel)
                .with_cache(self.cache.clone())
                .with_context(self.context.clone())
                .with_events(self.events.clone());
            let service = ServiceBase::new(config, Worker).await.unwrap();
            (host, service)
        }
    }

    #[tokio::test]
    async fn second_instance_reuses_cached_tree() {
        let harness = Harness::new();
        let root = five_node_tree(&harness.store);

        let (host1, first) = harness.attach(Duration::ZERO).await;
        host1.initialize(1, Some(root)).await.unwrap();
        let snapshot1 = first.snapshot().await.unwrap();
        assert_eq!(host1.fetch_count(), 5);
        assert_eq!(snapshot1.node_count(), 5);

        let (host2, second) = harness.attach(Duration::ZERO).await;
        host2.initialize(2, Some(root)).await.unwrap();
        let snapshot2 = second.snapshot().await.unwrap();

        assert_eq!(host2.fetch_count(), 0);
        assert_eq!(snapshot1, snapshot2);
        assert_eq!(snapshot2.checksum(), root);
        assert_eq!(harness.cache.len(), 5);
        assert_ne!(first.instance_id(), second.instance_id());
    }

    #[tokio::test]
    async fn clean_dispose_logs_no_error() {
        let harness = Harness::new();
        let (_host, service) = harness.attach(Duration::ZERO).await;
        let token = service.cancellation();

        service.dispose().await;
        service.closed().await;

        assert!(token.is_cancelled());
        assert_eq!(harness.events.error_count(), 0);
    }

    #[tokio::test]
    async fn stream_error_logs_exactly_once() {
        let harness = Harness::new();
        let (host, service) = harness.attach(Duration::ZERO).await;
        let token = service.cancellation();

        host.disconnect(DisconnectReason::StreamError, Some("broken pipe".to_string()));
        service.closed().await;
        service.dispose().await;

        assert!(token.is_cancelled());
        assert_eq!(harness.events.error_count(), 1);
        let kinds: Vec<_> = harness
            .events
            .for_instance(service.instance_id())
            .into_iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(kinds.first(), Some(&EventKind::Created));
        assert_eq!(kinds.last(), Some(&EventKind::Disposed));
    }

    #[tokio::test]
    async fn corrupt_asset_is_never_cached() {
        let harness = Harness::new();
        let leaf = Node::leaf("file", b"genuine".to_vec());
        let leaf_checksum = leaf.checksum().unwrap();
        harness
            .store
            .insert_unchecked(leaf_checksum, b"tampered".to_vec());
        let root = harness
            .store
            .put_node(&Node::branch("dir", b"f".to_vec(), vec![leaf_checksum]))
            .unwrap();

        let (host, service) = harness.attach(Duration::ZERO).await;
        host.initialize(1, Some(root)).await.unwrap();

        let err = service.snapshot().await.unwrap_err();
        assert!(matches!(err, ReplicaError::Integrity { expected, .. } if expected == leaf_checksum));
        assert!(!harness.cache.contains(&leaf_checksum));
        assert!(harness.cache.contains(&root));
    }

    #[tokio::test]
    async fn disconnect_cancels_in_flight_fetch() {
        let harness = Harness::new();
        let root = five_node_tree(&harness.store);
        let (host, service) = harness.attach(Duration::from_secs(5)).await;
        host.initialize(1, Some(root)).await.unwrap();

        let pending = tokio::spawn({
            let service = service.clone();
            async move { service.snapshot().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        host.disconnect(DisconnectReason::StreamError, None);

        let result = tokio::time::timeout(Duration::from_secs(2), pending)
            .await
            .expect("snapshot should stop promptly")
            .unwrap();
        assert!(result.unwrap_err().is_cancelled());
        assert!(harness.cache.is_empty());
    }

    #[tokio::test]
    async fn journal_appends_json_lines() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state").join("events.log");
        let journal: Arc<dyn EventLog> = Arc::new(JournalEventLog::new(path.clone()));
        let (host, channel) = LocalChannel::pair(Arc::new(AssetStore::new()));
        let config = ServiceConfig::new(channel)
            .with_cache(Arc::new(AssetCache::new()))
            .with_context(Arc::new(ServiceContext::new()))
            .with_events(journal);

        let service = ServiceBase::new(config, Worker).await.unwrap();
        host.disconnect(DisconnectReason::ProtocolError, Some("bad frame".to_string()));
        service.closed().await;

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "created");
        assert_eq!(lines[1]["event"], "unexpected_disconnect");
        assert_eq!(lines[1]["reason"], "protocol_error");
        assert_eq!(lines[1]["service_type"], "Worker");
    }

    #[tokio::test]
    #[serial]
    async fn default_config_uses_process_wide_cache() {
        let store = Arc::new(AssetStore::new());
        let root = store
            .put_node(&Node::leaf("file", b"process-wide".to_vec()))
            .unwrap();

        let (host1, channel1) = LocalChannel::pair(store.clone());
        let first = ServiceBase::new(ServiceConfig::new(channel1), Worker)
            .await
            .unwrap();
        let (host2, channel2) = LocalChannel::pair(store.clone());
        let second = ServiceBase::new(ServiceConfig::new(channel2), Worker)
            .await
            .unwrap();

        assert!(Arc::ptr_eq(first.cache(), &AssetCache::global()));
        assert!(Arc::ptr_eq(first.cache(), second.cache()));
        assert!(second.instance_id() > first.instance_id());

        host1.initialize(1, Some(root)).await.unwrap();
        host2.initialize(2, Some(root)).await.unwrap();
        first.snapshot().await.unwrap();
        second.snapshot().await.unwrap();
        assert_eq!(host1.fetch_count() + host2.fetch_count(), 1);

        AssetCache::global().remove(&root);
    }
}
