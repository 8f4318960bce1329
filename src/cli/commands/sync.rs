//! Sync command - replay host/worker synchronization in-process
//!
//! The host hashes `path` into an asset store, then each worker service
//! attaches over a local channel, initializes a session pinned to the root
//! checksum, and materializes the snapshot. With a shared cache only the
//! first worker to reach a node pays for the fetch.

use crate::asset::AssetCache;
use crate::channel::LocalChannel;
use crate::checksum::Checksum;
use crate::cli::args::{OutputFormat, SyncArgs};
use crate::config::Config;
use crate::error::{ReplicaError, ReplicaResult};
use crate::service::{EventLog, JournalEventLog, ServiceBase, ServiceConfig, ServiceHandler};
use crate::snapshot::AssetStore;
use async_trait::async_trait;
use console::style;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Worker-side service exposing a single `materialize` method
struct SyncWorker;

#[async_trait]
impl ServiceHandler for SyncWorker {
    fn type_name(&self) -> &'static str {
        "SyncWorker"
    }

    async fn handle_call(
        &self,
        service: &ServiceBase<Self>,
        method: &str,
        _params: Value,
    ) -> ReplicaResult<Value> {
        match method {
            "materialize" => {
                let snapshot = service.snapshot().await?;
                Ok(serde_json::json!({
                    "checksum": snapshot.checksum(),
                    "nodes": snapshot.node_count(),
                }))
            }
            other => Err(ReplicaError::UnknownMethod(other.to_string())),
        }
    }
}

/// Outcome of one worker's sync
#[derive(Debug, Serialize)]
struct WorkerReport {
    worker: u32,
    instance_id: u64,
    checksum: Checksum,
    nodes: u64,
    host_fetches: u64,
}

/// Execute the sync command
pub async fn execute(args: SyncArgs, config: &Config) -> ReplicaResult<()> {
    let store = Arc::new(AssetStore::new());
    let root = store.put_path(&args.path)?;
    debug!("Hashed {} into {} ({} nodes)", args.path.display(), root.short(), store.len());

    let cache = if config.cache.shared {
        AssetCache::global()
    } else {
        Arc::new(AssetCache::new())
    };
    let events: Option<Arc<dyn EventLog>> = JournalEventLog::from_config(config)
        .map(|journal| Arc::new(journal) as Arc<dyn EventLog>);

    let runner = WorkerRunner {
        store: store.clone(),
        cache: cache.clone(),
        events,
        config,
        root,
    };

    let reports = if args.parallel {
        futures_util::future::try_join_all((1..=args.workers).map(|worker| runner.run(worker)))
            .await?
    } else {
        let mut reports = Vec::with_capacity(args.workers as usize);
        for worker in 1..=args.workers {
            reports.push(runner.run(worker).await?);
        }
        reports
    };

    print_reports(&args, root, store.len(), &reports, &cache)
}

struct WorkerRunner<'a> {
    store: Arc<AssetStore>,
    cache: Arc<AssetCache>,
    events: Option<Arc<dyn EventLog>>,
    config: &'a Config,
    root: Checksum,
}

impl WorkerRunner<'_> {
    async fn run(&self, worker: u32) -> ReplicaResult<WorkerReport> {
        let (host, channel) = LocalChannel::pair(self.store.clone());
        let mut service_config = ServiceConfig::new(channel)
            .with_cache(self.cache.clone())
            .with_snapshot(self.config.snapshot.clone());
        if let Some(events) = &self.events {
            service_config = service_config.with_events(events.clone());
        }

        let service = ServiceBase::new(service_config, SyncWorker).await?;
        let outcome = async {
            host.initialize(worker, Some(self.root)).await?;
            host.invoke("materialize", Value::Null).await
        }
        .await;
        service.dispose().await;

        let reply = outcome?;
        let nodes = reply.get("nodes").and_then(Value::as_u64).unwrap_or_default();
        Ok(WorkerReport {
            worker,
            instance_id: service.instance_id(),
            checksum: self.root,
            nodes,
            host_fetches: host.fetch_count(),
        })
    }
}

fn print_reports(
    args: &SyncArgs,
    root: Checksum,
    distinct: usize,
    reports: &[WorkerReport],
    cache: &AssetCache,
) -> ReplicaResult<()> {
    match args.format {
        OutputFormat::Json => {
            let stats = cache.stats();
            let output = serde_json::json!({
                "root": root,
                "distinct_nodes": distinct,
                "workers": reports,
                "cache": {
                    "hits": stats.hits,
                    "misses": stats.misses,
                    "entries": stats.entries,
                },
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            for report in reports {
                println!("{}\t{}\t{}", report.worker, report.nodes, report.host_fetches);
            }
        }
        OutputFormat::Table => {
            println!("{}", style("Sync").bold().cyan());
            println!();
            println!("  {}: {}", style("Root").dim(), root);
            println!("  {}: {}", style("Distinct nodes").dim(), distinct);
            println!();
            println!(
                "  {:<8} {:<10} {:<8} {}",
                style("WORKER").bold(),
                style("INSTANCE").bold(),
                style("NODES").bold(),
                style("FETCHES").bold()
            );
            for report in reports {
                println!(
                    "  {:<8} {:<10} {:<8} {}",
                    report.worker, report.instance_id, report.nodes, report.host_fetches
                );
            }

            let stats = cache.stats();
            println!();
            println!(
                "  {} {} hits, {} misses, {} cached",
                style("[OK]").green(),
                stats.hits,
                stats.misses,
                stats.entries
            );
        }
    }

    Ok(())
}
