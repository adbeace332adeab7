use std::sync::Arc;
use std::time::Instant;

use gridq::cache::PartitionedCache;
use gridq::queue::{GridQueue, QueueError};
use gridq::retry::BackoffPolicy;
use gridq::settings::{Backend, CacheConfig, ClusterConfig};

async fn open_temp_cache(partitions: u32) -> (tempfile::TempDir, Arc<PartitionedCache>) {
    let tmp = tempfile::tempdir().expect("tempdir");
    let cfg = CacheConfig {
        backend: Backend::Fs,
        path: tmp
            .path()
            .join("p-%partition%")
            .to_string_lossy()
            .to_string(),
        partitions,
        flush_interval_ms: Some(10),
        op_timeout_ms: 30_000,
    };
    let cache = PartitionedCache::open(&cfg, &ClusterConfig::default())
        .await
        .expect("open cache");
    (tmp, cache)
}

struct Run {
    ops_per_sec: f64,
    contended: usize,
}

/// `producers` tasks each offering `per_producer` items. With `shared_queue`
/// all of them target one queue, otherwise each producer has its own.
async fn measure_offer_throughput(
    producers: usize,
    per_producer: usize,
    shared_queue: bool,
) -> Run {
    let (_tmp, cache) = open_temp_cache(8).await;
    let policy = BackoffPolicy::default();
    for p in 0..producers {
        let name = if shared_queue { "shared".to_string() } else { format!("q-{p}") };
        GridQueue::create(Arc::clone(&cache), policy.clone(), &name, 0)
            .await
            .expect("create");
    }

    let start = Instant::now();
    let mut handles = vec![];
    for p in 0..producers {
        let cache = Arc::clone(&cache);
        let policy = policy.clone();
        let name = if shared_queue { "shared".to_string() } else { format!("q-{p}") };
        handles.push(tokio::spawn(async move {
            let queue = GridQueue::open(cache, policy, &name).await.expect("open");
            let mut contended = 0;
            for i in 0..per_producer {
                match queue.offer(format!("{p}-{i}").as_bytes()).await {
                    Ok(_) => {}
                    Err(QueueError::AllocationContention { .. }) => contended += 1,
                    Err(e) => panic!("offer failed: {e}"),
                }
            }
            contended
        }));
    }

    let mut contended = 0;
    for handle in handles {
        contended += handle.await.expect("producer task");
    }
    let elapsed = start.elapsed();
    cache.close().await.expect("close");

    let total = (producers * per_producer - contended) as f64;
    Run {
        ops_per_sec: total / elapsed.as_secs_f64(),
        contended,
    }
}

#[tokio::main]
async fn main() {
    println!("\n========================================");
    println!("Queue Offer Throughput Benchmark");
    println!("========================================\n");

    for producers in [1, 4, 8] {
        let per_producer = 200 / producers;
        let one = measure_offer_throughput(producers, per_producer, true).await;
        let many = measure_offer_throughput(producers, per_producer, false).await;
        println!(
            "  {producers} producers x {per_producer:>3} offers: one queue {:.0} ops/sec ({} contended), \
             {producers} queues {:.0} ops/sec ({} contended)",
            one.ops_per_sec, one.contended, many.ops_per_sec, many.contended
        );
    }
    println!();
}
