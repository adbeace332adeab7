//! Command implementations for the `gridq` binary.
//!
//! Kept in the library so the binary and tests share the same code. Every
//! command writes its result to `out`; human-readable unless `json` is set.

use std::io::Write;
use std::sync::Arc;

use crate::cache::PartitionedCache;
use crate::item_key::{AffinityKey, QueueHeaderKey, QueueId};
use crate::queue::{GridQueue, QueueItem};
use crate::retry::BackoffPolicy;

/// Options shared by every command.
#[derive(Clone)]
pub struct CtlContext {
    pub cache: Arc<PartitionedCache>,
    pub policy: BackoffPolicy,
    /// Output in JSON format instead of plain text
    pub json: bool,
}

impl CtlContext {
    async fn open(&self, queue: &str) -> anyhow::Result<GridQueue> {
        Ok(GridQueue::open(Arc::clone(&self.cache), self.policy.clone(), queue).await?)
    }
}

fn item_json(item: &QueueItem) -> anyhow::Result<serde_json::Value> {
    Ok(serde_json::json!({
        "key": serde_json::to_value(&item.key)?,
        "payload": String::from_utf8_lossy(&item.payload),
        "enqueued_at_ms": item.enqueued_at_ms,
    }))
}

fn write_item<W: Write>(
    ctx: &CtlContext,
    out: &mut W,
    item: Option<&QueueItem>,
) -> anyhow::Result<()> {
    match (item, ctx.json) {
        (Some(item), true) => writeln!(out, "{}", item_json(item)?)?,
        (Some(item), false) => writeln!(
            out,
            "{}\t{}",
            item.key,
            String::from_utf8_lossy(&item.payload)
        )?,
        (None, true) => writeln!(out, "null")?,
        (None, false) => writeln!(out, "(empty)")?,
    }
    Ok(())
}

pub async fn create<W: Write>(
    ctx: &CtlContext,
    out: &mut W,
    queue: &str,
    capacity: u64,
) -> anyhow::Result<()> {
    let q = GridQueue::create(Arc::clone(&ctx.cache), ctx.policy.clone(), queue, capacity).await?;
    let header = q.header().await?;
    if ctx.json {
        let json_output = serde_json::json!({
            "queue": header.queue_id,
            "capacity": header.capacity,
            "partition": q.partition().0,
            "created_at_ms": header.created_at_ms,
        });
        writeln!(out, "{}", json_output)?;
    } else {
        writeln!(
            out,
            "queue {} (capacity {}) on partition {}",
            header.queue_id,
            if header.is_bounded() {
                header.capacity.to_string()
            } else {
                "unbounded".to_string()
            },
            q.partition()
        )?;
    }
    Ok(())
}

pub async fn offer<W: Write>(
    ctx: &CtlContext,
    out: &mut W,
    queue: &str,
    payload: &str,
) -> anyhow::Result<()> {
    let q = ctx.open(queue).await?;
    match q.offer(payload.as_bytes()).await? {
        Some(key) if ctx.json => writeln!(out, "{}", serde_json::to_string(&key)?)?,
        Some(key) => writeln!(out, "{}", key)?,
        None => anyhow::bail!("queue '{}' is full", queue),
    }
    Ok(())
}

pub async fn poll<W: Write>(ctx: &CtlContext, out: &mut W, queue: &str) -> anyhow::Result<()> {
    let q = ctx.open(queue).await?;
    let item = q.poll().await?;
    write_item(ctx, out, item.as_ref())
}

pub async fn peek<W: Write>(ctx: &CtlContext, out: &mut W, queue: &str) -> anyhow::Result<()> {
    let q = ctx.open(queue).await?;
    let item = q.peek().await?;
    write_item(ctx, out, item.as_ref())
}

pub async fn size<W: Write>(ctx: &CtlContext, out: &mut W, queue: &str) -> anyhow::Result<()> {
    let q = ctx.open(queue).await?;
    let size = q.size().await?;
    if ctx.json {
        writeln!(out, "{}", serde_json::json!({ "queue": queue, "size": size }))?;
    } else {
        writeln!(out, "{}", size)?;
    }
    Ok(())
}

/// One JSON-encoded item key per line, in FIFO order.
pub async fn list<W: Write>(ctx: &CtlContext, out: &mut W, queue: &str) -> anyhow::Result<()> {
    let q = ctx.open(queue).await?;
    for item in q.items().await? {
        writeln!(out, "{}", serde_json::to_string(&item.key)?)?;
    }
    Ok(())
}

/// Where a queue lives. Does not require the queue to exist.
pub fn route<W: Write>(ctx: &CtlContext, out: &mut W, queue: &str) -> anyhow::Result<()> {
    let queue_id = QueueId::new(queue)?;
    let header_key = QueueHeaderKey::new(&queue_id);
    let partition = ctx.cache.partition_of(&header_key);
    let owner = ctx.cache.owner_of(&header_key);
    let token = AffinityKey::for_queue(&queue_id);

    if ctx.json {
        let json_output = serde_json::json!({
            "queue": queue,
            "affinity_key": token,
            "partition": partition.0,
            "owner": owner,
            "topology_version": ctx.cache.topology().version(),
        });
        writeln!(out, "{}", json_output)?;
    } else {
        let owner = owner.map_or_else(|| "none".to_string(), |n| n.to_string());
        writeln!(out, "queue:     {}", queue)?;
        writeln!(out, "token:     {}", token)?;
        writeln!(out, "partition: {}", partition)?;
        writeln!(out, "owner:     {}", owner)?;
    }
    Ok(())
}
