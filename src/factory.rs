use thiserror::Error;
use tracing::warn;

use crate::cache::{CacheError, Partition};
use crate::routing::PartitionId;
use crate::settings::CacheConfig;

/// Opens the partitions described by a [`CacheConfig`] path template.
pub struct PartitionFactory {
    partitions: Vec<Partition>,
    template: CacheConfig,
}

impl PartitionFactory {
    pub fn new(template: CacheConfig) -> Self {
        Self {
            partitions: Vec::new(),
            template,
        }
    }

    /// Number of partitions the template describes; never zero.
    pub fn partition_count(&self) -> u32 {
        self.template.partitions.max(1)
    }

    pub fn get(&self, id: PartitionId) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.id() == id)
    }

    /// Open the next partition in order.
    pub async fn open_next(&mut self) -> Result<&Partition, CacheError> {
        let id = PartitionId(self.partitions.len() as u32);
        let cfg = self.template.partition_config(id.0);
        let partition = Partition::open(id, &cfg).await?;
        self.partitions.push(partition);
        Ok(&self.partitions[self.partitions.len() - 1])
    }

    /// Open every partition. If one fails, the ones already opened are closed
    /// before the error is returned.
    pub async fn open_all(&mut self) -> Result<(), CacheError> {
        while (self.partitions.len() as u32) < self.partition_count() {
            if let Err(e) = self.open_next().await.map(|_| ()) {
                if let Err(close_err) = close_all(&self.partitions).await {
                    warn!(error = %close_err, "failed to close partitions after open error");
                }
                self.partitions.clear();
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn into_partitions(self) -> Vec<Partition> {
        self.partitions
    }
}

/// Close all partitions. Returns every failure if any partition fails to close.
pub async fn close_all(partitions: &[Partition]) -> Result<(), CloseAllError> {
    let mut errors: Vec<(PartitionId, CacheError)> = Vec::new();
    for partition in partitions {
        if let Err(e) = partition.close().await {
            errors.push((partition.id(), e));
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(CloseAllError { errors })
    }
}

#[derive(Debug, Error)]
pub struct CloseAllError {
    pub errors: Vec<(PartitionId, CacheError)>,
}

impl std::fmt::Display for CloseAllError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} partition(s) failed to close", self.errors.len())
    }
}
