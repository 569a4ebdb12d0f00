//! In-process storage backends.
//!
//! `MemoryRecordsStorage` is a partitioned append-only log with
//! Kafka-compatible key routing; good enough to run the gateway standalone
//! and to drive the integration suites. `MemoryPositionsStorage` is the
//! matching versioned offsets map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream;
use futures::StreamExt;
use murmur2::{murmur2, KAFKA_SEED};
use tokio::sync::Notify;

use super::positions::{GroupId, PositionsStorage, VersionedOffsets};
use super::records::{
    AssignmentStream, Envelope, OffsetInfo, PartitionSource, Record, RecordStream, RecordsStorage,
    Subscription,
};
use crate::service::GatewayResult;

#[derive(Clone)]
struct StoredEntry {
    key: Bytes,
    value: Bytes,
    timestamp: DateTime<Utc>,
}

struct MemoryPartition {
    partition: u32,
    entries: RwLock<Vec<StoredEntry>>,
    appended: Notify,
}

impl MemoryPartition {
    fn new(partition: u32) -> MemoryPartition {
        MemoryPartition {
            partition,
            entries: RwLock::new(Vec::new()),
            appended: Notify::new(),
        }
    }

    fn append(&self, key: Bytes, value: Bytes) -> u64 {
        let offset = {
            let mut entries = self.entries.write().unwrap();
            entries.push(StoredEntry {
                key,
                value,
                timestamp: Utc::now(),
            });
            entries.len() as u64 - 1
        };
        // wake tailing sources after the lock is released
        self.appended.notify_waiters();
        offset
    }

    fn entry_at(&self, offset: u64) -> Option<StoredEntry> {
        self.entries.read().unwrap().get(offset as usize).cloned()
    }

    fn end_offset(&self) -> u64 {
        self.entries.read().unwrap().len() as u64
    }
}

struct MemoryTopic {
    partitions: Vec<Arc<MemoryPartition>>,
}

impl MemoryTopic {
    fn new(partition_count: u32) -> MemoryTopic {
        MemoryTopic {
            partitions: (0..partition_count).map(|p| Arc::new(MemoryPartition::new(p))).collect(),
        }
    }
}

/// Append-only partitioned log held entirely in memory.
pub struct MemoryRecordsStorage {
    partitions_per_topic: u32,
    topics: DashMap<String, Arc<MemoryTopic>>,
}

impl MemoryRecordsStorage {
    pub fn new(partitions_per_topic: u32) -> MemoryRecordsStorage {
        MemoryRecordsStorage {
            partitions_per_topic: partitions_per_topic.max(1),
            topics: DashMap::new(),
        }
    }

    fn topic(&self, name: &str) -> Arc<MemoryTopic> {
        self.topics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryTopic::new(self.partitions_per_topic)))
            .value()
            .clone()
    }

    /// Same routing as Kafka's default partitioner, so records with one key
    /// stay on one partition.
    fn partition_for(&self, key: &[u8]) -> u32 {
        (murmur2(key, KAFKA_SEED) & 0x7fffffff) % self.partitions_per_topic
    }
}

#[async_trait]
impl RecordsStorage for MemoryRecordsStorage {
    async fn publish(&self, envelope: Envelope) -> GatewayResult<OffsetInfo> {
        let topic = self.topic(&envelope.topic);
        let partition = self.partition_for(&envelope.key);
        let offset = topic.partitions[partition as usize].append(envelope.key, envelope.value);
        Ok(OffsetInfo {
            topic: envelope.topic,
            partition,
            offset,
        })
    }

    fn subscribe(
        &self,
        topic: &str,
        _group_name: &str,
        auto_offset_reset: Option<String>,
    ) -> Box<dyn Subscription> {
        let state = self.topic(topic);
        let sources: Vec<Arc<dyn PartitionSource>> = state
            .partitions
            .iter()
            .map(|partition| {
                // absent reset behaves as earliest here; a broker-backed
                // adapter applies the broker default instead
                let start = match auto_offset_reset.as_deref() {
                    Some("latest") => partition.end_offset(),
                    _ => 0,
                };
                Arc::new(MemorySource {
                    topic: topic.to_string(),
                    partition: partition.clone(),
                    cursor: AtomicU64::new(start),
                }) as Arc<dyn PartitionSource>
            })
            .collect();
        Box::new(MemorySubscription { sources })
    }
}

/// Single-consumer membership: every partition of the topic, handed out in
/// one assignment event. Rebalancing fairness stays the backend's problem.
struct MemorySubscription {
    sources: Vec<Arc<dyn PartitionSource>>,
}

impl Subscription for MemorySubscription {
    fn events(self: Box<Self>) -> AssignmentStream {
        let sources = self.sources;
        Box::pin(stream::once(async move { Ok(sources) }).chain(stream::pending()))
    }
}

struct MemorySource {
    topic: String,
    partition: Arc<MemoryPartition>,
    cursor: AtomicU64,
}

impl MemorySource {
    async fn next_record(&self) -> Record {
        loop {
            let offset = self.cursor.load(Ordering::SeqCst);
            if let Some(entry) = self.partition.entry_at(offset) {
                self.cursor.store(offset + 1, Ordering::SeqCst);
                return Record {
                    envelope: Envelope {
                        topic: self.topic.clone(),
                        key: entry.key,
                        value: entry.value,
                    },
                    partition: self.partition.partition,
                    offset,
                    timestamp: entry.timestamp,
                };
            }
            // register interest before re-checking, otherwise an append
            // between the check and the await is lost
            let appended = self.partition.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();
            if self.partition.entry_at(self.cursor.load(Ordering::SeqCst)).is_some() {
                continue;
            }
            appended.await;
        }
    }
}

#[async_trait]
impl PartitionSource for MemorySource {
    fn partition(&self) -> u32 {
        self.partition.partition
    }

    fn records(self: Arc<Self>) -> RecordStream {
        Box::pin(stream::unfold(self, |source| async move {
            let record = source.next_record().await;
            Some((Ok(record), source))
        }))
    }

    async fn seek_to(&self, offset: u64) -> GatewayResult<()> {
        self.cursor.store(offset, Ordering::SeqCst);
        Ok(())
    }
}

/// Versioned committed-offsets map: (topic, group name) -> version ->
/// partition -> offset. Unversioned groups commit under version 0.
#[derive(Default)]
pub struct MemoryPositionsStorage {
    positions: DashMap<(String, String), VersionedOffsets>,
}

impl MemoryPositionsStorage {
    pub fn new() -> MemoryPositionsStorage {
        MemoryPositionsStorage {
            positions: DashMap::new(),
        }
    }

    fn key(topic: &str, group_name: &str) -> (String, String) {
        (topic.to_string(), group_name.to_string())
    }
}

#[async_trait]
impl PositionsStorage for MemoryPositionsStorage {
    async fn update(
        &self,
        topic: &str,
        group_id: &GroupId,
        partition: u32,
        offset: u64,
    ) -> GatewayResult<()> {
        self.positions
            .entry(Self::key(topic, group_id.name()))
            .or_default()
            .entry(group_id.version().unwrap_or(0))
            .or_default()
            .insert(partition, offset);
        Ok(())
    }

    async fn find_all(
        &self,
        topic: &str,
        group_id: &GroupId,
    ) -> GatewayResult<HashMap<u32, u64>> {
        Ok(self
            .positions
            .get(&Self::key(topic, group_id.name()))
            .and_then(|versions| versions.get(&group_id.version().unwrap_or(0)).cloned())
            .unwrap_or_default())
    }

    async fn find_all_versions_by_group(
        &self,
        topic: &str,
        group_name: &str,
    ) -> GatewayResult<VersionedOffsets> {
        Ok(self
            .positions
            .get(&Self::key(topic, group_name))
            .map(|versions| versions.clone())
            .unwrap_or_default())
    }
}
