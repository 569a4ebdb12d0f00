use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::service::GatewayResult;

/// An outbound message: what PUBLISH hands to the records storage after the
/// pre-processor chain ran over it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub topic: String,
    pub key: Bytes,
    pub value: Bytes,
}

/// One element of a partition's log, as produced by a partition source.
#[derive(Debug, Clone)]
pub struct Record {
    pub envelope: Envelope,
    pub partition: u32,
    pub offset: u64,
    pub timestamp: DateTime<Utc>,
}

/// Where a published envelope landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetInfo {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
}

pub type RecordStream = BoxStream<'static, GatewayResult<Record>>;

/// Assignment events: each element is a snapshot of the partition sources
/// currently assigned to this consumer, superseding prior snapshots.
pub type AssignmentStream = BoxStream<'static, GatewayResult<Vec<Arc<dyn PartitionSource>>>>;

/// Capability boundary over the record log backend.
#[async_trait]
pub trait RecordsStorage: Send + Sync {
    async fn publish(&self, envelope: Envelope) -> GatewayResult<OffsetInfo>;

    /// Opens a consumer-group subscription. `auto_offset_reset` is the
    /// backend hint ("earliest" / "latest"), absent when the client did not
    /// pick one.
    fn subscribe(
        &self,
        topic: &str,
        group_name: &str,
        auto_offset_reset: Option<String>,
    ) -> Box<dyn Subscription>;
}

/// A live consumer-group membership. Dropping the event stream leaves the
/// group.
pub trait Subscription: Send + Sync {
    fn events(self: Box<Self>) -> AssignmentStream;
}

/// One assigned partition: a lazy record stream plus a one-shot seek.
#[async_trait]
pub trait PartitionSource: Send + Sync {
    fn partition(&self) -> u32;

    /// The underlying record stream. Called once per assignment; the stream
    /// observes later `seek_to` calls only if they happen before the first
    /// poll.
    fn records(self: Arc<Self>) -> RecordStream;

    async fn seek_to(&self, offset: u64) -> GatewayResult<()>;
}
