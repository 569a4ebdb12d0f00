//! The five gateway endpoints.
//!
//! Thin orchestration over the storage adapters, processor chains and the
//! session registry. Unary verbs are plain async calls; SUBSCRIBE and
//! RECEIVE hand back bounded, demand-driven reply streams. Every terminal
//! error is logged with the endpoint name and surfaced as an INTERNAL
//! transport status carrying the original message.

use std::sync::Arc;

use futures::stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::receive;
use super::registry::{SessionRegistry, StoredSubscription};
use super::subscribe;
use crate::processor::{PostProcessorChain, PreProcessorChain};
use crate::protocol::{
    AckRequest, AutoOffsetReset, GetOffsetsReply, GetOffsetsRequest, PublishReply, PublishRequest,
    ReceiveRecord, ReceiveReply, ReceiveRequest, Status, SubscribeReply, SubscribeRequest,
    Timestamp,
};
use crate::service::{global_config, GatewayResult};
use crate::storage::{Envelope, GroupId, PositionsStorage, RecordsStorage};

pub struct GatewayService {
    records: Arc<dyn RecordsStorage>,
    positions: Arc<dyn PositionsStorage>,
    pre_chain: PreProcessorChain,
    post_chain: PostProcessorChain,
    registry: Arc<SessionRegistry>,
}

impl GatewayService {
    pub fn new(
        records: Arc<dyn RecordsStorage>,
        positions: Arc<dyn PositionsStorage>,
        pre_chain: PreProcessorChain,
        post_chain: PostProcessorChain,
    ) -> GatewayService {
        GatewayService {
            records,
            positions,
            pre_chain,
            post_chain,
            registry: Arc::new(SessionRegistry::new()),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub async fn publish(&self, request: PublishRequest) -> Result<PublishReply, Status> {
        self.publish_inner(request).await.map_err(|e| {
            error!("publish terminated with error: {}", e);
            Status::from(e)
        })
    }

    async fn publish_inner(&self, request: PublishRequest) -> GatewayResult<PublishReply> {
        let envelope = Envelope {
            topic: request.topic,
            key: request.key,
            value: request.value,
        };
        let envelope = self.pre_chain.apply(envelope).await?;
        let info = self.records.publish(envelope).await?;
        Ok(PublishReply {
            topic: info.topic,
            partition: info.partition,
            offset: info.offset,
        })
    }

    /// Opens a session: resolves the group identity, subscribes to the
    /// records storage, registers the session and spawns the driver that
    /// turns assignment events into replies. The returned stream is bounded
    /// by the reply channel; dropping it cancels the session.
    pub fn subscribe(
        &self,
        request: SubscribeRequest,
    ) -> BoxStream<'static, Result<SubscribeReply, Status>> {
        let group_id = if request.group_version != 0 {
            GroupId::new(request.group.clone(), request.group_version)
        } else {
            let parsed = GroupId::parse_str(&request.group);
            if parsed.version().is_some() {
                warn!("parsed a legacy group '{}' into {}", request.group, parsed);
            }
            parsed
        };

        let auto_offset_reset = match request.auto_offset_reset {
            AutoOffsetReset::Earliest => Some("earliest".to_string()),
            AutoOffsetReset::Latest => Some("latest".to_string()),
            AutoOffsetReset::Unset => None,
        };

        let subscription =
            self.records
                .subscribe(&request.topic, group_id.name(), auto_offset_reset);

        let session_id = Uuid::new_v4().to_string();
        let stored = Arc::new(StoredSubscription {
            topic: request.topic,
            group_id,
        });
        let session_sources = self.registry.insert_session(&session_id, stored.clone());

        let (tx, rx) = mpsc::channel(global_config().network.reply_channel_capacity);
        tokio::spawn(subscribe::run(
            self.registry.clone(),
            self.positions.clone(),
            session_id,
            stored,
            session_sources,
            subscription.events(),
            tx,
        ));

        Box::pin(ReceiverStream::new(rx).map(|item| {
            item.map_err(|e| {
                error!("subscribe terminated with error: {}", e);
                Status::from(e)
            })
        }))
    }

    /// Streams records for one assigned partition. A missing handle is not
    /// an error: the session may have been torn down while the request was
    /// in flight, so the stream just completes empty.
    pub fn receive(
        &self,
        request: ReceiveRequest,
    ) -> BoxStream<'static, Result<ReceiveReply, Status>> {
        let session_id = request.assignment.session_id.clone();
        let partition = request.assignment.partition;

        let Some(handle) = self.registry.source(&session_id, partition) else {
            warn!(
                "source not found, returning empty stream. request: {}",
                format!("{:?}", request).replace('\n', "\\n")
            );
            return Box::pin(stream::empty());
        };

        // TODO auto ack to the last known offset
        debug!(
            last_known_offset = request.last_known_offset,
            "receive opened for session {} partition {}", session_id, partition
        );

        let last_seen = handle.last_seen_offset();
        let records = self.post_chain.apply(receive::drain(handle));

        Box::pin(records.map(move |item| match item {
            Ok(record) => Ok(ReceiveReply {
                record: ReceiveRecord {
                    offset: record.offset,
                    replay: (record.offset as i64) <= last_seen,
                    key: record.envelope.key,
                    value: record.envelope.value,
                    timestamp: Timestamp {
                        seconds: record.timestamp.timestamp(),
                        nanos: record.timestamp.timestamp_subsec_nanos(),
                    },
                },
            }),
            Err(e) => {
                error!("receive terminated with error: {}", e);
                Err(Status::from(e))
            }
        }))
    }

    /// Commits one offset. Same race tolerance as RECEIVE: an unknown
    /// session completes empty instead of failing.
    pub async fn ack(&self, request: AckRequest) -> Result<(), Status> {
        let Some(stored) = self.registry.subscription(&request.assignment.session_id) else {
            warn!(
                "subscription not found, completing empty. request: {}",
                format!("{:?}", request).replace('\n', "\\n")
            );
            return Ok(());
        };

        self.positions
            .update(
                &stored.topic,
                &stored.group_id,
                request.assignment.partition,
                request.offset,
            )
            .await
            .map_err(|e| {
                error!("ack terminated with error: {}", e);
                Status::from(e)
            })
    }

    pub async fn get_offsets(
        &self,
        request: GetOffsetsRequest,
    ) -> Result<GetOffsetsReply, Status> {
        let group_id = GroupId::new(request.group, request.group_version);
        self.positions
            .find_all(&request.topic, &group_id)
            .await
            .map(|offsets| GetOffsetsReply { offsets })
            .map_err(|e| {
                error!("getOffsets terminated with error: {}", e);
                Status::from(e)
            })
    }
}
