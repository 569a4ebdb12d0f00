//! End-to-end gateway scenarios over the in-memory backends.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use gatemq::processor::{PostProcessorChain, PreProcessorChain, RecordPreProcessor};
use gatemq::protocol::{
    AckRequest, Assignment, AutoOffsetReset, GetOffsetsRequest, PublishRequest, ReceiveReply,
    ReceiveRequest, Status, SubscribeReply, SubscribeRequest,
};
use gatemq::storage::{
    Envelope, GroupId, MemoryPositionsStorage, MemoryRecordsStorage, PositionsStorage,
};
use gatemq::{GatewayError, GatewayResult, GatewayService};
use tokio::time::timeout;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(5);

fn build_service(partitions: u32) -> (Arc<GatewayService>, Arc<MemoryPositionsStorage>) {
    let records = Arc::new(MemoryRecordsStorage::new(partitions));
    let positions = Arc::new(MemoryPositionsStorage::new());
    let service = Arc::new(GatewayService::new(
        records,
        positions.clone(),
        PreProcessorChain::default(),
        PostProcessorChain::default(),
    ));
    (service, positions)
}

fn publish_request(topic: &str, key: &[u8], value: &[u8]) -> PublishRequest {
    PublishRequest {
        topic: topic.to_string(),
        key: Bytes::copy_from_slice(key),
        value: Bytes::copy_from_slice(value),
    }
}

fn subscribe_request(topic: &str, group: &str, version: u32, reset: AutoOffsetReset) -> SubscribeRequest {
    SubscribeRequest {
        topic: topic.to_string(),
        group: group.to_string(),
        group_version: version,
        auto_offset_reset: reset,
    }
}

fn receive_request(assignment: &Assignment) -> ReceiveRequest {
    ReceiveRequest {
        assignment: assignment.clone(),
        last_known_offset: 0,
    }
}

async fn next_reply<T>(stream: &mut BoxStream<'static, Result<T, Status>>) -> T {
    timeout(WAIT, stream.next())
        .await
        .expect("timed out waiting for a reply")
        .expect("stream ended unexpectedly")
        .expect("stream yielded an error")
}

/// Waits until the subscription produced the assignment for `partition`.
async fn assignment_for(
    replies: &mut BoxStream<'static, Result<SubscribeReply, Status>>,
    partition: u32,
) -> Assignment {
    loop {
        let reply = next_reply(replies).await;
        if reply.assignment.partition == partition {
            return reply.assignment;
        }
    }
}

#[tokio::test]
async fn test_publish_then_subscribe_from_earliest() {
    let (service, _) = build_service(1);
    let key = Uuid::new_v4();

    let mut published_partition = 0;
    for i in 0..5u8 {
        let reply = service
            .publish(publish_request("events", key.as_bytes(), &[i]))
            .await
            .unwrap();
        assert_eq!(reply.topic, "events");
        assert_eq!(reply.offset, i as u64);
        published_partition = reply.partition;
    }

    let mut subscription =
        service.subscribe(subscribe_request("events", "g", 0, AutoOffsetReset::Earliest));
    let assignment = assignment_for(&mut subscription, published_partition).await;

    let mut records = service.receive(receive_request(&assignment));
    for expected in 0..5u64 {
        let reply = next_reply(&mut records).await;
        assert_eq!(reply.record.offset, expected);
        assert!(!reply.record.replay);
        assert_eq!(&reply.record.value[..], &[expected as u8]);
    }

    service
        .publish(publish_request("events", key.as_bytes(), b"sixth"))
        .await
        .unwrap();
    let reply = next_reply(&mut records).await;
    assert_eq!(reply.record.offset, 5);
    assert_eq!(&reply.record.value[..], b"sixth");
}

#[tokio::test]
async fn test_subscribe_from_latest_sees_only_new_envelope() {
    let (service, _) = build_service(1);
    let key = Uuid::new_v4();

    for i in 0..5u8 {
        service
            .publish(publish_request("events", key.as_bytes(), &[i]))
            .await
            .unwrap();
    }

    let mut subscription =
        service.subscribe(subscribe_request("events", "g", 0, AutoOffsetReset::Latest));
    let assignment = assignment_for(&mut subscription, 0).await;

    let publish_reply = service
        .publish(publish_request("events", key.as_bytes(), b"only-this"))
        .await
        .unwrap();

    let mut records = service.receive(receive_request(&assignment));
    let reply = next_reply(&mut records).await;
    assert_eq!(reply.record.offset, publish_reply.offset);
    assert_eq!(&reply.record.key[..], key.as_bytes());
    assert_eq!(&reply.record.value[..], b"only-this");
    assert_eq!(assignment.partition, publish_reply.partition);
}

#[tokio::test]
async fn test_seek_resumes_after_committed_offset() {
    let (service, positions) = build_service(1);

    for i in 0..10u8 {
        service
            .publish(publish_request("events", b"k", &[i]))
            .await
            .unwrap();
    }
    positions
        .update("events", &GroupId::new("g", 1), 0, 6)
        .await
        .unwrap();

    let mut subscription =
        service.subscribe(subscribe_request("events", "g", 1, AutoOffsetReset::Unset));
    let assignment = assignment_for(&mut subscription, 0).await;

    let mut records = service.receive(receive_request(&assignment));
    for expected in 7..10u64 {
        let reply = next_reply(&mut records).await;
        assert_eq!(reply.record.offset, expected);
        assert!(!reply.record.replay);
    }
}

/// The replay stamp uses the max committed offset across every version of
/// the group name, while the resume seek of an unversioned group uses the
/// smallest version's offsets. A partition committed only under a higher
/// version is therefore replayed from the start, flagged up to the
/// watermark.
#[tokio::test]
async fn test_replay_flag_uses_max_across_versions() {
    let (service, positions) = build_service(4);
    let key = Uuid::new_v4();

    let mut partition = 0;
    for i in 0..8u8 {
        let reply = service
            .publish(publish_request("events", key.as_bytes(), &[i]))
            .await
            .unwrap();
        partition = reply.partition;
    }

    // smallest version knows nothing about this partition, so no seek;
    // a later version carries the committed offset that drives the flag
    let other_partition = (partition + 1) % 4;
    positions
        .update("events", &GroupId::new("g", 1), other_partition, 99)
        .await
        .unwrap();
    positions
        .update("events", &GroupId::new("g", 2), partition, 3)
        .await
        .unwrap();

    let mut subscription =
        service.subscribe(subscribe_request("events", "g", 0, AutoOffsetReset::Earliest));
    let assignment = assignment_for(&mut subscription, partition).await;

    let mut records = service.receive(receive_request(&assignment));
    for expected in 0..8u64 {
        let reply = next_reply(&mut records).await;
        assert_eq!(reply.record.offset, expected);
        assert_eq!(reply.record.replay, expected <= 3);
    }
}

struct RejectBadKeys;

#[async_trait]
impl RecordPreProcessor for RejectBadKeys {
    fn name(&self) -> &'static str {
        "RejectBadKeys"
    }

    async fn pre_process(&self, envelope: Envelope) -> GatewayResult<Envelope> {
        if &envelope.key[..] == b"bad" {
            return Err(GatewayError::IllegalState("key is not allowed".to_string()));
        }
        Ok(envelope)
    }
}

#[tokio::test]
async fn test_pre_processor_failure_reports_stage_identity() {
    let records = Arc::new(MemoryRecordsStorage::new(1));
    let positions = Arc::new(MemoryPositionsStorage::new());
    let service = GatewayService::new(
        records,
        positions,
        PreProcessorChain::new(vec![Arc::new(RejectBadKeys)]),
        PostProcessorChain::default(),
    );

    let status = service
        .publish(publish_request("events", b"bad", b"v"))
        .await
        .unwrap_err();
    assert!(status.message.contains("RejectBadKeys"));
    assert!(status.message.contains("key is not allowed"));

    // a good key still goes through the same chain
    service
        .publish(publish_request("events", b"good", b"v"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_session_teardown_cleans_registry() {
    let (service, _) = build_service(1);
    service
        .publish(publish_request("events", b"k", b"v"))
        .await
        .unwrap();

    let mut subscription =
        service.subscribe(subscribe_request("events", "g", 0, AutoOffsetReset::Earliest));
    let assignment = assignment_for(&mut subscription, 0).await;
    assert!(service
        .registry()
        .source(&assignment.session_id, assignment.partition)
        .is_some());

    // client cancel
    drop(subscription);

    timeout(WAIT, async {
        while service.registry().session_exists(&assignment.session_id) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("registry was not cleaned after cancel");
    assert!(service
        .registry()
        .source(&assignment.session_id, assignment.partition)
        .is_none());

    // and a late RECEIVE completes empty instead of failing
    let mut records = service.receive(receive_request(&assignment));
    let next: Option<Result<ReceiveReply, Status>> =
        timeout(WAIT, records.next()).await.expect("receive hung");
    assert!(next.is_none());
}

#[tokio::test]
async fn test_receive_with_unknown_session_completes_empty() {
    let (service, _) = build_service(1);
    let assignment = Assignment {
        session_id: "no-such-session".to_string(),
        partition: 0,
    };
    let mut records = service.receive(receive_request(&assignment));
    assert!(timeout(WAIT, records.next()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_ack_with_unknown_session_completes_empty() {
    let (service, _) = build_service(1);
    let result = service
        .ack(AckRequest {
            assignment: Assignment {
                session_id: "no-such-session".to_string(),
                partition: 0,
            },
            offset: 42,
        })
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_ack_commits_through_the_stored_group() {
    let (service, positions) = build_service(1);
    service
        .publish(publish_request("events", b"k", b"v"))
        .await
        .unwrap();

    // legacy wire form is canonicalized once on ingress
    let mut subscription = service.subscribe(subscribe_request(
        "events",
        "my-group-v3",
        0,
        AutoOffsetReset::Earliest,
    ));
    let assignment = assignment_for(&mut subscription, 0).await;

    service
        .ack(AckRequest {
            assignment: assignment.clone(),
            offset: 17,
        })
        .await
        .unwrap();

    let committed = positions
        .find_all("events", &GroupId::new("my-group", 3))
        .await
        .unwrap();
    assert_eq!(committed.get(&assignment.partition), Some(&17));

    // and GETOFFSETS sees the same map through the service
    let reply = service
        .get_offsets(GetOffsetsRequest {
            topic: "events".to_string(),
            group: "my-group".to_string(),
            group_version: 3,
        })
        .await
        .unwrap();
    assert_eq!(reply.offsets.get(&assignment.partition), Some(&17));
}

#[tokio::test]
async fn test_get_offsets_without_commits_is_empty() {
    let (service, _) = build_service(1);
    let reply = service
        .get_offsets(GetOffsetsRequest {
            topic: "events".to_string(),
            group: "nobody".to_string(),
            group_version: 0,
        })
        .await
        .unwrap();
    assert!(reply.offsets.is_empty());
}
