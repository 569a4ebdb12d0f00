//! The per-SUBSCRIBE state machine.
//!
//! One driver task per call consumes assignment events from the records
//! storage and fans each event out into source handles and assignment
//! replies. Fan-out is switch-latest: a newer event drops the in-flight
//! fan-out of the previous one, so a rebalance can never leave orphaned
//! sources behind. When the driver ends for any reason it removes the
//! session from the registry.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::debug;

use super::registry::{SessionId, SessionRegistry, SessionSources, SourceHandle, StoredSubscription};
use crate::protocol::{Assignment, SubscribeReply};
use crate::service::{GatewayError, GatewayResult};
use crate::storage::{AssignmentStream, PartitionSource, PositionsStorage};

type FanOut = Pin<Box<dyn Future<Output = GatewayResult<()>> + Send>>;

pub(crate) async fn run(
    registry: Arc<SessionRegistry>,
    positions: Arc<dyn PositionsStorage>,
    session_id: SessionId,
    stored: Arc<StoredSubscription>,
    session_sources: Arc<SessionSources>,
    mut events: AssignmentStream,
    tx: mpsc::Sender<GatewayResult<SubscribeReply>>,
) {
    let mut fan_out: Option<FanOut> = None;
    loop {
        tokio::select! {
            maybe_event = events.next() => match maybe_event {
                Some(Ok(sources)) => {
                    // switch-latest: a pending fan-out is superseded, drop it
                    fan_out = Some(Box::pin(fan_out_event(
                        sources,
                        positions.clone(),
                        stored.clone(),
                        session_id.clone(),
                        session_sources.clone(),
                        tx.clone(),
                    )));
                }
                Some(Err(e)) => {
                    let _ = tx.send(Err(e)).await;
                    break;
                }
                None => break,
            },
            result = async { fan_out.as_mut().unwrap().await }, if fan_out.is_some() => {
                fan_out = None;
                match result {
                    Ok(()) => {}
                    // reply channel gone: the client cancelled
                    Err(GatewayError::ChannelSend(_)) => break,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                }
            },
            _ = tx.closed() => break,
        }
    }
    debug!("subscribe session {} terminated, cleaning registry", session_id);
    registry.remove_session(&session_id, &stored, &session_sources);
}

/// Applies one assignment event: committed offsets are fetched across all
/// versions of the group name, every assigned partition gets a fresh handle
/// (replacing any previous one), and the handle is installed **before** the
/// assignment reply is emitted so a racing RECEIVE can find it.
async fn fan_out_event(
    sources: Vec<Arc<dyn PartitionSource>>,
    positions: Arc<dyn PositionsStorage>,
    stored: Arc<StoredSubscription>,
    session_id: SessionId,
    session_sources: Arc<SessionSources>,
    tx: mpsc::Sender<GatewayResult<SubscribeReply>>,
) -> GatewayResult<()> {
    let acked = positions
        .find_all_versions_by_group(&stored.topic, stored.group_id.name())
        .await?;

    // replay watermark: per partition, the max committed offset over every
    // known version of the group
    let mut latest_acked: HashMap<u32, u64> = HashMap::new();
    for offsets in acked.values() {
        for (&partition, &offset) in offsets {
            latest_acked
                .entry(partition)
                .and_modify(|o| *o = (*o).max(offset))
                .or_insert(offset);
        }
    }

    // resume source: the exact version's offsets for a versioned group, the
    // smallest version's otherwise
    let resume_offsets: HashMap<u32, u64> = match stored.group_id.version() {
        Some(version) => acked.get(&version).cloned().unwrap_or_default(),
        None => acked.values().next().cloned().unwrap_or_default(),
    };

    for source in sources {
        let partition = source.partition();
        let resume_offset = resume_offsets.get(&partition).map(|last| last + 1);
        let handle = SourceHandle::new(
            source,
            resume_offset,
            latest_acked.clone(),
            Arc::downgrade(&session_sources),
        );
        session_sources.insert(partition, handle);

        let reply = SubscribeReply {
            assignment: Assignment {
                session_id: session_id.clone(),
                partition,
            },
        };
        tx.send(Ok(reply))
            .await
            .map_err(|e| GatewayError::ChannelSend(e.to_string()))?;
    }
    Ok(())
}
