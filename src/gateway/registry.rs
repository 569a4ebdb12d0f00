//! Process-wide session registry.
//!
//! Two maps, both keyed by session id: the stored subscription (what ACK
//! needs to commit offsets) and the per-partition source handles (what
//! RECEIVE drains). Entries are handed out as `Arc`s and removed with
//! identity-guarded `remove_if`, so a teardown racing a re-minted session id
//! can never evict the newcomer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tokio::sync::{Mutex, OnceCell, OwnedMutexGuard};

use crate::service::GatewayResult;
use crate::storage::{GroupId, PartitionSource, RecordStream};

pub type SessionId = String;

/// partition -> handle, one map per live session
pub type SessionSources = DashMap<u32, Arc<SourceHandle>>;

/// What a session keeps between SUBSCRIBE and ACK.
#[derive(Debug)]
pub struct StoredSubscription {
    pub topic: String,
    pub group_id: GroupId,
}

/// Per-(session, partition) delivery state: the record stream (behind a
/// mutex so one RECEIVE drains at a time and a cancelled RECEIVE leaves the
/// stream resumable), the memoized seek gate, and the replay watermark.
pub struct SourceHandle {
    partition: u32,
    source: Arc<dyn PartitionSource>,
    records: Arc<Mutex<RecordStream>>,
    resume_offset: Option<u64>,
    seek: OnceCell<GatewayResult<()>>,
    /// partition -> max committed offset across all group versions
    latest_acked: HashMap<u32, u64>,
    detached: AtomicBool,
    owner: Weak<SessionSources>,
}

impl SourceHandle {
    pub(crate) fn new(
        source: Arc<dyn PartitionSource>,
        resume_offset: Option<u64>,
        latest_acked: HashMap<u32, u64>,
        owner: Weak<SessionSources>,
    ) -> Arc<SourceHandle> {
        let partition = source.partition();
        let records = Arc::new(Mutex::new(source.clone().records()));
        Arc::new(SourceHandle {
            partition,
            source,
            records,
            resume_offset,
            seek: OnceCell::new(),
            latest_acked,
            detached: AtomicBool::new(false),
            owner,
        })
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    /// The watermark the replay flag is stamped against, `-1` when nothing
    /// was ever committed for this partition.
    pub fn last_seen_offset(&self) -> i64 {
        self.latest_acked
            .get(&self.partition)
            .map(|offset| *offset as i64)
            .unwrap_or(-1)
    }

    pub(crate) async fn lock_records(&self) -> OwnedMutexGuard<RecordStream> {
        self.records.clone().lock_owned().await
    }

    /// One-shot seek gate: the first drain performs the seek (when there is
    /// a resume offset), every drain awaits the memoized outcome.
    pub(crate) async fn ensure_seek(&self) -> GatewayResult<()> {
        self.seek
            .get_or_init(|| async {
                match self.resume_offset {
                    Some(offset) => self.source.seek_to(offset).await,
                    None => Ok(()),
                }
            })
            .await
            .clone()
    }

    /// Exactly-once removal from the owning session map; terminal signals of
    /// the record stream funnel through here. Removal compares identity so a
    /// handle installed by a newer assignment event is left alone.
    pub(crate) fn detach(&self) {
        if self.detached.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(owner) = self.owner.upgrade() {
            let me = self as *const SourceHandle;
            owner.remove_if(&self.partition, |_, current| {
                std::ptr::eq(Arc::as_ptr(current), me)
            });
        }
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    subscriptions: DashMap<SessionId, Arc<StoredSubscription>>,
    sources: DashMap<SessionId, Arc<SessionSources>>,
}

impl SessionRegistry {
    pub fn new() -> SessionRegistry {
        SessionRegistry::default()
    }

    /// Registers a fresh session: the stored subscription plus an empty
    /// handle map, both keyed by the session id.
    pub(crate) fn insert_session(
        &self,
        session_id: &SessionId,
        stored: Arc<StoredSubscription>,
    ) -> Arc<SessionSources> {
        self.subscriptions.insert(session_id.clone(), stored);
        self.sources
            .entry(session_id.clone())
            .or_insert_with(|| Arc::new(DashMap::new()))
            .value()
            .clone()
    }

    pub fn subscription(&self, session_id: &str) -> Option<Arc<StoredSubscription>> {
        self.subscriptions.get(session_id).map(|s| s.clone())
    }

    pub fn source(&self, session_id: &str, partition: u32) -> Option<Arc<SourceHandle>> {
        self.sources
            .get(session_id)
            .and_then(|sources| sources.get(&partition).map(|h| h.clone()))
    }

    pub fn session_exists(&self, session_id: &str) -> bool {
        self.subscriptions.contains_key(session_id)
    }

    pub fn session_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Teardown: removes both entries, but only if they are still the ones
    /// this session installed.
    pub(crate) fn remove_session(
        &self,
        session_id: &str,
        stored: &Arc<StoredSubscription>,
        session_sources: &Arc<SessionSources>,
    ) {
        self.sources
            .remove_if(session_id, |_, current| Arc::ptr_eq(current, session_sources));
        self.subscriptions
            .remove_if(session_id, |_, current| Arc::ptr_eq(current, stored));
    }
}
