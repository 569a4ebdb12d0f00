//! The per-RECEIVE record drain.
//!
//! A drain holds the handle's stream mutex for as long as the caller pulls,
//! awaits the memoized seek gate before the first record, and forwards the
//! underlying source verbatim. Terminal signals of the source (end or
//! error) detach the handle from the registry exactly once; dropping the
//! drain (client cancel) leaves the handle registered and the stream
//! resumable.

use std::sync::Arc;

use futures::stream;
use futures::StreamExt;
use tokio::sync::OwnedMutexGuard;

use super::registry::SourceHandle;
use crate::storage::RecordStream;

struct DrainState {
    handle: Arc<SourceHandle>,
    guard: Option<OwnedMutexGuard<RecordStream>>,
}

pub(crate) fn drain(handle: Arc<SourceHandle>) -> RecordStream {
    let state = DrainState {
        handle,
        guard: None,
    };
    Box::pin(stream::try_unfold(state, |mut state| async move {
        if state.guard.is_none() {
            let guard = state.handle.lock_records().await;
            if let Err(e) = state.handle.ensure_seek().await {
                state.handle.detach();
                return Err(e);
            }
            state.guard = Some(guard);
        }
        match state.guard.as_mut().expect("guard held").next().await {
            Some(Ok(record)) => Ok(Some((record, state))),
            Some(Err(e)) => {
                state.handle.detach();
                Err(e)
            }
            None => {
                state.handle.detach();
                Ok(None)
            }
        }
    }))
}
