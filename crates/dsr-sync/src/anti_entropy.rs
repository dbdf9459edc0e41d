//! Startup protocol: bring a new replica up to date before it goes steady.
//!
//! ```text
//! Bootstrapping ──(seed file loaded)──▶ Synchronizing ──answer joined──────▶ Steady
//!                                             └─────────attempts used up───▶ Steady
//! ```
//!
//! The delta subscription is live before the first request goes out, so
//! deltas published while the answer is in flight are joined as they arrive;
//! join commutes, so the order against the full graph does not matter.

use crate::error::{Result, SyncError};
use crate::message::GraphRequest;
use crate::network::{Topic, Transport};
use crate::replica::Shared;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Where a replica is in its startup protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    Bootstrapping,
    Synchronizing,
    Steady,
}

pub(crate) async fn bootstrap<T: Transport>(shared: &Shared<T>) -> Result<()> {
    if let Some(path) = shared.config.seed_file.clone() {
        let mutation = shared.store.write().read_from_json_file(&path)?;
        info!(
            path = %path.display(),
            nodes = shared.store.read().size(),
            "graph seeded from file"
        );
        shared.publish_deltas(mutation.deltas);
        shared.events.emit(&mutation.events);
    }

    shared.set_state(SyncState::Synchronizing);
    match request_full_graph(shared).await {
        Ok(()) => Ok(()),
        Err(SyncError::Timeout(waited)) => {
            warn!(?waited, "no full graph received, starting alone");
            shared.set_state(SyncState::Steady);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Publish requests until the merge task reports a joined answer.
async fn request_full_graph<T: Transport>(shared: &Shared<T>) -> Result<()> {
    let timeout = shared.config.sync_timeout();
    let attempts = shared.config.sync_attempts.max(1);

    for attempt in 1..=attempts {
        debug!(attempt, "requesting full graph");
        shared.send(
            Topic::GraphRequest,
            &GraphRequest {
                from: shared.config.agent_name.clone(),
            },
        )?;

        let deadline = Instant::now() + timeout;
        let mut poll = tokio::time::interval(shared.config.sync_poll_interval());
        while Instant::now() < deadline {
            poll.tick().await;
            if shared.sync_state() == SyncState::Steady {
                return Ok(());
            }
        }
    }
    Err(SyncError::Timeout(timeout * attempts))
}
