//! Remote path: subscription tasks feeding a single merge task.

use crate::anti_entropy::SyncState;
use crate::error::Result;
use crate::message::{decode, DeltaMessage, GraphAnswer, GraphRequest};
use crate::network::{Envelope, PeerId, Topic, Transport};
use crate::replica::Shared;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// A decoded message waiting for the merge task.
#[derive(Debug)]
pub(crate) enum Inbound {
    Delta(DeltaMessage),
    Request(GraphRequest),
    Answer(GraphAnswer),
}

fn decode_envelope(envelope: &Envelope) -> Result<Inbound> {
    Ok(match envelope.topic {
        Topic::Delta => Inbound::Delta(decode(&envelope.payload)?),
        Topic::GraphRequest => Inbound::Request(decode(&envelope.payload)?),
        Topic::GraphAnswer => Inbound::Answer(decode(&envelope.payload)?),
    })
}

/// Decode one topic's envelopes and forward them to the merge task.
///
/// Own echoes and malformed payloads are dropped here.
pub(crate) fn spawn_subscription(
    topic: Topic,
    mut rx: mpsc::Receiver<Envelope>,
    local: PeerId,
    merge_tx: mpsc::Sender<Inbound>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            if envelope.origin == local {
                trace!(%topic, "dropping echo");
                continue;
            }
            match decode_envelope(&envelope) {
                Ok(message) => {
                    if merge_tx.send(message).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(%topic, origin = %envelope.origin, error = %e, "dropping malformed message");
                }
            }
        }
        debug!(%topic, "subscription closed");
    })
}

/// The only place remote state enters the store.
pub(crate) async fn merge_loop<T: Transport>(shared: Arc<Shared<T>>, mut rx: mpsc::Receiver<Inbound>) {
    while let Some(message) = rx.recv().await {
        match message {
            Inbound::Delta(message) => {
                let events = shared.store.write().join_delta(&message.delta);
                trace!(
                    from = message.agent_id,
                    id = message.delta.id,
                    events = events.len(),
                    "delta joined"
                );
                shared.events.emit(&events);
            }
            Inbound::Request(request) => answer(&shared, request),
            Inbound::Answer(answer) => accept(&shared, answer),
        }
    }
    debug!("merge loop stopped");
}

fn answer<T: Transport>(shared: &Shared<T>, request: GraphRequest) {
    if request.from == shared.config.agent_name {
        return;
    }
    // A replica that is still catching up would hand out a partial graph.
    if shared.sync_state() != SyncState::Steady {
        debug!(to = %request.from, "not answering while synchronizing");
        return;
    }

    let state = shared.store.read().export_state();
    info!(to = %request.from, nodes = state.nodes.len(), "answering full graph request");
    let answer = GraphAnswer {
        from: shared.config.agent_name.clone(),
        to: request.from,
        state,
    };
    if let Err(e) = shared.send(Topic::GraphAnswer, &answer) {
        warn!(to = %answer.to, error = %e, "full graph answer not sent");
    }
}

fn accept<T: Transport>(shared: &Shared<T>, answer: GraphAnswer) {
    if answer.to != shared.config.agent_name {
        trace!(to = %answer.to, "answer for another agent");
        return;
    }
    if shared.sync_state() != SyncState::Synchronizing {
        debug!(from = %answer.from, "dropping extra full graph answer");
        return;
    }

    let events = shared.store.write().join_full_graph(&answer.state);
    shared.set_state(SyncState::Steady);
    info!(from = %answer.from, nodes = answer.state.nodes.len(), "full graph joined");
    shared.events.emit(&events);
}
