//! Wire messages and their JSON codec.

use crate::error::{Result, SyncError};
use dsr_core::AgentId;
use dsr_graph::{GraphState, NodeDelta};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A node delta published after a local mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeltaMessage {
    pub agent_id: AgentId,
    pub delta: NodeDelta,
}

/// Sent by a replica that wants the full graph.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphRequest {
    pub from: String,
}

/// A full graph addressed to one requester.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphAnswer {
    pub from: String,
    pub to: String,
    pub state: GraphState,
}

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(message).map_err(|e| SyncError::Codec(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    serde_json::from_slice(payload).map_err(|e| SyncError::Codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsr_graph::{GraphStore, Node};

    #[test]
    fn test_delta_message_codec() {
        let mut store = GraphStore::new(4);
        let mutation = store
            .insert_or_assign_node(Node::new(1, "world", "world"))
            .unwrap();
        let message = DeltaMessage {
            agent_id: 4,
            delta: mutation.deltas[0].clone(),
        };

        let bytes = encode(&message).unwrap();
        let back: DeltaMessage = decode(&bytes).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn test_answer_carries_tombstones() {
        let mut store = GraphStore::new(1);
        store
            .insert_or_assign_node(Node::new(1, "world", "world"))
            .unwrap();
        store.delete_node(1).unwrap();

        let answer = GraphAnswer {
            from: "a".into(),
            to: "b".into(),
            state: store.export_state(),
        };
        let back: GraphAnswer = decode(&encode(&answer).unwrap()).unwrap();
        assert!(back.state.nodes.is_empty());
        assert!(!back.state.context.is_empty());
    }

    #[test]
    fn test_garbage_is_codec_error() {
        let result: Result<GraphRequest> = decode(b"{not json");
        assert!(matches!(result, Err(SyncError::Codec(_))));
    }
}
