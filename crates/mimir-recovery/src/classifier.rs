//! Translates consensus internals into operator-facing partition health.
//!
//! Classification happens in two passes. Each node classifies its own replicas in
//! isolation ([`classify`]). Once the coordinator holds every report for a partition,
//! [`normalize`] compares replicas against the most advanced one and marks laggards as
//! catching up. `CatchingUp` can only come from the second pass.

use std::collections::BTreeMap;

use mimir_cluster::{RaftNodeState, RaftNodeView};
use mimir_types::{LocalPartitionState, LocalPartitionStateEnum, PartitionStates, TablePartitionId};

/// Minimum log lag behind the most advanced peer that turns `Healthy` into `CatchingUp`.
pub const CATCH_UP_THRESHOLD: u64 = 10;

/// Raw node state lookup. Total: unrecognized states are reported as broken.
pub fn convert_state(state: RaftNodeState) -> LocalPartitionStateEnum {
    match state {
        RaftNodeState::Leader
        | RaftNodeState::Transferring
        | RaftNodeState::Candidate
        | RaftNodeState::Follower => LocalPartitionStateEnum::Healthy,
        RaftNodeState::Error => LocalPartitionStateEnum::Broken,
        RaftNodeState::Uninitialized => LocalPartitionStateEnum::Initializing,
        RaftNodeState::Shutting | RaftNodeState::Shutdown | RaftNodeState::End => {
            LocalPartitionStateEnum::Unavailable
        }
        RaftNodeState::Unknown(_) => LocalPartitionStateEnum::Broken,
    }
}

/// Per-node classification of one replica.
pub fn classify(view: &RaftNodeView) -> LocalPartitionStateEnum {
    let mut state = convert_state(view.state);
    if state == LocalPartitionStateEnum::Healthy {
        // No log yet: the replica has not accepted a leader's configuration.
        if view.last_log_index == 0 {
            state = LocalPartitionStateEnum::Initializing;
        }
        // Evaluated after the empty-log check and takes precedence over it.
        if view.installing_snapshot {
            state = LocalPartitionStateEnum::InstallingSnapshot;
        }
    }
    state
}

pub fn local_partition_state(partition_id: TablePartitionId, view: &RaftNodeView) -> LocalPartitionState {
    LocalPartitionState {
        partition_id,
        state: classify(view),
        log_index: view.last_log_index,
    }
}

/// Cluster-relative pass. Must only run once every report for a partition is known.
pub fn normalize(states: PartitionStates, threshold: u64) -> PartitionStates {
    states
        .into_iter()
        .map(|(partition_id, by_node)| {
            let max_index = by_node.values().map(|s| s.log_index).max().unwrap_or(0);
            let by_node: BTreeMap<_, _> = by_node
                .into_iter()
                .map(|(node, mut state)| {
                    if state.state == LocalPartitionStateEnum::Healthy
                        && max_index.saturating_sub(state.log_index) >= threshold
                    {
                        state.state = LocalPartitionStateEnum::CatchingUp;
                    }
                    (node, state)
                })
                .collect();
            (partition_id, by_node)
        })
        .collect()
}
