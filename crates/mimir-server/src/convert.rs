use mimir_proto::v1 as pb;
use mimir_types::{codec, LocalPartitionStateEnum, MessageGroup, MimirError, NetworkMessage, PartitionStates};
use tonic::{Code, Status};

pub fn group_to_proto(group: MessageGroup) -> pb::MessageGroup {
    match group {
        MessageGroup::Table => pb::MessageGroup::Table,
    }
}

pub fn proto_group(raw: i32) -> Result<MessageGroup, MimirError> {
    match pb::MessageGroup::try_from(raw) {
        Ok(pb::MessageGroup::Table) => Ok(MessageGroup::Table),
        Ok(pb::MessageGroup::Unspecified) | Err(_) => {
            Err(MimirError::UnexpectedMessage(format!("unknown message group {raw}")))
        }
    }
}

pub fn encode_envelope(sender: &str, message: &NetworkMessage) -> Result<pb::Envelope, MimirError> {
    Ok(pb::Envelope {
        sender: sender.to_string(),
        group: group_to_proto(message.group()) as i32,
        payload: codec::encode(message)?,
    })
}

/// Decodes the payload and checks it against the group the envelope claims.
pub fn decode_envelope(envelope: &pb::Envelope) -> Result<NetworkMessage, MimirError> {
    let group = proto_group(envelope.group)?;
    let message: NetworkMessage = codec::decode(&envelope.payload)?;
    if message.group() != group {
        return Err(MimirError::UnexpectedMessage(format!(
            "payload of group {:?} in envelope of group {group:?}",
            message.group()
        )));
    }
    Ok(message)
}

pub fn state_to_proto(state: LocalPartitionStateEnum) -> pb::PartitionState {
    match state {
        LocalPartitionStateEnum::Healthy => pb::PartitionState::Healthy,
        LocalPartitionStateEnum::Initializing => pb::PartitionState::Initializing,
        LocalPartitionStateEnum::InstallingSnapshot => pb::PartitionState::InstallingSnapshot,
        LocalPartitionStateEnum::CatchingUp => pb::PartitionState::CatchingUp,
        LocalPartitionStateEnum::Broken => pb::PartitionState::Broken,
        LocalPartitionStateEnum::Unavailable => pb::PartitionState::Unavailable,
    }
}

pub fn partition_states_to_proto(states: PartitionStates) -> pb::PartitionStatesResponse {
    let replicas = states
        .into_iter()
        .flat_map(|(partition, by_node)| {
            by_node.into_iter().map(move |(node_name, state)| pb::ReplicaState {
                table_id: partition.table_id,
                partition_id: partition.partition_id,
                node_name,
                state: state_to_proto(state.state) as i32,
                log_index: state.log_index,
            })
        })
        .collect();
    pb::PartitionStatesResponse { replicas }
}

pub fn mimir_to_status(err: MimirError) -> Status {
    match &err {
        MimirError::ZoneNotFound(_) | MimirError::TableNotFound(_) => Status::not_found(err.to_string()),
        MimirError::TableNotInZone { .. } => Status::invalid_argument(err.to_string()),
        MimirError::DuplicateOperation(_) => Status::already_exists(err.to_string()),
        MimirError::Timeout => Status::deadline_exceeded(err.to_string()),
        MimirError::NodeUnreachable(_) | MimirError::TrackerClosed => Status::unavailable(err.to_string()),
        MimirError::Cancelled => Status::cancelled(err.to_string()),
        MimirError::Transport(_) | MimirError::UnexpectedMessage(_) | MimirError::Codec(_) => {
            Status::internal(err.to_string())
        }
    }
}

/// Client-side view of a failed `Invoke`.
pub fn status_to_mimir(recipient: &str, status: Status) -> MimirError {
    match status.code() {
        Code::Unavailable => MimirError::NodeUnreachable(recipient.to_string()),
        Code::DeadlineExceeded => MimirError::Timeout,
        Code::InvalidArgument => MimirError::UnexpectedMessage(status.message().to_string()),
        _ => MimirError::Transport(format!("{recipient}: {}", status.message())),
    }
}
