use mimir_types::TablePartitionId;

/// Single metastore key used as the recovery command mailbox.
pub const RECOVERY_TRIGGER_KEY: &[u8] = b"disaster.recovery.trigger";

const STABLE_ASSIGNMENTS_PREFIX: &str = "assignments.stable.";
const PENDING_ASSIGNMENTS_PREFIX: &str = "assignments.pending.";

/// `assignments.stable.<table>_part_<partition>`
pub fn stable_assignments_key(id: TablePartitionId) -> Vec<u8> {
    format!("{STABLE_ASSIGNMENTS_PREFIX}{id}").into_bytes()
}

/// `assignments.pending.<table>_part_<partition>`
pub fn pending_assignments_key(id: TablePartitionId) -> Vec<u8> {
    format!("{PENDING_ASSIGNMENTS_PREFIX}{id}").into_bytes()
}
