use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// The document changed; push the completion to the remote service.
    LocalToRemote,
    /// The remote task changed; write the completion into the document.
    RemoteToLocal,
}

impl SyncDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncDirection::LocalToRemote => "local_to_remote",
            SyncDirection::RemoteToLocal => "remote_to_local",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionStatus {
    Pending,
    Applied,
    Failed,
}

/// A directional completion change for an external applier to carry out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncInstruction {
    pub id: String,
    pub direction: SyncDirection,
    pub task_id: String,
    pub new_completed: bool,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    pub status: InstructionStatus,
}

impl SyncInstruction {
    pub fn new(
        direction: SyncDirection,
        task_id: &str,
        new_completed: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Ulid::new().to_string(),
            direction,
            task_id: task_id.to_string(),
            new_completed,
            created_at,
            retry_count: 0,
            status: InstructionStatus::Pending,
        }
    }

    pub fn mark_applied(&mut self) {
        self.status = InstructionStatus::Applied;
    }

    pub fn mark_failed(&mut self) {
        self.status = InstructionStatus::Failed;
        self.retry_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_instruction_is_pending_with_ulid() {
        let now = Utc::now();
        let mut instruction = SyncInstruction::new(SyncDirection::LocalToRemote, "abc", true, now);
        assert_eq!(instruction.status, InstructionStatus::Pending);
        assert_eq!(instruction.id.len(), 26);
        instruction.mark_failed();
        assert_eq!(instruction.retry_count, 1);
        assert_eq!(
            serde_json::to_value(SyncDirection::RemoteToLocal).expect("json"),
            serde_json::json!("remote_to_local")
        );
    }
}
