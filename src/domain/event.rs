use super::message::Voucher;
use super::types::ObjectiveId;

/// What one pass through the engine changed, for the API-facing publisher.
///
/// Rejected objectives are reported as completed: they are finished, just not
/// successfully. `failed_objectives` lists objectives that could not be created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineEvent {
    pub completed_objectives: Vec<ObjectiveId>,
    pub failed_objectives: Vec<ObjectiveId>,
    pub received_vouchers: Vec<Voucher>,
}

impl EngineEvent {
    pub fn merge(&mut self, other: EngineEvent) {
        self.completed_objectives
            .extend(other.completed_objectives);
        self.failed_objectives.extend(other.failed_objectives);
        self.received_vouchers.extend(other.received_vouchers);
    }

    pub fn is_empty(&self) -> bool {
        self.completed_objectives.is_empty()
            && self.failed_objectives.is_empty()
            && self.received_vouchers.is_empty()
    }
}
