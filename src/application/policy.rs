use crate::domain::objective::{Objective, RelatedEntity};
use crate::domain::types::{Address, ObjectiveStatus};
use std::collections::HashSet;

/// Decides whether a peer-initiated objective should be joined.
pub trait PolicyMaker: Send + Sync {
    fn should_approve(&self, objective: &dyn Objective) -> bool;
}

/// Approves anything still waiting for approval.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissivePolicy;

impl PolicyMaker for PermissivePolicy {
    fn should_approve(&self, objective: &dyn Objective) -> bool {
        objective.status() == ObjectiveStatus::Unapproved
    }
}

/// Approves objectives only when every channel participant is known.
#[derive(Debug, Default, Clone)]
pub struct AllowListPolicy {
    allowed: HashSet<Address>,
}

impl AllowListPolicy {
    pub fn new(allowed: impl IntoIterator<Item = Address>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }

    pub fn allow(&mut self, address: Address) {
        self.allowed.insert(address);
    }
}

impl PolicyMaker for AllowListPolicy {
    fn should_approve(&self, objective: &dyn Objective) -> bool {
        if objective.status() != ObjectiveStatus::Unapproved {
            return false;
        }
        objective.related().iter().all(|entity| {
            let participants = match entity {
                RelatedEntity::Channel(c) => c.participants(),
                RelatedEntity::ConsensusChannel(c) => c.participants(),
            };
            participants.iter().all(|p| self.allowed.contains(p))
        })
    }
}
