//! Two-party ledger channels in steady state.
//!
//! A `ConsensusChannel` is updated by a leader/follower proposal protocol
//! instead of the objective machinery: the leader (participant 0) signs
//! proposals that add or remove guarantees, and the follower applies them
//! strictly in turn order.

use super::amount::Balance;
use super::channel::Channel;
use super::state::{Allocation, FixedPart, Outcome, Signature, State};
use super::types::{Address, Destination, ObjectiveId};
use crate::error::{EngineError, Result};
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub const LEADER: usize = 0;
pub const FOLLOWER: usize = 1;

/// Funds locked in the ledger on behalf of another channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guarantee {
    pub target: Destination,
    pub left_amount: Balance,
    pub right_amount: Balance,
}

impl Guarantee {
    pub fn total(&self) -> Result<Balance> {
        self.left_amount.try_add(self.right_amount)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerOutcome {
    pub asset: Address,
    pub leader: Allocation,
    pub follower: Allocation,
    pub guarantees: BTreeMap<Destination, Guarantee>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Proposal {
    AddGuarantee(Guarantee),
    RemoveGuarantee {
        target: Destination,
        left_amount: Balance,
    },
}

impl Proposal {
    pub fn target(&self) -> &Destination {
        match self {
            Proposal::AddGuarantee(g) => &g.target,
            Proposal::RemoveGuarantee { target, .. } => target,
        }
    }
}

/// A leader-signed ledger update, addressed to the objective it serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedProposal {
    pub objective_id: ObjectiveId,
    pub ledger_id: Destination,
    pub turn_num: u64,
    pub proposal: Proposal,
    pub signature: Signature,
}

impl SignedProposal {
    fn digest(ledger_id: &Destination, turn_num: u64, proposal: &Proposal) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(ledger_id.as_bytes());
        hasher.update(turn_num.to_be_bytes());
        match proposal {
            Proposal::AddGuarantee(g) => {
                hasher.update(b"add");
                hasher.update(g.target.as_bytes());
                hasher.update(g.left_amount.0.normalize().to_string().as_bytes());
                hasher.update(g.right_amount.0.normalize().to_string().as_bytes());
            }
            Proposal::RemoveGuarantee {
                target,
                left_amount,
            } => {
                hasher.update(b"remove");
                hasher.update(target.as_bytes());
                hasher.update(left_amount.0.normalize().to_string().as_bytes());
            }
        }
        hasher.finalize().into()
    }

    pub fn sign(
        objective_id: ObjectiveId,
        ledger_id: Destination,
        turn_num: u64,
        proposal: Proposal,
        key: &SigningKey,
    ) -> Self {
        let signature = Signature::sign(key, &Self::digest(&ledger_id, turn_num, &proposal));
        Self {
            objective_id,
            ledger_id,
            turn_num,
            proposal,
            signature,
        }
    }

    pub fn verify(&self, signer: &Address) -> Result<()> {
        self.signature.verify(
            signer,
            &Self::digest(&self.ledger_id, self.turn_num, &self.proposal),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusChannel {
    pub id: Destination,
    pub my_index: usize,
    pub fixed: FixedPart,
    pub turn_num: u64,
    pub outcome: LedgerOutcome,
    pub proposal_queue: Vec<SignedProposal>,
}

impl ConsensusChannel {
    /// Promotes a fully funded two-party channel to a ledger channel.
    pub fn from_funded_channel(channel: &Channel) -> Result<Self> {
        if channel.participants().len() != 2 {
            return Err(EngineError::Validation(format!(
                "ledger channel {} must have exactly two participants",
                channel.id
            )));
        }
        let supported = channel.latest_supported_state().ok_or_else(|| {
            EngineError::Validation(format!("channel {} has no supported state", channel.id))
        })?;
        let outcome = &supported.state.outcome;
        let (leader, follower) = match outcome.allocations.as_slice() {
            [leader, follower] => (leader.clone(), follower.clone()),
            _ => {
                return Err(EngineError::Validation(
                    "ledger outcome must have two allocations".to_string(),
                ));
            }
        };
        Ok(Self {
            id: channel.id,
            my_index: channel.my_index,
            fixed: channel.fixed.clone(),
            turn_num: supported.state.turn_num,
            outcome: LedgerOutcome {
                asset: outcome.asset,
                leader,
                follower,
                guarantees: BTreeMap::new(),
            },
            proposal_queue: Vec::new(),
        })
    }

    pub fn participants(&self) -> &[Address] {
        &self.fixed.participants
    }

    pub fn is_leader(&self) -> bool {
        self.my_index == LEADER
    }

    pub fn leader(&self) -> Address {
        self.fixed.participants[LEADER]
    }

    pub fn follower(&self) -> Address {
        self.fixed.participants[FOLLOWER]
    }

    pub fn counterparty(&self) -> Address {
        self.fixed.participants[1 - self.my_index]
    }

    pub fn includes_target(&self, target: &Destination) -> bool {
        self.outcome.guarantees.contains_key(target)
    }

    /// Turn the next proposal should carry, counting queued ones.
    pub fn next_turn(&self) -> u64 {
        self.proposal_queue
            .last()
            .map_or(self.turn_num, |p| p.turn_num)
            + 1
    }

    /// Leader-side: signs a proposal for the next free turn and queues it.
    pub fn propose(
        &mut self,
        objective_id: ObjectiveId,
        proposal: Proposal,
        key: &SigningKey,
    ) -> Result<SignedProposal> {
        if !self.is_leader() {
            return Err(EngineError::Validation(format!(
                "only the leader of {} may propose",
                self.id
            )));
        }
        let signed = SignedProposal::sign(objective_id, self.id, self.next_turn(), proposal, key);
        self.proposal_queue.push(signed.clone());
        Ok(signed)
    }

    /// Queues a proposal received from the leader. Stale turns are dropped
    /// silently; duplicates replace the queued copy.
    pub fn enqueue(&mut self, proposal: SignedProposal) -> Result<()> {
        if proposal.ledger_id != self.id {
            return Err(EngineError::Validation(format!(
                "proposal for {} delivered to ledger {}",
                proposal.ledger_id, self.id
            )));
        }
        proposal.verify(&self.leader())?;
        if proposal.turn_num <= self.turn_num {
            return Ok(());
        }
        self.proposal_queue.retain(|p| p.turn_num != proposal.turn_num);
        self.proposal_queue.push(proposal);
        self.proposal_queue.sort_by_key(|p| p.turn_num);
        Ok(())
    }

    /// Applies the queued proposal for the next turn, if it has arrived.
    pub fn apply_next(&mut self) -> Result<Option<SignedProposal>> {
        let Some(head) = self.proposal_queue.first() else {
            return Ok(None);
        };
        if head.turn_num != self.turn_num + 1 {
            return Ok(None);
        }
        let head = head.clone();
        self.apply(&head.proposal)?;
        self.proposal_queue.remove(0);
        self.turn_num = head.turn_num;
        Ok(Some(head))
    }

    fn apply(&mut self, proposal: &Proposal) -> Result<()> {
        let outcome = &mut self.outcome;
        match proposal {
            Proposal::AddGuarantee(g) => {
                if outcome.guarantees.contains_key(&g.target) {
                    return Err(EngineError::Validation(format!(
                        "guarantee for {} already exists",
                        g.target
                    )));
                }
                if g.left_amount.is_negative() || g.right_amount.is_negative() {
                    return Err(EngineError::Validation(format!(
                        "negative guarantee for {}",
                        g.target
                    )));
                }
                let leader = outcome.leader.amount.checked_sub(g.left_amount);
                let follower = outcome.follower.amount.checked_sub(g.right_amount);
                let (Some(leader), Some(follower)) = (leader, follower) else {
                    return Err(EngineError::Validation(format!(
                        "ledger {} cannot afford guarantee for {}",
                        self.id, g.target
                    )));
                };
                outcome.leader.amount = leader;
                outcome.follower.amount = follower;
                outcome.guarantees.insert(g.target, g.clone());
            }
            Proposal::RemoveGuarantee {
                target,
                left_amount,
            } => {
                if left_amount.is_negative() {
                    return Err(EngineError::Validation(format!(
                        "negative return from the guarantee for {target}"
                    )));
                }
                let guarantee = outcome.guarantees.get(target).ok_or_else(|| {
                    EngineError::Validation(format!("no guarantee for {target}"))
                })?;
                let right_amount = guarantee.total()?.checked_sub(*left_amount).ok_or_else(|| {
                    EngineError::Validation(format!(
                        "cannot return more than the guarantee for {target}"
                    ))
                })?;
                let leader = outcome.leader.amount.try_add(*left_amount)?;
                let follower = outcome.follower.amount.try_add(right_amount)?;
                outcome.leader.amount = leader;
                outcome.follower.amount = follower;
                outcome.guarantees.remove(target);
            }
        }
        Ok(())
    }

    /// The state both parties sign to close the ledger on chain.
    pub fn final_state(&self) -> Result<State> {
        if !self.outcome.guarantees.is_empty() {
            return Err(EngineError::Validation(format!(
                "ledger {} still funds {} guarantees",
                self.id,
                self.outcome.guarantees.len()
            )));
        }
        Ok(State {
            fixed: self.fixed.clone(),
            outcome: Outcome {
                asset: self.outcome.asset,
                allocations: vec![self.outcome.leader.clone(), self.outcome.follower.clone()],
            },
            turn_num: self.turn_num + 1,
            is_final: true,
        })
    }
}
