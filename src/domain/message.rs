use super::amount::Amount;
use super::consensus::SignedProposal;
use super::state::{Signature, SignedState};
use super::types::{Address, Destination, ObjectiveId};
use crate::error::Result;
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A signed state addressed to the objective that should absorb it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectivePayload {
    pub objective_id: ObjectiveId,
    pub signed_state: SignedState,
}

/// A cumulative payment: `amount` is the total paid on the channel so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voucher {
    pub channel_id: Destination,
    pub amount: Amount,
    pub signature: Signature,
}

impl Voucher {
    fn digest(channel_id: &Destination, amount: &Amount) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(channel_id.as_bytes());
        hasher.update(amount.value().normalize().to_string().as_bytes());
        hasher.finalize().into()
    }

    pub fn sign(channel_id: Destination, amount: Amount, key: &SigningKey) -> Self {
        let signature = Signature::sign(key, &Self::digest(&channel_id, &amount));
        Self {
            channel_id,
            amount,
            signature,
        }
    }

    pub fn verify(&self, payer: &Address) -> Result<()> {
        self.signature
            .verify(payer, &Self::digest(&self.channel_id, &self.amount))
    }
}

/// One peer-to-peer message. Every entry is independently addressed, so a
/// single message may advance several objectives.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    pub from: Address,
    pub to: Address,
    #[serde(default)]
    pub objective_payloads: Vec<ObjectivePayload>,
    #[serde(default)]
    pub ledger_proposals: Vec<SignedProposal>,
    #[serde(default)]
    pub rejected_objectives: Vec<ObjectiveId>,
    #[serde(default)]
    pub payments: Vec<Voucher>,
}

impl Message {
    pub fn new(from: Address, to: Address) -> Self {
        Self {
            from,
            to,
            ..Default::default()
        }
    }

    pub fn with_payload(mut self, payload: ObjectivePayload) -> Self {
        self.objective_payloads.push(payload);
        self
    }

    pub fn with_rejection(mut self, id: ObjectiveId) -> Self {
        self.rejected_objectives.push(id);
        self
    }

    pub fn with_proposal(mut self, proposal: SignedProposal) -> Self {
        self.ledger_proposals.push(proposal);
        self
    }

    pub fn with_voucher(mut self, voucher: Voucher) -> Self {
        self.payments.push(voucher);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.objective_payloads.is_empty()
            && self.ledger_proposals.is_empty()
            && self.rejected_objectives.is_empty()
            && self.payments.is_empty()
    }

    /// One message per recipient carrying the same signed state.
    pub fn broadcast_state<'a>(
        from: Address,
        recipients: impl IntoIterator<Item = &'a Address>,
        objective_id: &ObjectiveId,
        signed_state: &SignedState,
    ) -> Vec<Message> {
        recipients
            .into_iter()
            .map(|to| {
                Message::new(from, *to).with_payload(ObjectivePayload {
                    objective_id: objective_id.clone(),
                    signed_state: signed_state.clone(),
                })
            })
            .collect()
    }
}
