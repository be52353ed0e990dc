use super::amount::{Amount, Balance};
use super::state::SignedState;
use super::types::{Address, Destination};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChainEventKind {
    /// Someone deposited; `now_held` is the channel's new total.
    Deposited { now_held: Balance },
    /// Funds left the channel through a payout.
    AllocationUpdated { now_held: Balance },
    /// The channel was finalized on chain.
    Concluded,
}

/// An event observed on chain, scoped to one channel and asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEvent {
    pub channel_id: Destination,
    pub asset: Address,
    pub block_num: u64,
    pub kind: ChainEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChainTransaction {
    Deposit {
        channel_id: Destination,
        asset: Address,
        amount: Amount,
    },
    /// Conclude the channel with a fully signed final state and pay out.
    WithdrawAll {
        channel_id: Destination,
        signed_state: SignedState,
    },
}

impl ChainTransaction {
    pub fn channel_id(&self) -> &Destination {
        match self {
            ChainTransaction::Deposit { channel_id, .. } => channel_id,
            ChainTransaction::WithdrawAll { channel_id, .. } => channel_id,
        }
    }
}
