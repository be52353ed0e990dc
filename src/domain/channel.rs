use super::amount::Balance;
use super::state::{FixedPart, SignedState, State};
use super::types::{Address, Destination};
use crate::error::{EngineError, Result};
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const PREFUND_TURN: u64 = 0;
pub const POSTFUND_TURN: u64 = 1;

/// What the chain has told us about a channel so far.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OnChainData {
    pub holdings: Balance,
    pub concluded: bool,
    /// Block of the most recent event applied, so replays can be ignored.
    pub last_block: u64,
}

/// A multi-party channel under negotiation by an objective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: Destination,
    pub my_index: usize,
    pub fixed: FixedPart,
    pub signed_states: BTreeMap<u64, SignedState>,
    pub on_chain: OnChainData,
}

impl Channel {
    /// Creates a channel seeded with the unsigned `initial` state, from the
    /// point of view of `me`.
    pub fn new(initial: State, me: &Address) -> Result<Self> {
        let my_index = initial.fixed.index_of(me).ok_or_else(|| {
            EngineError::Validation(format!(
                "{me} is not a participant of {}",
                initial.channel_id()
            ))
        })?;
        if initial.outcome.allocations.len() != initial.fixed.participants.len() {
            return Err(EngineError::Validation(
                "outcome must allocate to every participant".to_string(),
            ));
        }
        check_outcome(&initial)?;
        let id = initial.channel_id();
        let fixed = initial.fixed.clone();
        let mut signed_states = BTreeMap::new();
        signed_states.insert(initial.turn_num, SignedState::new(initial));
        Ok(Self {
            id,
            my_index,
            fixed,
            signed_states,
            on_chain: OnChainData::default(),
        })
    }

    pub fn participants(&self) -> &[Address] {
        &self.fixed.participants
    }

    pub fn my_address(&self) -> Address {
        self.fixed.participants[self.my_index]
    }

    pub fn counterparties(&self) -> impl Iterator<Item = &Address> {
        let me = self.my_index;
        self.fixed
            .participants
            .iter()
            .enumerate()
            .filter(move |(i, _)| *i != me)
            .map(|(_, p)| p)
    }

    pub fn state_at(&self, turn: u64) -> Option<&SignedState> {
        self.signed_states.get(&turn)
    }

    pub fn prefund_state(&self) -> Option<&State> {
        self.state_at(PREFUND_TURN).map(|ss| &ss.state)
    }

    /// The postfund state is the prefund state advanced to turn one.
    pub fn postfund_state(&self) -> Option<State> {
        self.prefund_state().map(|s| State {
            turn_num: POSTFUND_TURN,
            ..s.clone()
        })
    }

    pub fn prefund_complete(&self) -> bool {
        self.turn_complete(PREFUND_TURN)
    }

    pub fn postfund_complete(&self) -> bool {
        self.turn_complete(POSTFUND_TURN)
    }

    pub fn turn_complete(&self, turn: u64) -> bool {
        self.state_at(turn).is_some_and(SignedState::has_all_signatures)
    }

    pub fn signed_by_me(&self, turn: u64) -> bool {
        self.state_at(turn)
            .is_some_and(|ss| ss.has_signature_for(self.my_index))
    }

    /// The highest turn that every participant has signed.
    pub fn latest_supported_state(&self) -> Option<&SignedState> {
        self.signed_states
            .values()
            .rev()
            .find(|ss| ss.has_all_signatures())
    }

    pub fn total_allocated(&self) -> Result<Balance> {
        match self.prefund_state() {
            Some(state) => state.outcome.total(),
            None => Ok(Balance::ZERO),
        }
    }

    /// Merges an incoming signed state. Returns true if anything new was learned.
    pub fn add_signed_state(&mut self, incoming: &SignedState) -> Result<bool> {
        if incoming.state.channel_id() != self.id {
            return Err(EngineError::Validation(format!(
                "state for {} delivered to channel {}",
                incoming.state.channel_id(),
                self.id
            )));
        }
        let turn = incoming.state.turn_num;
        match self.signed_states.get_mut(&turn) {
            Some(existing) => {
                let before = existing.signatures.iter().flatten().count();
                existing.merge(incoming)?;
                Ok(existing.signatures.iter().flatten().count() > before)
            }
            None => {
                check_outcome(&incoming.state)?;
                let mut fresh = SignedState::new(incoming.state.clone());
                fresh.merge(incoming)?;
                self.signed_states.insert(turn, fresh);
                Ok(true)
            }
        }
    }

    /// Signs `state`, stores it and returns the signed copy to share with peers.
    pub fn sign_and_add(&mut self, state: State, key: &SigningKey) -> Result<SignedState> {
        if state.channel_id() != self.id {
            return Err(EngineError::Validation(
                "refusing to sign a state for another channel".to_string(),
            ));
        }
        let turn = state.turn_num;
        let entry = self
            .signed_states
            .entry(turn)
            .or_insert_with(|| SignedState::new(state.clone()));
        if entry.state != state {
            return Err(EngineError::Validation(format!(
                "a different state is already recorded for turn {turn}"
            )));
        }
        entry.sign(key)?;
        Ok(entry.clone())
    }

    /// Applies a holdings update unless it is older than what we already saw.
    pub fn update_holdings(&mut self, now_held: Balance, block_num: u64) -> bool {
        if block_num < self.on_chain.last_block {
            return false;
        }
        self.on_chain.holdings = now_held;
        self.on_chain.last_block = block_num;
        true
    }
}

/// Allocations come from peers: none may be negative and their total must
/// be representable.
fn check_outcome(state: &State) -> Result<()> {
    if let Some(negative) = state.outcome.allocations.iter().find(|a| a.amount.is_negative()) {
        return Err(EngineError::Validation(format!(
            "negative allocation {} to {}",
            negative.amount.0, negative.destination
        )));
    }
    state.outcome.total().map(|_| ())
}
