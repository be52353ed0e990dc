//! Opening a two-party channel funded directly on chain.
//!
//! Participants sign the prefund state, deposit in participant order, then
//! sign the postfund state. A completed objective leaves a ledger channel
//! behind.

use crate::domain::amount::Balance;
use crate::domain::chain::{ChainEvent, ChainEventKind, ChainTransaction};
use crate::domain::channel::{Channel, POSTFUND_TURN, PREFUND_TURN};
use crate::domain::consensus::ConsensusChannel;
use crate::domain::message::{Message, ObjectivePayload};
use crate::domain::objective::{
    ChainEventHandler, ConsensusSpawner, ConstructionContext, Cranked, DirectFundRequest, Objective,
    ObjectiveRequest, Protocol, RelatedEntity, SideEffects, WaitingFor,
};
use crate::domain::state::{Allocation, FixedPart, Outcome, State};
use crate::domain::types::{Address, Destination, ObjectiveId, ObjectiveStatus};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const PREFIX: &str = "DirectFunding";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectFundObjective {
    pub status: ObjectiveStatus,
    pub channel: Channel,
    /// Holdings that must be on chain before it is safe for me to deposit.
    pub my_deposit_safety_threshold: Balance,
    /// Holdings once my deposit has landed.
    pub my_deposit_target: Balance,
    pub fully_funded_threshold: Balance,
    pub deposit_submitted: bool,
}

impl DirectFundObjective {
    pub fn new(prefund: State, me: &Address, status: ObjectiveStatus) -> Result<Self> {
        if prefund.turn_num != PREFUND_TURN || prefund.is_final {
            return Err(EngineError::Validation(
                "direct funding must start from a non-final prefund state".to_string(),
            ));
        }
        if prefund.fixed.participants.len() < 2 {
            return Err(EngineError::Validation(
                "a channel needs at least two participants".to_string(),
            ));
        }
        let channel = Channel::new(prefund, me)?;
        let (safety, target, fully_funded) = {
            let outcome = &channel.prefund_state().ok_or_else(|| {
                EngineError::Validation("channel lost its prefund state".to_string())
            })?
            .outcome;
            let safety = outcome.total_before(channel.my_index)?;
            let target = safety.try_add(outcome.allocations[channel.my_index].amount)?;
            (safety, target, outcome.total()?)
        };
        Ok(Self {
            status,
            channel,
            my_deposit_safety_threshold: safety,
            my_deposit_target: target,
            fully_funded_threshold: fully_funded,
            deposit_submitted: false,
        })
    }

    fn prefund(&self) -> Result<State> {
        self.channel
            .prefund_state()
            .cloned()
            .ok_or_else(|| EngineError::protocol(&self.id(), "missing prefund state"))
    }

    fn fully_funded(&self) -> bool {
        self.channel.on_chain.holdings >= self.fully_funded_threshold
    }

    fn safe_to_deposit(&self) -> bool {
        self.channel.on_chain.holdings >= self.my_deposit_safety_threshold
    }

    fn broadcast(&self, signed: &crate::domain::state::SignedState) -> Vec<Message> {
        Message::broadcast_state(
            self.channel.my_address(),
            self.channel.counterparties(),
            &self.id(),
            signed,
        )
    }
}

impl Objective for DirectFundObjective {
    fn id(&self) -> ObjectiveId {
        ObjectiveId::new(PREFIX, &self.channel.id)
    }

    fn status(&self) -> ObjectiveStatus {
        self.status
    }

    fn approve(&self) -> Box<dyn Objective> {
        let mut updated = self.clone();
        if updated.status == ObjectiveStatus::Unapproved {
            updated.status = ObjectiveStatus::Approved;
        }
        Box::new(updated)
    }

    fn reject(&self) -> (Box<dyn Objective>, SideEffects) {
        let mut updated = self.clone();
        updated.status = ObjectiveStatus::Rejected;
        let me = self.channel.my_address();
        let messages_to_send = self
            .channel
            .counterparties()
            .map(|peer| Message::new(me, *peer).with_rejection(self.id()))
            .collect();
        (
            Box::new(updated),
            SideEffects {
                messages_to_send,
                ..Default::default()
            },
        )
    }

    fn update(&self, payload: &ObjectivePayload) -> Result<Box<dyn Objective>> {
        if payload.objective_id != self.id() {
            return Err(EngineError::protocol(
                &self.id(),
                format!("payload addressed to {}", payload.objective_id),
            ));
        }
        let turn = payload.signed_state.state.turn_num;
        if turn != PREFUND_TURN && turn != POSTFUND_TURN {
            return Err(EngineError::protocol(
                &self.id(),
                format!("unexpected turn {turn}"),
            ));
        }
        let mut updated = self.clone();
        updated.channel.add_signed_state(&payload.signed_state)?;
        Ok(Box::new(updated))
    }

    fn crank(&self, key: &SigningKey) -> Result<Cranked> {
        if self.status != ObjectiveStatus::Approved {
            return Err(EngineError::NotApproved(self.id()));
        }
        let mut updated = self.clone();
        let mut side_effects = SideEffects::default();

        if !updated.channel.signed_by_me(PREFUND_TURN) {
            let signed = updated.channel.sign_and_add(updated.prefund()?, key)?;
            side_effects.messages_to_send.extend(updated.broadcast(&signed));
        }
        if !updated.channel.prefund_complete() {
            return Ok(cranked(updated, side_effects, WaitingFor::CompletePrefund));
        }

        if !updated.fully_funded() {
            if !updated.safe_to_deposit() {
                return Ok(cranked(updated, side_effects, WaitingFor::MyTurnToFund));
            }
            if !updated.deposit_submitted {
                if let Some(amount) = updated
                    .channel
                    .on_chain
                    .holdings
                    .shortfall_to(updated.my_deposit_target)
                {
                    side_effects
                        .transactions_to_submit
                        .push(ChainTransaction::Deposit {
                            channel_id: updated.channel.id,
                            asset: updated.prefund()?.outcome.asset,
                            amount,
                        });
                    updated.deposit_submitted = true;
                }
            }
            return Ok(cranked(updated, side_effects, WaitingFor::CompleteFunding));
        }

        if !updated.channel.signed_by_me(POSTFUND_TURN) {
            let postfund = updated
                .channel
                .postfund_state()
                .ok_or_else(|| EngineError::protocol(&self.id(), "missing prefund state"))?;
            let signed = updated.channel.sign_and_add(postfund, key)?;
            side_effects.messages_to_send.extend(updated.broadcast(&signed));
        }
        if !updated.channel.postfund_complete() {
            return Ok(cranked(updated, side_effects, WaitingFor::CompletePostfund));
        }

        updated.status = ObjectiveStatus::Completed;
        Ok(cranked(updated, side_effects, WaitingFor::Nothing))
    }

    fn channels(&self) -> Vec<Destination> {
        vec![self.channel.id]
    }

    fn owns_channel(&self) -> Destination {
        self.channel.id
    }

    fn related(&self) -> Vec<RelatedEntity> {
        vec![RelatedEntity::Channel(self.channel.clone())]
    }

    fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn as_chain_event_handler(&self) -> Option<&dyn ChainEventHandler> {
        Some(self)
    }

    fn as_consensus_spawner(&self) -> Option<&dyn ConsensusSpawner> {
        Some(self)
    }
}

fn cranked(objective: DirectFundObjective, side_effects: SideEffects, waiting_for: WaitingFor) -> Cranked {
    Cranked {
        objective: Box::new(objective),
        side_effects,
        waiting_for,
    }
}

/// Folds a holdings or conclusion event into a channel.
pub(crate) fn apply_chain_event(channel: &mut Channel, event: &ChainEvent) -> Result<()> {
    if event.channel_id != channel.id {
        return Err(EngineError::Validation(format!(
            "event for {} applied to channel {}",
            event.channel_id, channel.id
        )));
    }
    match &event.kind {
        ChainEventKind::Deposited { now_held } | ChainEventKind::AllocationUpdated { now_held } => {
            channel.update_holdings(*now_held, event.block_num);
        }
        ChainEventKind::Concluded => {
            channel.on_chain.concluded = true;
            channel.on_chain.last_block = channel.on_chain.last_block.max(event.block_num);
        }
    }
    Ok(())
}

impl ChainEventHandler for DirectFundObjective {
    fn update_with_chain_event(&self, event: &ChainEvent) -> Result<Box<dyn Objective>> {
        let mut updated = self.clone();
        if self.prefund()?.outcome.asset == event.asset {
            apply_chain_event(&mut updated.channel, event)?;
        }
        Ok(Box::new(updated))
    }
}

impl ConsensusSpawner for DirectFundObjective {
    fn create_consensus_channel(&self) -> Result<ConsensusChannel> {
        if self.status != ObjectiveStatus::Completed {
            return Err(EngineError::protocol(
                &self.id(),
                "ledger channels are only created from completed funding",
            ));
        }
        ConsensusChannel::from_funded_channel(&self.channel)
    }

    fn payment_terms(&self) -> Option<(Address, Address, Decimal)> {
        let prefund = self.channel.prefund_state()?;
        match prefund.outcome.allocations.as_slice() {
            [payer, payee] => Some((payer.destination, payee.destination, payer.amount.0)),
            _ => None,
        }
    }
}

pub struct DirectFundProtocol;

impl DirectFundProtocol {
    fn prefund_for(request: &DirectFundRequest, ctx: &ConstructionContext<'_>) -> Result<State> {
        if request.my_amount < Decimal::ZERO || request.their_amount < Decimal::ZERO {
            return Err(EngineError::Validation(
                "channel balances cannot be negative".to_string(),
            ));
        }
        if request.counterparty == ctx.me {
            return Err(EngineError::Validation(
                "cannot open a channel with yourself".to_string(),
            ));
        }
        Ok(State {
            fixed: FixedPart {
                participants: vec![ctx.me, request.counterparty],
                channel_nonce: request.channel_nonce,
                app_definition: ctx.app_definition,
                challenge_duration: request.challenge_duration,
            },
            outcome: Outcome {
                asset: request.asset,
                allocations: vec![
                    Allocation {
                        destination: ctx.me,
                        amount: Balance::new(request.my_amount),
                    },
                    Allocation {
                        destination: request.counterparty,
                        amount: Balance::new(request.their_amount),
                    },
                ],
            },
            turn_num: PREFUND_TURN,
            is_final: false,
        })
    }
}

#[async_trait]
impl Protocol for DirectFundProtocol {
    fn prefix(&self) -> &'static str {
        PREFIX
    }

    fn handles(&self, request: &ObjectiveRequest) -> bool {
        matches!(request, ObjectiveRequest::DirectFund(_))
    }

    fn request_id(&self, request: &ObjectiveRequest, ctx: &ConstructionContext<'_>) -> Result<ObjectiveId> {
        let ObjectiveRequest::DirectFund(request) = request else {
            return Err(EngineError::UnknownProtocol(format!("{request:?}")));
        };
        let prefund = Self::prefund_for(request, ctx)?;
        Ok(ObjectiveId::new(PREFIX, &prefund.channel_id()))
    }

    async fn from_request(
        &self,
        request: &ObjectiveRequest,
        ctx: &ConstructionContext<'_>,
    ) -> Result<Box<dyn Objective>> {
        let ObjectiveRequest::DirectFund(request) = request else {
            return Err(EngineError::UnknownProtocol(format!("{request:?}")));
        };
        if let Some(existing) = ctx.store.get_consensus_channel(&request.counterparty).await? {
            return Err(EngineError::Validation(format!(
                "a ledger channel {} with {} already exists",
                existing.id, request.counterparty
            )));
        }
        let prefund = Self::prefund_for(request, ctx)?;
        Ok(Box::new(DirectFundObjective::new(
            prefund,
            &ctx.me,
            ObjectiveStatus::Approved,
        )?))
    }

    async fn from_payload(
        &self,
        payload: &ObjectivePayload,
        ctx: &ConstructionContext<'_>,
    ) -> Result<Box<dyn Objective>> {
        let objective = DirectFundObjective::new(
            payload.signed_state.state.clone(),
            &ctx.me,
            ObjectiveStatus::Unapproved,
        )?;
        if objective.id() != payload.objective_id {
            return Err(EngineError::protocol(
                &payload.objective_id,
                "payload state does not match the objective id",
            ));
        }
        Ok(Box::new(objective))
    }

    fn decode(&self, data: &[u8]) -> Result<Box<dyn Objective>> {
        let objective: DirectFundObjective = serde_json::from_slice(data)?;
        Ok(Box::new(objective))
    }
}
