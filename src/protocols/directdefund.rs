//! Cooperative closing of a ledger channel.
//!
//! Both parties sign the ledger's final state, the leader withdraws on chain,
//! and the objective completes once the chain reports the channel concluded
//! or emptied.

use crate::domain::amount::Balance;
use crate::domain::chain::{ChainEvent, ChainTransaction};
use crate::domain::channel::Channel;
use crate::domain::consensus::{ConsensusChannel, LEADER};
use crate::domain::message::{Message, ObjectivePayload};
use crate::domain::objective::{
    ChainEventHandler, ConstructionContext, Cranked, Objective, ObjectiveRequest, Protocol,
    RelatedEntity, SideEffects, WaitingFor,
};
use crate::domain::state::State;
use crate::domain::types::{Address, Destination, ObjectiveId, ObjectiveStatus};
use crate::error::{EngineError, Result};
use crate::protocols::directfund::apply_chain_event;
use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};

pub const PREFIX: &str = "DirectDefunding";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectDefundObjective {
    pub status: ObjectiveStatus,
    pub channel: Channel,
    pub final_turn: u64,
    pub withdraw_submitted: bool,
}

impl DirectDefundObjective {
    /// Seeds the closing channel with the ledger's final state. The ledger's
    /// total is what the chain currently holds for it.
    pub fn new(ledger: &ConsensusChannel, me: &Address, status: ObjectiveStatus) -> Result<Self> {
        let final_state = Self::final_state_of(ledger)?;
        let final_turn = final_state.turn_num;
        let holdings = final_state.outcome.total()?;
        let mut channel = Channel::new(final_state, me)?;
        channel.on_chain.holdings = holdings;
        Ok(Self {
            status,
            channel,
            final_turn,
            withdraw_submitted: false,
        })
    }

    fn final_state_of(ledger: &ConsensusChannel) -> Result<State> {
        ledger.final_state().map_err(|e| {
            EngineError::protocol(&ObjectiveId::new(PREFIX, &ledger.id), e.to_string())
        })
    }

    fn final_state(&self) -> Result<State> {
        self.channel
            .state_at(self.final_turn)
            .map(|ss| ss.state.clone())
            .ok_or_else(|| EngineError::protocol(&self.id(), "missing final state"))
    }

    fn withdrawn(&self) -> bool {
        self.channel.on_chain.concluded || self.channel.on_chain.holdings == Balance::ZERO
    }
}

impl Objective for DirectDefundObjective {
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
        let state = &payload.signed_state.state;
        if state.turn_num != self.final_turn || !state.is_final {
            return Err(EngineError::protocol(
                &self.id(),
                format!("expected the final state at turn {}", self.final_turn),
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

        if !updated.channel.signed_by_me(updated.final_turn) {
            let signed = updated.channel.sign_and_add(updated.final_state()?, key)?;
            side_effects.messages_to_send.extend(Message::broadcast_state(
                updated.channel.my_address(),
                updated.channel.counterparties(),
                &updated.id(),
                &signed,
            ));
        }
        if !updated.channel.turn_complete(updated.final_turn) {
            return Ok(cranked(updated, side_effects, WaitingFor::CompleteFinalization));
        }

        if !updated.withdrawn() {
            if updated.channel.my_index == LEADER && !updated.withdraw_submitted {
                let signed_state = updated
                    .channel
                    .state_at(updated.final_turn)
                    .cloned()
                    .ok_or_else(|| EngineError::protocol(&self.id(), "missing final state"))?;
                side_effects
                    .transactions_to_submit
                    .push(ChainTransaction::WithdrawAll {
                        channel_id: updated.channel.id,
                        signed_state,
                    });
                updated.withdraw_submitted = true;
            }
            return Ok(cranked(updated, side_effects, WaitingFor::Withdraw));
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

    fn supersedes_consensus_channel(&self) -> Option<Destination> {
        Some(self.channel.id)
    }

    fn as_chain_event_handler(&self) -> Option<&dyn ChainEventHandler> {
        Some(self)
    }
}

fn cranked(
    objective: DirectDefundObjective,
    side_effects: SideEffects,
    waiting_for: WaitingFor,
) -> Cranked {
    Cranked {
        objective: Box::new(objective),
        side_effects,
        waiting_for,
    }
}

impl ChainEventHandler for DirectDefundObjective {
    fn update_with_chain_event(&self, event: &ChainEvent) -> Result<Box<dyn Objective>> {
        let mut updated = self.clone();
        if self.final_state()?.outcome.asset == event.asset {
            apply_chain_event(&mut updated.channel, event)?;
        }
        Ok(Box::new(updated))
    }
}

pub struct DirectDefundProtocol;

impl DirectDefundProtocol {
    async fn ledger(ctx: &ConstructionContext<'_>, id: &Destination) -> Result<ConsensusChannel> {
        ctx.store
            .get_consensus_channel_by_id(id)
            .await?
            .ok_or_else(|| EngineError::ConsensusChannelNotFound(id.to_string()))
    }
}

#[async_trait]
impl Protocol for DirectDefundProtocol {
    fn prefix(&self) -> &'static str {
        PREFIX
    }

    fn handles(&self, request: &ObjectiveRequest) -> bool {
        matches!(request, ObjectiveRequest::DirectDefund(_))
    }

    fn request_id(&self, request: &ObjectiveRequest, _ctx: &ConstructionContext<'_>) -> Result<ObjectiveId> {
        match request {
            ObjectiveRequest::DirectDefund(request) => Ok(ObjectiveId::new(PREFIX, &request.channel_id)),
            other => Err(EngineError::UnknownProtocol(format!("{other:?}"))),
        }
    }

    async fn from_request(
        &self,
        request: &ObjectiveRequest,
        ctx: &ConstructionContext<'_>,
    ) -> Result<Box<dyn Objective>> {
        let ObjectiveRequest::DirectDefund(request) = request else {
            return Err(EngineError::UnknownProtocol(format!("{request:?}")));
        };
        let ledger = Self::ledger(ctx, &request.channel_id).await?;
        Ok(Box::new(DirectDefundObjective::new(
            &ledger,
            &ctx.me,
            ObjectiveStatus::Approved,
        )?))
    }

    async fn from_payload(
        &self,
        payload: &ObjectivePayload,
        ctx: &ConstructionContext<'_>,
    ) -> Result<Box<dyn Objective>> {
        let proposed = &payload.signed_state.state;
        let ledger = Self::ledger(ctx, &proposed.channel_id()).await?;
        let objective = DirectDefundObjective::new(&ledger, &ctx.me, ObjectiveStatus::Unapproved)?;
        if objective.id() != payload.objective_id {
            return Err(EngineError::protocol(
                &payload.objective_id,
                "payload state does not match the objective id",
            ));
        }
        if objective.final_state()? != *proposed {
            return Err(EngineError::protocol(
                &payload.objective_id,
                "proposed final state disagrees with the ledger",
            ));
        }
        Ok(Box::new(objective))
    }

    fn decode(&self, data: &[u8]) -> Result<Box<dyn Objective>> {
        let objective: DirectDefundObjective = serde_json::from_slice(data)?;
        Ok(Box::new(objective))
    }
}
