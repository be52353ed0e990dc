#![allow(dead_code)]

use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use paychan::application::engine::{Engine, EngineConfig};
use paychan::application::policy::{PermissivePolicy, PolicyMaker};
use paychan::domain::amount::{Amount, Balance};
use paychan::domain::chain::{ChainEvent, ChainTransaction};
use paychan::domain::consensus::{Proposal, SignedProposal};
use paychan::domain::message::{Message, ObjectivePayload};
use paychan::domain::objective::{
    ChainEventHandler, ConstructionContext, Cranked, Objective, ObjectiveRequest, Protocol,
    RelatedEntity, SideEffects, WaitingFor,
};
use paychan::domain::registry::ProtocolRegistry;
use paychan::domain::state::{FixedPart, Outcome, SignedState, State};
use paychan::domain::types::{Address, Destination, ObjectiveId, ObjectiveStatus};
use paychan::error::{EngineError, Result};
use paychan::infrastructure::in_memory::InMemoryStore;
use paychan::infrastructure::message_bus::MessageBus;
use paychan::infrastructure::mock_chain::MockChain;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const SCRIPTED: &str = "Scripted";

pub fn key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

pub fn address(seed: u8) -> Address {
    Address::from(&key(seed))
}

/// How a scripted objective behaves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub updates_needed: u32,
    pub proposals_needed: u32,
    pub chain_events_needed: u32,
    /// Whether chain events for its channel are understood at all.
    pub handles_chain_events: bool,
    /// Deposited once, on the first approved crank.
    pub deposit: Option<Decimal>,
    /// Every time something new is learned, a proposal goes to this objective.
    pub forward_to: Option<ObjectiveId>,
}

/// A protocol-agnostic objective whose progress is dictated by its `Script`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedObjective {
    pub status: ObjectiveStatus,
    pub channel: Destination,
    pub peer: Address,
    pub script: Script,
    pub updates: u32,
    pub proposals: u32,
    pub chain_events: u32,
    pub deposited: bool,
    pub pending_forward: bool,
}

impl ScriptedObjective {
    pub fn new(channel: Destination, peer: Address, script: Script) -> Self {
        Self {
            status: ObjectiveStatus::Approved,
            channel,
            peer,
            script,
            updates: 0,
            proposals: 0,
            chain_events: 0,
            deposited: false,
            pending_forward: false,
        }
    }

    pub fn id_for(channel: &Destination) -> ObjectiveId {
        ObjectiveId::new(SCRIPTED, channel)
    }

    fn with(&self, change: impl FnOnce(&mut Self)) -> Box<dyn Objective> {
        let mut next = self.clone();
        change(&mut next);
        Box::new(next)
    }

    fn is_done(&self) -> bool {
        self.updates >= self.script.updates_needed
            && self.proposals >= self.script.proposals_needed
            && self.chain_events >= self.script.chain_events_needed
    }
}

impl Objective for ScriptedObjective {
    fn id(&self) -> ObjectiveId {
        Self::id_for(&self.channel)
    }

    fn status(&self) -> ObjectiveStatus {
        self.status
    }

    fn approve(&self) -> Box<dyn Objective> {
        self.with(|o| o.status = ObjectiveStatus::Approved)
    }

    fn reject(&self) -> (Box<dyn Objective>, SideEffects) {
        let notice = Message::new(Address::ZERO, self.peer).with_rejection(self.id());
        (
            self.with(|o| o.status = ObjectiveStatus::Rejected),
            SideEffects {
                messages_to_send: vec![notice],
                ..Default::default()
            },
        )
    }

    fn update(&self, _payload: &ObjectivePayload) -> Result<Box<dyn Objective>> {
        Ok(self.with(|o| {
            o.updates += 1;
            o.pending_forward = true;
        }))
    }

    fn receive_proposal(&self, _proposal: &SignedProposal) -> Result<Box<dyn Objective>> {
        Ok(self.with(|o| {
            o.proposals += 1;
            o.pending_forward = true;
        }))
    }

    fn crank(&self, key: &SigningKey) -> Result<Cranked> {
        let mut next = self.clone();
        let mut side_effects = SideEffects::default();
        if next.status != ObjectiveStatus::Approved {
            return Ok(Cranked {
                objective: Box::new(next),
                side_effects,
                waiting_for: WaitingFor::Approval,
            });
        }
        if let (Some(amount), false) = (next.script.deposit, next.deposited) {
            next.deposited = true;
            side_effects.transactions_to_submit.push(ChainTransaction::Deposit {
                channel_id: next.channel,
                asset: Address::ZERO,
                amount: Amount::new(amount)?,
            });
        }
        if next.pending_forward {
            next.pending_forward = false;
            if let Some(target) = &next.script.forward_to {
                side_effects.proposals_to_process.push(SignedProposal::sign(
                    target.clone(),
                    next.channel,
                    u64::from(next.updates + next.proposals),
                    Proposal::RemoveGuarantee {
                        target: next.channel,
                        left_amount: Balance::ZERO,
                    },
                    key,
                ));
            }
        }
        let waiting_for = if next.is_done() {
            next.status = ObjectiveStatus::Completed;
            WaitingFor::Nothing
        } else {
            WaitingFor::Other("script".to_string())
        };
        Ok(Cranked {
            objective: Box::new(next),
            side_effects,
            waiting_for,
        })
    }

    fn channels(&self) -> Vec<Destination> {
        vec![self.channel]
    }

    fn owns_channel(&self) -> Destination {
        self.channel
    }

    fn related(&self) -> Vec<RelatedEntity> {
        Vec::new()
    }

    fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn as_chain_event_handler(&self) -> Option<&dyn ChainEventHandler> {
        self.script.handles_chain_events.then_some(self as &dyn ChainEventHandler)
    }
}

impl ChainEventHandler for ScriptedObjective {
    fn update_with_chain_event(&self, _event: &ChainEvent) -> Result<Box<dyn Objective>> {
        Ok(self.with(|o| o.chain_events += 1))
    }
}

/// Builds unapproved scripted objectives from payloads.
pub struct ScriptedProtocol {
    pub script: Script,
}

#[async_trait]
impl Protocol for ScriptedProtocol {
    fn prefix(&self) -> &'static str {
        SCRIPTED
    }

    fn handles(&self, _request: &ObjectiveRequest) -> bool {
        false
    }

    fn request_id(&self, _request: &ObjectiveRequest, _ctx: &ConstructionContext<'_>) -> Result<ObjectiveId> {
        Err(EngineError::UnknownProtocol(SCRIPTED.to_string()))
    }

    async fn from_request(
        &self,
        _request: &ObjectiveRequest,
        _ctx: &ConstructionContext<'_>,
    ) -> Result<Box<dyn Objective>> {
        Err(EngineError::UnknownProtocol(SCRIPTED.to_string()))
    }

    async fn from_payload(
        &self,
        payload: &ObjectivePayload,
        _ctx: &ConstructionContext<'_>,
    ) -> Result<Box<dyn Objective>> {
        let state = &payload.signed_state.state;
        let mut objective = ScriptedObjective::new(
            state.channel_id(),
            state.fixed.participants[0],
            self.script.clone(),
        );
        objective.status = ObjectiveStatus::Unapproved;
        Ok(Box::new(objective))
    }

    fn decode(&self, data: &[u8]) -> Result<Box<dyn Objective>> {
        let objective: ScriptedObjective = serde_json::from_slice(data)?;
        Ok(Box::new(objective))
    }
}

/// A state for a channel between `peer` and `me`; only its channel id matters here.
pub fn scripted_state(peer: Address, me: Address, nonce: u64) -> SignedState {
    SignedState::new(State {
        fixed: FixedPart {
            participants: vec![peer, me],
            channel_nonce: nonce,
            app_definition: Address::ZERO,
            challenge_duration: 60,
        },
        outcome: Outcome {
            asset: Address::ZERO,
            allocations: Vec::new(),
        },
        turn_num: 0,
        is_final: false,
    })
}

pub fn scripted_payload(peer: Address, me: Address, nonce: u64) -> ObjectivePayload {
    let signed_state = scripted_state(peer, me, nonce);
    ObjectivePayload {
        objective_id: ScriptedObjective::id_for(&signed_state.state.channel_id()),
        signed_state,
    }
}

pub struct Harness {
    pub engine: Engine,
    pub chain: MockChain,
    pub bus: MessageBus,
}

/// An engine for party 1 whose registry also knows the scripted protocol.
pub fn harness(script: Script, policy: Arc<dyn PolicyMaker>, config: EngineConfig) -> Harness {
    let chain = MockChain::new();
    let bus = MessageBus::new();
    let mut registry = ProtocolRegistry::with_defaults();
    registry.register(Arc::new(ScriptedProtocol { script }));
    let registry = Arc::new(registry);
    let engine = Engine::new(
        Arc::new(InMemoryStore::new(key(1), Arc::clone(&registry))),
        Arc::new(chain.clone()),
        Arc::new(bus.endpoint(address(1))),
        policy,
        registry,
    )
    .with_config(config);
    Harness { engine, chain, bus }
}

pub fn permissive_harness(script: Script) -> Harness {
    harness(script, Arc::new(PermissivePolicy), EngineConfig::default())
}

pub struct RejectAll;

impl PolicyMaker for RejectAll {
    fn should_approve(&self, _objective: &dyn Objective) -> bool {
        false
    }
}
