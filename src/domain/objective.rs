//! The uniform capability surface every protocol objective exposes to the engine.

use super::chain::{ChainEvent, ChainTransaction};
use super::channel::Channel;
use super::consensus::{ConsensusChannel, SignedProposal};
use super::message::{Message, ObjectivePayload};
use super::ports::Store;
use super::types::{Address, Destination, ObjectiveId, ObjectiveStatus};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Work a transition asks the engine to carry out on its behalf.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SideEffects {
    pub messages_to_send: Vec<Message>,
    pub transactions_to_submit: Vec<ChainTransaction>,
    /// Ledger proposals that must be fed back through the engine, since
    /// processing one may unblock a different objective.
    pub proposals_to_process: Vec<SignedProposal>,
}

impl SideEffects {
    pub fn merge(&mut self, other: SideEffects) {
        self.messages_to_send.extend(other.messages_to_send);
        self.transactions_to_submit
            .extend(other.transactions_to_submit);
        self.proposals_to_process.extend(other.proposals_to_process);
    }

    pub fn is_empty(&self) -> bool {
        self.messages_to_send.is_empty()
            && self.transactions_to_submit.is_empty()
            && self.proposals_to_process.is_empty()
    }
}

/// What an objective needs from the outside world before it can progress.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WaitingFor {
    #[default]
    Nothing,
    Approval,
    CompletePrefund,
    MyTurnToFund,
    CompleteFunding,
    CompletePostfund,
    CompleteFinalization,
    Withdraw,
    Other(String),
}

impl fmt::Display for WaitingFor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitingFor::Other(what) => f.write_str(what),
            other => write!(f, "{other:?}"),
        }
    }
}

/// A persistent entity an objective reads and mutates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelatedEntity {
    Channel(Channel),
    ConsensusChannel(ConsensusChannel),
}

/// The result of one crank.
pub struct Cranked {
    pub objective: Box<dyn Objective>,
    pub side_effects: SideEffects,
    pub waiting_for: WaitingFor,
}

/// One multi-round protocol run.
///
/// Objectives are values: every transition returns a new objective and leaves
/// `self` untouched. Persisting the result is the engine's job.
pub trait Objective: fmt::Debug + Send + Sync {
    fn id(&self) -> ObjectiveId;

    fn status(&self) -> ObjectiveStatus;

    fn approve(&self) -> Box<dyn Objective>;

    /// Rejects the objective, returning the notices that tell peers about it.
    fn reject(&self) -> (Box<dyn Objective>, SideEffects);

    /// Absorbs a signed state received from a peer.
    fn update(&self, payload: &ObjectivePayload) -> Result<Box<dyn Objective>>;

    /// Absorbs a ledger proposal. Most protocols never receive one.
    fn receive_proposal(&self, _proposal: &SignedProposal) -> Result<Box<dyn Objective>> {
        Err(EngineError::UnsupportedPayload {
            objective: self.id(),
            payload: "ledger proposal",
        })
    }

    /// Computes the next state and the side effects needed to reach it.
    /// Cranking an objective that has learned nothing new is a no-op.
    fn crank(&self, key: &SigningKey) -> Result<Cranked>;

    /// Ids of every channel this objective may touch.
    fn channels(&self) -> Vec<Destination>;

    /// The channel this objective holds exclusive ownership of while approved.
    fn owns_channel(&self) -> Destination;

    fn related(&self) -> Vec<RelatedEntity>;

    /// Serialized form; decoded again through the protocol registry.
    fn encode(&self) -> Result<Vec<u8>>;

    /// A ledger channel whose governance this objective takes over once
    /// approved. The engine destroys the bare consensus channel at that point.
    fn supersedes_consensus_channel(&self) -> Option<Destination> {
        None
    }

    fn as_chain_event_handler(&self) -> Option<&dyn ChainEventHandler> {
        None
    }

    fn as_consensus_spawner(&self) -> Option<&dyn ConsensusSpawner> {
        None
    }
}

/// Objectives that react to on-chain events.
pub trait ChainEventHandler: Send + Sync {
    fn update_with_chain_event(&self, event: &ChainEvent) -> Result<Box<dyn Objective>>;
}

/// Objectives that leave a ledger channel behind when they complete.
pub trait ConsensusSpawner: Send + Sync {
    fn create_consensus_channel(&self) -> Result<ConsensusChannel>;

    /// The payer, payee and budget to register for off-chain payments, if any.
    fn payment_terms(&self) -> Option<(Address, Address, Decimal)> {
        None
    }
}

/// Asks for a new two-party channel funded directly on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectFundRequest {
    pub counterparty: Address,
    pub channel_nonce: u64,
    pub asset: Address,
    pub my_amount: Decimal,
    pub their_amount: Decimal,
    pub challenge_duration: u32,
}

/// Asks to close a ledger channel cooperatively and withdraw on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectDefundRequest {
    pub channel_id: Destination,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectiveRequest {
    DirectFund(DirectFundRequest),
    DirectDefund(DirectDefundRequest),
}

/// What a protocol constructor may consult.
pub struct ConstructionContext<'a> {
    pub store: &'a dyn Store,
    pub me: Address,
    pub app_definition: Address,
}

/// Constructors and decoder for one kind of objective, keyed by id prefix.
#[async_trait]
pub trait Protocol: Send + Sync {
    fn prefix(&self) -> &'static str;

    fn handles(&self, request: &ObjectiveRequest) -> bool;

    /// The id a request will produce, known before construction succeeds.
    fn request_id(&self, request: &ObjectiveRequest, ctx: &ConstructionContext<'_>) -> Result<ObjectiveId>;

    /// Builds a locally initiated, pre-approved objective.
    async fn from_request(
        &self,
        request: &ObjectiveRequest,
        ctx: &ConstructionContext<'_>,
    ) -> Result<Box<dyn Objective>>;

    /// Rebuilds an objective a peer started, in the unapproved state.
    async fn from_payload(
        &self,
        payload: &ObjectivePayload,
        ctx: &ConstructionContext<'_>,
    ) -> Result<Box<dyn Objective>>;

    fn decode(&self, data: &[u8]) -> Result<Box<dyn Objective>>;
}
