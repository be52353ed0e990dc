use super::chain::{ChainEvent, ChainTransaction};
use super::channel::Channel;
use super::consensus::ConsensusChannel;
use super::message::Message;
use super::objective::Objective;
use super::types::{Address, Destination, ObjectiveId};
use crate::error::Result;
use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Persistence for objectives and the channels they govern.
///
/// Implementations must keep the channel-ownership map consistent: a channel
/// is owned by at most one approved objective at a time.
#[async_trait]
pub trait Store: Send + Sync {
    fn get_address(&self) -> Address;
    fn get_channel_secret_key(&self) -> SigningKey;

    async fn get_objective_by_id(&self, id: &ObjectiveId) -> Result<Option<Box<dyn Objective>>>;
    /// Looks up the objective that currently owns `channel`.
    async fn get_objective_by_channel_id(
        &self,
        channel: &Destination,
    ) -> Result<Option<Box<dyn Objective>>>;
    /// Persists the objective and its related channels. Fails with
    /// `OwnershipConflict` rather than steal a channel from another objective.
    async fn set_objective(&self, objective: &dyn Objective) -> Result<()>;

    async fn get_channel_by_id(&self, id: &Destination) -> Result<Option<Channel>>;
    async fn set_channel(&self, channel: &Channel) -> Result<()>;
    async fn destroy_channel(&self, id: &Destination) -> Result<()>;
    async fn get_channels_by_participant(&self, participant: &Address) -> Result<Vec<Channel>>;

    async fn get_consensus_channel_by_id(&self, id: &Destination)
    -> Result<Option<ConsensusChannel>>;
    /// The ledger channel shared with `counterparty`, if any.
    async fn get_consensus_channel(
        &self,
        counterparty: &Address,
    ) -> Result<Option<ConsensusChannel>>;
    async fn set_consensus_channel(&self, channel: &ConsensusChannel) -> Result<()>;
    async fn destroy_consensus_channel(&self, id: &Destination) -> Result<()>;
}

/// Access to the shared ledger.
#[async_trait]
pub trait ChainService: Send + Sync {
    /// Returns once the transaction is submitted, not once it is confirmed.
    async fn send_transaction(&self, tx: ChainTransaction) -> Result<()>;
    /// Events for every channel the chain sees, in block order.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ChainEvent>;
    fn consensus_app_address(&self) -> Address;
}

/// Peer-to-peer delivery. Retrying is the implementation's concern.
#[async_trait]
pub trait MessageService: Send + Sync {
    async fn send(&self, message: Message) -> Result<()>;
    /// Messages addressed to this node.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<Message>;
}

pub type SharedStore = Arc<dyn Store>;
pub type SharedChain = Arc<dyn ChainService>;
pub type SharedMessages = Arc<dyn MessageService>;
