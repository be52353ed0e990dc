use crate::domain::channel::Channel;
use crate::domain::consensus::ConsensusChannel;
use crate::domain::objective::{Objective, RelatedEntity};
use crate::domain::ports::Store;
use crate::domain::registry::ProtocolRegistry;
use crate::domain::types::{Address, Destination, ObjectiveId, ObjectiveStatus};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory store.
///
/// Objectives are kept in their encoded form and decoded through the
/// `ProtocolRegistry`, exactly as a persistent store would. `Clone` shares
/// the underlying maps.
#[derive(Clone)]
pub struct InMemoryStore {
    key: SigningKey,
    registry: Arc<ProtocolRegistry>,
    objectives: Arc<RwLock<HashMap<ObjectiveId, Vec<u8>>>>,
    channels: Arc<RwLock<HashMap<Destination, Channel>>>,
    consensus_channels: Arc<RwLock<HashMap<Destination, ConsensusChannel>>>,
    channel_to_objective: Arc<RwLock<HashMap<Destination, ObjectiveId>>>,
}

impl InMemoryStore {
    /// Creates an empty store for the party holding `key`.
    pub fn new(key: SigningKey, registry: Arc<ProtocolRegistry>) -> Self {
        Self {
            key,
            registry,
            objectives: Arc::default(),
            channels: Arc::default(),
            consensus_channels: Arc::default(),
            channel_to_objective: Arc::default(),
        }
    }
}

/// Applies an objective's ownership claim to the map. Conflicts are detected
/// before anything is changed.
pub(crate) fn update_ownership(
    owners: &mut HashMap<Destination, ObjectiveId>,
    objective: &dyn Objective,
) -> Result<()> {
    let id = objective.id();
    let channel = objective.owns_channel();
    match objective.status() {
        ObjectiveStatus::Approved => {
            if let Some(owner) = owners.get(&channel)
                && *owner != id
            {
                return Err(EngineError::OwnershipConflict {
                    channel,
                    owner: owner.clone(),
                    requested: id,
                });
            }
            owners.insert(channel, id);
        }
        ObjectiveStatus::Completed | ObjectiveStatus::Rejected => {
            if owners.get(&channel) == Some(&id) {
                owners.remove(&channel);
            }
        }
        ObjectiveStatus::Unapproved => {}
    }
    Ok(())
}

#[async_trait]
impl Store for InMemoryStore {
    fn get_address(&self) -> Address {
        Address::from(&self.key)
    }

    fn get_channel_secret_key(&self) -> SigningKey {
        self.key.clone()
    }

    async fn get_objective_by_id(&self, id: &ObjectiveId) -> Result<Option<Box<dyn Objective>>> {
        let objectives = self.objectives.read().await;
        objectives
            .get(id)
            .map(|data| self.registry.decode(id, data))
            .transpose()
    }

    async fn get_objective_by_channel_id(
        &self,
        channel: &Destination,
    ) -> Result<Option<Box<dyn Objective>>> {
        let owner = self.channel_to_objective.read().await.get(channel).cloned();
        match owner {
            Some(id) => self.get_objective_by_id(&id).await,
            None => Ok(None),
        }
    }

    async fn set_objective(&self, objective: &dyn Objective) -> Result<()> {
        let data = objective.encode()?;
        // Held for the whole write so ownership changes are serialized.
        let mut owners = self.channel_to_objective.write().await;
        update_ownership(&mut owners, objective)?;

        self.objectives.write().await.insert(objective.id(), data);
        for entity in objective.related() {
            match entity {
                RelatedEntity::Channel(channel) => self.set_channel(&channel).await?,
                RelatedEntity::ConsensusChannel(ledger) => self.set_consensus_channel(&ledger).await?,
            }
        }
        Ok(())
    }

    async fn get_channel_by_id(&self, id: &Destination) -> Result<Option<Channel>> {
        Ok(self.channels.read().await.get(id).cloned())
    }

    async fn set_channel(&self, channel: &Channel) -> Result<()> {
        self.channels.write().await.insert(channel.id, channel.clone());
        Ok(())
    }

    async fn destroy_channel(&self, id: &Destination) -> Result<()> {
        self.channels.write().await.remove(id);
        Ok(())
    }

    async fn get_channels_by_participant(&self, participant: &Address) -> Result<Vec<Channel>> {
        let channels = self.channels.read().await;
        Ok(channels
            .values()
            .filter(|c| c.participants().contains(participant))
            .cloned()
            .collect())
    }

    async fn get_consensus_channel_by_id(&self, id: &Destination) -> Result<Option<ConsensusChannel>> {
        Ok(self.consensus_channels.read().await.get(id).cloned())
    }

    async fn get_consensus_channel(&self, counterparty: &Address) -> Result<Option<ConsensusChannel>> {
        let ledgers = self.consensus_channels.read().await;
        Ok(ledgers
            .values()
            .find(|c| c.counterparty() == *counterparty)
            .cloned())
    }

    async fn set_consensus_channel(&self, channel: &ConsensusChannel) -> Result<()> {
        self.consensus_channels
            .write()
            .await
            .insert(channel.id, channel.clone());
        Ok(())
    }

    async fn destroy_consensus_channel(&self, id: &Destination) -> Result<()> {
        self.consensus_channels.write().await.remove(id);
        Ok(())
    }
}
