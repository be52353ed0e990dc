use crate::domain::channel::Channel;
use crate::domain::consensus::ConsensusChannel;
use crate::domain::objective::{Objective, RelatedEntity};
use crate::domain::ports::Store;
use crate::domain::registry::ProtocolRegistry;
use crate::domain::types::{Address, Destination, ObjectiveId};
use crate::error::{EngineError, Result};
use crate::infrastructure::in_memory::update_ownership;
use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for encoded objectives, keyed by objective id.
pub const CF_OBJECTIVES: &str = "objectives";
/// Column Family for channels under objective control.
pub const CF_CHANNELS: &str = "channels";
/// Column Family for bare ledger channels.
pub const CF_CONSENSUS_CHANNELS: &str = "consensus_channels";
/// Column Family mapping channel ids to the objective that owns them.
pub const CF_OWNERSHIP: &str = "ownership";

/// A persistent store implementation using RocksDB.
///
/// Each entity kind lives in its own Column Family with JSON values.
/// Ownership updates are serialized by an internal write lock so the
/// check-then-claim in `set_objective` cannot interleave.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDbStore {
    db: Arc<DB>,
    key: SigningKey,
    registry: Arc<ProtocolRegistry>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDbStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that all column families exist.
    pub fn open<P: AsRef<Path>>(path: P, key: SigningKey, registry: Arc<ProtocolRegistry>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = [CF_OBJECTIVES, CF_CHANNELS, CF_CONSENSUS_CHANNELS, CF_OWNERSHIP]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));
        let db = DB::open_cf_descriptors(&opts, path, families)?;

        Ok(Self {
            db: Arc::new(db),
            key,
            registry,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &'static str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| EngineError::Storage(format!("{name} column family not found")))
    }

    fn put<T: Serialize>(&self, family: &'static str, key: &[u8], value: &T) -> Result<()> {
        let value = serde_json::to_vec(value)?;
        self.db.put_cf(self.cf(family)?, key, value)?;
        Ok(())
    }

    fn put_in<T: Serialize>(
        &self,
        batch: &mut WriteBatch,
        family: &'static str,
        key: &[u8],
        value: &T,
    ) -> Result<()> {
        batch.put_cf(self.cf(family)?, key, serde_json::to_vec(value)?);
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, family: &'static str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(family)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn delete(&self, family: &'static str, key: &[u8]) -> Result<()> {
        self.db.delete_cf(self.cf(family)?, key)?;
        Ok(())
    }

    fn values<T: DeserializeOwned>(&self, family: &'static str) -> Result<Vec<T>> {
        let mut values = Vec::new();
        for item in self.db.iterator_cf(self.cf(family)?, IteratorMode::Start) {
            let (_key, value) = item?;
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }

    fn owner_of(&self, channel: &Destination) -> Result<Option<ObjectiveId>> {
        self.get(CF_OWNERSHIP, channel.as_bytes())
    }
}

#[async_trait]
impl Store for RocksDbStore {
    fn get_address(&self) -> Address {
        Address::from(&self.key)
    }

    fn get_channel_secret_key(&self) -> SigningKey {
        self.key.clone()
    }

    async fn get_objective_by_id(&self, id: &ObjectiveId) -> Result<Option<Box<dyn Objective>>> {
        match self.db.get_cf(self.cf(CF_OBJECTIVES)?, id.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(self.registry.decode(id, &bytes)?)),
            None => Ok(None),
        }
    }

    async fn get_objective_by_channel_id(
        &self,
        channel: &Destination,
    ) -> Result<Option<Box<dyn Objective>>> {
        match self.owner_of(channel)? {
            Some(id) => self.get_objective_by_id(&id).await,
            None => Ok(None),
        }
    }

    async fn set_objective(&self, objective: &dyn Objective) -> Result<()> {
        let data = objective.encode()?;
        let _write = self.write_lock.lock().await;

        let channel = objective.owns_channel();
        let mut owners = HashMap::new();
        if let Some(owner) = self.owner_of(&channel)? {
            owners.insert(channel, owner);
        }
        update_ownership(&mut owners, objective)?;

        // One batch: the ownership map never points at an unwritten objective.
        let mut batch = WriteBatch::default();
        match owners.get(&channel) {
            Some(owner) => self.put_in(&mut batch, CF_OWNERSHIP, channel.as_bytes(), owner)?,
            None => batch.delete_cf(self.cf(CF_OWNERSHIP)?, channel.as_bytes()),
        }
        batch.put_cf(self.cf(CF_OBJECTIVES)?, objective.id().as_str().as_bytes(), data);
        for entity in objective.related() {
            match entity {
                RelatedEntity::Channel(channel) => {
                    self.put_in(&mut batch, CF_CHANNELS, channel.id.as_bytes(), &channel)?
                }
                RelatedEntity::ConsensusChannel(ledger) => {
                    self.put_in(&mut batch, CF_CONSENSUS_CHANNELS, ledger.id.as_bytes(), &ledger)?
                }
            }
        }
        self.db.write(batch)?;
        Ok(())
    }

    async fn get_channel_by_id(&self, id: &Destination) -> Result<Option<Channel>> {
        self.get(CF_CHANNELS, id.as_bytes())
    }

    async fn set_channel(&self, channel: &Channel) -> Result<()> {
        self.put(CF_CHANNELS, channel.id.as_bytes(), channel)
    }

    async fn destroy_channel(&self, id: &Destination) -> Result<()> {
        self.delete(CF_CHANNELS, id.as_bytes())
    }

    async fn get_channels_by_participant(&self, participant: &Address) -> Result<Vec<Channel>> {
        let channels: Vec<Channel> = self.values(CF_CHANNELS)?;
        Ok(channels
            .into_iter()
            .filter(|c| c.participants().contains(participant))
            .collect())
    }

    async fn get_consensus_channel_by_id(&self, id: &Destination) -> Result<Option<ConsensusChannel>> {
        self.get(CF_CONSENSUS_CHANNELS, id.as_bytes())
    }

    async fn get_consensus_channel(&self, counterparty: &Address) -> Result<Option<ConsensusChannel>> {
        let ledgers: Vec<ConsensusChannel> = self.values(CF_CONSENSUS_CHANNELS)?;
        Ok(ledgers.into_iter().find(|c| c.counterparty() == *counterparty))
    }

    async fn set_consensus_channel(&self, channel: &ConsensusChannel) -> Result<()> {
        self.put(CF_CONSENSUS_CHANNELS, channel.id.as_bytes(), channel)
    }

    async fn destroy_consensus_channel(&self, id: &Destination) -> Result<()> {
        self.delete(CF_CONSENSUS_CHANNELS, id.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::consensus::LEADER;
    use crate::domain::consensus::tests::funded_ledger;
    use crate::domain::state::tests::{key, two_party_state};
    use crate::domain::types::ObjectiveStatus;
    use crate::protocols::directdefund::DirectDefundObjective;
    use crate::protocols::directfund::DirectFundObjective;
    use tempfile::tempdir;

    fn open(path: &Path) -> RocksDbStore {
        RocksDbStore::open(path, key(1), Arc::new(ProtocolRegistry::with_defaults()))
            .expect("Failed to open RocksDB")
    }

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());

        for name in [CF_OBJECTIVES, CF_CHANNELS, CF_CONSENSUS_CHANNELS, CF_OWNERSHIP] {
            assert!(store.db.cf_handle(name).is_some());
        }
    }

    #[tokio::test]
    async fn test_rocksdb_objective_survives_reopen() {
        let dir = tempdir().unwrap();
        let objective = DirectFundObjective::new(
            two_party_state(&key(1), &key(2), 0),
            &Address::from(&key(1)),
            ObjectiveStatus::Approved,
        )
        .unwrap();
        {
            let store = open(dir.path());
            store.set_objective(&objective).await.unwrap();
        }

        let store = open(dir.path());
        let owner = store
            .get_objective_by_channel_id(&objective.channel.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(owner.id(), objective.id());
        assert_eq!(owner.encode().unwrap(), objective.encode().unwrap());
        assert!(store.get_channel_by_id(&objective.channel.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rocksdb_ownership_conflict() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        let fund = DirectFundObjective::new(
            two_party_state(&key(1), &key(2), 0),
            &Address::from(&key(1)),
            ObjectiveStatus::Approved,
        )
        .unwrap();
        store.set_objective(&fund).await.unwrap();

        let ledger = funded_ledger(&key(1), &key(2), LEADER);
        let defund = DirectDefundObjective::new(&ledger, &Address::from(&key(1)), ObjectiveStatus::Approved).unwrap();
        assert!(matches!(
            store.set_objective(&defund).await,
            Err(EngineError::OwnershipConflict { .. })
        ));
        assert!(store.get_objective_by_id(&defund.id()).await.unwrap().is_none());

        // Completion hands the channel back.
        let mut done = fund.clone();
        done.status = ObjectiveStatus::Completed;
        store.set_objective(&done).await.unwrap();
        assert!(store.get_objective_by_channel_id(&fund.channel.id).await.unwrap().is_none());
        store.set_objective(&defund).await.unwrap();
        assert_eq!(
            store.get_objective_by_channel_id(&fund.channel.id).await.unwrap().unwrap().id(),
            defund.id()
        );
    }

    #[tokio::test]
    async fn test_rocksdb_objective_and_related_commit_together() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        let ledger = funded_ledger(&key(1), &key(2), LEADER);
        let defund = DirectDefundObjective::new(&ledger, &Address::from(&key(1)), ObjectiveStatus::Approved).unwrap();

        store.set_objective(&defund).await.unwrap();

        let owner = store.get_objective_by_channel_id(&ledger.id).await.unwrap().unwrap();
        assert_eq!(owner.encode().unwrap(), defund.encode().unwrap());
        assert_eq!(
            store.get_channel_by_id(&ledger.id).await.unwrap(),
            Some(defund.channel.clone())
        );
    }

    #[tokio::test]
    async fn test_rocksdb_consensus_channels() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        let ledger = funded_ledger(&key(1), &key(2), LEADER);

        store.set_consensus_channel(&ledger).await.unwrap();
        assert_eq!(
            store.get_consensus_channel(&Address::from(&key(2))).await.unwrap(),
            Some(ledger.clone())
        );
        store.destroy_consensus_channel(&ledger.id).await.unwrap();
        assert!(store.get_consensus_channel_by_id(&ledger.id).await.unwrap().is_none());
    }
}
