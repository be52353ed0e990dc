//! Runs scripted multi-party scenarios over a shared mock chain and message bus.

use crate::application::engine::EngineConfig;
use crate::application::node::{Node, NodeServices};
use crate::application::policy::PermissivePolicy;
use crate::domain::amount::Amount;
use crate::domain::consensus::ConsensusChannel;
use crate::domain::ports::SharedStore;
use crate::domain::registry::ProtocolRegistry;
use crate::domain::types::{Address, ObjectiveId};
use crate::error::{EngineError, Result};
use crate::infrastructure::in_memory::InMemoryStore;
use crate::infrastructure::message_bus::MessageBus;
use crate::infrastructure::mock_chain::MockChain;
use ed25519_dalek::SigningKey;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Fund,
    Pay,
    Defund,
}

/// One row of a scenario: `action,from,to,amount`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScenarioStep {
    pub action: Action,
    pub from: String,
    pub to: String,
    pub amount: Option<Amount>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Completed,
    Failed,
    Voucher,
}

/// What one party observed; `objective` holds the channel id for vouchers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeRecord {
    pub party: String,
    pub objective: String,
    pub outcome: OutcomeKind,
}

/// Signing key of a named party: the SHA-256 of its name.
pub fn party_key(name: &str) -> SigningKey {
    SigningKey::from_bytes(&Sha256::digest(name.as_bytes()).into())
}

/// Builds the store for a party joining mid-scenario.
pub type StoreFactory =
    Box<dyn Fn(&str, SigningKey, Arc<ProtocolRegistry>) -> Result<SharedStore> + Send + Sync>;

pub struct Simulation {
    store_factory: StoreFactory,
    chain: MockChain,
    bus: MessageBus,
    registry: Arc<ProtocolRegistry>,
    parties: HashMap<String, Node>,
    timeout: Duration,
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulation {
    pub fn new() -> Self {
        Self {
            store_factory: Box::new(in_memory_store),
            chain: MockChain::new(),
            bus: MessageBus::new(),
            registry: Arc::new(ProtocolRegistry::with_defaults()),
            parties: HashMap::new(),
            timeout: Duration::from_secs(10),
        }
    }

    /// How long to wait for an objective or voucher before reporting failure.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_store_factory(mut self, factory: StoreFactory) -> Self {
        self.store_factory = factory;
        self
    }

    pub fn registry(&self) -> Arc<ProtocolRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn chain(&self) -> &MockChain {
        &self.chain
    }

    /// Starts a party over the given store. The store must hold `party_key(name)`.
    pub fn add_party(&mut self, name: &str, store: SharedStore) {
        let node = Node::start(
            store,
            NodeServices {
                chain: Arc::new(self.chain.clone()),
                messages: Arc::new(self.bus.endpoint(Address::from(&party_key(name)))),
                policy: Arc::new(PermissivePolicy),
                registry: Arc::clone(&self.registry),
                metrics: None,
                config: EngineConfig::default(),
            },
        );
        tracing::debug!(party = name, address = %node.address(), "party joined");
        self.parties.insert(name.to_string(), node);
    }

    pub fn party(&self, name: &str) -> Option<&Node> {
        self.parties.get(name)
    }

    fn ensure_party(&mut self, name: &str) -> Result<()> {
        if !self.parties.contains_key(name) {
            let store = (self.store_factory)(name, party_key(name), Arc::clone(&self.registry))?;
            self.add_party(name, store);
        }
        Ok(())
    }

    pub async fn apply(&mut self, step: &ScenarioStep) -> Result<Vec<OutcomeRecord>> {
        if step.from == step.to {
            return Err(EngineError::Validation(format!(
                "{} cannot transact with itself",
                step.from
            )));
        }
        self.ensure_party(&step.from)?;
        self.ensure_party(&step.to)?;
        let (Some(from), Some(to)) = (self.parties.get(&step.from), self.parties.get(&step.to)) else {
            return Err(EngineError::Validation("party failed to start".to_string()));
        };

        match step.action {
            Action::Fund => {
                let amount = required_amount(step)?;
                let id = from.create_ledger_channel(to.address(), amount.value(), Decimal::ZERO)?;
                self.settle_both(step, from, to, &id).await
            }
            Action::Pay => {
                let amount = required_amount(step)?;
                let ledger = ledger_between(from, to, step).await?;
                let before = to
                    .received_vouchers()
                    .iter()
                    .filter(|v| v.channel_id == ledger.id)
                    .count();
                from.pay(ledger.id, amount).await?;
                let outcome = match timeout(self.timeout, to.vouchers_received(&ledger.id, before + 1)).await {
                    Ok(_) => OutcomeKind::Voucher,
                    Err(_) => {
                        tracing::warn!(party = %step.to, channel = %ledger.id, "voucher not delivered in time");
                        OutcomeKind::Failed
                    }
                };
                Ok(vec![OutcomeRecord {
                    party: step.to.clone(),
                    objective: ledger.id.to_string(),
                    outcome,
                }])
            }
            Action::Defund => {
                let ledger = ledger_between(from, to, step).await?;
                let id = from.close_ledger_channel(ledger.id)?;
                self.settle_both(step, from, to, &id).await
            }
        }
    }

    /// Waits for the initiator, then for the counterparty if the initiator
    /// got anywhere.
    async fn settle_both(
        &self,
        step: &ScenarioStep,
        from: &Node,
        to: &Node,
        id: &ObjectiveId,
    ) -> Result<Vec<OutcomeRecord>> {
        let mut records = vec![self.settle(&step.from, from, id).await];
        if records[0].outcome == OutcomeKind::Completed {
            records.push(self.settle(&step.to, to, id).await);
        }
        Ok(records)
    }

    async fn settle(&self, party: &str, node: &Node, id: &ObjectiveId) -> OutcomeRecord {
        let outcome = match timeout(self.timeout, node.completed(id)).await {
            Ok(Ok(())) => OutcomeKind::Completed,
            Ok(Err(e)) => {
                tracing::warn!(party, objective = %id, error = %e, "objective failed");
                OutcomeKind::Failed
            }
            Err(_) => {
                tracing::warn!(party, objective = %id, waiting_for = ?node.engine().waiting_for(id), "objective timed out");
                OutcomeKind::Failed
            }
        };
        OutcomeRecord {
            party: party.to_string(),
            objective: id.to_string(),
            outcome,
        }
    }

    pub async fn shutdown(self) -> Result<()> {
        for (_, node) in self.parties {
            node.shutdown().await?;
        }
        Ok(())
    }
}

fn in_memory_store(
    _party: &str,
    key: SigningKey,
    registry: Arc<ProtocolRegistry>,
) -> Result<SharedStore> {
    Ok(Arc::new(InMemoryStore::new(key, registry)))
}

fn required_amount(step: &ScenarioStep) -> Result<Amount> {
    step.amount
        .ok_or_else(|| EngineError::Validation(format!("{:?} needs an amount", step.action)))
}

async fn ledger_between(from: &Node, to: &Node, step: &ScenarioStep) -> Result<ConsensusChannel> {
    from.engine()
        .store()
        .get_consensus_channel(&to.address())
        .await?
        .ok_or_else(|| {
            EngineError::ConsensusChannelNotFound(format!("between {} and {}", step.from, step.to))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn step(action: Action, from: &str, to: &str, amount: Option<Decimal>) -> ScenarioStep {
        ScenarioStep {
            action,
            from: from.to_string(),
            to: to.to_string(),
            amount: amount.map(|a| Amount::new(a).unwrap()),
        }
    }

    #[test]
    fn test_party_keys_are_stable() {
        assert_eq!(
            Address::from(&party_key("alice")),
            Address::from(&party_key("alice"))
        );
        assert_ne!(
            Address::from(&party_key("alice")),
            Address::from(&party_key("bob"))
        );
    }

    #[tokio::test]
    async fn test_fund_pay_defund() {
        let mut sim = Simulation::new();

        let funded = sim.apply(&step(Action::Fund, "alice", "bob", Some(dec!(10)))).await.unwrap();
        assert_eq!(funded.len(), 2);
        assert!(funded.iter().all(|r| r.outcome == OutcomeKind::Completed));

        let paid = sim.apply(&step(Action::Pay, "alice", "bob", Some(dec!(3)))).await.unwrap();
        assert_eq!(paid[0].party, "bob");
        assert_eq!(paid[0].outcome, OutcomeKind::Voucher);

        let closed = sim.apply(&step(Action::Defund, "alice", "bob", None)).await.unwrap();
        assert!(closed.iter().all(|r| r.outcome == OutcomeKind::Completed));
        assert!(closed[0].objective.starts_with("DirectDefunding-"));

        sim.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_pay_without_channel_fails() {
        let mut sim = Simulation::new();
        let result = sim.apply(&step(Action::Pay, "alice", "bob", Some(dec!(1)))).await;
        assert!(matches!(result, Err(EngineError::ConsensusChannelNotFound(_))));
    }

    #[tokio::test]
    async fn test_fund_requires_amount() {
        let mut sim = Simulation::new();
        let result = sim.apply(&step(Action::Fund, "alice", "bob", None)).await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }
}
