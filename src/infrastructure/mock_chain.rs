use crate::domain::amount::Balance;
use crate::domain::chain::{ChainEvent, ChainEventKind, ChainTransaction};
use crate::domain::ports::ChainService;
use crate::domain::types::{Address, Destination};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Default)]
struct Ledger {
    block_num: u64,
    holdings: HashMap<(Destination, Address), Balance>,
    concluded: HashSet<Destination>,
    submitted: Vec<ChainTransaction>,
    subscribers: Vec<mpsc::UnboundedSender<ChainEvent>>,
    failures_pending: usize,
}

impl Ledger {
    fn emit(&mut self, channel_id: Destination, asset: Address, kind: ChainEventKind) {
        self.block_num += 1;
        let event = ChainEvent {
            channel_id,
            asset,
            block_num: self.block_num,
            kind,
        };
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// A shared in-process chain.
///
/// Every clone sees the same holdings and every subscriber receives every
/// event, in block order.
#[derive(Clone, Default)]
pub struct MockChain {
    ledger: Arc<Mutex<Ledger>>,
    app_definition: Address,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holdings(&self, channel: &Destination, asset: &Address) -> Balance {
        self.ledger
            .lock()
            .holdings
            .get(&(*channel, *asset))
            .copied()
            .unwrap_or_default()
    }

    pub fn is_concluded(&self, channel: &Destination) -> bool {
        self.ledger.lock().concluded.contains(channel)
    }

    /// Transactions accepted so far, in submission order.
    pub fn submitted(&self) -> Vec<ChainTransaction> {
        self.ledger.lock().submitted.clone()
    }

    /// Makes the next `count` submissions fail.
    pub fn fail_next(&self, count: usize) {
        self.ledger.lock().failures_pending = count;
    }
}

#[async_trait]
impl ChainService for MockChain {
    async fn send_transaction(&self, tx: ChainTransaction) -> Result<()> {
        let mut ledger = self.ledger.lock();
        if ledger.failures_pending > 0 {
            ledger.failures_pending -= 1;
            return Err(EngineError::Chain("submission rejected".to_string()));
        }
        match &tx {
            ChainTransaction::Deposit {
                channel_id,
                asset,
                amount,
            } => {
                if ledger.concluded.contains(channel_id) {
                    return Err(EngineError::Chain(format!("{channel_id} is concluded")));
                }
                let held = ledger.holdings.entry((*channel_id, *asset)).or_default();
                let now_held = held
                    .checked_add(Balance::from(*amount))
                    .ok_or_else(|| EngineError::Chain(format!("holdings of {channel_id} would overflow")))?;
                *held = now_held;
                tracing::debug!(channel = %channel_id, now_held = %now_held.0, "deposit mined");
                ledger.emit(*channel_id, *asset, ChainEventKind::Deposited { now_held });
            }
            ChainTransaction::WithdrawAll {
                channel_id,
                signed_state,
            } => {
                let state = &signed_state.state;
                if !state.is_final || !signed_state.has_all_signatures() {
                    return Err(EngineError::Chain(
                        "withdrawal needs a fully signed final state".to_string(),
                    ));
                }
                if state.channel_id() != *channel_id {
                    return Err(EngineError::Chain(format!(
                        "state does not belong to {channel_id}"
                    )));
                }
                if !ledger.concluded.insert(*channel_id) {
                    return Err(EngineError::Chain(format!("{channel_id} is already concluded")));
                }
                let asset = state.outcome.asset;
                ledger.holdings.insert((*channel_id, asset), Balance::ZERO);
                tracing::debug!(channel = %channel_id, "withdrawal mined");
                ledger.emit(
                    *channel_id,
                    asset,
                    ChainEventKind::AllocationUpdated {
                        now_held: Balance::ZERO,
                    },
                );
                ledger.emit(*channel_id, asset, ChainEventKind::Concluded);
            }
        }
        ledger.submitted.push(tx);
        Ok(())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ChainEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.ledger.lock().subscribers.push(tx);
        rx
    }

    fn consensus_app_address(&self) -> Address {
        self.app_definition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::amount::Amount;
    use crate::domain::state::SignedState;
    use crate::domain::state::tests::{key, two_party_state};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_deposits_accumulate_and_are_broadcast() {
        let chain = MockChain::new();
        let mut a = chain.subscribe();
        let mut b = chain.clone().subscribe();
        let channel = Destination([1; 32]);
        for amount in [dec!(6), dec!(4)] {
            chain
                .send_transaction(ChainTransaction::Deposit {
                    channel_id: channel,
                    asset: Address::ZERO,
                    amount: Amount::new(amount).unwrap(),
                })
                .await
                .unwrap();
        }
        assert_eq!(chain.holdings(&channel, &Address::ZERO), Balance::new(dec!(10)));

        let first = a.recv().await.unwrap();
        let second = a.recv().await.unwrap();
        assert!(first.block_num < second.block_num);
        assert_eq!(
            second.kind,
            ChainEventKind::Deposited {
                now_held: Balance::new(dec!(10))
            }
        );
        assert_eq!(b.recv().await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_withdraw_requires_final_signed_state() {
        let chain = MockChain::new();
        let (alice, bob) = (key(1), key(2));
        let mut state = two_party_state(&alice, &bob, 2);
        let channel_id = state.channel_id();

        let unsigned = SignedState::new(state.clone());
        assert!(chain
            .send_transaction(ChainTransaction::WithdrawAll {
                channel_id,
                signed_state: unsigned,
            })
            .await
            .is_err());

        state.is_final = true;
        let mut signed = SignedState::new(state);
        signed.sign(&alice).unwrap();
        signed.sign(&bob).unwrap();
        let mut events = chain.subscribe();
        chain
            .send_transaction(ChainTransaction::WithdrawAll {
                channel_id,
                signed_state: signed,
            })
            .await
            .unwrap();
        assert!(chain.is_concluded(&channel_id));
        assert!(matches!(events.recv().await.unwrap().kind, ChainEventKind::AllocationUpdated { .. }));
        assert_eq!(events.recv().await.unwrap().kind, ChainEventKind::Concluded);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let chain = MockChain::new();
        chain.fail_next(1);
        let tx = ChainTransaction::Deposit {
            channel_id: Destination([1; 32]),
            asset: Address::ZERO,
            amount: Amount::new(dec!(1)).unwrap(),
        };
        assert!(matches!(chain.send_transaction(tx.clone()).await, Err(EngineError::Chain(_))));
        chain.send_transaction(tx).await.unwrap();
        assert_eq!(chain.submitted().len(), 1);
    }
}
