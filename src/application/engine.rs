use crate::application::locker::ChannelLocker;
use crate::application::metrics::{MetricsRecorder, NoOpMetrics};
use crate::application::policy::PolicyMaker;
use crate::application::vouchers::{PaymentBalance, VoucherManager};
use crate::domain::amount::Amount;
use crate::domain::chain::ChainEvent;
use crate::domain::consensus::SignedProposal;
use crate::domain::event::EngineEvent;
use crate::domain::message::{Message, ObjectivePayload};
use crate::domain::objective::{ConstructionContext, Cranked, Objective, ObjectiveRequest, SideEffects, WaitingFor};
use crate::domain::ports::{SharedChain, SharedMessages, SharedStore};
use crate::domain::registry::ProtocolRegistry;
use crate::domain::types::{Destination, ObjectiveId, ObjectiveStatus};
use crate::error::{EngineError, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Tunables for a single engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Ledger proposals one handler call may re-enter before giving up.
    pub max_proposal_chain: usize,
    /// Capacity of the `EngineEvent` broadcast channel.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_proposal_chain: 64,
            event_capacity: 256,
        }
    }
}

/// A handler failed after part of its input had already been applied.
///
/// `partial` lists what did complete; it reflects persisted state.
#[derive(Debug, thiserror::Error)]
#[error("engine handler failed: {error}")]
pub struct HandleError {
    pub partial: EngineEvent,
    #[source]
    pub error: EngineError,
}

pub type HandleResult = std::result::Result<EngineEvent, HandleError>;

/// Pay `amount` more along an established payment channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub channel_id: Destination,
    pub amount: Amount,
}

/// Locally originated work for the run loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiRequest {
    Objective(ObjectiveRequest),
    Payment(PaymentRequest),
}

/// The input streams the run loop consumes.
pub struct EngineInputs {
    pub requests: mpsc::UnboundedReceiver<ApiRequest>,
    pub messages: mpsc::UnboundedReceiver<Message>,
    pub chain_events: mpsc::UnboundedReceiver<ChainEvent>,
    pub shutdown: oneshot::Receiver<()>,
}

/// State accumulated over one handler call.
#[derive(Default)]
struct Tick {
    event: EngineEvent,
    proposals: VecDeque<SignedProposal>,
    reentries: usize,
}

enum Flow {
    Continue,
    /// Policy rejected an objective; the rest of the batch is skipped.
    Rejected,
}

/// Drives objectives from peer messages, chain events and local requests.
///
/// Every unit of work locks the channels its objective touches, reloads the
/// objective under the lock, persists the transition and only then executes
/// side effects. Handlers take `&self`, so one engine may serve concurrent
/// callers; the `ChannelLocker` keeps them off each other's channels.
pub struct Engine {
    store: SharedStore,
    chain: SharedChain,
    messages: SharedMessages,
    policy: Arc<dyn PolicyMaker>,
    metrics: Arc<dyn MetricsRecorder>,
    registry: Arc<ProtocolRegistry>,
    vouchers: VoucherManager,
    locker: ChannelLocker,
    waiting: Mutex<HashMap<ObjectiveId, WaitingFor>>,
    events: broadcast::Sender<EngineEvent>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        store: SharedStore,
        chain: SharedChain,
        messages: SharedMessages,
        policy: Arc<dyn PolicyMaker>,
        registry: Arc<ProtocolRegistry>,
    ) -> Self {
        let config = EngineConfig::default();
        let (events, _) = broadcast::channel(config.event_capacity);
        Self {
            store,
            chain,
            messages,
            policy,
            metrics: Arc::new(NoOpMetrics),
            registry,
            vouchers: VoucherManager::new(),
            locker: ChannelLocker::new(),
            waiting: Mutex::new(HashMap::new()),
            events,
            config,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        if config.event_capacity != self.config.event_capacity {
            self.events = broadcast::channel(config.event_capacity.max(1)).0;
        }
        self.config = config;
        self
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// What the objective was last waiting for, if it has been cranked.
    pub fn waiting_for(&self, id: &ObjectiveId) -> Option<WaitingFor> {
        self.waiting.lock().get(id).cloned()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn payment_balance(&self, channel: &Destination) -> Result<PaymentBalance> {
        self.vouchers.balance(channel)
    }

    /// The id a request will produce, available before the request is handled.
    pub fn objective_id(&self, request: &ObjectiveRequest) -> Result<ObjectiveId> {
        let ctx = self.construction_context();
        self.registry.for_request(request)?.request_id(request, &ctx)
    }

    fn construction_context(&self) -> ConstructionContext<'_> {
        ConstructionContext {
            store: self.store.as_ref(),
            me: self.store.get_address(),
            app_definition: self.chain.consensus_app_address(),
        }
    }

    /// Applies every entry of a peer message.
    ///
    /// A policy rejection stops the batch: later entries are not applied.
    pub async fn handle_message(&self, message: Message) -> HandleResult {
        let started = Instant::now();
        let mut tick = Tick::default();
        let result = self.process_message(message, &mut tick).await;
        self.metrics.record_duration("handle_message", started.elapsed());
        finish(tick, result)
    }

    async fn process_message(&self, message: Message, tick: &mut Tick) -> Result<()> {
        tracing::debug!(
            from = %message.from,
            payloads = message.objective_payloads.len(),
            proposals = message.ledger_proposals.len(),
            rejections = message.rejected_objectives.len(),
            payments = message.payments.len(),
            "handling message"
        );
        for payload in &message.objective_payloads {
            let flow = self.process_payload(payload, tick).await?;
            self.drain_proposals(tick).await?;
            if let Flow::Rejected = flow {
                return Ok(());
            }
        }
        for proposal in message.ledger_proposals {
            self.process_proposal(proposal, tick).await?;
            self.drain_proposals(tick).await?;
        }
        for id in &message.rejected_objectives {
            self.process_rejection(id, tick).await?;
        }
        for voucher in message.payments {
            let total = self.vouchers.receive(&voucher)?;
            tracing::info!(channel = %voucher.channel_id, total = %total, "voucher received");
            tick.event.received_vouchers.push(voucher);
        }
        Ok(())
    }

    async fn process_payload(&self, payload: &ObjectivePayload, tick: &mut Tick) -> Result<Flow> {
        let id = &payload.objective_id;
        let protocol = self.registry.lookup(id)?;
        let objective = match self.store.get_objective_by_id(id).await? {
            Some(existing) => existing,
            None => {
                let ctx = self.construction_context();
                match protocol.from_payload(payload, &ctx).await {
                    Ok(created) => created,
                    Err(source) => {
                        tick.event.failed_objectives.push(id.clone());
                        return Err(EngineError::ObjectiveCreation {
                            objective: id.clone(),
                            source: Box::new(source),
                        });
                    }
                }
            }
        };

        let _guard = self.locker.lock(objective.as_ref()).await;
        let mut objective = self.store.get_objective_by_id(id).await?.unwrap_or(objective);

        if objective.status().is_terminal() {
            tracing::debug!(objective = %id, status = ?objective.status(), "ignoring payload for finished objective");
            return Ok(Flow::Continue);
        }

        let mut approved_now = false;
        if objective.status() == ObjectiveStatus::Unapproved {
            if self.policy.should_approve(objective.as_ref()) {
                objective = objective.approve();
                approved_now = true;
            } else {
                let (rejected, side_effects) = objective.reject();
                self.store.set_objective(rejected.as_ref()).await?;
                self.execute_side_effects(side_effects, tick).await?;
                self.metrics.record_objective("rejected", id);
                tracing::warn!(objective = %id, "objective rejected by policy");
                tick.event.completed_objectives.push(id.clone());
                return Ok(Flow::Rejected);
            }
        }

        // Nothing is stored until the payload checks out.
        let updated = objective.update(payload)?;
        if approved_now {
            self.adopt(updated.as_ref()).await?;
            self.metrics.record_objective("approved", id);
            tracing::info!(objective = %id, "objective approved");
        } else {
            self.store.set_objective(updated.as_ref()).await?;
        }
        self.attempt_progress(updated, tick).await?;
        Ok(Flow::Continue)
    }

    async fn process_proposal(&self, proposal: SignedProposal, tick: &mut Tick) -> Result<()> {
        let id = proposal.objective_id.clone();
        let objective = self
            .store
            .get_objective_by_id(&id)
            .await?
            .ok_or_else(|| EngineError::ObjectiveNotFound(id.clone()))?;

        let _guard = self.locker.lock(objective.as_ref()).await;
        let objective = self.store.get_objective_by_id(&id).await?.unwrap_or(objective);
        if objective.status().is_terminal() {
            tracing::debug!(objective = %id, "ignoring proposal for finished objective");
            return Ok(());
        }

        let updated = objective.receive_proposal(&proposal)?;
        self.store.set_objective(updated.as_ref()).await?;
        self.attempt_progress(updated, tick).await
    }

    /// A counterparty rejected the objective and has already told everyone.
    async fn process_rejection(&self, id: &ObjectiveId, tick: &mut Tick) -> Result<()> {
        let Some(objective) = self.store.get_objective_by_id(id).await? else {
            tracing::debug!(objective = %id, "rejection for unknown objective");
            return Ok(());
        };
        let _guard = self.locker.lock(objective.as_ref()).await;
        let objective = self.store.get_objective_by_id(id).await?.unwrap_or(objective);
        if objective.status().is_terminal() {
            return Ok(());
        }
        let (rejected, _notices) = objective.reject();
        self.store.set_objective(rejected.as_ref()).await?;
        self.waiting.lock().remove(id);
        self.metrics.record_objective("rejected", id);
        tracing::info!(objective = %id, "objective rejected by counterparty");
        tick.event.completed_objectives.push(id.clone());
        Ok(())
    }

    /// Routes a chain event to the objective that owns its channel.
    pub async fn handle_chain_event(&self, event: ChainEvent) -> HandleResult {
        let started = Instant::now();
        let mut tick = Tick::default();
        let result = match self.process_chain_event(event, &mut tick).await {
            Ok(()) => self.drain_proposals(&mut tick).await,
            Err(e) => Err(e),
        };
        self.metrics.record_duration("handle_chain_event", started.elapsed());
        finish(tick, result)
    }

    async fn process_chain_event(&self, event: ChainEvent, tick: &mut Tick) -> Result<()> {
        let Some(objective) = self.store.get_objective_by_channel_id(&event.channel_id).await? else {
            tracing::debug!(channel = %event.channel_id, block = event.block_num, "chain event for untracked channel");
            return Ok(());
        };
        let id = objective.id();
        let _guard = self.locker.lock(objective.as_ref()).await;
        let Some(objective) = self.store.get_objective_by_channel_id(&event.channel_id).await? else {
            return Ok(());
        };
        let Some(handler) = objective.as_chain_event_handler() else {
            return Err(EngineError::UnhandledChainEvent {
                objective: id,
                event: Box::new(event),
            });
        };
        let updated = handler.update_with_chain_event(&event)?;
        self.store.set_objective(updated.as_ref()).await?;
        self.attempt_progress(updated, tick).await
    }

    /// Starts a locally requested objective.
    ///
    /// Construction failures are reported under the id the request would
    /// have produced, so callers can correlate them.
    pub async fn handle_objective_request(&self, request: ObjectiveRequest) -> HandleResult {
        let started = Instant::now();
        let mut tick = Tick::default();
        let result = match self.process_objective_request(&request, &mut tick).await {
            Ok(()) => self.drain_proposals(&mut tick).await,
            Err(e) => Err(e),
        };
        self.metrics.record_duration("handle_objective_request", started.elapsed());
        finish(tick, result)
    }

    async fn process_objective_request(&self, request: &ObjectiveRequest, tick: &mut Tick) -> Result<()> {
        let ctx = self.construction_context();
        let protocol = self.registry.for_request(request)?;
        let id = protocol.request_id(request, &ctx)?;

        let created = match protocol.from_request(request, &ctx).await {
            Ok(objective) => objective,
            Err(source) => return Err(creation_failed(tick, id, source)),
        };
        let _guard = self.locker.lock(created.as_ref()).await;
        if self.store.get_objective_by_id(&id).await?.is_some() {
            let source = EngineError::Validation(format!("objective {id} already exists"));
            return Err(creation_failed(tick, id, source));
        }
        if let Err(source) = self.adopt(created.as_ref()).await {
            return Err(creation_failed(tick, id, source));
        }
        self.metrics.record_objective("created", &id);
        tracing::info!(objective = %id, "objective created");
        self.attempt_progress(created, tick).await
    }

    /// Pays along a payment channel on which this node is the payer.
    pub async fn handle_payment_request(&self, request: PaymentRequest) -> Result<()> {
        let payee = self.vouchers.payee(&request.channel_id)?;
        let key = self.store.get_channel_secret_key();
        let voucher = self.vouchers.pay(&request.channel_id, request.amount, &key)?;
        tracing::info!(channel = %request.channel_id, amount = %request.amount.value(), "payment sent");
        let message = Message::new(self.store.get_address(), payee).with_voucher(voucher);
        let mut tick = Tick::default();
        self.execute_side_effects(
            SideEffects {
                messages_to_send: vec![message],
                ..Default::default()
            },
            &mut tick,
        )
        .await
    }

    /// Persists a freshly approved objective and retires the bare ledger
    /// channel it takes over, if any.
    async fn adopt(&self, objective: &dyn Objective) -> Result<()> {
        self.store.set_objective(objective).await?;
        if let Some(ledger) = objective.supersedes_consensus_channel() {
            self.store.destroy_consensus_channel(&ledger).await?;
            tracing::debug!(objective = %objective.id(), channel = %ledger, "consensus channel superseded");
        }
        Ok(())
    }

    /// Cranks, persists, executes side effects and records completion.
    async fn attempt_progress(&self, objective: Box<dyn Objective>, tick: &mut Tick) -> Result<()> {
        let id = objective.id();
        let key = self.store.get_channel_secret_key();
        let Cranked {
            objective,
            side_effects,
            waiting_for,
        } = objective.crank(&key).inspect_err(|e| {
            tracing::warn!(objective = %id, error = %e, "crank failed");
        })?;

        self.store.set_objective(objective.as_ref()).await?;
        tracing::debug!(objective = %id, waiting_for = %waiting_for, "cranked");
        self.waiting.lock().insert(id.clone(), waiting_for);
        self.execute_side_effects(side_effects, tick).await?;

        if objective.status() == ObjectiveStatus::Completed {
            self.on_completed(objective.as_ref()).await?;
            self.metrics.record_objective("completed", &id);
            tracing::info!(objective = %id, "objective completed");
            tick.event.completed_objectives.push(id);
        }
        Ok(())
    }

    /// Hands a completed objective's channel back to the ledger space.
    async fn on_completed(&self, objective: &dyn Objective) -> Result<()> {
        let Some(spawner) = objective.as_consensus_spawner() else {
            return Ok(());
        };
        let ledger = spawner.create_consensus_channel()?;
        self.store.set_consensus_channel(&ledger).await?;
        self.store.destroy_channel(&ledger.id).await?;
        if let Some((payer, payee, budget)) = spawner.payment_terms() {
            self.vouchers.register(ledger.id, payer, payee, budget);
        }
        Ok(())
    }

    /// Messages go out on their own tasks, transactions are submitted in
    /// order and proposals are queued for re-entry.
    async fn execute_side_effects(&self, side_effects: SideEffects, tick: &mut Tick) -> Result<()> {
        let SideEffects {
            messages_to_send,
            transactions_to_submit,
            proposals_to_process,
        } = side_effects;

        for message in messages_to_send {
            let messages = Arc::clone(&self.messages);
            tokio::spawn(async move {
                let to = message.to;
                if let Err(e) = messages.send(message).await {
                    tracing::warn!(to = %to, error = %e, "message delivery failed");
                }
            });
        }
        for tx in transactions_to_submit {
            let channel = *tx.channel_id();
            self.chain.send_transaction(tx).await.inspect_err(|e| {
                tracing::warn!(channel = %channel, error = %e, "transaction submission failed");
            })?;
        }
        tick.proposals.extend(proposals_to_process);
        self.metrics.record_queue_length("proposals", tick.proposals.len());
        Ok(())
    }

    async fn drain_proposals(&self, tick: &mut Tick) -> Result<()> {
        while let Some(proposal) = tick.proposals.pop_front() {
            tick.reentries += 1;
            if tick.reentries > self.config.max_proposal_chain {
                tick.proposals.clear();
                return Err(EngineError::ProposalBudgetExceeded(self.config.max_proposal_chain));
            }
            self.process_proposal(proposal, tick).await?;
        }
        Ok(())
    }

    async fn handle_api_request(&self, request: ApiRequest) -> HandleResult {
        match request {
            ApiRequest::Objective(request) => self.handle_objective_request(request).await,
            ApiRequest::Payment(request) => self
                .handle_payment_request(request)
                .await
                .map(|()| EngineEvent::default())
                .map_err(|error| HandleError {
                    partial: EngineEvent::default(),
                    error,
                }),
        }
    }

    /// Consumes all inputs in one loop until shutdown or until every input
    /// closes. Non-empty events are published to `subscribe_events`.
    pub async fn run(self: Arc<Self>, inputs: EngineInputs) -> Result<()> {
        let EngineInputs {
            mut requests,
            mut messages,
            mut chain_events,
            mut shutdown,
        } = inputs;
        let me = self.store.get_address();
        tracing::info!(address = %me, "engine running");

        loop {
            let outcome = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                Some(request) = requests.recv() => self.handle_api_request(request).await,
                Some(message) = messages.recv() => self.handle_message(message).await,
                Some(event) = chain_events.recv() => self.handle_chain_event(event).await,
                else => break,
            };
            let event = match outcome {
                Ok(event) => event,
                Err(failure) => {
                    tracing::warn!(address = %me, error = %failure.error, "handler failed");
                    failure.partial
                }
            };
            if !event.is_empty() {
                // No subscribers is fine.
                let _ = self.events.send(event);
            }
        }

        tracing::info!(address = %me, "engine stopped");
        Ok(())
    }
}

fn creation_failed(tick: &mut Tick, id: ObjectiveId, source: EngineError) -> EngineError {
    tracing::warn!(objective = %id, error = %source, "objective creation failed");
    tick.event.failed_objectives.push(id.clone());
    EngineError::ObjectiveCreation {
        objective: id,
        source: Box::new(source),
    }
}

fn finish(tick: Tick, result: Result<()>) -> HandleResult {
    match result {
        Ok(()) => Ok(tick.event),
        Err(error) => Err(HandleError {
            partial: tick.event,
            error,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::MessageService;
    use crate::application::policy::PermissivePolicy;
    use crate::domain::consensus::tests::funded_ledger;
    use crate::domain::consensus::{FOLLOWER, LEADER};
    use crate::domain::state::SignedState;
    use crate::domain::objective::{DirectDefundRequest, DirectFundRequest};
    use crate::domain::state::tests::key;
    use crate::domain::types::Address;
    use crate::infrastructure::in_memory::InMemoryStore;
    use crate::infrastructure::message_bus::MessageBus;
    use crate::infrastructure::mock_chain::MockChain;
    use rust_decimal_macros::dec;

    fn engine_for(seed: u8, chain: &MockChain, bus: &MessageBus) -> Engine {
        let registry = Arc::new(ProtocolRegistry::with_defaults());
        let signer = key(seed);
        let address = Address::from(&signer);
        Engine::new(
            Arc::new(InMemoryStore::new(signer, Arc::clone(&registry))),
            Arc::new(chain.clone()),
            Arc::new(bus.endpoint(address)),
            Arc::new(PermissivePolicy),
            registry,
        )
    }

    #[tokio::test]
    async fn test_chain_event_for_untracked_channel_is_ignored() {
        let (chain, bus) = (MockChain::new(), MessageBus::new());
        let engine = engine_for(1, &chain, &bus);
        let event = ChainEvent {
            channel_id: Destination([0xde; 32]),
            asset: Address::ZERO,
            block_num: 1,
            kind: crate::domain::chain::ChainEventKind::Concluded,
        };
        let result = engine.handle_chain_event(event).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_fund_request_deposits_and_waits() {
        let (chain, bus) = (MockChain::new(), MessageBus::new());
        let engine = engine_for(1, &chain, &bus);
        let mut inbox = bus.endpoint(Address::from(&key(2))).subscribe();
        let request = ObjectiveRequest::DirectFund(DirectFundRequest {
            counterparty: Address::from(&key(2)),
            channel_nonce: 1,
            asset: Address::ZERO,
            my_amount: dec!(5),
            their_amount: dec!(5),
            challenge_duration: 60,
        });
        let id = engine.objective_id(&request).unwrap();

        let event = engine.handle_objective_request(request.clone()).await.unwrap();
        assert!(event.completed_objectives.is_empty());
        assert_eq!(engine.waiting_for(&id), Some(WaitingFor::CompletePrefund));

        let prefund = inbox.recv().await.unwrap();
        assert_eq!(prefund.objective_payloads[0].objective_id, id);

        // The same request again would clobber the running objective.
        let failure = engine.handle_objective_request(request).await.unwrap_err();
        assert_eq!(failure.partial.failed_objectives, vec![id.clone()]);
        assert!(matches!(failure.error, EngineError::ObjectiveCreation { .. }));
    }

    #[tokio::test]
    async fn test_defund_request_destroys_consensus_channel_first() {
        let (chain, bus) = (MockChain::new(), MessageBus::new());
        let engine = engine_for(1, &chain, &bus);
        let ledger = funded_ledger(&key(1), &key(2), LEADER);
        engine.store().set_consensus_channel(&ledger).await.unwrap();

        let event = engine
            .handle_objective_request(ObjectiveRequest::DirectDefund(DirectDefundRequest {
                channel_id: ledger.id,
            }))
            .await
            .unwrap();
        assert!(event.completed_objectives.is_empty());
        assert!(engine.store().get_consensus_channel_by_id(&ledger.id).await.unwrap().is_none());
        let owner = engine.store().get_objective_by_channel_id(&ledger.id).await.unwrap().unwrap();
        assert_eq!(owner.status(), ObjectiveStatus::Approved);
    }

    #[tokio::test]
    async fn test_forged_close_keeps_the_ledger() {
        let (chain, bus) = (MockChain::new(), MessageBus::new());
        let engine = engine_for(2, &chain, &bus);
        let ledger = funded_ledger(&key(1), &key(2), FOLLOWER);
        engine.store().set_consensus_channel(&ledger).await.unwrap();

        let final_state = ledger.final_state().unwrap();
        let mut forged = SignedState::new(final_state.clone());
        forged.signatures[LEADER] = Some(final_state.sign(&key(9)));
        let id = ObjectiveId::new(crate::protocols::directdefund::PREFIX, &ledger.id);
        let message = Message::new(Address::from(&key(1)), Address::from(&key(2))).with_payload(
            ObjectivePayload {
                objective_id: id.clone(),
                signed_state: forged,
            },
        );

        let failure = engine.handle_message(message).await.unwrap_err();
        assert!(matches!(failure.error, EngineError::InvalidSignature(_)));
        assert!(engine.store().get_objective_by_id(&id).await.unwrap().is_none());
        assert!(engine.store().get_objective_by_channel_id(&ledger.id).await.unwrap().is_none());
        assert_eq!(
            engine.store().get_consensus_channel_by_id(&ledger.id).await.unwrap(),
            Some(ledger)
        );
    }

    #[tokio::test]
    async fn test_payment_requires_registered_channel() {
        let (chain, bus) = (MockChain::new(), MessageBus::new());
        let engine = engine_for(1, &chain, &bus);
        let result = engine
            .handle_payment_request(PaymentRequest {
                channel_id: Destination([1; 32]),
                amount: Amount::new(dec!(1)).unwrap(),
            })
            .await;
        assert!(matches!(result, Err(EngineError::PaymentChannelNotRegistered(_))));
    }
}
