//! A client façade that owns an engine and its run loop.

use crate::application::engine::{ApiRequest, Engine, EngineConfig, EngineInputs, PaymentRequest};
use crate::application::metrics::MetricsRecorder;
use crate::application::policy::PolicyMaker;
use crate::application::vouchers::PaymentBalance;
use crate::domain::amount::Amount;
use crate::domain::event::EngineEvent;
use crate::domain::message::Voucher;
use crate::domain::objective::{DirectDefundRequest, DirectFundRequest, ObjectiveRequest};
use crate::domain::ports::{SharedChain, SharedMessages, SharedStore};
use crate::domain::registry::ProtocolRegistry;
use crate::domain::types::{Address, Destination, ObjectiveId};
use crate::error::{EngineError, Result};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{Notify, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

pub const DEFAULT_CHALLENGE_DURATION: u32 = 86_400;

#[derive(Default)]
struct Outcomes {
    completed: HashSet<ObjectiveId>,
    failed: HashSet<ObjectiveId>,
    vouchers: Vec<Voucher>,
}

impl Outcomes {
    fn absorb(&mut self, event: EngineEvent) {
        self.completed.extend(event.completed_objectives);
        self.failed.extend(event.failed_objectives);
        self.vouchers.extend(event.received_vouchers);
    }
}

/// Everything a `Node` needs besides its store.
pub struct NodeServices {
    pub chain: SharedChain,
    pub messages: SharedMessages,
    pub policy: Arc<dyn PolicyMaker>,
    pub registry: Arc<ProtocolRegistry>,
    pub metrics: Option<Arc<dyn MetricsRecorder>>,
    pub config: EngineConfig,
}

pub struct Node {
    engine: Arc<Engine>,
    requests: mpsc::UnboundedSender<ApiRequest>,
    outcomes: Arc<Mutex<Outcomes>>,
    notify: Arc<Notify>,
    shutdown: Option<oneshot::Sender<()>>,
    run_handle: Option<JoinHandle<Result<()>>>,
    next_nonce: AtomicU64,
}

impl Node {
    /// Builds an engine over `store` and starts its run loop.
    ///
    /// Inputs are subscribed before the loop is spawned, so nothing sent
    /// after this returns is missed.
    pub fn start(store: SharedStore, services: NodeServices) -> Self {
        let NodeServices {
            chain,
            messages,
            policy,
            registry,
            metrics,
            config,
        } = services;

        let (requests, request_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = oneshot::channel();
        let inputs = EngineInputs {
            requests: request_rx,
            messages: messages.subscribe(),
            chain_events: chain.subscribe(),
            shutdown: shutdown_rx,
        };

        let mut engine = Engine::new(store, chain, messages, policy, registry).with_config(config);
        if let Some(metrics) = metrics {
            engine = engine.with_metrics(metrics);
        }
        let engine = Arc::new(engine);

        let outcomes = Arc::new(Mutex::new(Outcomes::default()));
        let notify = Arc::new(Notify::new());
        tokio::spawn(collect_events(
            engine.subscribe_events(),
            Arc::clone(&outcomes),
            Arc::clone(&notify),
        ));
        let run_handle = tokio::spawn(Arc::clone(&engine).run(inputs));

        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();

        Self {
            engine,
            requests,
            outcomes,
            notify,
            shutdown: Some(shutdown),
            run_handle: Some(run_handle),
            next_nonce: AtomicU64::new(seed),
        }
    }

    pub fn address(&self) -> Address {
        self.engine.store().get_address()
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Opens a directly funded ledger channel with `counterparty`.
    pub fn create_ledger_channel(
        &self,
        counterparty: Address,
        my_amount: Decimal,
        their_amount: Decimal,
    ) -> Result<ObjectiveId> {
        let request = ObjectiveRequest::DirectFund(DirectFundRequest {
            counterparty,
            channel_nonce: self.next_nonce.fetch_add(1, Ordering::Relaxed),
            asset: Address::ZERO,
            my_amount,
            their_amount,
            challenge_duration: DEFAULT_CHALLENGE_DURATION,
        });
        self.submit(request)
    }

    /// Cooperatively closes a ledger channel.
    pub fn close_ledger_channel(&self, channel_id: Destination) -> Result<ObjectiveId> {
        self.submit(ObjectiveRequest::DirectDefund(DirectDefundRequest { channel_id }))
    }

    fn submit(&self, request: ObjectiveRequest) -> Result<ObjectiveId> {
        let id = self.engine.objective_id(&request)?;
        self.requests
            .send(ApiRequest::Objective(request))
            .map_err(|_| EngineError::Shutdown)?;
        Ok(id)
    }

    /// Sends a voucher for `amount` more along a payment channel.
    pub async fn pay(&self, channel_id: Destination, amount: Amount) -> Result<()> {
        self.engine
            .handle_payment_request(PaymentRequest { channel_id, amount })
            .await
    }

    pub fn payment_balance(&self, channel: &Destination) -> Result<PaymentBalance> {
        self.engine.payment_balance(channel)
    }

    /// Resolves once the objective completes (or is rejected), and fails if
    /// it could not be created.
    pub async fn completed(&self, id: &ObjectiveId) -> Result<()> {
        self.wait_until(|o| {
            if o.completed.contains(id) {
                Some(Ok(()))
            } else if o.failed.contains(id) {
                Some(Err(EngineError::protocol(id, "objective failed")))
            } else {
                None
            }
        })
        .await
    }

    /// Resolves once at least `count` vouchers have arrived on `channel`.
    pub async fn vouchers_received(&self, channel: &Destination, count: usize) -> Vec<Voucher> {
        self.wait_until(|o| {
            let received: Vec<Voucher> = o
                .vouchers
                .iter()
                .filter(|v| v.channel_id == *channel)
                .cloned()
                .collect();
            (received.len() >= count).then_some(received)
        })
        .await
    }

    pub fn received_vouchers(&self) -> Vec<Voucher> {
        self.outcomes.lock().vouchers.clone()
    }

    async fn wait_until<T>(&self, mut check: impl FnMut(&Outcomes) -> Option<T>) -> T {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(found) = check(&self.outcomes.lock()) {
                return found;
            }
            notified.await;
        }
    }

    /// Stops the run loop and waits for it to finish.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        match self.run_handle.take() {
            Some(handle) => handle
                .await
                .map_err(|_| EngineError::Shutdown)?,
            None => Ok(()),
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

async fn collect_events(
    mut events: broadcast::Receiver<EngineEvent>,
    outcomes: Arc<Mutex<Outcomes>>,
    notify: Arc<Notify>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                outcomes.lock().absorb(event);
                notify.notify_waiters();
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "engine events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
