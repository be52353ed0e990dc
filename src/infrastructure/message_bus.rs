use crate::domain::message::Message;
use crate::domain::ports::MessageService;
use crate::domain::types::Address;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// An in-process broker delivering messages by recipient address.
///
/// Messages are encoded to JSON and decoded again on delivery, so parties
/// only ever see what survives the wire format.
#[derive(Clone, Default)]
pub struct MessageBus {
    mailboxes: Arc<Mutex<HashMap<Address, mpsc::UnboundedSender<Message>>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A `MessageService` sending as `address`.
    pub fn endpoint(&self, address: Address) -> BusEndpoint {
        BusEndpoint {
            address,
            bus: self.clone(),
        }
    }

    fn deliver(&self, message: Message) -> Result<()> {
        let wire = serde_json::to_vec(&message)?;
        let message: Message = serde_json::from_slice(&wire)?;
        let to = message.to;
        let mailboxes = self.mailboxes.lock();
        let mailbox = mailboxes
            .get(&to)
            .ok_or_else(|| EngineError::Transport(format!("no mailbox for {to}")))?;
        mailbox
            .send(message)
            .map_err(|_| EngineError::Transport(format!("mailbox for {to} is closed")))
    }
}

#[derive(Clone)]
pub struct BusEndpoint {
    address: Address,
    bus: MessageBus,
}

impl BusEndpoint {
    pub fn address(&self) -> Address {
        self.address
    }
}

#[async_trait]
impl MessageService for BusEndpoint {
    async fn send(&self, mut message: Message) -> Result<()> {
        message.from = self.address;
        tracing::trace!(from = %message.from, to = %message.to, "sending message");
        self.bus.deliver(message)
    }

    /// Opens this address's mailbox. Subscribing again replaces the previous one.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.bus.mailboxes.lock().insert(self.address, tx);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::ObjectiveId;

    #[tokio::test]
    async fn test_delivery_by_address() {
        let bus = MessageBus::new();
        let alice = bus.endpoint(Address([1; 32]));
        let bob = bus.endpoint(Address([2; 32]));
        let mut inbox = bob.subscribe();

        let message = Message::new(Address::ZERO, bob.address())
            .with_rejection(ObjectiveId::from("DirectFunding-0x01"));
        alice.send(message).await.unwrap();

        let received = inbox.recv().await.unwrap();
        assert_eq!(received.from, alice.address());
        assert_eq!(received.rejected_objectives.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_recipient() {
        let bus = MessageBus::new();
        let alice = bus.endpoint(Address([1; 32]));
        let result = alice.send(Message::new(alice.address(), Address([9; 32]))).await;
        assert!(matches!(result, Err(EngineError::Transport(_))));
    }
}
