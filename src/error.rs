use crate::domain::chain::ChainEvent;
use crate::domain::types::{Address, Destination, ObjectiveId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("objective {0} not found")]
    ObjectiveNotFound(ObjectiveId),
    #[error("consensus channel not found: {0}")]
    ConsensusChannelNotFound(String),
    #[error("no protocol registered for prefix {0:?}")]
    UnknownProtocol(String),
    #[error("channel {0} is not registered as a payment channel")]
    PaymentChannelNotRegistered(Destination),

    #[error("cannot transfer ownership of channel {channel} from objective {owner} to {requested}")]
    OwnershipConflict {
        channel: Destination,
        owner: ObjectiveId,
        requested: ObjectiveId,
    },

    #[error("objective {objective}: {reason}")]
    Protocol {
        objective: ObjectiveId,
        reason: String,
    },
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("objective {0} is not approved")]
    NotApproved(ObjectiveId),
    #[error("malformed objective id {0:?}")]
    MalformedObjectiveId(String),
    #[error("objective {objective} cannot handle {payload} payloads")]
    UnsupportedPayload {
        objective: ObjectiveId,
        payload: &'static str,
    },

    #[error("chain error: {0}")]
    Chain(String),
    #[error("transport error: {0}")]
    Transport(String),

    #[error("objective {objective} does not handle chain events (got {event:?})")]
    UnhandledChainEvent {
        objective: ObjectiveId,
        event: Box<ChainEvent>,
    },

    #[error("{address} is not the payer on channel {channel}")]
    NotPayer {
        channel: Destination,
        address: Address,
    },
    #[error("invalid voucher: {0}")]
    InvalidVoucher(String),

    #[error("proposal chain exceeded {0} re-entries")]
    ProposalBudgetExceeded(usize),
    #[error("could not create objective {objective}: {source}")]
    ObjectiveCreation {
        objective: ObjectiveId,
        #[source]
        source: Box<EngineError>,
    },
    #[error("engine has shut down")]
    Shutdown,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

impl EngineError {
    pub fn protocol(objective: &ObjectiveId, reason: impl Into<String>) -> Self {
        Self::Protocol {
            objective: objective.clone(),
            reason: reason.into(),
        }
    }

    /// True for errors that indicate a stale or duplicate input rather than a fault.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ObjectiveNotFound(_)
                | Self::ConsensusChannelNotFound(_)
                | Self::PaymentChannelNotRegistered(_)
        )
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for EngineError {
    fn from(e: rocksdb::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
