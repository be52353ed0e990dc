use super::amount::Balance;
use super::types::{Address, Destination};
use crate::error::{EngineError, Result};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The parts of a channel that never change across states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedPart {
    pub participants: Vec<Address>,
    pub channel_nonce: u64,
    pub app_definition: Address,
    pub challenge_duration: u32,
}

impl FixedPart {
    pub fn channel_id(&self) -> Destination {
        let mut hasher = Sha256::new();
        for participant in &self.participants {
            hasher.update(participant.as_bytes());
        }
        hasher.update(self.channel_nonce.to_be_bytes());
        hasher.update(self.app_definition.as_bytes());
        hasher.update(self.challenge_duration.to_be_bytes());
        Destination(hasher.finalize().into())
    }

    pub fn index_of(&self, address: &Address) -> Option<usize> {
        self.participants.iter().position(|p| p == address)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub destination: Address,
    pub amount: Balance,
}

/// How the funds of a single asset are split between destinations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub asset: Address,
    pub allocations: Vec<Allocation>,
}

impl Outcome {
    pub fn total(&self) -> Result<Balance> {
        Balance::try_sum(self.allocations.iter().map(|a| a.amount))
    }

    /// Sum of the allocations strictly before `index`.
    pub fn total_before(&self, index: usize) -> Result<Balance> {
        Balance::try_sum(self.allocations.iter().take(index).map(|a| a.amount))
    }

    pub fn amount_for(&self, destination: &Address) -> Result<Balance> {
        Balance::try_sum(
            self.allocations
                .iter()
                .filter(|a| &a.destination == destination)
                .map(|a| a.amount),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub fixed: FixedPart,
    pub outcome: Outcome,
    pub turn_num: u64,
    pub is_final: bool,
}

impl State {
    pub fn channel_id(&self) -> Destination {
        self.fixed.channel_id()
    }

    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.channel_id().as_bytes());
        hasher.update(self.outcome.asset.as_bytes());
        for allocation in &self.outcome.allocations {
            hasher.update(allocation.destination.as_bytes());
            hasher.update(allocation.amount.0.normalize().to_string().as_bytes());
        }
        hasher.update(self.turn_num.to_be_bytes());
        hasher.update([u8::from(self.is_final)]);
        hasher.finalize().into()
    }

    pub fn sign(&self, key: &SigningKey) -> Signature {
        Signature::sign(key, &self.hash())
    }
}

/// A detached ed25519 signature, hex encoded on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(#[serde(with = "hex::serde")] Vec<u8>);

impl Signature {
    pub fn sign(key: &SigningKey, message: &[u8]) -> Self {
        Self(key.sign(message).to_bytes().to_vec())
    }

    pub fn verify(&self, signer: &Address, message: &[u8]) -> Result<()> {
        let key = VerifyingKey::from_bytes(signer.as_bytes())
            .map_err(|e| EngineError::InvalidSignature(format!("bad key {signer}: {e}")))?;
        let signature = ed25519_dalek::Signature::from_slice(&self.0)
            .map_err(|e| EngineError::InvalidSignature(e.to_string()))?;
        key.verify(message, &signature)
            .map_err(|_| EngineError::InvalidSignature(format!("not signed by {signer}")))
    }
}

/// A state together with whatever participant signatures have been collected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedState {
    pub state: State,
    pub signatures: Vec<Option<Signature>>,
}

impl SignedState {
    pub fn new(state: State) -> Self {
        let signatures = vec![None; state.fixed.participants.len()];
        Self { state, signatures }
    }

    /// Attaches a signature after checking which participant produced it.
    pub fn add_signature(&mut self, signature: Signature) -> Result<usize> {
        let hash = self.state.hash();
        let index = self
            .state
            .fixed
            .participants
            .iter()
            .position(|p| signature.verify(p, &hash).is_ok())
            .ok_or_else(|| {
                EngineError::InvalidSignature(format!(
                    "no participant of {} signed turn {}",
                    self.state.channel_id(),
                    self.state.turn_num
                ))
            })?;
        self.ensure_slots();
        self.signatures[index] = Some(signature);
        Ok(index)
    }

    pub fn sign(&mut self, key: &SigningKey) -> Result<()> {
        let me = Address::from(key);
        let index = self.state.fixed.index_of(&me).ok_or_else(|| {
            EngineError::InvalidSignature(format!(
                "{me} is not a participant of {}",
                self.state.channel_id()
            ))
        })?;
        self.ensure_slots();
        self.signatures[index] = Some(self.state.sign(key));
        Ok(())
    }

    fn ensure_slots(&mut self) {
        self.signatures
            .resize(self.state.fixed.participants.len(), None);
    }

    /// Folds the signatures of `other` into `self`; both must carry the same state.
    pub fn merge(&mut self, other: &SignedState) -> Result<()> {
        if self.state.hash() != other.state.hash() {
            return Err(EngineError::Validation(format!(
                "cannot merge different states for turn {}",
                self.state.turn_num
            )));
        }
        for signature in other.signatures.iter().flatten() {
            self.add_signature(signature.clone())?;
        }
        Ok(())
    }

    pub fn has_signature_for(&self, index: usize) -> bool {
        matches!(self.signatures.get(index), Some(Some(_)))
    }

    pub fn has_all_signatures(&self) -> bool {
        self.signatures.iter().all(Option::is_some)
    }
}
